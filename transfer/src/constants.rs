//! Reserved column names and sentinel values.

/// Set on every row; `true` when the row was deleted at the source.
pub const DELETE_COLUMN_MARKER: &str = "__artie_delete";

/// Set together with [`DELETE_COLUMN_MARKER`] when only the delete flag must be written.
pub const ONLY_SET_DELETE_COLUMN_MARKER: &str = "__artie_only_set_delete";

/// Ingestion wall-clock time.
pub const UPDATE_COLUMN_MARKER: &str = "__artie_updated_at";

/// Source commit time.
pub const DATABASE_UPDATED_COLUMN_MARKER: &str = "__artie_db_updated_at";

/// Change operation, one of `c`, `u`, `d` or `r`.
pub const OPERATION_COLUMN_MARKER: &str = "__artie_operation";

/// System columns kept even when an include-list filters the data.
pub const ARTIE_COLUMNS: [&str; 5] = [
    DELETE_COLUMN_MARKER,
    ONLY_SET_DELETE_COLUMN_MARKER,
    UPDATE_COLUMN_MARKER,
    DATABASE_UPDATED_COLUMN_MARKER,
    OPERATION_COLUMN_MARKER,
];

/// Sent by Debezium in place of an unchanged TOAST value.
pub const TOAST_UNAVAILABLE_VALUE_PLACEHOLDER: &str = "__debezium_unavailable_value";

/// Suffix of the tables written in history mode.
pub const HISTORY_MODE_SUFFIX: &str = "__history";

/// Key field added by Debezium's topic routing; never part of the primary key.
pub const DEBEZIUM_PHYSICAL_TABLE_IDENTIFIER: &str = "__dbz__physicalTableIdentifier";
