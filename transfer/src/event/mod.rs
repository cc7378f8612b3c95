//! Canonical change events and their upsert into the in-memory database.

mod transform;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;
use transfer_config::shared::{Mode, TopicConfig};

use crate::bail;
use crate::buffer::{FlushReason, TableData};
use crate::constants::{
    DELETE_COLUMN_MARKER, HISTORY_MODE_SUFFIX, ONLY_SET_DELETE_COLUMN_MARKER,
    OPERATION_COLUMN_MARKER,
};
use crate::database::InMemoryDatabase;
use crate::error::{ErrorKind, TransferResult};
use crate::format::CdcEvent;
use crate::source::Message;
use crate::transfer_error;
use crate::types::{
    Column, Columns, OptionalSchema, RowData, TableId, UpsertColumnArgs,
    collapse_toast_placeholder, escape_name, parse_value, value_to_string,
};

use transform::{build_data, build_filtered_columns, build_primary_keys, transform_data};

/// A normalized change row, ready to be saved into a table buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    table: String,
    table_id: TableId,
    data: RowData,
    optional_schema: Option<OptionalSchema>,
    columns: Option<Columns>,
    deleted: bool,
    /// Sorted so the primary key value of a row is deterministic.
    primary_keys: Vec<String>,
    execution_time: DateTime<Utc>,
    mode: Mode,
}

impl Event {
    /// Builds an event from the output of a format adapter and the topic settings.
    pub fn from_cdc(
        mut cdc_event: CdcEvent,
        primary_key_map: &RowData,
        topic_config: &TopicConfig,
        mode: Mode,
    ) -> TransferResult<Self> {
        let mut columns = build_filtered_columns(cdc_event.columns.take(), topic_config);
        let mut primary_keys = build_primary_keys(topic_config, primary_key_map);

        if let Some(columns) = columns.as_mut() {
            for primary_key in &primary_keys {
                columns.upsert_column(
                    primary_key,
                    UpsertColumnArgs {
                        primary_key: Some(true),
                        ..Default::default()
                    },
                )?;
            }
        }

        let deleted = cdc_event.is_delete();
        let mut data = build_data(&mut cdc_event, primary_key_map, topic_config);

        if topic_config.include_artie_operation {
            data.insert(
                OPERATION_COLUMN_MARKER.to_string(),
                Value::String(cdc_event.operation.as_str().to_string()),
            );
        }

        let mut table = topic_config
            .table_name
            .clone()
            .unwrap_or_else(|| cdc_event.table_name.clone());

        if mode == Mode::History {
            if !table.ends_with(HISTORY_MODE_SUFFIX) {
                warn!(
                    table = %table,
                    suffix = HISTORY_MODE_SUFFIX,
                    "history mode is enabled but the table name has no history suffix, adding it"
                );
                table.push_str(HISTORY_MODE_SUFFIX);
            }

            data.insert(
                OPERATION_COLUMN_MARKER.to_string(),
                Value::String(cdc_event.operation.as_str().to_string()),
            );
            data.remove(DELETE_COLUMN_MARKER);
            data.remove(ONLY_SET_DELETE_COLUMN_MARKER);
        }

        for static_column in &topic_config.static_columns {
            if data.contains_key(&static_column.name) {
                bail!(
                    ErrorKind::InvalidEvent,
                    "Static column collides with event data",
                    format!("static column '{}' is already present", static_column.name)
                );
            }

            data.insert(
                static_column.name.clone(),
                Value::String(static_column.value.clone()),
            );
        }

        primary_keys.sort();

        Ok(Self {
            table_id: TableId::new(&topic_config.schema, &table),
            table,
            data: transform_data(data, topic_config),
            optional_schema: cdc_event.optional_schema,
            columns,
            deleted,
            primary_keys,
            execution_time: cdc_event.execution_time,
            mode,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn data(&self) -> &RowData {
        &self.data
    }

    pub fn columns(&self) -> Option<&Columns> {
        self.columns.as_ref()
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn execution_time(&self) -> DateTime<Utc> {
        self.execution_time
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Checks that the event can be saved, naming the first rule it breaks.
    pub fn validate(&self) -> TransferResult<()> {
        if self.table.trim().is_empty() {
            bail!(ErrorKind::InvalidEvent, "Event validation failed", "table name is empty");
        }

        if self.primary_keys.is_empty() {
            bail!(ErrorKind::InvalidEvent, "Event validation failed", "primary keys are empty");
        }

        if self.data.is_empty() {
            bail!(ErrorKind::InvalidEvent, "Event validation failed", "event has no data");
        }

        // History rows carry the operation instead of the delete marker.
        if self.mode != Mode::History && !self.data.contains_key(DELETE_COLUMN_MARKER) {
            bail!(
                ErrorKind::InvalidEvent,
                "Event validation failed",
                "delete column marker does not exist"
            );
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Returns the deterministic row key, `key=value` pairs over the sorted primary keys.
    pub fn primary_key_value(&self) -> TransferResult<String> {
        let mut key = String::new();
        for primary_key in &self.primary_keys {
            let Some(value) = self.data.get(primary_key) else {
                bail!(
                    ErrorKind::InvalidEvent,
                    "Primary key not found in event data",
                    format!("primary key '{primary_key}' is missing from table '{}'", self.table)
                );
            };

            key.push_str(primary_key);
            key.push('=');
            key.push_str(&value_to_string(value));
        }

        Ok(key)
    }

    /// Upserts the event into its table buffer and reports whether the table must be flushed.
    ///
    /// An invalid event fails without touching the buffer. Column names are normalized, TOAST
    /// placeholders mark their column as toasted without affecting its kind, and new columns
    /// are appended to the registry.
    pub async fn save(
        mut self,
        database: &InMemoryDatabase,
        topic_config: &TopicConfig,
        message: &Message,
    ) -> TransferResult<Option<FlushReason>> {
        self.validate()?;

        let table = database.get_or_create_table(&self.table_id, &topic_config.topic);
        let mut buffer = table.lock().await;

        let starts_window = buffer.is_empty();
        if starts_window {
            buffer.set_table_data(TableData::new(
                self.table_id.clone(),
                &self.table,
                self.mode,
                self.columns.take().unwrap_or_default(),
                self.primary_keys.clone(),
                topic_config.clone(),
            ));
        }

        let Some(table_data) = buffer.table_data_mut() else {
            return Err(transfer_error!(
                ErrorKind::InvalidState,
                "Table buffer has no data after initialization",
                self.table_id.to_string()
            ));
        };

        if !starts_window && let Some(columns) = self.columns.take() {
            for column in columns.columns() {
                table_data.add_in_memory_column(column.clone());
            }
        }

        let mut sanitized = RowData::with_capacity(self.data.len());
        for (column, mut value) in std::mem::take(&mut self.data) {
            let name = escape_name(&column);

            if collapse_toast_placeholder(&mut value) {
                table_data.columns_mut().upsert_column(
                    &name,
                    UpsertColumnArgs {
                        toasted: Some(true),
                        ..Default::default()
                    },
                )?;
            } else {
                let existing_kind = table_data
                    .columns()
                    .get_column(&name)
                    .map(Column::kind_details);

                match existing_kind {
                    None => {
                        let kind = parse_value(&column, self.optional_schema.as_ref(), &value);
                        table_data.add_in_memory_column(Column::new(&name, kind));
                    }
                    Some(kind) if kind.is_invalid() => {
                        let kind = parse_value(&column, self.optional_schema.as_ref(), &value);
                        table_data.columns_mut().upgrade_kind(&name, kind);
                    }
                    Some(_) => {}
                }
            }

            sanitized.insert(name, value);
        }
        self.data = sanitized;

        let primary_key_value = self.primary_key_value()?;
        table_data.insert_row(primary_key_value, self.data, self.deleted);
        table_data.set_latest_cdc_ts(self.execution_time);
        table_data.record_message(message.clone());

        Ok(table_data.should_flush(database.thresholds()))
    }
}
