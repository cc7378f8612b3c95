//! Metrics definitions for consumer and flush monitoring.

/// Label for the source topic.
pub const TOPIC_LABEL: &str = "topic";

/// Label for the source partition.
pub const PARTITION_LABEL: &str = "partition";

/// Label for the destination table name.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the destination name.
pub const DESTINATION_LABEL: &str = "destination";

/// Label for the write mode, `replication` or `history`.
pub const MODE_LABEL: &str = "mode";

/// Label for the flush trigger, `rows`, `size`, `time` or `shutdown`.
pub const REASON_LABEL: &str = "reason";

/// Label for the outcome of a flush or a message.
pub const OUTCOME_LABEL: &str = "outcome";

// Ingestion metrics

/// Gauge of messages left in a partition after the one just read.
pub const TRANSFER_PARTITION_LAG: &str = "transfer_partition_lag";

/// Gauge of milliseconds between the source commit and ingestion of a row.
pub const TRANSFER_INGESTION_LAG_MS: &str = "transfer_ingestion_lag_ms";

/// Counter of processed messages by outcome.
pub const TRANSFER_MESSAGES_PROCESSED_TOTAL: &str = "transfer_messages_processed_total";

// Flush metrics

/// Histogram of table flush durations in seconds.
pub const TRANSFER_FLUSH_DURATION_SECONDS: &str = "transfer_flush_duration_seconds";

/// Counter of table flushes by outcome.
pub const TRANSFER_FLUSHES_TOTAL: &str = "transfer_flushes_total";

/// Histogram of rows written per table flush.
pub const TRANSFER_FLUSH_ROWS: &str = "transfer_flush_rows";
