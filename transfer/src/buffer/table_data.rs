use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use transfer_config::shared::{Mode, TopicConfig, TransferConfig};

use crate::source::{AckMode, Message};
use crate::types::{
    Column, Columns, DatabaseSchemaPair, KindDetails, RowData, TableId, estimate_row_bytes,
    is_toast_placeholder,
};

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The buffer reached the row limit.
    Rows,
    /// The buffer reached the size limit.
    Size,
    /// Periodic sweep.
    Time,
    /// Final flush before the consumer exits.
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Rows => "rows",
            FlushReason::Size => "size",
            FlushReason::Time => "time",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buffer limits that trigger an immediate flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub buffer_rows: usize,
    pub flush_size_kb: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            buffer_rows: TransferConfig::DEFAULT_BUFFER_ROWS,
            flush_size_kb: TransferConfig::DEFAULT_FLUSH_SIZE_KB,
        }
    }
}

impl From<&TransferConfig> for FlushThresholds {
    fn from(config: &TransferConfig) -> Self {
        Self {
            buffer_rows: config.buffer_rows,
            flush_size_kb: config.flush_size_kb,
        }
    }
}

/// Rows and columns buffered for one table since its last flush.
#[derive(Debug, Clone)]
pub struct TableData {
    table_id: TableId,
    /// Name of the table in the destination.
    name: String,
    mode: Mode,
    topic_config: TopicConfig,
    columns: Columns,
    /// Replication mode rows keyed by primary key value.
    rows_data: HashMap<String, RowData>,
    /// History mode rows, append-only.
    rows: Vec<RowData>,
    primary_keys: Vec<String>,
    /// Messages to commit once the rows are merged, by partition.
    partitions_to_messages: BTreeMap<i32, Vec<Message>>,
    latest_cdc_ts: Option<DateTime<Utc>>,
    approx_size: usize,
    /// Set when the buffer holds rows other than deletes.
    contain_other_operations: bool,
    /// Set when the buffer holds deletes that must remove rows in the destination.
    contains_hard_deletes: bool,
}

impl TableData {
    pub fn new(
        table_id: TableId,
        name: impl Into<String>,
        mode: Mode,
        columns: Columns,
        primary_keys: Vec<String>,
        topic_config: TopicConfig,
    ) -> Self {
        Self {
            table_id,
            name: name.into(),
            mode,
            topic_config,
            columns,
            rows_data: HashMap::new(),
            rows: Vec::new(),
            primary_keys,
            partitions_to_messages: BTreeMap::new(),
            latest_cdc_ts: None,
            approx_size: 0,
            contain_other_operations: false,
            contains_hard_deletes: false,
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn topic_config(&self) -> &TopicConfig {
        &self.topic_config
    }

    pub fn database_schema_pair(&self) -> DatabaseSchemaPair {
        DatabaseSchemaPair::from(&self.topic_config)
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut Columns {
        &mut self.columns
    }

    /// Adds a column declared by an event. Existing columns are left untouched.
    pub fn add_in_memory_column(&mut self, column: Column) {
        self.columns.add_column(column);
    }

    pub fn number_of_rows(&self) -> usize {
        match self.mode {
            Mode::History => self.rows.len(),
            Mode::Replication => self.rows_data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_rows() == 0
    }

    /// Returns `true` if a flush has nothing to write.
    pub fn should_skip_update(&self) -> bool {
        self.is_empty() || self.columns.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn contains_hard_deletes(&self) -> bool {
        self.contains_hard_deletes
    }

    pub fn contain_other_operations(&self) -> bool {
        self.contain_other_operations
    }

    pub fn latest_cdc_ts(&self) -> Option<DateTime<Utc>> {
        self.latest_cdc_ts
    }

    /// Advances the latest source commit time seen by this buffer.
    pub fn set_latest_cdc_ts(&mut self, execution_time: DateTime<Utc>) {
        if self.latest_cdc_ts.is_none_or(|latest| latest < execution_time) {
            self.latest_cdc_ts = Some(execution_time);
        }
    }

    /// Returns the buffered rows. Replication rows come in no particular order.
    pub fn rows(&self) -> Vec<&RowData> {
        match self.mode {
            Mode::History => self.rows.iter().collect(),
            Mode::Replication => self.rows_data.values().collect(),
        }
    }

    /// Returns the replication rows keyed by primary key value.
    pub fn rows_data(&self) -> &HashMap<String, RowData> {
        &self.rows_data
    }

    /// Inserts or replaces the row stored under `primary_key`.
    ///
    /// TOAST placeholders take the value of the previous row, and columns absent from `row`
    /// are carried over from it. History mode appends instead.
    pub fn insert_row(&mut self, primary_key: String, mut row: RowData, deleted: bool) {
        if self.mode == Mode::History {
            self.approx_size = self.approx_size.saturating_add(estimate_row_bytes(&row));
            self.rows.push(row);
            return;
        }

        let mut previous_size = 0;
        if let Some(mut previous) = self.rows_data.remove(&primary_key) {
            previous_size = estimate_row_bytes(&previous);

            for (column, value) in row.iter_mut() {
                if is_toast_placeholder(value)
                    && let Some(previous_value) = previous.remove(column)
                {
                    *value = previous_value;
                }
            }

            for (column, value) in previous {
                row.entry(column).or_insert(value);
            }
        }

        let new_size = estimate_row_bytes(&row);
        self.approx_size = self
            .approx_size
            .saturating_add(new_size)
            .saturating_sub(previous_size);
        self.rows_data.insert(primary_key, row);

        if !deleted {
            self.contain_other_operations = true;
        }

        if deleted && !self.topic_config.soft_delete {
            self.contains_hard_deletes = true;
        }
    }

    /// Records `message` for the commit that follows the next successful merge.
    ///
    /// Sources acknowledging by offset only need the latest message of a partition, the others
    /// need every message.
    pub fn record_message(&mut self, message: Message) {
        let messages = self
            .partitions_to_messages
            .entry(message.partition)
            .or_default();
        if message.ack_mode == AckMode::LatestPerPartition {
            messages.clear();
        }
        messages.push(message);
    }

    /// Returns the messages to commit, ordered by partition and then by read order.
    pub fn last_messages(&self) -> Vec<Message> {
        self.partitions_to_messages
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Returns why the buffer must be flushed now, if it must.
    pub fn should_flush(&self, thresholds: &FlushThresholds) -> Option<FlushReason> {
        if self.number_of_rows() >= thresholds.buffer_rows {
            return Some(FlushReason::Rows);
        }

        if self.approx_size >= thresholds.flush_size_kb.saturating_mul(1024) {
            return Some(FlushReason::Size);
        }

        None
    }

    /// Adopts what the destination knows about columns it already has.
    ///
    /// Kinds come from the destination except when a decimal would be narrowed to an integer.
    /// Backfill state always comes from the destination.
    pub fn merge_columns_from_destination(&mut self, destination_columns: &Columns) {
        let updated: Vec<Column> = self
            .columns
            .columns()
            .iter()
            .filter_map(|in_memory| {
                let found = destination_columns.get_column(&in_memory.name().to_lowercase())?;
                let mut column = in_memory.clone();

                let narrows_decimal =
                    matches!(in_memory.kind_details(), KindDetails::Decimal { .. })
                        && found.kind_details() == KindDetails::Integer;
                if !narrows_decimal {
                    column = column.with_kind_details(found.kind_details());
                }
                column.set_backfilled(found.backfilled());

                Some(column)
            })
            .collect();

        for column in updated {
            self.columns.update_column(column);
        }
    }
}
