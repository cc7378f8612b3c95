use std::time::Duration;

use tokio::time::Instant;

use crate::buffer::TableData;
use crate::types::TableId;

/// Cooldowns above this value are shaved by [`COOLDOWN_CONFIDENCE`].
const COOLDOWN_SHAVE_THRESHOLD: Duration = Duration::from_secs(60);

/// Share of a long cooldown a table must wait before a periodic sweep flushes it again.
const COOLDOWN_CONFIDENCE: f64 = 0.75;

/// Buffer of one table, guarded by its own lock in the in-memory database.
///
/// The buffered [`TableData`] is dropped after a successful flush while the buffer itself,
/// and its last flush time, live until shutdown.
#[derive(Debug)]
pub struct TableBuffer {
    table_id: TableId,
    topic: String,
    table_data: Option<TableData>,
    last_flush_time: Option<Instant>,
}

impl TableBuffer {
    pub fn new(table_id: TableId, topic: impl Into<String>) -> Self {
        Self {
            table_id,
            topic: topic.into(),
            table_data: None,
            last_flush_time: None,
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns `true` if no rows are buffered.
    pub fn is_empty(&self) -> bool {
        self.table_data.as_ref().is_none_or(TableData::is_empty)
    }

    pub fn table_data(&self) -> Option<&TableData> {
        self.table_data.as_ref()
    }

    pub fn table_data_mut(&mut self) -> Option<&mut TableData> {
        self.table_data.as_mut()
    }

    /// Replaces the buffered data, e.g. to start a new buffering window.
    pub fn set_table_data(&mut self, table_data: TableData) {
        self.table_data = Some(table_data);
    }

    /// Drops the buffered data after a flush and records the flush time.
    pub fn wipe(&mut self) {
        self.table_data = None;
        self.last_flush_time = Some(Instant::now());
    }

    pub fn last_flush_time(&self) -> Option<Instant> {
        self.last_flush_time
    }

    /// Returns `true` if the table was flushed within `cooldown`.
    ///
    /// Cooldowns longer than a minute are shaved to 75% so a sweep does not miss a table that
    /// was flushed shortly before the previous sweep.
    pub fn should_skip_flush(&self, cooldown: Duration) -> bool {
        let Some(last_flush_time) = self.last_flush_time else {
            return false;
        };

        let cooldown = if cooldown > COOLDOWN_SHAVE_THRESHOLD {
            cooldown.mul_f64(COOLDOWN_CONFIDENCE)
        } else {
            cooldown
        };

        last_flush_time.elapsed() < cooldown
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use transfer_config::shared::{Mode, TopicConfig};

    use super::*;
    use crate::types::{Columns, RowData};

    fn buffer_with_row() -> TableBuffer {
        let mut buffer = TableBuffer::new(TableId::new("public", "orders"), "orders");
        let mut table_data = TableData::new(
            TableId::new("public", "orders"),
            "orders",
            Mode::Replication,
            Columns::default(),
            vec!["id".to_string()],
            TopicConfig::new("shop", "public", "orders"),
        );
        table_data.insert_row(
            "id=1".to_string(),
            RowData::from([("id".to_string(), json!(1))]),
            false,
        );
        buffer.set_table_data(table_data);
        buffer
    }

    #[test]
    fn wipe_empties_and_records_flush_time() {
        let mut buffer = buffer_with_row();
        assert!(!buffer.is_empty());
        assert!(buffer.last_flush_time().is_none());

        buffer.wipe();
        assert!(buffer.is_empty());
        assert!(buffer.table_data().is_none());
        assert!(buffer.last_flush_time().is_some());
    }

    #[test]
    fn never_flushed_tables_are_not_skipped() {
        let buffer = buffer_with_row();
        assert!(!buffer.should_skip_flush(Duration::from_secs(600)));
    }

    #[tokio::test(start_paused = true)]
    async fn long_cooldowns_are_shaved() {
        let cooldown = Duration::from_secs(600);
        let mut buffer = buffer_with_row();
        buffer.wipe();

        tokio::time::advance(cooldown.mul_f64(0.5)).await;
        assert!(buffer.should_skip_flush(cooldown));

        tokio::time::advance(cooldown.mul_f64(0.4)).await;
        assert!(!buffer.should_skip_flush(cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn short_cooldowns_are_not_shaved() {
        let cooldown = Duration::from_secs(10);
        let mut buffer = buffer_with_row();
        buffer.wipe();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(buffer.should_skip_flush(cooldown));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!buffer.should_skip_flush(cooldown));
    }
}
