use chrono::Utc;
use metrics::{counter, gauge};
use tracing::debug;
use transfer_config::shared::{Mode, TopicConfig};

use crate::bail;
use crate::buffer::FlushReason;
use crate::database::InMemoryDatabase;
use crate::error::{ErrorKind, TransferResult};
use crate::event::Event;
use crate::format::{FormatAdapter, FormatKind};
use crate::metrics::{
    MODE_LABEL, OUTCOME_LABEL, PARTITION_LABEL, TOPIC_LABEL, TRANSFER_INGESTION_LAG_MS,
    TRANSFER_MESSAGES_PROCESSED_TOTAL, TRANSFER_PARTITION_LAG,
};
use crate::source::Message;

/// Turns the messages of one topic into buffered rows.
#[derive(Debug, Clone)]
pub struct TopicProcessor {
    topic_config: TopicConfig,
    format: FormatKind,
    mode: Mode,
}

impl TopicProcessor {
    pub fn new(topic_config: TopicConfig, mode: Mode) -> Self {
        Self {
            format: FormatKind::from(topic_config.cdc_format),
            topic_config,
            mode,
        }
    }

    pub fn topic_config(&self) -> &TopicConfig {
        &self.topic_config
    }

    pub fn topic(&self) -> &str {
        &self.topic_config.topic
    }

    /// Decodes `message`, saves its row and returns the flush reason if a threshold was crossed.
    ///
    /// Tombstones are ignored since the delete before them already carried the row.
    pub async fn process_message(
        &self,
        database: &InMemoryDatabase,
        message: &Message,
    ) -> TransferResult<Option<FlushReason>> {
        if message.is_tombstone() {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "skipping tombstone"
            );
            return Ok(None);
        }

        let Some(key) = message.key.as_deref() else {
            bail!(
                ErrorKind::DeserializationError,
                "Message has no key",
                format!("partition {} offset {}", message.partition, message.offset)
            );
        };
        let value = message.value.as_deref().unwrap_or_default();

        let primary_key_map = self
            .format
            .primary_key(key, self.topic_config.cdc_key_format)?;
        let cdc_event = self.format.event_from_bytes(value)?;

        gauge!(
            TRANSFER_PARTITION_LAG,
            TOPIC_LABEL => message.topic.clone(),
            PARTITION_LABEL => message.partition.to_string(),
        )
        .set(message.partition_lag() as f64);
        gauge!(TRANSFER_INGESTION_LAG_MS, TOPIC_LABEL => message.topic.clone())
            .set((Utc::now() - cdc_event.execution_time).num_milliseconds() as f64);

        let event = Event::from_cdc(cdc_event, &primary_key_map, &self.topic_config, self.mode)?;
        let reason = event.save(database, &self.topic_config, message).await?;

        counter!(
            TRANSFER_MESSAGES_PROCESSED_TOTAL,
            TOPIC_LABEL => message.topic.clone(),
            MODE_LABEL => self.mode.as_str(),
            OUTCOME_LABEL => "saved",
        )
        .increment(1);

        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::source::AckMode;
    use crate::types::TableId;

    fn message(key: Option<&str>, value: Option<&str>) -> Message {
        Message {
            topic: "dbserver1.public.orders".to_string(),
            partition: 0,
            offset: 3,
            key: key.map(|key| key.as_bytes().to_vec()),
            value: value.map(|value| value.as_bytes().to_vec()),
            high_water_mark: 10,
            published_at: None,
            ack_mode: AckMode::LatestPerPartition,
        }
    }

    fn processor() -> TopicProcessor {
        TopicProcessor::new(
            TopicConfig::new("shop", "public", "dbserver1.public.orders"),
            Mode::Replication,
        )
    }

    #[tokio::test]
    async fn saves_debezium_messages() {
        let database = InMemoryDatabase::default();
        let value = json!({
            "after": {"id": 1, "name": "robin"},
            "source": {"ts_ms": 1_700_000_000_000i64, "table": "orders"},
            "op": "c"
        })
        .to_string();

        let reason = processor()
            .process_message(&database, &message(Some(r#"{"id": 1}"#), Some(&value)))
            .await
            .unwrap();
        assert_eq!(reason, None);

        let table = database
            .get_table(&TableId::new("public", "orders"))
            .unwrap();
        let buffer = table.lock().await;
        let table_data = buffer.table_data().unwrap();
        assert_eq!(table_data.rows_data()["id=1"]["name"], json!("robin"));
        assert_eq!(table_data.last_messages()[0].offset, 3);
    }

    #[tokio::test]
    async fn tombstones_are_skipped() {
        let database = InMemoryDatabase::default();
        let reason = processor()
            .process_message(&database, &message(Some(r#"{"id": 1}"#), None))
            .await
            .unwrap();

        assert_eq!(reason, None);
        assert_eq!(database.table_count(), 0);
    }

    #[tokio::test]
    async fn malformed_messages_fail() {
        let database = InMemoryDatabase::default();

        let err = processor()
            .process_message(&database, &message(None, Some("{}")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);

        assert!(
            processor()
                .process_message(&database, &message(Some(r#"{"id": 1}"#), Some("not json")))
                .await
                .is_err()
        );
        assert_eq!(database.table_count(), 0);
    }
}
