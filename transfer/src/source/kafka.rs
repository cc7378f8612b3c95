use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message as KafkaMessage, Offset, TopicPartitionList};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use transfer_config::shared::KafkaConfig;

use crate::error::{ErrorKind, TransferResult};
use crate::source::{AckMode, Message, SourceQueue};
use crate::transfer_error;

/// Consumer group session timeout.
const SESSION_TIMEOUT_MS: &str = "30000";

/// Kafka consumer for a single topic with manual offset commits.
///
/// Auto commit is disabled: offsets are committed only once the rows read from them have
/// been merged. A committed offset is the offset of the next message to read, so the
/// offset of the last merged message plus one.
#[derive(Clone)]
pub struct KafkaQueue {
    topic: String,
    consumer: Arc<StreamConsumer>,
}

impl KafkaQueue {
    /// Creates a consumer in the configured group and subscribes it to `topic`.
    pub fn new(config: &KafkaConfig, topic: &str) -> TransferResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", SESSION_TIMEOUT_MS);

        if let Some(username) = &config.username {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username);

            if let Some(password) = &config.password {
                client_config.set("sasl.password", password.expose_secret());
            }
        }

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        info!(topic, group_id = %config.group_id, "subscribed kafka consumer");

        Ok(Self {
            topic: topic.to_string(),
            consumer: Arc::new(consumer),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl SourceQueue for KafkaQueue {
    fn name() -> &'static str {
        "kafka"
    }

    async fn read_message(&self) -> TransferResult<Option<Message>> {
        let message = self.consumer.recv().await?;

        // Watermarks come from the client cache and are only used for lag reporting.
        let high_water_mark = match self
            .consumer
            .get_watermark_offsets(message.topic(), message.partition())
        {
            Ok((_, high)) => high,
            Err(err) => {
                debug!(error = %err, "high-water mark is not available yet");
                message.offset() + 1
            }
        };

        Ok(Some(Message {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            high_water_mark,
            published_at: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
            ack_mode: AckMode::LatestPerPartition,
        }))
    }

    async fn commit_messages(&self, messages: &[Message]) -> TransferResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut partitions = TopicPartitionList::new();
        for message in messages {
            partitions.add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&partitions, CommitMode::Sync))
            .await
            .map_err(|err| {
                transfer_error!(
                    ErrorKind::CommitFailed,
                    "Kafka commit task failed",
                    err.to_string()
                )
            })?
            .map_err(|err| {
                warn!(topic = %self.topic, error = %err, "failed to commit offsets");
                transfer_error!(ErrorKind::CommitFailed, "Kafka commit failed", source: err)
            })?;

        Ok(())
    }
}

impl fmt::Debug for KafkaQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaQueue")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
