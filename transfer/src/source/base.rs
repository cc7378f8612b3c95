use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::TransferResult;

/// How a source acknowledges consumed messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Committing a message acknowledges every earlier message of its partition, as in Kafka.
    #[default]
    LatestPerPartition,
    /// Every message is acknowledged on its own.
    EveryMessage,
}

/// A message read from a source queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// `None` or empty for tombstones.
    pub value: Option<Vec<u8>>,
    /// Offset of the next message to be written to the partition, used for lag reporting.
    pub high_water_mark: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub ack_mode: AckMode,
}

impl Message {
    /// Returns `true` if the message has no value, as sent by Kafka after a delete.
    pub fn is_tombstone(&self) -> bool {
        self.value.as_ref().is_none_or(|value| value.is_empty())
    }

    /// Number of messages left in the partition after this one.
    pub fn partition_lag(&self) -> i64 {
        (self.high_water_mark - self.offset - 1).max(0)
    }
}

/// Collapses the messages of one topic into the ones that must be committed.
///
/// Partitions acknowledged by offset keep only their highest message. Messages acknowledged
/// one by one are all kept, once each, in offset order.
pub fn messages_to_commit(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    let mut partitions: BTreeMap<i32, BTreeMap<i64, Message>> = BTreeMap::new();
    for message in messages {
        let partition = partitions.entry(message.partition).or_default();
        match message.ack_mode {
            AckMode::LatestPerPartition => {
                let is_newer = partition
                    .last_key_value()
                    .is_none_or(|(offset, _)| *offset < message.offset);
                if is_newer {
                    partition.clear();
                    partition.insert(message.offset, message);
                }
            }
            AckMode::EveryMessage => {
                partition.insert(message.offset, message);
            }
        }
    }

    partitions
        .into_values()
        .flat_map(BTreeMap::into_values)
        .collect()
}

/// A queue of change messages with manual offset commits.
///
/// Messages are committed only after their rows have been merged into the destination.
pub trait SourceQueue {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Waits for the next message. Returns `None` once the queue is closed.
    fn read_message(&self) -> impl Future<Output = TransferResult<Option<Message>>> + Send;

    /// Commits the given messages.
    ///
    /// With [`AckMode::LatestPerPartition`] each message is the highest one merged from its
    /// partition. With [`AckMode::EveryMessage`] every merged message is listed.
    fn commit_messages(&self, messages: &[Message])
    -> impl Future<Output = TransferResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(offset: i64, high_water_mark: i64, value: Option<Vec<u8>>) -> Message {
        Message {
            topic: "orders".to_string(),
            partition: 0,
            offset,
            key: None,
            value,
            high_water_mark,
            published_at: None,
            ack_mode: AckMode::LatestPerPartition,
        }
    }

    fn at(partition: i32, offset: i64, ack_mode: AckMode) -> Message {
        Message {
            partition,
            ack_mode,
            ..message(offset, offset + 1, None)
        }
    }

    fn positions(messages: &[Message]) -> Vec<(i32, i64)> {
        messages
            .iter()
            .map(|message| (message.partition, message.offset))
            .collect()
    }

    #[test]
    fn tombstones_have_no_value() {
        assert!(message(0, 1, None).is_tombstone());
        assert!(message(0, 1, Some(vec![])).is_tombstone());
        assert!(!message(0, 1, Some(b"{}".to_vec())).is_tombstone());
    }

    #[test]
    fn partition_lag_is_never_negative() {
        assert_eq!(message(5, 10, None).partition_lag(), 4);
        assert_eq!(message(9, 10, None).partition_lag(), 0);
        assert_eq!(message(9, 0, None).partition_lag(), 0);
    }

    #[test]
    fn highest_offset_wins_per_partition() {
        let messages = messages_to_commit([
            at(0, 7, AckMode::LatestPerPartition),
            at(1, 2, AckMode::LatestPerPartition),
            at(0, 3, AckMode::LatestPerPartition),
            at(0, 9, AckMode::LatestPerPartition),
        ]);

        assert_eq!(positions(&messages), vec![(0, 9), (1, 2)]);
    }

    #[test]
    fn individually_acked_messages_are_all_kept_once() {
        let messages = messages_to_commit([
            at(0, 4, AckMode::EveryMessage),
            at(0, 1, AckMode::EveryMessage),
            at(0, 4, AckMode::EveryMessage),
            at(1, 0, AckMode::EveryMessage),
        ]);

        assert_eq!(positions(&messages), vec![(0, 1), (0, 4), (1, 0)]);
    }
}
