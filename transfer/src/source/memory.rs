use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::TransferResult;
use crate::source::{AckMode, Message, SourceQueue};

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Message>,
    next_offsets: HashMap<i32, i64>,
    closed: bool,
    commits: Vec<Vec<Message>>,
    committed_offsets: BTreeMap<i32, i64>,
}

/// In-process queue for a single topic.
///
/// Messages pushed by the embedding application get consecutive offsets per partition.
/// Commits are recorded so callers can check which offsets were acknowledged.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    topic: String,
    ack_mode: AckMode,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ack_mode: AckMode::default(),
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Sets how messages pushed from now on are acknowledged.
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueues a message and returns it with its assigned offset.
    pub fn push(&self, partition: i32, key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> Message {
        let message = {
            let mut inner = self.inner.lock();
            let next_offset = inner.next_offsets.entry(partition).or_insert(0);
            let offset = *next_offset;
            *next_offset += 1;

            let message = Message {
                topic: self.topic.clone(),
                partition,
                offset,
                key,
                value,
                high_water_mark: offset + 1,
                published_at: Some(Utc::now()),
                ack_mode: self.ack_mode,
            };
            inner.pending.push_back(message.clone());

            message
        };

        self.notify.notify_waiters();
        message
    }

    /// Closes the queue. Readers drain what is pending and then receive `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Returns every commit call in order.
    pub fn commits(&self) -> Vec<Vec<Message>> {
        self.inner.lock().commits.clone()
    }

    /// Returns the committed offset of every partition.
    ///
    /// This is the offset of the last committed message, a Kafka commit would store it + 1.
    pub fn committed_offsets(&self) -> BTreeMap<i32, i64> {
        self.inner.lock().committed_offsets.clone()
    }
}

impl SourceQueue for MemoryQueue {
    fn name() -> &'static str {
        "memory"
    }

    async fn read_message(&self) -> TransferResult<Option<Message>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(message) = inner.pending.pop_front() {
                    // The high-water mark is the partition's next offset at read time.
                    let high_water_mark = inner
                        .next_offsets
                        .get(&message.partition)
                        .copied()
                        .unwrap_or(message.offset + 1);

                    return Ok(Some(Message {
                        high_water_mark,
                        ..message
                    }));
                }

                if inner.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn commit_messages(&self, messages: &[Message]) -> TransferResult<()> {
        let mut inner = self.inner.lock();
        for message in messages {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "committing message"
            );

            let committed = inner
                .committed_offsets
                .entry(message.partition)
                .or_insert(message.offset);
            *committed = (*committed).max(message.offset);
        }
        inner.commits.push(messages.to_vec());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn offsets_are_assigned_per_partition() {
        let queue = MemoryQueue::new("orders");
        assert_eq!(queue.push(0, None, Some(b"a".to_vec())).offset, 0);
        assert_eq!(queue.push(1, None, Some(b"b".to_vec())).offset, 0);
        assert_eq!(queue.push(0, None, Some(b"c".to_vec())).offset, 1);

        let first = queue.read_message().await.unwrap().unwrap();
        assert_eq!((first.partition, first.offset), (0, 0));
        assert_eq!(first.high_water_mark, 2);
        assert_eq!(first.partition_lag(), 1);
        assert_eq!(queue.pending(), 2);
    }

    #[tokio::test]
    async fn read_waits_for_push_and_ends_on_close() {
        let queue = MemoryQueue::new("orders");

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut offsets = Vec::new();
                while let Some(message) = queue.read_message().await.unwrap() {
                    offsets.push(message.offset);
                }
                offsets
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(0, None, Some(b"a".to_vec()));
        queue.push(0, None, Some(b"b".to_vec()));
        assert!(!queue.is_closed());
        queue.close();
        assert!(queue.is_closed());

        let offsets = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offsets, vec![0, 1]);
    }

    #[tokio::test]
    async fn commits_are_recorded() {
        let queue = MemoryQueue::new("orders");
        let first = queue.push(0, None, Some(b"a".to_vec()));
        let second = queue.push(0, None, Some(b"b".to_vec()));

        queue.commit_messages(&[second.clone()]).await.unwrap();
        queue.commit_messages(&[first]).await.unwrap();

        assert_eq!(queue.commits().len(), 2);
        assert_eq!(queue.committed_offsets()[&0], second.offset);
    }
}
