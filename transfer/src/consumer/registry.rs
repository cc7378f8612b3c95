use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::TransferResult;
use crate::source::{Message, SourceQueue};

/// The source queue of one topic together with its processing lock.
///
/// The reader holds the lock while it processes a message, and a timed flush holds it for the
/// whole sweep of the topic, so offsets are never committed while a message is half applied.
#[derive(Debug)]
pub struct ConsumerHandle<Q> {
    topic: String,
    queue: Q,
    lock: Mutex<()>,
}

impl<Q> ConsumerHandle<Q>
where
    Q: SourceQueue,
{
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Takes the processing lock of the topic.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub async fn commit_messages(&self, messages: &[Message]) -> TransferResult<()> {
        self.queue.commit_messages(messages).await
    }
}

/// Consumers by topic, built once at startup.
#[derive(Debug)]
pub struct ConsumerRegistry<Q> {
    consumers: HashMap<String, Arc<ConsumerHandle<Q>>>,
}

impl<Q> ConsumerRegistry<Q>
where
    Q: SourceQueue,
{
    pub fn new() -> Self {
        Self {
            consumers: HashMap::new(),
        }
    }

    /// Registers the queue of `topic`, replacing a previous registration.
    pub fn register(&mut self, topic: impl Into<String>, queue: Q) -> Arc<ConsumerHandle<Q>> {
        let topic = topic.into();
        let handle = Arc::new(ConsumerHandle {
            topic: topic.clone(),
            queue,
            lock: Mutex::new(()),
        });
        self.consumers.insert(topic, Arc::clone(&handle));

        handle
    }

    pub fn get(&self, topic: &str) -> Option<Arc<ConsumerHandle<Q>>> {
        self.consumers.get(topic).cloned()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.consumers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl<Q> Default for ConsumerRegistry<Q>
where
    Q: SourceQueue,
{
    fn default() -> Self {
        Self::new()
    }
}
