use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use transfer_config::shared::{Mode, TopicConfig};

use crate::buffer::FlushThresholds;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::consumer::{ConsumerRegistry, FlushTicker, Reader, TopicProcessor};
use crate::database::InMemoryDatabase;
use crate::destination::memory::MemoryDestination;
use crate::error::{ErrorKind, TransferError, TransferResult};
use crate::flush::{FlushArgs, Flusher};
use crate::retry::RetryConfig;
use crate::source::memory::MemoryQueue;
use crate::test_utils::test_destination_wrapper::{PIPELINE_WAIT_TIMEOUT, TestDestinationWrapper};
use crate::transfer_error;

pub type TestDestination = TestDestinationWrapper<MemoryDestination>;
pub type TestFlusher = Flusher<TestDestination, MemoryQueue>;

/// Retries quickly and at most three times, so failure tests stay fast.
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig::jitter(1, 5, 3, |_| true)
}

/// Readers, ticker and flusher over in-memory queues and a tracked memory destination.
///
/// Nothing runs until [`TestPipeline::start`] or [`TestPipeline::start_ticker`] is called, so
/// tests can also drive the flusher by hand.
#[derive(Debug)]
pub struct TestPipeline {
    topic_configs: Vec<TopicConfig>,
    mode: Mode,
    queues: HashMap<String, MemoryQueue>,
    flusher: TestFlusher,
    shutdown_tx: ShutdownTx,
    /// Reader tasks with the topic they read.
    readers: Vec<(String, JoinHandle<TransferResult<()>>)>,
    ticker: Option<JoinHandle<()>>,
}

impl TestPipeline {
    pub fn new(topic_configs: Vec<TopicConfig>, thresholds: FlushThresholds, mode: Mode) -> Self {
        let mut registry = ConsumerRegistry::new();
        let mut queues = HashMap::new();
        for topic_config in &topic_configs {
            let queue = MemoryQueue::new(topic_config.topic.clone());
            registry.register(topic_config.topic.clone(), queue.clone());
            queues.insert(topic_config.topic.clone(), queue);
        }

        let flusher = Flusher::new(
            Arc::new(InMemoryDatabase::new(thresholds)),
            TestDestinationWrapper::wrap(MemoryDestination::new()),
            Arc::new(registry),
        )
        .with_retry_config(fast_retry_config());
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            topic_configs,
            mode,
            queues,
            flusher,
            shutdown_tx,
            readers: Vec::new(),
            ticker: None,
        }
    }

    /// Returns the queue of `topic`.
    ///
    /// # Panics
    ///
    /// Panics if the topic was not configured.
    pub fn queue(&self, topic: &str) -> &MemoryQueue {
        self.queues
            .get(topic)
            .unwrap_or_else(|| panic!("topic {topic} is not configured"))
    }

    pub fn flusher(&self) -> &TestFlusher {
        &self.flusher
    }

    pub fn database(&self) -> &Arc<InMemoryDatabase> {
        self.flusher.database()
    }

    pub fn destination(&self) -> &TestDestination {
        self.flusher.destination()
    }

    pub fn memory_destination(&self) -> &MemoryDestination {
        self.destination().wrapped()
    }

    /// Spawns one reader per topic.
    pub fn start(&mut self) {
        for topic_config in &self.topic_configs {
            let Some(consumer) = self.flusher.consumers().get(&topic_config.topic) else {
                continue;
            };

            let reader = Reader::new(
                TopicProcessor::new(topic_config.clone(), self.mode),
                consumer,
                self.flusher.clone(),
                self.shutdown_tx.subscribe(),
            );
            self.readers
                .push((topic_config.topic.clone(), tokio::spawn(reader.run())));
        }
    }

    /// Spawns the periodic flush ticker.
    pub fn start_ticker(&mut self, interval: Duration) {
        let ticker = FlushTicker::new(self.flusher.clone(), interval, self.shutdown_tx.subscribe());
        self.ticker = Some(tokio::spawn(ticker.run()));
    }

    /// Waits until the readers of closed queues have read every pending message and stopped.
    ///
    /// Readers of open queues keep running. Returns what the finished readers returned.
    pub async fn wait_for_drained_readers(&mut self) -> TransferResult<()> {
        let (drained, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.readers)
            .into_iter()
            .partition(|(topic, _)| self.queues.get(topic).is_some_and(MemoryQueue::is_closed));
        self.readers = running;

        let mut errors = Vec::new();
        for (topic, reader) in drained {
            let finished = tokio::time::timeout(PIPELINE_WAIT_TIMEOUT, reader)
                .await
                .unwrap_or_else(|_| panic!("reader of closed topic {topic} did not stop in time"));
            collect_reader_result(finished, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransferError::from(errors))
        }
    }

    /// Stops every task and runs the final flush.
    ///
    /// Readers of closed queues are drained first, the others stop on the shutdown signal and
    /// leave their unread messages uncommitted.
    pub async fn shutdown(mut self) -> TransferResult<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.wait_for_drained_readers().await {
            errors.push(err);
        }

        // Fails only when every task already exited.
        let _ = self.shutdown_tx.shutdown();

        for (_, reader) in self.readers {
            collect_reader_result(reader.await, &mut errors);
        }
        if let Some(ticker) = self.ticker
            && let Err(err) = ticker.await
        {
            errors.push(transfer_error!(
                ErrorKind::FlushWorkerPanic,
                "Flush ticker task failed",
                err.to_string()
            ));
        }

        if let Err(err) = self.flusher.flush(FlushArgs::shutdown()).await {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransferError::from(errors))
        }
    }
}

fn collect_reader_result(
    result: Result<TransferResult<()>, JoinError>,
    errors: &mut Vec<TransferError>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => errors.push(err),
        Err(err) => errors.push(transfer_error!(
            ErrorKind::ReaderWorkerPanic,
            "Reader task failed",
            err.to_string()
        )),
    }
}
