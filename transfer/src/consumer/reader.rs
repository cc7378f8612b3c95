use std::sync::Arc;

use metrics::counter;
use tracing::{Instrument, error, info, info_span, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::consumer::{ConsumerHandle, TopicProcessor};
use crate::destination::Destination;
use crate::error::TransferResult;
use crate::flush::{FlushArgs, Flusher};
use crate::metrics::{OUTCOME_LABEL, TOPIC_LABEL, TRANSFER_MESSAGES_PROCESSED_TOTAL};
use crate::retry::jitter;
use crate::source::SourceQueue;

/// Upper bound of the pause after an immediate flush, in milliseconds.
const POST_FLUSH_JITTER_MAX_MS: u64 = 50;

/// Backoff after failed reads from the source.
const READ_RETRY_BASE_MS: u64 = 100;
const READ_RETRY_MAX_MS: u64 = 5_000;

/// Reads one topic until the source closes or shutdown is signaled.
///
/// Each message is processed under the topic's processing lock. When a message pushes its
/// table over a threshold, the topic is flushed right away while the lock is still held.
#[derive(Debug)]
pub struct Reader<D, Q> {
    processor: TopicProcessor,
    consumer: Arc<ConsumerHandle<Q>>,
    flusher: Flusher<D, Q>,
    shutdown_rx: ShutdownRx,
}

impl<D, Q> Reader<D, Q>
where
    D: Destination + Clone + Send + Sync + 'static,
    Q: SourceQueue + Send + Sync + 'static,
{
    pub fn new(
        processor: TopicProcessor,
        consumer: Arc<ConsumerHandle<Q>>,
        flusher: Flusher<D, Q>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            processor,
            consumer,
            flusher,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> TransferResult<()> {
        let span = info_span!("reader", topic = %self.processor.topic());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> TransferResult<()> {
        info!(source = Q::name(), "starting reader");

        let mut consecutive_read_errors = 0u32;
        loop {
            let read = tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!("shutdown signal received, stopping reader");
                    break;
                }
                read = self.consumer.queue().read_message() => read,
            };

            let message = match read {
                Ok(Some(message)) => {
                    consecutive_read_errors = 0;
                    message
                }
                Ok(None) => {
                    info!("source is closed, stopping reader");
                    break;
                }
                Err(err) => {
                    let backoff =
                        jitter(READ_RETRY_BASE_MS, READ_RETRY_MAX_MS, consecutive_read_errors);
                    consecutive_read_errors = consecutive_read_errors.saturating_add(1);
                    error!(error = %err, backoff_ms = backoff.as_millis() as u64, "failed to read message");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let flushed = {
                let _guard = self.consumer.lock().await;

                match self
                    .processor
                    .process_message(self.flusher.database(), &message)
                    .await
                {
                    Ok(None) => false,
                    Ok(Some(reason)) => {
                        info!(%reason, "flush threshold reached");
                        let args = FlushArgs::immediate(self.processor.topic(), reason);
                        if let Err(err) = self.flusher.flush(args).await {
                            error!(%reason, error = %err, "immediate flush failed");
                        }
                        true
                    }
                    Err(err) => {
                        counter!(
                            TRANSFER_MESSAGES_PROCESSED_TOTAL,
                            TOPIC_LABEL => message.topic.clone(),
                            OUTCOME_LABEL => "skipped",
                        )
                        .increment(1);
                        warn!(
                            partition = message.partition,
                            offset = message.offset,
                            error = %err,
                            "skipping message"
                        );
                        false
                    }
                }
            };

            if flushed {
                tokio::time::sleep(jitter(POST_FLUSH_JITTER_MAX_MS, POST_FLUSH_JITTER_MAX_MS, 0))
                    .await;
            }
        }

        Ok(())
    }
}
