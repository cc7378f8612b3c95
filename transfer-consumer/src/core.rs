use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use transfer::buffer::FlushThresholds;
use transfer::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use transfer::consumer::{ConsumerRegistry, FlushTicker, Reader, TopicProcessor};
use transfer::database::InMemoryDatabase;
use transfer::destination::Destination;
use transfer::destination::memory::MemoryDestination;
use transfer::error::TransferError;
use transfer::flush::{FlushArgs, Flusher};
use transfer::source::SourceQueue;
use transfer::source::memory::MemoryQueue;
use transfer_config::shared::{DestinationConfig, SourceConfig, TransferConfig};

use crate::error::{ConsumerError, ConsumerResult};

/// Starts the consumer with the provided configuration.
///
/// Resolves the concrete source and destination once, then runs until every reader has
/// stopped and the final flush is done.
pub async fn start_consumer_with_config(config: TransferConfig) -> ConsumerResult<()> {
    info!("starting transfer consumer");

    log_config(&config);

    // Static dispatch over every source and destination pair.
    match &config.destination {
        DestinationConfig::Memory => {
            let destination = MemoryDestination::new();

            match &config.source {
                SourceConfig::Memory { topic_configs } => {
                    let mut registry = ConsumerRegistry::new();
                    for topic_config in topic_configs {
                        registry.register(
                            topic_config.topic.clone(),
                            MemoryQueue::new(topic_config.topic.clone()),
                        );
                    }

                    run(&config, destination, registry).await?;
                }
                SourceConfig::Kafka(kafka_config) => {
                    let registry = kafka::registry(kafka_config)?;
                    run(&config, destination, registry).await?;
                }
            }
        }
    }

    info!("transfer consumer completed");

    Ok(())
}

fn log_config(config: &TransferConfig) {
    let topics: Vec<&str> = config
        .source
        .topic_configs()
        .iter()
        .map(|topic_config| topic_config.topic.as_str())
        .collect();

    info!(
        mode = %config.mode,
        flush_interval_seconds = config.flush_interval_seconds,
        buffer_rows = config.buffer_rows,
        flush_size_kb = config.flush_size_kb,
        destination = config.destination.name(),
        ?topics,
        "consumer config"
    );
}

/// Runs one reader per topic and the flush ticker, then flushes what is left.
async fn run<D, Q>(
    config: &TransferConfig,
    destination: D,
    registry: ConsumerRegistry<Q>,
) -> ConsumerResult<()>
where
    D: Destination + Clone + Send + Sync + 'static,
    Q: SourceQueue + Send + Sync + 'static,
{
    let database = Arc::new(InMemoryDatabase::new(FlushThresholds::from(config)));
    let consumers = Arc::new(registry);
    let flusher = Flusher::new(database, destination, Arc::clone(&consumers));
    let (shutdown_tx, _shutdown_rx) = create_shutdown_channel();

    let mut readers = JoinSet::new();
    for topic_config in config.source.topic_configs() {
        let Some(consumer) = consumers.get(&topic_config.topic) else {
            warn!(topic = %topic_config.topic, "topic has no consumer, skipping");
            continue;
        };

        let reader = Reader::new(
            TopicProcessor::new(topic_config.clone(), config.mode),
            consumer,
            flusher.clone(),
            shutdown_tx.subscribe(),
        );
        readers.spawn(reader.run());
    }

    let ticker = FlushTicker::new(
        flusher.clone(),
        config.flush_interval(),
        shutdown_tx.subscribe(),
    );
    let ticker_handle = tokio::spawn(ticker.run());

    let signal_handle = spawn_signal_listener(shutdown_tx.clone())?;

    let mut errors: Vec<TransferError> = Vec::new();
    while let Some(result) = readers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(err) => error!(error = %err, "reader task failed"),
        }
    }

    // Readers also stop when their source closes, the ticker only on the signal.
    let _ = shutdown_tx.shutdown();
    if let Err(err) = ticker_handle.await {
        error!(error = %err, "flush ticker task failed");
    }
    signal_handle.abort();
    let _ = signal_handle.await;

    info!("running final flush");
    if let Err(err) = flusher.flush(FlushArgs::shutdown()).await {
        errors.push(err);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConsumerError::from(TransferError::from(errors)))
    }
}

/// Listens for SIGTERM and SIGINT and signals shutdown on the first one.
fn spawn_signal_listener(
    shutdown_tx: ShutdownTx,
) -> ConsumerResult<tokio::task::JoinHandle<()>> {
    // SIGTERM is sent by orchestrators before SIGKILL; buffered rows are lost if the
    // process is killed before the final flush.
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down consumer");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down consumer");
            }
        }

        if let Err(err) = shutdown_tx.shutdown() {
            warn!(error = %err, "failed to send shutdown signal");
        }
    }))
}

#[cfg(feature = "kafka")]
mod kafka {
    use transfer::consumer::ConsumerRegistry;
    use transfer::source::kafka::KafkaQueue;
    use transfer_config::shared::KafkaConfig;

    use crate::error::ConsumerResult;

    /// Creates one Kafka consumer per topic, all in the configured group.
    pub fn registry(config: &KafkaConfig) -> ConsumerResult<ConsumerRegistry<KafkaQueue>> {
        let mut registry = ConsumerRegistry::new();
        for topic_config in &config.topic_configs {
            let queue = KafkaQueue::new(config, &topic_config.topic)?;
            registry.register(topic_config.topic.clone(), queue);
        }

        Ok(registry)
    }
}

#[cfg(not(feature = "kafka"))]
mod kafka {
    use transfer::consumer::ConsumerRegistry;
    use transfer::source::memory::MemoryQueue;
    use transfer_config::shared::KafkaConfig;

    use crate::error::{ConsumerError, ConsumerResult};

    pub fn registry(_config: &KafkaConfig) -> ConsumerResult<ConsumerRegistry<MemoryQueue>> {
        Err(ConsumerError::unsupported("the kafka source"))
    }
}
