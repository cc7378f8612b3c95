use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use transfer_config::shared::Mode;

use crate::bail;
use crate::buffer::{FlushReason, TableData};
use crate::consumer::{ConsumerHandle, ConsumerRegistry};
use crate::database::{InMemoryDatabase, SharedTableBuffer};
use crate::destination::Destination;
use crate::error::{ErrorKind, TransferError, TransferResult};
use crate::metrics::{
    DESTINATION_LABEL, OUTCOME_LABEL, REASON_LABEL, TABLE_NAME_LABEL, TOPIC_LABEL,
    TRANSFER_FLUSH_DURATION_SECONDS, TRANSFER_FLUSH_ROWS, TRANSFER_FLUSHES_TOTAL,
};
use crate::retry::{RetryConfig, with_retries};
use crate::source::{Message, SourceQueue, messages_to_commit};
use crate::transfer_error;

/// Parameters of one flush.
#[derive(Debug, Clone)]
pub struct FlushArgs {
    /// Tables flushed more recently than this are skipped. `None` flushes unconditionally.
    pub cooldown: Option<Duration>,
    /// Restricts the flush to one topic.
    pub topic: Option<String>,
    pub reason: FlushReason,
    /// Takes the processing lock of each topic for the duration of its flush. The reader
    /// already holds it when it triggers a flush.
    pub should_lock: bool,
}

impl FlushArgs {
    /// Immediate flush of `topic`, issued by its reader when a threshold is crossed.
    pub fn immediate(topic: impl Into<String>, reason: FlushReason) -> Self {
        Self {
            cooldown: None,
            topic: Some(topic.into()),
            reason,
            should_lock: false,
        }
    }

    /// Final flush of every topic before the process exits.
    pub fn shutdown() -> Self {
        Self {
            cooldown: None,
            topic: None,
            reason: FlushReason::Shutdown,
            should_lock: true,
        }
    }

    /// Periodic sweep of every topic.
    pub fn sweep(cooldown: Duration) -> Self {
        Self {
            cooldown: Some(cooldown),
            topic: None,
            reason: FlushReason::Time,
            should_lock: true,
        }
    }
}

/// What a table flush leaves for the commit of its topic.
#[derive(Debug)]
enum TableFlush {
    /// Nothing was buffered.
    Empty,
    /// Rows stay buffered, because of the cooldown or because the destination refused the commit.
    Kept,
    /// Rows were written and wiped. Holds their messages.
    Written(Vec<Message>),
}

/// Merges table buffers into a destination and commits their source offsets.
///
/// Topics are flushed concurrently and every table of a topic is flushed by its own task.
/// The lock of a table is held for the whole merge and wipe, so ingestion into that table
/// waits while other tables keep ingesting.
///
/// Offsets are committed once per topic, after every table of the topic is done, and only if
/// none of them failed or kept rows. Otherwise the messages of the written tables are held
/// back and committed with the next flush of the topic.
#[derive(Debug)]
pub struct Flusher<D, Q> {
    database: Arc<InMemoryDatabase>,
    destination: D,
    consumers: Arc<ConsumerRegistry<Q>>,
    retry_config: RetryConfig,
    held_messages: Arc<Mutex<HashMap<String, Vec<Message>>>>,
}

impl<D, Q> Clone for Flusher<D, Q>
where
    D: Clone,
{
    fn clone(&self) -> Self {
        Self {
            database: Arc::clone(&self.database),
            destination: self.destination.clone(),
            consumers: Arc::clone(&self.consumers),
            retry_config: self.retry_config.clone(),
            held_messages: Arc::clone(&self.held_messages),
        }
    }
}

impl<D, Q> Flusher<D, Q>
where
    D: Destination + Clone + Send + Sync + 'static,
    Q: SourceQueue + Send + Sync + 'static,
{
    pub fn new(
        database: Arc<InMemoryDatabase>,
        destination: D,
        consumers: Arc<ConsumerRegistry<Q>>,
    ) -> Self {
        Self {
            database,
            destination,
            consumers,
            retry_config: RetryConfig::flush(),
            held_messages: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the retry policy of merges and appends.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn database(&self) -> &Arc<InMemoryDatabase> {
        &self.database
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn consumers(&self) -> &Arc<ConsumerRegistry<Q>> {
        &self.consumers
    }

    /// Flushes the tables selected by `args`.
    ///
    /// Failures of individual tables do not stop the others. They are aggregated into the
    /// returned error, and the failed tables keep their buffers.
    pub async fn flush(&self, args: FlushArgs) -> TransferResult<()> {
        let mut topic_to_tables = self.database.topic_to_tables();

        let topics: Vec<(String, Vec<SharedTableBuffer>)> = match &args.topic {
            Some(topic) => {
                if self.consumers.get(topic).is_none() {
                    bail!(
                        ErrorKind::UnknownTopic,
                        "Flush requested for an unknown topic",
                        topic.clone()
                    );
                }

                let tables = topic_to_tables.remove(topic).unwrap_or_default();
                vec![(topic.clone(), tables)]
            }
            None => topic_to_tables.into_iter().collect(),
        };

        let results = join_all(
            topics
                .into_iter()
                .map(|(topic, tables)| self.flush_topic(topic, tables, &args)),
        )
        .await;

        let errors: Vec<TransferError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    async fn flush_topic(
        &self,
        topic: String,
        tables: Vec<SharedTableBuffer>,
        args: &FlushArgs,
    ) -> TransferResult<()> {
        let Some(consumer) = self.consumers.get(&topic) else {
            bail!(
                ErrorKind::UnknownTopic,
                "Buffered tables belong to an unknown topic",
                topic
            );
        };

        let guard = if args.should_lock {
            Some(consumer.lock().await)
        } else {
            None
        };

        let mut join_set = JoinSet::new();
        for table in tables {
            let flusher = self.clone();
            let consumer = Arc::clone(&consumer);
            let cooldown = args.cooldown;
            let reason = args.reason;
            let span = info_span!("flush_table", topic = %topic, reason = %reason);

            join_set.spawn(
                async move { flusher.flush_table(table, consumer, cooldown, reason).await }
                    .instrument(span),
            );
        }

        let mut errors = Vec::new();
        let mut kept_tables = 0usize;
        let mut messages = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(TableFlush::Empty)) => {}
                Ok(Ok(TableFlush::Kept)) => kept_tables += 1,
                Ok(Ok(TableFlush::Written(table_messages))) => messages.extend(table_messages),
                Ok(Err(err)) => errors.push(err),
                Err(err) => errors.push(transfer_error!(
                    ErrorKind::FlushWorkerPanic,
                    "Table flush task failed",
                    err.to_string()
                )),
            }
        }

        let held = self.held_messages.lock().remove(&topic);
        messages.extend(held.into_iter().flatten());

        if !messages.is_empty() {
            let messages = messages_to_commit(messages);

            if errors.is_empty() && kept_tables == 0 {
                match consumer.commit_messages(&messages).await {
                    Ok(()) => {
                        info!(topic = %topic, messages = messages.len(), "committed offsets");
                    }
                    Err(err) => {
                        // The rows are merged and wiped, a redelivery is absorbed by the merge.
                        warn!(
                            topic = %topic,
                            error = %err,
                            "tables were merged but committing offsets failed"
                        );
                        errors.push(err);
                    }
                }
            } else {
                info!(
                    topic = %topic,
                    failed_tables = errors.len(),
                    kept_tables,
                    "holding back offsets until every table of the topic is flushed"
                );
                self.held_messages.lock().insert(topic.clone(), messages);
            }
        }

        drop(guard);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    async fn flush_table(
        &self,
        table: SharedTableBuffer,
        consumer: Arc<ConsumerHandle<Q>>,
        cooldown: Option<Duration>,
        reason: FlushReason,
    ) -> TransferResult<TableFlush> {
        let mut buffer = table.lock().await;
        let table_id = buffer.table_id().clone();

        if buffer.is_empty() {
            return Ok(TableFlush::Empty);
        }

        if let Some(cooldown) = cooldown
            && buffer.should_skip_flush(cooldown)
        {
            debug!(%table_id, "table was flushed recently, skipping");
            return Ok(TableFlush::Kept);
        }

        let Some(table_data) = buffer.table_data_mut() else {
            return Ok(TableFlush::Empty);
        };

        let rows = table_data.number_of_rows();
        let table_name = table_data.name().to_string();
        let started = Instant::now();
        let result = self.write(table_data).await;

        histogram!(
            TRANSFER_FLUSH_DURATION_SECONDS,
            TABLE_NAME_LABEL => table_name.clone(),
            REASON_LABEL => reason.as_str(),
            DESTINATION_LABEL => D::name(),
        )
        .record(started.elapsed().as_secs_f64());

        let commit = match result {
            Ok(commit) => commit,
            Err(err) => {
                counter!(
                    TRANSFER_FLUSHES_TOTAL,
                    TABLE_NAME_LABEL => table_name,
                    OUTCOME_LABEL => "error",
                )
                .increment(1);
                error!(%table_id, topic = consumer.topic(), error = %err, "failed to flush table");

                return Err(err);
            }
        };

        if !commit {
            counter!(
                TRANSFER_FLUSHES_TOTAL,
                TABLE_NAME_LABEL => table_name,
                OUTCOME_LABEL => "retained",
            )
            .increment(1);
            info!(%table_id, rows, "destination did not allow a commit, keeping the buffer");

            return Ok(TableFlush::Kept);
        }

        let messages = table_data.last_messages();
        buffer.wipe();

        counter!(
            TRANSFER_FLUSHES_TOTAL,
            TABLE_NAME_LABEL => table_name.clone(),
            OUTCOME_LABEL => "success",
        )
        .increment(1);
        histogram!(
            TRANSFER_FLUSH_ROWS,
            TABLE_NAME_LABEL => table_name,
            TOPIC_LABEL => consumer.topic().to_string(),
        )
        .record(rows as f64);

        info!(%table_id, rows, messages = messages.len(), "flushed table");

        Ok(TableFlush::Written(messages))
    }

    /// Writes a table buffer with retries and returns whether its offsets may be committed.
    async fn write(&self, table_data: &mut TableData) -> TransferResult<bool> {
        let destination = &self.destination;
        let identifier =
            destination.identifier_for(&table_data.database_schema_pair(), table_data.name());

        let identifier_ref = &identifier;
        let table_config = with_retries(&self.retry_config, move |_| {
            destination.table_config(identifier_ref)
        })
        .await?;
        if table_config.create_table {
            debug!(table = %identifier, "destination table will be created");
        }
        table_data.merge_columns_from_destination(&table_config.columns);

        let table_data: &TableData = table_data;
        match table_data.mode() {
            Mode::History => {
                with_retries(&self.retry_config, move |_| destination.append(table_data))
                    .await
                    .map(|()| true)
            }
            Mode::Replication => {
                with_retries(&self.retry_config, move |_| destination.merge(table_data)).await
            }
        }
    }
}
