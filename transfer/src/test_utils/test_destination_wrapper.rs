use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::bail;
use crate::buffer::TableData;
use crate::destination::{Destination, TableConfig};
use crate::error::{ErrorKind, TransferResult};
use crate::types::{DatabaseSchemaPair, TableIdentifier};

/// How long a test waits for the pipeline to reach a destination state.
pub const PIPELINE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered wait for a destination state, e.g. a number of written rows.
#[derive(Debug)]
#[must_use = "the state is only waited for when `reached` is awaited"]
pub struct DestinationWait {
    notify: Arc<Notify>,
    description: String,
}

impl DestinationWait {
    /// Waits until the state is reached.
    ///
    /// # Panics
    ///
    /// Panics after [`PIPELINE_WAIT_TIMEOUT`], naming the state that was never reached.
    pub async fn reached(self) {
        if tokio::time::timeout(PIPELINE_WAIT_TIMEOUT, self.notify.notified())
            .await
            .is_err()
        {
            panic!(
                "destination did not reach `{}` within {PIPELINE_WAIT_TIMEOUT:?}, check that the \
                 readers are started and that a flush threshold or the ticker can fire",
                self.description
            );
        }
    }
}

/// Snapshot of the calls seen by a [`TestDestinationWrapper`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinationStats {
    pub merge_calls: u64,
    pub append_calls: u64,
    /// Merges and appends that failed, injected failures included.
    pub failed_calls: u64,
    /// Rows handed over by successful merges and appends.
    pub written_rows: u64,
    /// Successful merges that reported a commit.
    pub committed_merges: u64,
}

type StatsCondition = Box<dyn Fn(&DestinationStats) -> bool + Send + Sync>;

struct Inner {
    stats: DestinationStats,
    failures_remaining: u32,
    table_failures_remaining: HashMap<String, u32>,
    deny_commit: bool,
    conditions: Vec<(StatsCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let stats = self.stats;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(&stats);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Test wrapper for [`Destination`] implementations that tracks all writes.
///
/// Besides counting calls, the wrapper can fail the next merges or appends and can turn
/// successful merges into "do not commit" answers. Tests wait for a state through
/// [`TestDestinationWrapper::wait_for`].
pub struct TestDestinationWrapper<D> {
    wrapped_destination: Arc<D>,
    inner: Arc<RwLock<Inner>>,
}

impl<D> Clone for TestDestinationWrapper<D> {
    fn clone(&self) -> Self {
        Self {
            wrapped_destination: Arc::clone(&self.wrapped_destination),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: fmt::Debug> fmt::Debug for TestDestinationWrapper<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDestinationWrapper")
            .field("wrapped_destination", &self.wrapped_destination)
            .finish_non_exhaustive()
    }
}

impl<D> TestDestinationWrapper<D> {
    /// Wraps `destination` with call tracking.
    pub fn wrap(destination: D) -> Self {
        let inner = Inner {
            stats: DestinationStats::default(),
            failures_remaining: 0,
            table_failures_remaining: HashMap::new(),
            deny_commit: false,
            conditions: Vec::new(),
        };

        Self {
            wrapped_destination: Arc::new(destination),
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn stats(&self) -> DestinationStats {
        self.inner.read().await.stats
    }

    /// Makes the next `count` merges or appends fail before reaching the wrapped destination.
    pub async fn fail_next_writes(&self, count: u32) {
        self.inner.write().await.failures_remaining = count;
    }

    /// Makes the next `count` merges or appends of `table` fail, other tables are unaffected.
    pub async fn fail_next_writes_for(&self, table: &str, count: u32) {
        self.inner
            .write()
            .await
            .table_failures_remaining
            .insert(table.to_string(), count);
    }

    /// Makes successful merges report that offsets must not be committed.
    pub async fn deny_commits(&self, deny: bool) {
        self.inner.write().await.deny_commit = deny;
    }

    pub fn wrapped(&self) -> &D {
        &self.wrapped_destination
    }

    /// Registers a wait that completes once `condition` holds for the call stats.
    ///
    /// The condition is checked right away, so a state reached between this call and
    /// [`DestinationWait::reached`] is not missed. `description` names the state in the
    /// timeout panic.
    pub async fn wait_for<F>(
        &self,
        description: impl Into<String>,
        condition: F,
    ) -> DestinationWait
    where
        F: Fn(&DestinationStats) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .conditions
            .push((Box::new(condition), Arc::clone(&notify)));
        inner.check_conditions();

        DestinationWait {
            notify,
            description: description.into(),
        }
    }

    /// Waits until `rows` rows have been written in total.
    pub async fn wait_for_written_rows(&self, rows: u64) -> DestinationWait {
        self.wait_for(format!("{rows} written rows"), move |stats| {
            stats.written_rows >= rows
        })
        .await
    }

    async fn take_injected_failure(&self, table: &str) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(remaining) = inner.table_failures_remaining.get_mut(table)
            && *remaining > 0
        {
            *remaining -= 1;
        } else if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
        } else {
            return false;
        }

        inner.stats.failed_calls += 1;
        inner.check_conditions();
        true
    }

    async fn record_write(&self, result: &TransferResult<bool>, rows: usize) {
        let mut inner = self.inner.write().await;
        match result {
            Ok(commit) => {
                inner.stats.written_rows += rows as u64;
                if *commit {
                    inner.stats.committed_merges += 1;
                }
            }
            Err(_) => inner.stats.failed_calls += 1,
        }
        inner.check_conditions();
    }
}

impl<D> Destination for TestDestinationWrapper<D>
where
    D: Destination + Send + Sync,
{
    fn name() -> &'static str {
        D::name()
    }

    async fn merge(&self, table_data: &TableData) -> TransferResult<bool> {
        self.inner.write().await.stats.merge_calls += 1;

        if self.take_injected_failure(table_data.name()).await {
            bail!(ErrorKind::MergeFailed, "Injected merge failure");
        }

        let result = self.wrapped_destination.merge(table_data).await;
        let deny_commit = self.inner.read().await.deny_commit;
        let result = result.map(|commit| commit && !deny_commit);

        self.record_write(&result, table_data.number_of_rows()).await;

        result
    }

    async fn append(&self, table_data: &TableData) -> TransferResult<()> {
        self.inner.write().await.stats.append_calls += 1;

        if self.take_injected_failure(table_data.name()).await {
            bail!(ErrorKind::AppendFailed, "Injected append failure");
        }

        let result = self.wrapped_destination.append(table_data).await;

        let recorded = result.as_ref().map(|()| false).map_err(Clone::clone);
        self.record_write(&recorded, table_data.number_of_rows()).await;

        result
    }

    fn identifier_for(&self, pair: &DatabaseSchemaPair, table: &str) -> TableIdentifier {
        self.wrapped_destination.identifier_for(pair, table)
    }

    async fn table_config(&self, identifier: &TableIdentifier) -> TransferResult<TableConfig> {
        self.wrapped_destination.table_config(identifier).await
    }
}
