use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::batch::{OversizedItemPolicy, by_size};
use crate::buffer::TableData;
use crate::constants::DELETE_COLUMN_MARKER;
use crate::destination::{Destination, TableConfig};
use crate::error::{ErrorKind, TransferError, TransferResult};
use crate::types::{
    Column, Columns, DatabaseSchemaPair, RowData, TableIdentifier, is_toast_placeholder,
};

/// Largest append batch, in encoded bytes, written by default.
pub const DEFAULT_MAX_BATCH_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// A table held by [`MemoryDestination`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Columns,
    /// Merged rows keyed by primary key value.
    pub rows: BTreeMap<String, RowData>,
    /// Appended rows in arrival order.
    pub appended: Vec<RowData>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableIdentifier, MemoryTable>,
    merges: usize,
    appends: usize,
    append_batches: usize,
}

/// In-memory destination for tests and local runs.
///
/// Merges are applied the way a warehouse `MERGE` would: rows are upserted by primary key,
/// TOAST placeholders keep the stored value, hard deletes remove the row, and columns
/// without a resolved kind are not written. All data is lost when the process exits.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
    max_batch_size_bytes: usize,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_batch_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
        }
    }

    /// Limits the encoded size of each append batch.
    pub fn with_max_batch_size_bytes(mut self, max_batch_size_bytes: usize) -> Self {
        self.max_batch_size_bytes = max_batch_size_bytes;
        self
    }

    /// Returns a copy of the table behind `identifier`, if it was created.
    pub async fn table(&self, identifier: &TableIdentifier) -> Option<MemoryTable> {
        let inner = self.inner.lock().await;
        inner.tables.get(identifier).cloned()
    }

    /// Returns a copy of every table.
    pub async fn tables(&self) -> HashMap<TableIdentifier, MemoryTable> {
        let inner = self.inner.lock().await;
        inner.tables.clone()
    }

    pub async fn merge_count(&self) -> usize {
        self.inner.lock().await.merges
    }

    pub async fn append_count(&self) -> usize {
        self.inner.lock().await.appends
    }

    /// Number of size-bounded batches written by all appends.
    pub async fn append_batch_count(&self) -> usize {
        self.inner.lock().await.append_batches
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds the columns of `table_data` that have a resolved kind and are missing in `table`.
fn evolve_columns(table: &mut MemoryTable, table_data: &TableData) {
    for column in table_data.columns().valid_columns() {
        if table.columns.get_column(column.name()).is_none() {
            debug!(column = column.name(), kind = %column.kind_details(), "adding destination column");
            table.columns.add_column(column.clone());
        }
    }
}

fn is_deleted(row: &RowData) -> bool {
    matches!(row.get(DELETE_COLUMN_MARKER), Some(Value::Bool(true)))
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn merge(&self, table_data: &TableData) -> TransferResult<bool> {
        let identifier =
            self.identifier_for(&table_data.database_schema_pair(), table_data.name());
        let soft_delete = table_data.topic_config().soft_delete;

        let mut inner = self.inner.lock().await;
        inner.merges += 1;

        let table = inner.tables.entry(identifier.clone()).or_default();
        evolve_columns(table, table_data);

        let writable: Vec<Column> = table_data.columns().valid_columns().cloned().collect();
        for (primary_key, row) in table_data.rows_data() {
            if is_deleted(row) && !soft_delete {
                table.rows.remove(primary_key);
                continue;
            }

            let stored = table.rows.entry(primary_key.clone()).or_default();
            for column in &writable {
                let Some(value) = row.get(column.name()) else {
                    continue;
                };

                // Toasted columns are excluded from the update so the stored value survives.
                if is_toast_placeholder(value) && stored.contains_key(column.name()) {
                    continue;
                }

                stored.insert(column.name().to_string(), value.clone());
            }
        }

        info!(
            table = %identifier,
            rows = table_data.number_of_rows(),
            "merged table into memory destination"
        );

        Ok(true)
    }

    async fn append(&self, table_data: &TableData) -> TransferResult<()> {
        let identifier =
            self.identifier_for(&table_data.database_schema_pair(), table_data.name());

        let mut batches: Vec<Vec<RowData>> = Vec::new();
        by_size(
            table_data.rows(),
            self.max_batch_size_bytes,
            OversizedItemPolicy::Fail,
            |row| {
                serde_json::to_vec(row).map_err(|err| {
                    TransferError::from((ErrorKind::SerializationError, "Failed to encode row"))
                        .with_source(err)
                })
            },
            |_, rows| {
                batches.push(rows.into_iter().cloned().collect());
                Ok(())
            },
        )?;

        let mut inner = self.inner.lock().await;
        inner.appends += 1;
        inner.append_batches += batches.len();

        let table = inner.tables.entry(identifier.clone()).or_default();
        evolve_columns(table, table_data);
        for batch in batches {
            table.appended.extend(batch);
        }

        info!(
            table = %identifier,
            rows = table_data.number_of_rows(),
            "appended table into memory destination"
        );

        Ok(())
    }

    fn identifier_for(&self, pair: &DatabaseSchemaPair, table: &str) -> TableIdentifier {
        TableIdentifier {
            database: pair.database.clone(),
            schema: pair.schema.clone(),
            table: table.to_string(),
        }
    }

    async fn table_config(&self, identifier: &TableIdentifier) -> TransferResult<TableConfig> {
        let inner = self.inner.lock().await;

        let config = match inner.tables.get(identifier) {
            Some(table) => TableConfig {
                columns: table.columns.clone(),
                create_table: false,
            },
            None => TableConfig {
                columns: Columns::default(),
                create_table: true,
            },
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use transfer_config::shared::{Mode, TopicConfig};

    use super::*;
    use crate::constants::TOAST_UNAVAILABLE_VALUE_PLACEHOLDER;
    use crate::types::{KindDetails, TableId};

    fn table_data(mode: Mode, topic_config: TopicConfig) -> TableData {
        TableData::new(
            TableId::new("public", "orders"),
            "orders",
            mode,
            Columns::new(vec![
                Column::new("id", KindDetails::Integer),
                Column::new("name", KindDetails::String),
                Column::new(DELETE_COLUMN_MARKER, KindDetails::Boolean),
                Column::new("unknown", KindDetails::Invalid),
            ]),
            vec!["id".to_string()],
            topic_config,
        )
    }

    fn row(id: i64, name: Value, deleted: bool) -> RowData {
        RowData::from([
            ("id".to_string(), json!(id)),
            ("name".to_string(), name),
            ("unknown".to_string(), Value::Null),
            (DELETE_COLUMN_MARKER.to_string(), json!(deleted)),
        ])
    }

    fn identifier() -> TableIdentifier {
        TableIdentifier {
            database: "shop".to_string(),
            schema: "public".to_string(),
            table: "orders".to_string(),
        }
    }

    #[tokio::test]
    async fn merge_upserts_and_deletes() {
        let destination = MemoryDestination::new();
        let config = TopicConfig::new("shop", "public", "orders");

        assert!(destination.table_config(&identifier()).await.unwrap().create_table);

        let mut data = table_data(Mode::Replication, config.clone());
        data.insert_row("id=1".to_string(), row(1, json!("a"), false), false);
        data.insert_row("id=2".to_string(), row(2, json!("b"), false), false);
        assert!(destination.merge(&data).await.unwrap());

        let mut data = table_data(Mode::Replication, config);
        data.insert_row("id=1".to_string(), row(1, json!("c"), false), false);
        data.insert_row("id=2".to_string(), row(2, Value::Null, true), true);
        assert!(destination.merge(&data).await.unwrap());

        let table = destination.table(&identifier()).await.unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows["id=1"]["name"], json!("c"));
        assert!(!table.rows["id=1"].contains_key("unknown"));
        assert!(table.columns.get_column("unknown").is_none());

        let table_config = destination.table_config(&identifier()).await.unwrap();
        assert!(!table_config.create_table);
        assert_eq!(table_config.columns.len(), 3);
        assert_eq!(destination.merge_count().await, 2);
    }

    #[tokio::test]
    async fn soft_deletes_keep_the_row() {
        let destination = MemoryDestination::new();
        let mut config = TopicConfig::new("shop", "public", "orders");
        config.soft_delete = true;

        let mut data = table_data(Mode::Replication, config);
        data.insert_row("id=1".to_string(), row(1, json!("a"), true), true);
        destination.merge(&data).await.unwrap();

        let table = destination.table(&identifier()).await.unwrap();
        assert_eq!(table.rows["id=1"][DELETE_COLUMN_MARKER], json!(true));
    }

    #[tokio::test]
    async fn toasted_values_do_not_overwrite_stored_values() {
        let destination = MemoryDestination::new();
        let config = TopicConfig::new("shop", "public", "orders");

        let mut data = table_data(Mode::Replication, config.clone());
        data.insert_row("id=1".to_string(), row(1, json!("large"), false), false);
        destination.merge(&data).await.unwrap();

        let mut data = table_data(Mode::Replication, config);
        data.insert_row(
            "id=1".to_string(),
            row(1, json!(TOAST_UNAVAILABLE_VALUE_PLACEHOLDER), false),
            false,
        );
        destination.merge(&data).await.unwrap();

        let table = destination.table(&identifier()).await.unwrap();
        assert_eq!(table.rows["id=1"]["name"], json!("large"));
    }

    #[tokio::test]
    async fn append_writes_size_bounded_batches() {
        let destination = MemoryDestination::new().with_max_batch_size_bytes(128);
        let config = TopicConfig::new("shop", "public", "orders");

        let mut data = table_data(Mode::History, config);
        for id in 0..10 {
            data.insert_row(String::new(), row(id, json!("a name"), false), false);
        }
        destination.append(&data).await.unwrap();

        let table = destination.table(&identifier()).await.unwrap();
        assert_eq!(table.appended.len(), 10);
        assert!(destination.append_batch_count().await > 1);
        assert_eq!(destination.append_count().await, 1);
    }

    #[tokio::test]
    async fn append_fails_on_rows_larger_than_a_batch() {
        let destination = MemoryDestination::new().with_max_batch_size_bytes(8);
        let mut data = table_data(Mode::History, TopicConfig::new("shop", "public", "orders"));
        data.insert_row(String::new(), row(1, json!("a name"), false), false);

        let err = destination.append(&data).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchItemTooLarge);
        assert!(destination.table(&identifier()).await.is_none());
    }
}
