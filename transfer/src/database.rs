//! Registry of table buffers shared by the readers and the flusher.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::buffer::{FlushThresholds, TableBuffer};
use crate::types::TableId;

/// A table buffer behind its own lock.
pub type SharedTableBuffer = Arc<Mutex<TableBuffer>>;

#[derive(Debug, Default)]
struct Registry {
    tables: HashMap<TableId, SharedTableBuffer>,
    topic_to_tables: HashMap<String, Vec<TableId>>,
}

/// In-memory database of table buffers.
///
/// The registry lock is a `parking_lot` lock held only for lookups and inserts, never across
/// an `.await`. Each table has its own async lock for ingestion and flushing, so a slow flush
/// of one table never blocks ingestion into another.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    registry: RwLock<Registry>,
    thresholds: FlushThresholds,
}

impl InMemoryDatabase {
    pub fn new(thresholds: FlushThresholds) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &FlushThresholds {
        &self.thresholds
    }

    /// Returns the buffer of `table_id`, creating it under `topic` on first use.
    pub fn get_or_create_table(&self, table_id: &TableId, topic: &str) -> SharedTableBuffer {
        if let Some(table) = self.registry.read().tables.get(table_id) {
            return Arc::clone(table);
        }

        let mut registry = self.registry.write();
        if let Some(table) = registry.tables.get(table_id) {
            return Arc::clone(table);
        }

        let table = Arc::new(Mutex::new(TableBuffer::new(table_id.clone(), topic)));
        registry.tables.insert(table_id.clone(), Arc::clone(&table));
        registry
            .topic_to_tables
            .entry(topic.to_string())
            .or_default()
            .push(table_id.clone());

        table
    }

    pub fn get_table(&self, table_id: &TableId) -> Option<SharedTableBuffer> {
        self.registry.read().tables.get(table_id).cloned()
    }

    /// Returns a snapshot of the buffers of every topic.
    pub fn topic_to_tables(&self) -> HashMap<String, Vec<SharedTableBuffer>> {
        let registry = self.registry.read();
        registry
            .topic_to_tables
            .iter()
            .map(|(topic, table_ids)| {
                let tables = table_ids
                    .iter()
                    .filter_map(|table_id| registry.tables.get(table_id).cloned())
                    .collect();
                (topic.clone(), tables)
            })
            .collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.read().topic_to_tables.keys().cloned().collect()
    }

    pub fn table_count(&self) -> usize {
        self.registry.read().tables.len()
    }
}
