use std::future::Future;

use crate::buffer::TableData;
use crate::error::TransferResult;
use crate::types::{Columns, DatabaseSchemaPair, TableIdentifier};

/// What a destination knows about one of its tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableConfig {
    /// Columns that already exist in the destination table.
    pub columns: Columns,
    /// The table does not exist yet and is created by the next merge.
    pub create_table: bool,
}

/// Trait for systems that receive flushed table buffers.
///
/// A flush hands the whole [`TableData`] of a table to the destination. Implementations must
/// be idempotent: a merge can be retried, and after a crash the same rows are delivered
/// again because offsets are only committed after a successful merge.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Upserts the buffered rows, keyed by primary key.
    ///
    /// Rows flagged with `__artie_delete` are removed unless the topic uses soft deletes.
    /// Returns whether the source offsets may be committed. A `false` result keeps the
    /// buffer for the next flush.
    fn merge(&self, table_data: &TableData) -> impl Future<Output = TransferResult<bool>> + Send;

    /// Appends every buffered row. Used in history mode.
    fn append(&self, table_data: &TableData) -> impl Future<Output = TransferResult<()>> + Send;

    /// Returns the destination name of `table` within `pair`.
    fn identifier_for(&self, pair: &DatabaseSchemaPair, table: &str) -> TableIdentifier;

    /// Describes the destination table behind `identifier`.
    fn table_config(
        &self,
        identifier: &TableIdentifier,
    ) -> impl Future<Output = TransferResult<TableConfig>> + Send;
}
