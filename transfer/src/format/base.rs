use std::fmt;

use chrono::{DateTime, Utc};
use transfer_config::shared::KeyFormat;

use crate::error::TransferResult;
use crate::types::{Columns, OptionalSchema, RowData};

/// Change operation carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Snapshot read.
    Read,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Read => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            "r" => Some(Operation::Read),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change event extracted from a message value by a [`FormatAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct CdcEvent {
    /// Table name reported by the source.
    pub table_name: String,
    pub operation: Operation,
    /// Source commit time.
    pub execution_time: DateTime<Utc>,
    /// Row image after the change. `None` for deletes.
    pub after: Option<RowData>,
    /// Kind hints for specific columns, keyed by the source column name.
    pub optional_schema: Option<OptionalSchema>,
    /// Columns declared by an embedded schema, in declaration order.
    pub columns: Option<Columns>,
}

impl CdcEvent {
    /// Returns `true` if the event deletes its row.
    pub fn is_delete(&self) -> bool {
        self.after.as_ref().is_none_or(|after| after.is_empty())
    }
}

/// Decodes the key and value of messages written in one CDC format.
pub trait FormatAdapter {
    /// Decodes the message key into a map of escaped primary key names to values.
    fn primary_key(&self, key: &[u8], key_format: KeyFormat) -> TransferResult<RowData>;

    /// Decodes the message value into a change event.
    fn event_from_bytes(&self, value: &[u8]) -> TransferResult<CdcEvent>;
}
