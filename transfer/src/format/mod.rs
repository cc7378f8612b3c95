//! Decoding of CDC message keys and values.
//!
//! Every supported envelope implements [`FormatAdapter`]. The adapter of a topic is resolved
//! once from its [`CdcFormat`] through [`FormatKind`].

mod base;
pub mod debezium;

use transfer_config::shared::{CdcFormat, KeyFormat};

pub use base::{CdcEvent, FormatAdapter, Operation};

use crate::error::TransferResult;
use crate::types::RowData;
use debezium::DebeziumJsonFormat;

/// Closed set of format adapters.
#[derive(Debug, Clone, Copy)]
pub enum FormatKind {
    DebeziumJson(DebeziumJsonFormat),
}

impl From<CdcFormat> for FormatKind {
    fn from(format: CdcFormat) -> Self {
        match format {
            CdcFormat::DebeziumJson => FormatKind::DebeziumJson(DebeziumJsonFormat),
        }
    }
}

impl FormatAdapter for FormatKind {
    fn primary_key(&self, key: &[u8], key_format: KeyFormat) -> TransferResult<RowData> {
        match self {
            FormatKind::DebeziumJson(format) => format.primary_key(key, key_format),
        }
    }

    fn event_from_bytes(&self, value: &[u8]) -> TransferResult<CdcEvent> {
        match self {
            FormatKind::DebeziumJson(format) => format.event_from_bytes(value),
        }
    }
}
