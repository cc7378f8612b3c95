//! Configuration shared by the transfer library and the consumer binary.

mod base;
mod destination;
mod source;
mod topic;
mod transfer;

pub use base::ValidationError;
pub use destination::DestinationConfig;
pub use source::{KafkaConfig, SourceConfig};
pub use topic::{CdcFormat, KeyFormat, StaticColumn, TopicConfig};
pub use transfer::{Mode, TransferConfig};
