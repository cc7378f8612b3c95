//! Per-topic readers, the periodic flush ticker and the consumer registry they share.

mod process;
mod reader;
mod registry;
mod ticker;

pub use process::TopicProcessor;
pub use reader::Reader;
pub use registry::{ConsumerHandle, ConsumerRegistry};
pub use ticker::FlushTicker;
