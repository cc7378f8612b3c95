//! Source queues that change messages are read from and committed to.

mod base;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use base::{AckMode, Message, SourceQueue, messages_to_commit};
