//! Flush coordination: merging table buffers into the destination and committing offsets.

mod flusher;

pub use flusher::{FlushArgs, Flusher};
