//! Concurrency utilities shared by the reader loops, the flush ticker and the consumer binary.
//!
//! The [`shutdown`] module implements a broadcast-based shutdown pattern: one signal stops
//! every reader and the ticker, while flushes already in flight run to completion.

pub mod shutdown;
