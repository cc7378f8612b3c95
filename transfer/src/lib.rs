//! Buffers change data capture events in memory and flushes them into destinations.
//!
//! Readers decode messages from a [`source::SourceQueue`], normalize them into
//! [`event::Event`]s and upsert them into per-table buffers of the
//! [`database::InMemoryDatabase`]. The [`flush::Flusher`] merges buffers into a
//! [`destination::Destination`] and commits source offsets only after a successful merge.

pub mod batch;
pub mod buffer;
pub mod concurrency;
pub mod constants;
pub mod consumer;
pub mod database;
pub mod destination;
pub mod error;
pub mod event;
pub mod flush;
pub mod format;
mod macros;
pub mod metrics;
pub mod retry;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
