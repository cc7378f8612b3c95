//! Testing utilities for the transfer engine.
//!
//! Nothing here talks to external systems: sources are [`crate::source::memory::MemoryQueue`]s,
//! the destination is a [`crate::destination::memory::MemoryDestination`] wrapped in a
//! [`test_destination_wrapper::TestDestinationWrapper`] that records calls and injects
//! failures.
//!
//! # Module Organization
//!
//! - [`event`] - builders for Debezium keys, values and change events
//! - [`pipeline`] - a running set of readers, ticker and flusher over in-memory components
//! - [`test_destination_wrapper`] - destination wrapper with call tracking, failure injection
//!   and timed waits for destination states

pub mod event;
pub mod pipeline;
pub mod test_destination_wrapper;
