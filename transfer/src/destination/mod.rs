//! Destinations that buffered tables are flushed into.
//!
//! This module provides the [`Destination`] trait and an in-memory implementation used by
//! tests and local runs of the consumer.

mod base;
pub mod memory;

pub use base::{Destination, TableConfig};
