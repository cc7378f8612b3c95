//! Logging setup shared by the transfer binaries and tests.

pub mod tracing;
