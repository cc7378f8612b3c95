//! Per-table buffers of change rows.
//!
//! A [`TableData`] holds the rows buffered since the last flush, deduplicated by primary key,
//! along with the column registry and the latest message of every partition. A
//! [`TableBuffer`] wraps it with the bookkeeping that survives a flush.

mod table_buffer;
mod table_data;

pub use table_buffer::*;
pub use table_data::*;
