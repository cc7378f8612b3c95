//! Core data types shared by the buffering and flushing engine.
//!
//! Columns and their inferred kinds, table identifiers and row values.

mod column;
mod kind;
mod table;
mod value;

pub use column::*;
pub use kind::*;
pub use table::*;
pub use value::*;
