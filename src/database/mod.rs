//! Source warehouse access via DuckDB
//!
//! The sync engine talks to the warehouse only through the `SourceDatabase`
//! trait; `DuckDbSource` implements it by attaching the warehouse to an
//! in-memory DuckDB instance.

mod engine;
mod source;

pub use engine::DuckDbSource;
pub use source::{QueryParam, SourceDatabase};
