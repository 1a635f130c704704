//! Stream catalog module
//!
//! The catalog lists the streams a run may extract, their schemas and the
//! breadcrumb metadata that drives selection and replication policy.
//!
//! # Overview
//!
//! - `Catalog` / `CatalogEntry` - Stream definitions with metadata accessors
//! - `discover_catalog` - Builds a catalog from the warehouse information schema
//! - `resolve_catalog` - Intersects the user's selection with what exists now

mod discover;
mod resolve;
mod types;

pub use discover::{discover_catalog, schema_for_column, ColumnSpec};
pub use resolve::resolve_catalog;
pub use types::{Catalog, CatalogEntry, MetadataEntry};
