//! Bookmark and state module
//!
//! Tracks per-stream replication progress between runs.
//!
//! # Overview
//!
//! - `State` - Bookmarks keyed by stream id plus the stream currently syncing
//! - `Bookmark` - Version, cursor column and last cursor value for one stream
//! - `build_state` - Reconciles a prior run's state with the current catalog

mod reconcile;
mod types;

pub use reconcile::build_state;
pub use types::{Bookmark, BookmarkUpdate, State};
