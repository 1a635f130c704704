//! Effective catalog resolution

use super::types::{Catalog, CatalogEntry};
use crate::state::State;
use tracing::{debug, warn};

/// Build the catalog a run will actually sync.
///
/// Keeps the user's selected streams that still exist in the discovered
/// catalog, narrows each schema to columns that are both selected by the user
/// and still present in the database, and moves the stream recorded as
/// `currently_syncing` to the front so an interrupted run resumes there.
pub fn resolve_catalog(discovered: &Catalog, user: &Catalog, state: &State) -> Catalog {
    let mut resolved = Vec::new();

    for entry in user.selected_streams() {
        let Some(live) = discovered.get_stream(&entry.tap_stream_id) else {
            warn!(
                stream = %entry.tap_stream_id,
                "Selected stream no longer exists in the database, skipping"
            );
            continue;
        };

        let wanted = entry.selected_columns();
        let columns: Vec<String> = wanted
            .iter()
            .filter(|column| {
                let present = live.schema.properties.contains_key(*column);
                if !present {
                    warn!(
                        stream = %entry.tap_stream_id,
                        column = %column,
                        "Selected column no longer exists, skipping"
                    );
                }
                present
            })
            .cloned()
            .collect();

        debug!(stream = %entry.tap_stream_id, columns = ?columns, "Resolved columns");

        resolved.push(CatalogEntry {
            tap_stream_id: entry.tap_stream_id.clone(),
            stream: entry.stream.clone(),
            table_name: entry.table_name.clone().or_else(|| live.table_name.clone()),
            database_name: entry
                .database_name
                .clone()
                .or_else(|| live.database_name.clone()),
            schema: live.schema.restricted_to(&columns),
            metadata: entry.metadata.clone(),
        });
    }

    if let Some(current) = state.currently_syncing.as_deref() {
        if let Some(pos) = resolved.iter().position(|e| e.tap_stream_id == current) {
            let entry = resolved.remove(pos);
            resolved.insert(0, entry);
        }
    }

    Catalog::new(resolved)
}
