//! Reconcile a prior run's state against the current catalog

use super::types::{BookmarkUpdate, State};
use crate::catalog::Catalog;
use crate::types::ReplicationMethod;
use tracing::{debug, info};

/// Build the starting state for a run.
///
/// Incremental streams record their current cursor column and keep the prior
/// cursor value only if that column has not changed. Versions carry forward
/// whenever present. Full-table streams without a prior version get an empty
/// bookmark so a fresh version is minted at sync time. Streams no longer in
/// the catalog are dropped.
pub fn build_state(prior: &State, catalog: &Catalog) -> State {
    info!(
        currently_syncing = ?prior.currently_syncing,
        streams = catalog.streams.len(),
        "Building state from prior run"
    );

    let mut state = State::new().set_currently_syncing(prior.currently_syncing.as_deref());

    for entry in &catalog.streams {
        let stream_id = entry.tap_stream_id.as_str();
        let prior_version = prior.version(stream_id);

        match entry.replication_method() {
            ReplicationMethod::Incremental => {
                let replication_key = entry.replication_key();
                state = state.write_bookmark(
                    stream_id,
                    BookmarkUpdate::ReplicationKey(replication_key.map(ToString::to_string)),
                );

                if prior.replication_key(stream_id) == replication_key {
                    state = state.write_bookmark(
                        stream_id,
                        BookmarkUpdate::ReplicationKeyValue(
                            prior.replication_key_value(stream_id).cloned(),
                        ),
                    );
                } else {
                    debug!(
                        stream = %stream_id,
                        "Replication key changed since last run, dropping cursor"
                    );
                }
            }
            ReplicationMethod::FullTable => {}
        }

        state = state.write_bookmark(stream_id, BookmarkUpdate::Version(prior_version));
    }

    state
}
