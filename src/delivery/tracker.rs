//! Run completion tracking

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Registry {
    all: BTreeSet<String>,
    completed: BTreeSet<String>,
}

/// Streams a run is responsible for, and those whose delivery has closed.
///
/// The full set is fixed up front from configuration. A run is complete
/// only when every one of those streams has been marked.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    registry: Mutex<Registry>,
}

impl CompletionTracker {
    /// Create a tracker for the given stream names
    pub fn new<I, S>(streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry: Mutex::new(Registry {
                all: streams.into_iter().map(Into::into).collect(),
                completed: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a stream's delivery as finished.
    ///
    /// Returns true when this completes the run.
    pub fn mark_complete(&self, stream: &str) -> bool {
        let mut registry = self.lock();
        if !registry.all.contains(stream) {
            warn!(stream = %stream, "Completed stream is not part of this run");
            return false;
        }
        registry.completed.insert(stream.to_string());
        let done = registry.completed == registry.all;
        if done {
            info!(streams = registry.all.len(), "All streams delivered");
        }
        done
    }

    /// Check if every stream has been marked
    pub fn is_complete(&self) -> bool {
        let registry = self.lock();
        registry.completed == registry.all
    }

    /// Check if a single stream has been marked
    pub fn is_stream_complete(&self, stream: &str) -> bool {
        self.lock().completed.contains(stream)
    }

    /// Streams not yet marked, sorted
    pub fn missing(&self) -> Vec<String> {
        let registry = self.lock();
        registry.all.difference(&registry.completed).cloned().collect()
    }

    /// Number of streams in the run
    pub fn len(&self) -> usize {
        self.lock().all.len()
    }

    /// Check if the run has no streams
    pub fn is_empty(&self) -> bool {
        self.lock().all.is_empty()
    }
}
