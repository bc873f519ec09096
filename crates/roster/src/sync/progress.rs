//! Progress reporting for sync runs.
//!
//! Progress is a side channel: events are emitted as work happens and are
//! never consulted for correctness.

/// Progress events emitted during a sync run.
///
/// `scope` is always the `project/kind` label of the run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// The remote total is known and the chunks are planned.
    Discovered {
        scope: String,
        total: u64,
        chunks: usize,
        workers: usize,
    },

    /// A chunk finished in the parallel or sequential pass.
    ChunkFetched {
        scope: String,
        index: usize,
        items: usize,
        /// Running total of items fetched in this run.
        loaded: u64,
        total: u64,
    },

    /// Every credential failed for a chunk in the parallel pass.
    ChunkFailed {
        scope: String,
        index: usize,
        error: String,
    },

    /// Starting the sequential retry of failed chunks.
    Requeueing { scope: String, count: usize },

    /// A chunk succeeded on sequential retry.
    ChunkRecovered {
        scope: String,
        index: usize,
        items: usize,
    },

    /// A chunk failed the sequential retry as well.
    ChunkLost {
        scope: String,
        index: usize,
        error: String,
    },

    /// Items whose engagement lists overflow one page are being deep-scanned.
    DeepScan {
        scope: String,
        items: usize,
        requests: usize,
    },

    /// Fresh ids were compared with the cache.
    Reconciled {
        scope: String,
        joined: usize,
        left: usize,
        retained: usize,
    },

    /// Writing one session.
    Writing {
        scope: String,
        session: usize,
        sessions: usize,
        rows: usize,
    },

    /// Data and freshness counters are committed.
    Committed { scope: String, count: u64 },

    /// The run was abandoned; the cache is unchanged.
    Aborted { scope: String, message: String },

    /// Re-fetching full profiles.
    Enriching { scope: String, ids: usize },

    /// Warning message (non-fatal).
    Warning { message: String },

    /// The operation returned successfully; no further events follow.
    Finished { scope: String },
}

/// Callback type for progress reporting.
pub type ProgressCallback = dyn Fn(SyncProgress) + Send + Sync;

/// Helper to emit progress events.
#[inline]
pub fn emit(callback: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = callback {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_without_callback_is_noop() {
        emit(
            None,
            SyncProgress::Warning {
                message: "ignored".to_string(),
            },
        );
    }

    #[test]
    fn emit_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Box<ProgressCallback> = Box::new(move |event| {
            if let SyncProgress::Committed { count, .. } = event {
                sink.lock().unwrap().push(count);
            }
        });

        emit(
            Some(callback.as_ref()),
            SyncProgress::Committed {
                scope: "acme/members".to_string(),
                count: 12,
            },
        );
        assert_eq!(*seen.lock().unwrap(), vec![12]);
    }
}
