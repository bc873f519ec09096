use roster::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub(crate) struct LoggingReporter;

impl LoggingReporter {
    pub(crate) fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::Discovered {
                scope,
                total,
                chunks,
                workers,
            } => {
                tracing::info!(scope = %scope, total, chunks, workers, "Fetching");
            }

            SyncProgress::ChunkFetched {
                scope,
                index,
                items,
                loaded,
                total,
            } => {
                tracing::debug!(
                    scope = %scope,
                    chunk = index,
                    items,
                    loaded,
                    total,
                    "Chunk fetched"
                );
            }

            SyncProgress::ChunkFailed {
                scope,
                index,
                error,
            } => {
                tracing::warn!(
                    scope = %scope,
                    chunk = index,
                    error = %error,
                    "Chunk failed, queued for retry"
                );
            }

            SyncProgress::Requeueing { scope, count } => {
                tracing::info!(scope = %scope, count, "Retrying failed chunks");
            }

            SyncProgress::ChunkRecovered {
                scope,
                index,
                items,
            } => {
                tracing::info!(scope = %scope, chunk = index, items, "Chunk recovered");
            }

            SyncProgress::ChunkLost {
                scope,
                index,
                error,
            } => {
                tracing::error!(scope = %scope, chunk = index, error = %error, "Chunk lost");
            }

            SyncProgress::DeepScan {
                scope,
                items,
                requests,
            } => {
                tracing::info!(scope = %scope, items, requests, "Deep scan");
            }

            SyncProgress::Reconciled {
                scope,
                joined,
                left,
                retained,
            } => {
                tracing::info!(scope = %scope, joined, left, retained, "Reconciled with cache");
            }

            SyncProgress::Writing {
                scope,
                session,
                sessions,
                rows,
            } => {
                tracing::debug!(scope = %scope, session, sessions, rows, "Writing session");
            }

            SyncProgress::Committed { scope, count } => {
                tracing::info!(scope = %scope, count, "Committed");
            }

            SyncProgress::Aborted { scope, message } => {
                tracing::error!(scope = %scope, message = %message, "Aborted, cache unchanged");
            }

            SyncProgress::Enriching { scope, ids } => {
                tracing::info!(scope = %scope, ids, "Enriching profiles");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            SyncProgress::Finished { scope } => {
                tracing::debug!(scope = %scope, "Finished");
            }

            _ => {}
        }
    }
}
