//! Sequential retry of chunks that failed the parallel pass.
//!
//! Failed chunks are most likely hitting a shared rate limit, so they are
//! retried one at a time with a pause before each, against the same rotation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::scheduler::{ChunkFetcher, ChunkSuccess, FailedChunk, fetch_with_rotation};
use super::types::ChunkState;
use crate::api::CredentialPool;

/// Result of the sequential pass.
#[derive(Debug)]
pub struct RequeueOutcome<T> {
    pub recovered: Vec<ChunkSuccess<T>>,
    /// Chunks in state [`ChunkState::FailedFinal`].
    pub lost: Vec<FailedChunk>,
}

impl<T> Default for RequeueOutcome<T> {
    fn default() -> Self {
        Self {
            recovered: Vec::new(),
            lost: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct FailureRequeue {
    delay: Duration,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl FailureRequeue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// Queue of failed chunks: one entry per chunk index, in index order.
    pub fn queue(failed: Vec<FailedChunk>) -> Vec<FailedChunk> {
        let mut by_index = BTreeMap::new();
        for failure in failed {
            by_index.entry(failure.chunk.index).or_insert(failure);
        }
        by_index.into_values().collect()
    }

    /// Retry each failed chunk once more, sequentially.
    pub async fn retry<F: ChunkFetcher>(
        &self,
        fetcher: &F,
        pool: &CredentialPool,
        failed: Vec<FailedChunk>,
    ) -> RequeueOutcome<F::Output> {
        let mut outcome = RequeueOutcome::default();
        let queue = Self::queue(failed);
        let Some(first) = queue.first() else {
            return outcome;
        };
        let scope = first.chunk.scope.to_string();

        tracing::info!(scope = %scope, chunks = queue.len(), "retrying failed chunks sequentially");
        emit(
            self.on_progress.as_deref(),
            SyncProgress::Requeueing {
                scope: scope.clone(),
                count: queue.len(),
            },
        );

        for failure in queue {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let rotation = pool.select_rotation(failure.chunk.index);
            match fetch_with_rotation(fetcher, &failure.chunk, &rotation).await {
                Ok((output, served_by)) => {
                    let items = F::items(&output);
                    tracing::info!(
                        scope = %scope,
                        chunk = failure.chunk.index,
                        items,
                        "chunk recovered on sequential retry"
                    );
                    emit(
                        self.on_progress.as_deref(),
                        SyncProgress::ChunkRecovered {
                            scope: scope.clone(),
                            index: failure.chunk.index,
                            items,
                        },
                    );
                    outcome.recovered.push(ChunkSuccess {
                        chunk: failure.chunk,
                        output,
                        served_by,
                    });
                }
                Err((attempts, last_error)) => {
                    tracing::warn!(
                        scope = %scope,
                        chunk = failure.chunk.index,
                        offset = failure.chunk.offset,
                        count = failure.chunk.count,
                        error = %last_error,
                        "chunk lost after sequential retry"
                    );
                    emit(
                        self.on_progress.as_deref(),
                        SyncProgress::ChunkLost {
                            scope: scope.clone(),
                            index: failure.chunk.index,
                            error: last_error.clone(),
                        },
                    );
                    outcome.lost.push(FailedChunk {
                        chunk: failure.chunk,
                        state: ChunkState::FailedFinal,
                        attempts: failure.attempts + attempts,
                        last_error,
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Credential};
    use crate::entity::collection_kind::CollectionKind;
    use crate::sync::scheduler::plan_chunks;
    use crate::sync::scheduler::tests::pool;
    use crate::sync::types::{FetchChunk, SyncScope};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fails each chunk a fixed number of times before serving it.
    struct Flaky {
        remaining_failures: Mutex<HashMap<usize, usize>>,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkFetcher for Flaky {
        type Output = u64;

        async fn fetch(&self, chunk: &FetchChunk, _: &Credential) -> Result<u64, ApiError> {
            self.calls.lock().unwrap().push(chunk.index);
            let mut remaining = self.remaining_failures.lock().unwrap();
            match remaining.get_mut(&chunk.index) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(ApiError::network("reset"))
                }
                _ => Ok(chunk.count),
            }
        }

        fn items(output: &u64) -> usize {
            *output as usize
        }
    }

    fn failed(chunk: FetchChunk) -> FailedChunk {
        FailedChunk {
            chunk,
            state: ChunkState::FailedParallel,
            attempts: 3,
            last_error: "reset".to_string(),
        }
    }

    #[test]
    fn queue_holds_each_chunk_once() {
        let scope = SyncScope::new("acme", CollectionKind::Members);
        let chunks = plan_chunks(&scope, 300, 100, &pool(2));
        let queue = FailureRequeue::queue(vec![
            failed(chunks[2].clone()),
            failed(chunks[0].clone()),
            failed(chunks[2].clone()),
        ]);
        let indices: Vec<_> = queue.iter().map(|f| f.chunk.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_sequentially_with_delay() {
        let scope = SyncScope::new("acme", CollectionKind::Members);
        let chunks = plan_chunks(&scope, 300, 100, &pool(2));
        let fetcher = Flaky {
            remaining_failures: Mutex::new(HashMap::from([(0, 0), (2, 5)])),
            calls: Mutex::new(Vec::new()),
        };

        let started = tokio::time::Instant::now();
        let outcome = FailureRequeue::new(Duration::from_secs(2))
            .retry(
                &fetcher,
                &pool(2),
                vec![failed(chunks[0].clone()), failed(chunks[2].clone())],
            )
            .await;

        assert_eq!(outcome.recovered.len(), 1);
        assert_eq!(outcome.recovered[0].chunk.index, 0);
        assert_eq!(outcome.lost.len(), 1);
        assert_eq!(outcome.lost[0].state, ChunkState::FailedFinal);
        assert_eq!(outcome.lost[0].attempts, 5);
        // Chunk 0 once, chunk 2 with both credentials, strictly in order.
        assert_eq!(*fetcher.calls.lock().unwrap(), vec![0, 2, 2]);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn nothing_to_retry() {
        let fetcher = Flaky {
            remaining_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        };
        let outcome = FailureRequeue::new(Duration::ZERO)
            .retry(&fetcher, &pool(1), Vec::new())
            .await;
        assert!(outcome.recovered.is_empty() && outcome.lost.is_empty());
    }
}
