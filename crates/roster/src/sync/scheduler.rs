//! Chunk planning and the bounded parallel pass.
//!
//! A collection of known size is split into fixed-size chunks. Chunk `i`
//! tries the pool's credentials starting at `i mod N`; the first success wins.
//! A chunk that exhausts its rotation is reported as failed, never raised, so
//! its siblings keep running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{ChunkState, FetchChunk, SyncScope};
use crate::api::{ApiError, Credential, CredentialPool, short_error_message};

/// Split `[0, total)` into chunks of `chunk_size`, each with its rotation start.
pub fn plan_chunks(
    scope: &SyncScope,
    total: u64,
    chunk_size: u64,
    pool: &CredentialPool,
) -> Vec<FetchChunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    while offset < total {
        let index = chunks.len();
        chunks.push(FetchChunk {
            index,
            offset,
            count: chunk_size.min(total - offset),
            rotation_start: pool.rotation_start(index),
            scope: scope.clone(),
        });
        offset += chunk_size;
    }
    chunks
}

/// Fetches one chunk with one credential.
///
/// Each call returns its own result buffer; nothing is shared between workers.
#[async_trait]
pub trait ChunkFetcher: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn fetch(
        &self,
        chunk: &FetchChunk,
        credential: &Credential,
    ) -> Result<Self::Output, ApiError>;

    /// Number of items in an output, for progress reporting.
    fn items(output: &Self::Output) -> usize;
}

/// A chunk that was fetched.
#[derive(Debug)]
pub struct ChunkSuccess<T> {
    pub chunk: FetchChunk,
    pub output: T,
    /// Rotation position of the credential that served the chunk.
    pub served_by: usize,
}

/// A chunk whose rotation was exhausted.
#[derive(Debug, Clone)]
pub struct FailedChunk {
    pub chunk: FetchChunk,
    pub state: ChunkState,
    pub attempts: usize,
    pub last_error: String,
}

/// Everything one pass produced.
#[derive(Debug)]
pub struct PassOutcome<T> {
    pub completed: Vec<ChunkSuccess<T>>,
    pub failed: Vec<FailedChunk>,
}

impl<T> Default for PassOutcome<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Try every credential of the rotation in order until one serves the chunk.
///
/// On exhaustion returns the number of attempts and the last error.
pub async fn fetch_with_rotation<F: ChunkFetcher + ?Sized>(
    fetcher: &F,
    chunk: &FetchChunk,
    rotation: &[Credential],
) -> Result<(F::Output, usize), (usize, String)> {
    let mut last_error = String::from("empty rotation");
    for (position, credential) in rotation.iter().enumerate() {
        let state = ChunkState::InFlight {
            credential: position,
        };
        tracing::trace!(scope = %chunk.scope, chunk = chunk.index, ?state, "chunk attempt");
        match fetcher.fetch(chunk, credential).await {
            Ok(output) => return Ok((output, position)),
            Err(err) => {
                last_error = short_error_message(&err);
                tracing::debug!(
                    scope = %chunk.scope,
                    chunk = chunk.index,
                    offset = chunk.offset,
                    credential = %credential,
                    error = %last_error,
                    "chunk attempt failed"
                );
            }
        }
    }
    Err((rotation.len(), last_error))
}

type TaskResult<T> = (FetchChunk, Result<(T, usize), (usize, String)>);

/// Runs chunks concurrently on a bounded number of workers.
#[derive(Clone)]
pub struct ChunkScheduler {
    pool: CredentialPool,
    max_workers: usize,
    stagger: Duration,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl ChunkScheduler {
    pub fn new(pool: CredentialPool, worker_cap: usize) -> Self {
        Self {
            pool,
            max_workers: worker_cap,
            stagger: Duration::ZERO,
            on_progress: None,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_progress(mut self, on_progress: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// `min(pool size, cap)`, at least one.
    pub fn workers(&self) -> usize {
        self.pool.len().min(self.max_workers).max(1)
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Fetch every chunk; results are collected as they complete.
    ///
    /// `total` only feeds progress events. A panicking worker fails its chunk.
    pub async fn run<F: ChunkFetcher>(
        &self,
        fetcher: Arc<F>,
        chunks: Vec<FetchChunk>,
        total: u64,
    ) -> PassOutcome<F::Output> {
        let mut outcome = PassOutcome::default();
        let Some(first) = chunks.first() else {
            return outcome;
        };
        let scope = first.scope.to_string();

        let workers = self.workers();
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<TaskResult<F::Output>> = JoinSet::new();
        let mut spawned = HashMap::with_capacity(chunks.len());

        for (launch, chunk) in chunks.into_iter().enumerate() {
            let fetcher = Arc::clone(&fetcher);
            let semaphore = Arc::clone(&semaphore);
            let rotation = self.pool.select_rotation(chunk.index);
            let delay = if launch < workers {
                self.stagger * launch as u32
            } else {
                Duration::ZERO
            };
            let task_chunk = chunk.clone();

            let handle = tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (task_chunk, Err((0, "worker pool closed".to_string()))),
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let result = fetch_with_rotation(fetcher.as_ref(), &task_chunk, &rotation).await;
                (task_chunk, result)
            });
            spawned.insert(handle.id(), chunk);
        }

        let mut loaded = 0u64;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk, Ok((output, served_by)))) => {
                    let items = F::items(&output);
                    loaded += items as u64;
                    emit(
                        self.on_progress.as_deref(),
                        SyncProgress::ChunkFetched {
                            scope: scope.clone(),
                            index: chunk.index,
                            items,
                            loaded,
                            total,
                        },
                    );
                    outcome.completed.push(ChunkSuccess {
                        chunk,
                        output,
                        served_by,
                    });
                }
                Ok((chunk, Err((attempts, last_error)))) => {
                    tracing::warn!(
                        scope = %chunk.scope,
                        chunk = chunk.index,
                        offset = chunk.offset,
                        attempts,
                        error = %last_error,
                        "chunk exhausted all credentials"
                    );
                    emit(
                        self.on_progress.as_deref(),
                        SyncProgress::ChunkFailed {
                            scope: scope.clone(),
                            index: chunk.index,
                            error: last_error.clone(),
                        },
                    );
                    outcome.failed.push(FailedChunk {
                        chunk,
                        state: ChunkState::FailedParallel,
                        attempts,
                        last_error,
                    });
                }
                Err(join_err) => {
                    let Some(chunk) = spawned.remove(&join_err.id()) else {
                        tracing::error!(error = %join_err, "unknown worker failed");
                        continue;
                    };
                    tracing::error!(
                        scope = %chunk.scope,
                        chunk = chunk.index,
                        error = %join_err,
                        "chunk worker panicked"
                    );
                    outcome.failed.push(FailedChunk {
                        chunk,
                        state: ChunkState::FailedParallel,
                        attempts: 0,
                        last_error: format!("worker panic: {join_err}"),
                    });
                }
            }
        }

        tracing::debug!(
            scope = %scope,
            workers,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            "parallel pass finished"
        );
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entity::collection_kind::CollectionKind;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn pool(n: usize) -> CredentialPool {
        CredentialPool::new((0..n).map(|i| {
            Credential::new(format!("credential-secret-{i:04}")).with_rate_limit(1000)
        }))
    }

    fn scope() -> SyncScope {
        SyncScope::new("acme", CollectionKind::Members)
    }

    /// Fails configured chunk indices for every credential; records concurrency.
    struct Recorder {
        failing: HashSet<usize>,
        panicking: HashSet<usize>,
        active: AtomicUsize,
        peak: AtomicUsize,
        attempts: Mutex<Vec<(usize, String)>>,
    }

    impl Recorder {
        fn new(failing: &[usize], panicking: &[usize]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                panicking: panicking.iter().copied().collect(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChunkFetcher for Recorder {
        type Output = Vec<u64>;

        async fn fetch(
            &self,
            chunk: &FetchChunk,
            credential: &Credential,
        ) -> Result<Vec<u64>, ApiError> {
            self.attempts
                .lock()
                .unwrap()
                .push((chunk.index, credential.secret().to_string()));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&chunk.index) {
                panic!("boom");
            }
            if self.failing.contains(&chunk.index) {
                return Err(ApiError::from_remote(15, "denied"));
            }
            Ok((chunk.offset..chunk.end()).collect())
        }

        fn items(output: &Vec<u64>) -> usize {
            output.len()
        }
    }

    #[test]
    fn plan_covers_range_exactly() {
        let chunks = plan_chunks(&scope(), 12_345, 600, &pool(3));
        assert_eq!(chunks.len(), 21);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[20].offset, 12_000);
        assert_eq!(chunks[20].count, 345);
        assert_eq!(chunks.iter().map(|c| c.count).sum::<u64>(), 12_345);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
        assert_eq!(chunks[4].rotation_start, 1);
    }

    #[test]
    fn plan_of_empty_collection_is_empty() {
        assert!(plan_chunks(&scope(), 0, 600, &pool(3)).is_empty());
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        assert_eq!(plan_chunks(&scope(), 3, 0, &pool(1)).len(), 3);
    }

    #[test]
    fn workers_are_bounded_by_pool_and_cap() {
        assert_eq!(ChunkScheduler::new(pool(3), 8).workers(), 3);
        assert_eq!(ChunkScheduler::new(pool(20), 8).workers(), 8);
        assert_eq!(ChunkScheduler::new(pool(0), 8).workers(), 1);
    }

    #[tokio::test]
    async fn failed_chunks_do_not_affect_siblings() {
        let fetcher = Arc::new(Recorder::new(&[3, 7], &[]));
        let chunks = plan_chunks(&scope(), 12_345, 600, &pool(3));
        let outcome = ChunkScheduler::new(pool(3), 8)
            .run(Arc::clone(&fetcher), chunks, 12_345)
            .await;

        assert_eq!(outcome.completed.len(), 19);
        let mut failed: Vec<_> = outcome.failed.iter().map(|f| f.chunk.index).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![3, 7]);
        assert!(outcome.failed.iter().all(|f| f.attempts == 3));
        assert!(
            outcome
                .failed
                .iter()
                .all(|f| f.state == ChunkState::FailedParallel)
        );
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn each_chunk_starts_with_its_rotation() {
        let fetcher = Arc::new(Recorder::new(&[], &[]));
        let chunks = plan_chunks(&scope(), 500, 100, &pool(2));
        ChunkScheduler::new(pool(2), 8)
            .run(Arc::clone(&fetcher), chunks, 500)
            .await;
        let attempts = fetcher.attempts.lock().unwrap();
        for (index, secret) in attempts.iter() {
            let expected = format!("credential-secret-{:04}", index % 2);
            assert_eq!(secret, &expected);
        }
    }

    #[tokio::test]
    async fn panicking_worker_fails_only_its_chunk() {
        let fetcher = Arc::new(Recorder::new(&[], &[1]));
        let chunks = plan_chunks(&scope(), 300, 100, &pool(2));
        let outcome = ChunkScheduler::new(pool(2), 2)
            .run(fetcher, chunks, 300)
            .await;
        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].chunk.index, 1);
        assert!(outcome.failed[0].last_error.contains("panic"));
    }
}
