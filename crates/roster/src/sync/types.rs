//! Shared sync types and constants.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    BatchRequestCompiler, CallStatsSnapshot, CredentialPool, GatewayPolicy, ScriptCompiler,
    SequentialCompiler,
};
use crate::entity::collection_kind::CollectionKind;
use crate::retry::RetryConfig;

/// Initial backoff delay in milliseconds for transient failures.
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Retries of one call after a transient failure.
pub const MAX_TRANSIENT_RETRIES: usize = 4;

/// The n-th consecutive rate-limit response sleeps `n * step`.
pub const DEFAULT_RATE_LIMIT_STEP_MS: u64 = 1_000;

/// Consecutive rate-limit waits before the credential is abandoned for a call.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 10;

/// Items per member-list chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Content items per chunk.
pub const DEFAULT_CONTENT_CHUNK_SIZE: u64 = 500;

/// Content items whose engagement lists one chunk fetches.
pub const DEFAULT_ENGAGEMENT_CHUNK_ITEMS: u64 = 50;

/// Upper bound on concurrent workers regardless of pool size.
pub const DEFAULT_WORKER_CAP: usize = 8;

/// Delay before each sequential retry of a failed chunk.
pub const DEFAULT_REQUEUE_DELAY_MS: u64 = 2_000;

/// Delay between the launches of the first wave of workers.
pub const DEFAULT_LAUNCH_STAGGER_MS: u64 = 50;

/// Rows per write session (one short transaction each).
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 2_000;

/// Fraction of the expected total a membership scope must reach.
pub const DEFAULT_MEMBERSHIP_MIN_RATIO: f64 = 0.95;

/// Fraction of the expected total a content or engagement scope must reach.
pub const DEFAULT_ENGAGEMENT_MIN_RATIO: f64 = 0.9;

/// One (project, collection-kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncScope {
    pub project: Arc<str>,
    pub kind: CollectionKind,
}

impl SyncScope {
    pub fn new(project: impl Into<Arc<str>>, kind: CollectionKind) -> Self {
        Self {
            project: project.into(),
            kind,
        }
    }

    /// The same project, another kind.
    pub fn with_kind(&self, kind: CollectionKind) -> Self {
        Self {
            project: Arc::clone(&self.project),
            kind,
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.kind)
    }
}

/// A project whose remote collections are mirrored.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: Arc<str>,
    pub community_id: i64,
    /// Message dialogs whose participants are mirrored.
    pub dialog_peers: Vec<i64>,
    pub pool: CredentialPool,
}

impl Project {
    pub fn new(name: impl Into<Arc<str>>, community_id: i64, pool: CredentialPool) -> Self {
        Self {
            name: name.into(),
            community_id,
            dialog_peers: Vec::new(),
            pool,
        }
    }

    pub fn with_dialog_peers(mut self, peers: impl IntoIterator<Item = i64>) -> Self {
        self.dialog_peers = peers.into_iter().collect();
        self
    }

    pub fn scope(&self, kind: CollectionKind) -> SyncScope {
        SyncScope::new(Arc::clone(&self.name), kind)
    }
}

/// An offset/count subrange of a collection, the unit of concurrent work.
///
/// Lives only as long as the worker that fetches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchChunk {
    pub index: usize,
    pub offset: u64,
    pub count: u64,
    /// Position of the primary credential in the pool.
    pub rotation_start: usize,
    pub scope: SyncScope,
}

impl FetchChunk {
    pub fn end(&self) -> u64 {
        self.offset + self.count
    }
}

/// Lifecycle of a chunk across the parallel and sequential passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    /// Being fetched with the credential at this rotation position.
    InFlight { credential: usize },
    Success,
    /// Every credential failed in the parallel pass; queued for sequential retry.
    FailedParallel,
    /// Failed again in the sequential pass; counted as loss.
    FailedFinal,
}

/// Minimum completeness ratio per collection kind.
#[derive(Debug, Clone, PartialEq)]
pub struct LossThresholds {
    fallback: f64,
    per_kind: HashMap<CollectionKind, f64>,
}

impl Default for LossThresholds {
    fn default() -> Self {
        let mut per_kind = HashMap::new();
        per_kind.insert(CollectionKind::Members, DEFAULT_MEMBERSHIP_MIN_RATIO);
        per_kind.insert(CollectionKind::DialogParticipants, DEFAULT_MEMBERSHIP_MIN_RATIO);
        per_kind.insert(CollectionKind::Authors, DEFAULT_ENGAGEMENT_MIN_RATIO);
        for kind in CollectionKind::ENGAGEMENT {
            per_kind.insert(kind, DEFAULT_ENGAGEMENT_MIN_RATIO);
        }
        Self {
            fallback: DEFAULT_MEMBERSHIP_MIN_RATIO,
            per_kind,
        }
    }
}

impl LossThresholds {
    /// Every kind requires `ratio`.
    pub fn uniform(ratio: f64) -> Self {
        Self {
            fallback: clamp_ratio(ratio),
            per_kind: HashMap::new(),
        }
    }

    pub fn with(mut self, kind: CollectionKind, ratio: f64) -> Self {
        self.per_kind.insert(kind, clamp_ratio(ratio));
        self
    }

    pub fn for_kind(&self, kind: CollectionKind) -> f64 {
        self.per_kind.get(&kind).copied().unwrap_or(self.fallback)
    }
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() { 1.0 } else { ratio.clamp(0.0, 1.0) }
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Items per member-list chunk.
    pub chunk_size: u64,
    /// Content items per chunk.
    pub content_chunk_size: u64,
    /// Content items per engagement fast-scan chunk.
    pub engagement_chunk_items: u64,
    /// Hard cap on concurrent workers; the pool size caps it further.
    pub max_workers: usize,
    /// Retry behaviour of every remote call.
    pub gateway: GatewayPolicy,
    /// Pause before each sequential retry of a failed chunk.
    pub requeue_delay: Duration,
    /// Pause between launches of the first wave of workers.
    pub launch_stagger: Duration,
    /// Rows per write session.
    pub write_batch_size: usize,
    /// Backoff for locked or busy databases.
    pub write_retry: RetryConfig,
    /// Minimum completeness per kind before anything is committed.
    pub thresholds: LossThresholds,
    /// Sub-calls bundled per script; 0 issues one plain call per page.
    pub script_subcalls: usize,
    /// Re-fetch full profiles of touched actors after a successful sync.
    pub enrich: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_chunk_size: DEFAULT_CONTENT_CHUNK_SIZE,
            engagement_chunk_items: DEFAULT_ENGAGEMENT_CHUNK_ITEMS,
            max_workers: DEFAULT_WORKER_CAP,
            gateway: GatewayPolicy::default(),
            requeue_delay: Duration::from_millis(DEFAULT_REQUEUE_DELAY_MS),
            launch_stagger: Duration::from_millis(DEFAULT_LAUNCH_STAGGER_MS),
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            write_retry: RetryConfig::new(Duration::from_millis(100), Duration::from_secs(5), 3),
            thresholds: LossThresholds::default(),
            script_subcalls: crate::api::MAX_SUBCALLS_PER_SCRIPT,
            enrich: false,
        }
    }
}

impl SyncOptions {
    /// The request compiler these options call for.
    pub fn compiler(&self) -> Arc<dyn BatchRequestCompiler> {
        if self.script_subcalls == 0 {
            Arc::new(SequentialCompiler)
        } else {
            Arc::new(ScriptCompiler::new(self.script_subcalls))
        }
    }
}

/// How much of an expected total a run actually retrieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completeness {
    pub fetched: u64,
    pub expected: u64,
    pub required_ratio: f64,
}

impl Completeness {
    pub fn ratio(&self) -> f64 {
        if self.expected == 0 {
            1.0
        } else {
            self.fetched as f64 / self.expected as f64
        }
    }

    /// An empty collection is complete: zero verified items is not a loss.
    pub fn is_acceptable(&self) -> bool {
        self.expected == 0 || self.ratio() >= self.required_ratio
    }
}

pub fn check_completeness(fetched: u64, expected: u64, required_ratio: f64) -> Completeness {
    Completeness {
        fetched,
        expected,
        required_ratio,
    }
}

/// Outcome of one committed scope.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub scope: SyncScope,
    /// Total reported by the remote side.
    pub expected: u64,
    /// Unique items retrieved.
    pub fetched: u64,
    /// Rows upserted.
    pub stored: u64,
    pub joined: usize,
    pub left: usize,
    /// Rows removed because their actor left.
    pub deleted: u64,
    pub chunks: usize,
    /// Chunks that needed the sequential pass.
    pub requeued: usize,
    /// Chunks that failed the sequential pass too.
    pub lost: usize,
    /// Items whose engagement list needed a deep scan.
    pub deep_scanned: usize,
    /// Leave detection was skipped because data was lost.
    pub leaves_suppressed: bool,
    pub calls: CallStatsSnapshot,
}

impl SyncReport {
    pub fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            expected: 0,
            fetched: 0,
            stored: 0,
            joined: 0,
            left: 0,
            deleted: 0,
            chunks: 0,
            requeued: 0,
            lost: 0,
            deep_scanned: 0,
            leaves_suppressed: false,
            calls: CallStatsSnapshot::default(),
        }
    }
}
