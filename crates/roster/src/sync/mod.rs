//! The chunked parallel sync pipeline.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `SyncScope`, `FetchChunk`, `SyncOptions`, constants
//! - [`scheduler`] - Chunk planning and the bounded parallel pass
//! - [`requeue`] - Sequential retry of failed chunks
//! - [`deep_scan`] - Follow-up pagination of overflowing engagement lists
//! - [`reconcile`] - Membership diffs and engagement merges
//! - [`writer`] - Split-session persistence
//! - [`engine`] - Complete runs: `sync_members()`, `sync_content_and_engagement()`, ...
//! - [`progress`] / [`registry`] - Progress events and the polled task registry
//!
//! # Example
//!
//! ```ignore
//! use roster::sync::{Project, SyncContext, SyncOptions};
//! use roster::api::CredentialPool;
//!
//! let project = Project::new("acme", 123, CredentialPool::from_secrets(&tokens, 3));
//! let ctx = SyncContext::builder().api(api).database(db).build()?;
//! let report = ctx.sync_members(&project).await?;
//! println!("{} members, {} joined", report.fetched, report.joined);
//! ```

mod context;
pub mod deep_scan;
pub mod engine;
mod error;
pub mod fetch;
mod progress;
pub mod reconcile;
pub mod registry;
pub mod requeue;
pub mod scheduler;
mod types;
pub mod writer;

// Re-export types
pub use types::{
    ChunkState, Completeness, FetchChunk, LossThresholds, Project, SyncOptions, SyncReport,
    SyncScope, check_completeness,
};

// Re-export constants
pub use types::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_CHUNK_SIZE, DEFAULT_ENGAGEMENT_CHUNK_ITEMS,
    DEFAULT_ENGAGEMENT_MIN_RATIO, DEFAULT_LAUNCH_STAGGER_MS, DEFAULT_MAX_RATE_LIMIT_WAITS,
    DEFAULT_MEMBERSHIP_MIN_RATIO, DEFAULT_RATE_LIMIT_STEP_MS, DEFAULT_REQUEUE_DELAY_MS,
    DEFAULT_WORKER_CAP, DEFAULT_WRITE_BATCH_SIZE, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
    MAX_TRANSIENT_RETRIES,
};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, emit};
pub use registry::{ProgressRegistry, TaskProgress, TaskStatus};

pub use context::{SyncContext, SyncContextBuilder, SyncContextError};
pub use error::SyncError;

// Re-export engine functions for convenience
pub use engine::{
    enrich_profiles, enrich_scope, sync_content_and_engagement, sync_dialog_participants,
    sync_members,
};
pub use reconcile::{MembershipDiff, diff, merge_engagement};
pub use writer::{SplitSessionWriter, WriteOp, WritePlan, WriteSummary};
