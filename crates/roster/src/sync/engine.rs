//! Orchestration of complete sync runs.
//!
//! Every run has the same shape:
//!
//! 1. discover the remote total and plan chunks
//! 2. parallel pass, then sequential retry of the failures
//! 3. completeness check against the per-kind threshold
//! 4. reconcile with the cache
//! 5. split-session write, freshness counters last
//!
//! Nothing is written unless step 3 passes, so an abandoned run leaves the
//! cache exactly as it was.

mod dialogs;
mod engagement;
mod enrich;
mod members;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;

use super::error::{Result, SyncError};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::reconcile::{MembershipDiff, diff};
use super::requeue::FailureRequeue;
use super::scheduler::{ChunkFetcher, ChunkScheduler, ChunkSuccess, FailedChunk};
use super::types::{
    Completeness, FetchChunk, Project, SyncOptions, SyncReport, SyncScope, check_completeness,
};
use super::writer::{SplitSessionWriter, WriteOp, WritePlan, WriteSummary};
use crate::api::{CredentialPool, RemoteEntity};
use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;
use crate::store::convert::{history_active_model, member_active_model};
use crate::store::meta::meta_active_model;
use crate::store::{self, StoreError};

pub use dialogs::sync_dialog_participants;
pub use engagement::sync_content_and_engagement;
pub use enrich::{enrich_profiles, enrich_scope};
pub use members::sync_members;

use enrich::enrich_ids;

/// Output of both passes over one chunk plan.
pub(crate) struct Fetched<T> {
    /// Successful chunks in index order.
    pub outputs: Vec<ChunkSuccess<T>>,
    pub chunks: usize,
    /// Chunks that needed the sequential pass.
    pub requeued: usize,
    pub lost: Vec<FailedChunk>,
}

impl<T> Fetched<T> {
    fn empty() -> Self {
        Self {
            outputs: Vec::new(),
            chunks: 0,
            requeued: 0,
            lost: Vec::new(),
        }
    }
}

/// Parallel pass over `chunks`, then one sequential retry of every failure.
pub(crate) async fn fetch_chunks<F: ChunkFetcher>(
    fetcher: F,
    chunks: Vec<FetchChunk>,
    total: u64,
    pool: &CredentialPool,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Fetched<F::Output> {
    if chunks.is_empty() {
        return Fetched::empty();
    }
    let planned = chunks.len();
    let fetcher = Arc::new(fetcher);

    let pass = ChunkScheduler::new(pool.clone(), options.max_workers)
        .with_stagger(options.launch_stagger)
        .with_progress(on_progress.cloned())
        .run(Arc::clone(&fetcher), chunks, total)
        .await;
    let requeued = pass.failed.len();

    let retried = FailureRequeue::new(options.requeue_delay)
        .with_progress(on_progress.cloned())
        .retry(fetcher.as_ref(), pool, pass.failed)
        .await;

    let mut outputs = pass.completed;
    outputs.extend(retried.recovered);
    outputs.sort_by_key(|success| success.chunk.index);

    Fetched {
        outputs,
        chunks: planned,
        requeued,
        lost: retried.lost,
    }
}

pub(crate) fn ensure_credentials(project: &Project) -> Result<()> {
    if project.pool.is_empty() {
        return Err(SyncError::NoCredentials {
            project: project.name.to_string(),
        });
    }
    Ok(())
}

/// Reject the run when too little of the expected total arrived.
pub(crate) fn ensure_complete(
    scope: &SyncScope,
    fetched: u64,
    expected: u64,
    options: &SyncOptions,
) -> Result<Completeness> {
    let completeness =
        check_completeness(fetched, expected, options.thresholds.for_kind(scope.kind));
    if completeness.is_acceptable() {
        return Ok(completeness);
    }
    tracing::warn!(
        scope = %scope,
        fetched,
        expected,
        required = completeness.required_ratio,
        "completeness below threshold, nothing will be written"
    );
    Err(SyncError::DataLossThreshold {
        kind: scope.kind,
        fetched,
        expected,
        required_ratio: completeness.required_ratio,
    })
}

/// Close a run on the progress channel: `Finished` on success, `Aborted`
/// with the error otherwise. The result is passed on.
pub(crate) fn report_outcome<T>(
    scope: &SyncScope,
    on_progress: Option<&Arc<ProgressCallback>>,
    result: Result<T>,
) -> Result<T> {
    let event = match &result {
        Ok(_) => SyncProgress::Finished {
            scope: scope.to_string(),
        },
        Err(err) => {
            tracing::error!(scope = %scope, error = %err, "sync aborted");
            SyncProgress::Aborted {
                scope: scope.to_string(),
                message: err.to_string(),
            }
        }
    };
    emit(on_progress.map(Arc::as_ref), event);
    result
}

/// Deduplicate fetched entities by id, keeping the first sighting.
pub(crate) fn unique_entities(
    entities: impl IntoIterator<Item = RemoteEntity>,
) -> BTreeMap<i64, RemoteEntity> {
    let mut unique = BTreeMap::new();
    for entity in entities {
        if entity.id > 0 {
            unique.entry(entity.id).or_insert(entity);
        }
    }
    unique
}

pub(crate) async fn commit_plan(
    db: &DatabaseConnection,
    scope: &SyncScope,
    plan: WritePlan,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> std::result::Result<WriteSummary, StoreError> {
    SplitSessionWriter::new(db, options.write_batch_size, options.write_retry.clone())
        .with_progress(on_progress.map(Arc::as_ref))
        .commit(scope, plan)
        .await
}

/// Diff a complete membership snapshot against the cache and write it:
/// upserts, join/leave history, deletions of leavers and the counters of
/// the scope and both history kinds.
///
/// Every history row is written in the same transaction as the upsert or
/// deletion it records, so a failed session never strands either one.
///
/// With `data_lost` set, leaves are not detected; joins still are.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn commit_membership(
    db: &DatabaseConnection,
    scope: &SyncScope,
    fresh: &BTreeMap<i64, RemoteEntity>,
    provenance: Provenance,
    data_lost: bool,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
    report: &mut SyncReport,
) -> Result<MembershipDiff> {
    let project = scope.project.as_ref();
    let callback = on_progress.map(Arc::as_ref);

    let old_ids = store::load_member_ids(db, project, scope.kind).await?;
    let new_ids: HashSet<i64> = fresh.keys().copied().collect();
    let mut delta = diff(&old_ids, &new_ids);
    if data_lost {
        let dropped = delta.suppress_leaves();
        report.leaves_suppressed = true;
        tracing::warn!(scope = %scope, dropped, "chunks were lost, leave detection skipped");
        emit(
            callback,
            SyncProgress::Warning {
                message: format!("{scope}: chunks were lost, {dropped} possible leaves ignored"),
            },
        );
    }
    emit(
        callback,
        SyncProgress::Reconciled {
            scope: scope.to_string(),
            joined: delta.joined.len(),
            left: delta.left.len(),
            retained: delta.retained.len(),
        },
    );

    let mut leaver_names = store::load_member_names(db, project, scope.kind, &delta.left).await?;
    let joins_before = store::count_records(db, project, CollectionKind::JoinHistory).await?;
    let leaves_before = store::count_records(db, project, CollectionKind::LeaveHistory).await?;

    let now = Utc::now();
    let joined: HashSet<i64> = delta.joined.iter().copied().collect();
    // Each group holds up to `group` causes plus their history rows.
    let group = (options.write_batch_size / 2).max(1);
    let mut plan = WritePlan::new();

    let fresh: Vec<&RemoteEntity> = fresh.values().collect();
    for batch in fresh.chunks(group) {
        let upserts = batch
            .iter()
            .map(|entity| member_active_model(project, scope.kind, entity, provenance, now))
            .collect();
        let joins = batch
            .iter()
            .filter(|entity| joined.contains(&entity.id))
            .map(|entity| {
                let names = (entity.profile.first_name.clone(), entity.profile.last_name.clone());
                history_active_model(
                    project,
                    CollectionKind::JoinHistory,
                    scope.kind,
                    entity.id,
                    names,
                    now,
                )
            })
            .collect();
        plan.push_together(vec![WriteOp::UpsertMembers(upserts), WriteOp::AppendHistory(joins)]);
    }

    for batch in delta.left.chunks(group) {
        let leaves = batch
            .iter()
            .map(|id| {
                let names = leaver_names.remove(id).unwrap_or_default();
                history_active_model(
                    project,
                    CollectionKind::LeaveHistory,
                    scope.kind,
                    *id,
                    names,
                    now,
                )
            })
            .collect();
        plan.push_together(vec![
            WriteOp::AppendHistory(leaves),
            WriteOp::DeleteMembers {
                project: project.to_string(),
                kind: scope.kind,
                remote_ids: batch.to_vec(),
            },
        ]);
    }

    let count = new_ids.len() as u64;
    let joins_after = joins_before + delta.joined.len() as u64;
    let leaves_after = leaves_before + delta.left.len() as u64;
    plan.meta(meta_active_model(project, scope.kind, count, now))
        .meta(meta_active_model(project, CollectionKind::JoinHistory, joins_after, now))
        .meta(meta_active_model(project, CollectionKind::LeaveHistory, leaves_after, now));

    let summary = commit_plan(db, scope, plan, options, on_progress).await?;

    report.stored = summary.upserted;
    report.deleted = summary.deleted;
    report.joined = delta.joined.len();
    report.left = delta.left.len();
    emit(
        callback,
        SyncProgress::Committed {
            scope: scope.to_string(),
            count,
        },
    );
    tracing::info!(
        scope = %scope,
        count,
        joined = report.joined,
        left = report.left,
        sessions = summary.sessions,
        "membership committed"
    );
    Ok(delta)
}
