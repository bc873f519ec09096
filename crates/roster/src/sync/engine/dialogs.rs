use std::sync::Arc;

use sea_orm::DatabaseConnection;

use super::{
    commit_membership, ensure_complete, ensure_credentials, fetch_chunks, report_outcome,
    unique_entities,
};
use crate::api::{CallGateway, Endpoint, Privilege, filter_privileged};
use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;
use crate::sync::error::Result;
use crate::sync::fetch::DialogFetcher;
use crate::sync::progress::{ProgressCallback, SyncProgress, emit};
use crate::sync::scheduler::ChunkScheduler;
use crate::sync::types::{FetchChunk, Project, SyncOptions, SyncReport};

/// Mirror the union of participants of the given message dialogs.
///
/// Only credentials with administrator rights on the community take part.
/// Completeness is measured in dialogs: every dialog that could not be read
/// counts against the threshold.
#[tracing::instrument(skip_all, fields(project = %project.name, peers = peers.len()))]
pub async fn sync_dialog_participants(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    peers: &[i64],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<SyncReport> {
    let scope = project.scope(CollectionKind::DialogParticipants);
    let result = run(db, gateway, project, peers, options, on_progress).await;
    report_outcome(&scope, on_progress, result)
}

async fn run(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    peers: &[i64],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<SyncReport> {
    ensure_credentials(project)?;
    let scope = project.scope(CollectionKind::DialogParticipants);
    let mut report = SyncReport::new(scope.clone());
    if peers.is_empty() {
        tracing::warn!(scope = %scope, "no dialogs configured, nothing to sync");
        emit(
            on_progress.map(Arc::as_ref),
            SyncProgress::Warning {
                message: format!("{scope}: no dialogs configured"),
            },
        );
        return Ok(report);
    }

    let gateway = gateway.for_scope(scope.to_string());
    let pool = filter_privileged(
        &gateway,
        &project.pool,
        project.community_id,
        Privilege::Administrator,
    )
    .await?;

    // The participant endpoint returns a whole dialog in one call.
    let chunks: Vec<FetchChunk> = (0..peers.len())
        .map(|index| FetchChunk {
            index,
            offset: 0,
            count: Endpoint::ConversationMembers.page_ceiling(),
            rotation_start: pool.rotation_start(index),
            scope: scope.clone(),
        })
        .collect();
    let total = peers.len() as u64;
    report.expected = total;
    emit(
        on_progress.map(Arc::as_ref),
        SyncProgress::Discovered {
            scope: scope.to_string(),
            total,
            chunks: chunks.len(),
            workers: ChunkScheduler::new(pool.clone(), options.max_workers).workers(),
        },
    );

    let fetcher = DialogFetcher::new(gateway.clone(), peers.to_vec());
    let fetched = fetch_chunks(fetcher, chunks, total, &pool, options, on_progress).await;
    report.chunks = fetched.chunks;
    report.requeued = fetched.requeued;
    report.lost = fetched.lost.len();

    let dialogs_read = fetched.outputs.len() as u64;
    ensure_complete(&scope, dialogs_read, total, options)?;

    let participants = unique_entities(
        fetched
            .outputs
            .into_iter()
            .flat_map(|success| success.output.members),
    );
    report.fetched = participants.len() as u64;
    tracing::info!(
        scope = %scope,
        dialogs = dialogs_read,
        participants = report.fetched,
        "dialog participants fetched"
    );

    commit_membership(
        db,
        &scope,
        &participants,
        Provenance::DialogList,
        !fetched.lost.is_empty(),
        options,
        on_progress,
        &mut report,
    )
    .await?;
    report.calls = gateway.stats();
    Ok(report)
}
