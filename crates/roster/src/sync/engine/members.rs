use std::sync::Arc;

use sea_orm::DatabaseConnection;

use super::{
    commit_membership, ensure_complete, ensure_credentials, enrich_ids, fetch_chunks,
    report_outcome, unique_entities,
};
use crate::api::methods::members_params;
use crate::api::{CallGateway, Endpoint, RemoteEntity};
use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;
use crate::sync::error::{Result, SyncError};
use crate::sync::fetch::{ListFetcher, discover_total};
use crate::sync::progress::{ProgressCallback, SyncProgress, emit};
use crate::sync::scheduler::{ChunkScheduler, plan_chunks};
use crate::sync::types::{Project, SyncOptions, SyncReport};

/// Mirror the community member list of `project`.
///
/// Joins and leaves are appended to the history trail; leavers are deleted.
/// The counters of `members`, `join_history` and `leave_history` move only
/// when the whole snapshot was committed.
#[tracing::instrument(skip_all, fields(project = %project.name))]
pub async fn sync_members(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<SyncReport> {
    let scope = project.scope(CollectionKind::Members);
    let result = run(db, gateway, project, options, on_progress).await;
    report_outcome(&scope, on_progress, result)
}

async fn run(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<SyncReport> {
    ensure_credentials(project)?;
    let scope = project.scope(CollectionKind::Members);
    let gateway = gateway.for_scope(scope.to_string());
    let mut report = SyncReport::new(scope.clone());

    let params = members_params(project.community_id);
    let total = discover_total(&gateway, &project.pool, Endpoint::Members, &params)
        .await
        .map_err(|source| SyncError::Discovery {
            scope: scope.clone(),
            source,
        })?;
    report.expected = total;

    let chunks = plan_chunks(&scope, total, options.chunk_size, &project.pool);
    let workers = ChunkScheduler::new(project.pool.clone(), options.max_workers).workers();
    tracing::info!(scope = %scope, total, chunks = chunks.len(), workers, "starting member sync");
    emit(
        on_progress.map(Arc::as_ref),
        SyncProgress::Discovered {
            scope: scope.to_string(),
            total,
            chunks: chunks.len(),
            workers,
        },
    );

    let fetcher: ListFetcher<RemoteEntity> =
        ListFetcher::new(gateway.clone(), options.compiler(), Endpoint::Members, params);
    let fetched = fetch_chunks(fetcher, chunks, total, &project.pool, options, on_progress).await;
    report.chunks = fetched.chunks;
    report.requeued = fetched.requeued;
    report.lost = fetched.lost.len();

    let members = unique_entities(fetched.outputs.into_iter().flat_map(|s| s.output));
    report.fetched = members.len() as u64;
    ensure_complete(&scope, report.fetched, total, options)?;

    let delta = commit_membership(
        db,
        &scope,
        &members,
        Provenance::MemberList,
        !fetched.lost.is_empty(),
        options,
        on_progress,
        &mut report,
    )
    .await?;
    report.calls = gateway.stats();

    if options.enrich && !delta.joined.is_empty() {
        // The data is committed; a failed enrichment only leaves profiles thinner.
        if let Err(err) = enrich_ids(
            db,
            &gateway,
            project,
            CollectionKind::Members,
            &delta.joined,
            options,
            on_progress,
        )
        .await
        {
            tracing::warn!(scope = %scope, error = %err, "profile enrichment failed");
        }
    }
    Ok(report)
}
