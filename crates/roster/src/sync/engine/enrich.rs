//! Profile enrichment.
//!
//! List endpoints often return truncated profiles. Enrichment looks the
//! touched actors up again through the profile endpoint and writes the
//! result with non-empty-wins semantics. Only actors already cached in the
//! scope are touched; enrichment never adds rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;

use super::{commit_plan, ensure_credentials, fetch_chunks, report_outcome, unique_entities};
use crate::api::CallGateway;
use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;
use crate::store;
use crate::store::convert::{engagement_active_model, member_active_model};
use crate::sync::error::Result;
use crate::sync::fetch::{ProfileFetcher, lookup_groups};
use crate::sync::progress::{ProgressCallback, SyncProgress, emit};
use crate::sync::reconcile::{EngagementObservation, merge_engagement};
use crate::sync::scheduler::plan_chunks;
use crate::sync::types::{Project, SyncOptions};
use crate::sync::writer::{WriteOp, WritePlan};

fn provenance_for(kind: CollectionKind) -> Provenance {
    match kind {
        CollectionKind::DialogParticipants => Provenance::DialogList,
        CollectionKind::Authors => Provenance::ContentAuthor,
        k if k.is_engagement() => Provenance::Engagement,
        _ => Provenance::MemberList,
    }
}

/// Re-fetch full profiles of `ids` and merge them into the rows of `kind`.
///
/// Returns the number of rows updated. Lookups that fail after the
/// sequential retry are skipped with a warning.
#[tracing::instrument(skip_all, fields(project = %project.name, kind = %kind, ids = ids.len()))]
pub async fn enrich_profiles(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    kind: CollectionKind,
    ids: &[i64],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<u64> {
    let result = enrich_ids(db, gateway, project, kind, ids, options, on_progress).await;
    report_outcome(&project.scope(kind), on_progress, result)
}

/// Enrichment without closing the run, for use inside a larger sync.
pub(crate) async fn enrich_ids(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    kind: CollectionKind,
    ids: &[i64],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<u64> {
    ensure_credentials(project)?;
    if kind.is_history() {
        tracing::debug!(kind = %kind, "history rows carry no profiles");
        return Ok(0);
    }
    let ids: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| *id > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }

    let scope = project.scope(kind);
    let gateway = gateway.for_scope(scope.to_string());
    let compiler = options.compiler();
    let groups_per_chunk = compiler.calls_per_request() as u64;
    let fetcher = ProfileFetcher::new(gateway.clone(), compiler, lookup_groups(&ids));
    let groups = fetcher.group_count();
    let chunks = plan_chunks(&scope, groups, groups_per_chunk, &project.pool);

    emit(
        on_progress.map(Arc::as_ref),
        SyncProgress::Enriching {
            scope: scope.to_string(),
            ids: ids.len(),
        },
    );
    let fetched = fetch_chunks(fetcher, chunks, groups, &project.pool, options, on_progress).await;
    if !fetched.lost.is_empty() {
        tracing::warn!(
            scope = %scope,
            lost_chunks = fetched.lost.len(),
            "some profile lookups failed, those actors keep their stored profiles"
        );
    }
    let profiles = unique_entities(fetched.outputs.into_iter().flat_map(|s| s.output));

    let name = project.name.as_ref();
    let now = Utc::now();
    let mut plan = WritePlan::new();
    if kind.is_engagement() {
        let stored = store::load_engagements(db, name, kind, &ids).await?;
        let rows = profiles
            .into_values()
            .filter_map(|entity| {
                let model = stored.get(&entity.id)?;
                let observed = EngagementObservation {
                    profile: entity.profile,
                    ..Default::default()
                };
                let merged = merge_engagement(entity.id, Some(model), observed);
                Some(engagement_active_model(name, kind, &merged, now))
            })
            .collect();
        plan.push(WriteOp::UpsertEngagements(rows));
    } else {
        let cached = store::load_member_ids(db, name, kind).await?;
        let provenance = provenance_for(kind);
        let rows = profiles
            .values()
            .filter(|entity| cached.contains(&entity.id))
            .map(|entity| member_active_model(name, kind, entity, provenance, now))
            .collect();
        plan.push(WriteOp::UpsertMembers(rows));
    }

    let summary = commit_plan(db, &scope, plan, options, on_progress).await?;
    tracing::info!(scope = %scope, updated = summary.upserted, "profiles enriched");
    Ok(summary.upserted)
}

/// Enrich every actor cached in one scope.
pub async fn enrich_scope(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    kind: CollectionKind,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<u64> {
    let name = project.name.as_ref();
    let ids = match kind {
        k if k.is_engagement() => store::load_engagement_ids(db, name, kind).await,
        _ => store::load_member_ids(db, name, kind).await.map(|ids| {
            let mut ids: Vec<i64> = ids.into_iter().collect();
            ids.sort_unstable();
            ids
        }),
    };
    let result = match ids {
        Ok(ids) => enrich_ids(db, gateway, project, kind, &ids, options, on_progress).await,
        Err(err) => Err(err.into()),
    };
    report_outcome(&project.scope(kind), on_progress, result)
}
