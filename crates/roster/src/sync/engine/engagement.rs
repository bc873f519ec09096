use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;

use super::{
    commit_plan, ensure_complete, ensure_credentials, enrich_ids, fetch_chunks, report_outcome,
};
use crate::api::methods::content_params;
use crate::api::{
    BatchRequestCompiler, CallGateway, ContentItem, EngagementHit, Endpoint, RemoteEntity,
};
use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;
use crate::store;
use crate::store::convert::{engagement_active_model, member_active_model};
use crate::store::meta::meta_active_model;
use crate::sync::deep_scan::{DeepScanExpander, DeepScanFetcher};
use crate::sync::error::{Result, SyncError};
use crate::sync::fetch::{
    EngagementTarget, FastScanFetcher, ItemEngagement, ListFetcher, discover_total,
};
use crate::sync::progress::{ProgressCallback, SyncProgress, emit};
use crate::sync::reconcile::{EngagementObservation, collect_observations, merge_engagement};
use crate::sync::scheduler::{ChunkScheduler, plan_chunks};
use crate::sync::types::{Project, SyncOptions, SyncReport, SyncScope};
use crate::sync::writer::{WriteOp, WritePlan};

/// Everything observed for one engagement kind, ready to merge.
struct KindScan {
    report: SyncReport,
    observations: BTreeMap<i64, EngagementObservation>,
}

/// Mirror content authors and the engagement lists of `kinds`.
///
/// Content is fetched once and shared by every kind. Each kind runs a fast
/// pass over the first page of every item, then deep-scans the items whose
/// lists overflow that page. Every completeness check runs before any write,
/// so one incomplete kind leaves the whole cache untouched.
///
/// Returns the `authors` report followed by one report per kind.
#[tracing::instrument(skip_all, fields(project = %project.name, kinds = kinds.len()))]
pub async fn sync_content_and_engagement(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    kinds: &[CollectionKind],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<Vec<SyncReport>> {
    let scope = project.scope(CollectionKind::Authors);
    let result = run(db, gateway, project, kinds, options, on_progress).await;
    report_outcome(&scope, on_progress, result)
}

async fn run(
    db: &DatabaseConnection,
    gateway: &CallGateway,
    project: &Project,
    kinds: &[CollectionKind],
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<Vec<SyncReport>> {
    ensure_credentials(project)?;
    let content_scope = project.scope(CollectionKind::Authors);
    let gateway = gateway.for_scope(content_scope.to_string());
    let compiler = options.compiler();

    let (items, mut authors_report) =
        fetch_content(&gateway, project, &content_scope, &compiler, options, on_progress).await?;

    let mut scans = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let Some(endpoint) = Endpoint::for_engagement(kind) else {
            tracing::warn!(kind = %kind, "not an engagement kind, skipping");
            continue;
        };
        let scan = scan_kind(
            &gateway,
            project,
            &items,
            kind,
            endpoint,
            &compiler,
            options,
            on_progress,
        )
        .await?;
        scans.push(scan);
    }

    // Every threshold has passed; build the write plan.
    let name = project.name.as_ref();
    let now = Utc::now();
    let mut plan = WritePlan::new();

    let authors: BTreeSet<i64> = items.values().filter_map(ContentItem::author_id).collect();
    let known_authors = store::load_member_ids(db, name, CollectionKind::Authors).await?;
    let new_authors = authors.iter().filter(|id| !known_authors.contains(id)).count();
    let author_count = (known_authors.len() + new_authors) as u64;
    plan.push(WriteOp::UpsertMembers(
        authors
            .iter()
            .map(|id| {
                member_active_model(
                    name,
                    CollectionKind::Authors,
                    &RemoteEntity::bare(*id),
                    Provenance::ContentAuthor,
                    now,
                )
            })
            .collect(),
    ));
    plan.meta(meta_active_model(name, CollectionKind::Authors, author_count, now));
    authors_report.stored = authors.len() as u64;
    authors_report.joined = new_authors;

    let mut counts = vec![(content_scope.clone(), author_count)];
    let mut touched: Vec<(CollectionKind, Vec<i64>)> = Vec::new();
    for scan in &mut scans {
        let kind = scan.report.scope.kind;
        let actor_ids: Vec<i64> = scan.observations.keys().copied().collect();
        let stored = store::load_engagements(db, name, kind, &actor_ids).await?;
        let existing = store::count_records(db, name, kind).await?;
        let new_actors = actor_ids.iter().filter(|id| !stored.contains_key(id)).count();

        let rows: Vec<_> = std::mem::take(&mut scan.observations)
            .into_iter()
            .map(|(actor_id, observed)| {
                let merged = merge_engagement(actor_id, stored.get(&actor_id), observed);
                engagement_active_model(name, kind, &merged, now)
            })
            .collect();
        scan.report.stored = rows.len() as u64;
        scan.report.joined = new_actors;
        plan.push(WriteOp::UpsertEngagements(rows));

        let count = existing + new_actors as u64;
        plan.meta(meta_active_model(name, kind, count, now));
        counts.push((scan.report.scope.clone(), count));
        touched.push((kind, actor_ids));
    }

    let summary = commit_plan(db, &content_scope, plan, options, on_progress).await?;
    for (scope, count) in counts {
        emit(
            on_progress.map(Arc::as_ref),
            SyncProgress::Committed {
                scope: scope.to_string(),
                count,
            },
        );
    }
    tracing::info!(
        scope = %content_scope,
        content = items.len(),
        authors = authors.len(),
        kinds = scans.len(),
        rows = summary.upserted,
        sessions = summary.sessions,
        "content and engagement committed"
    );

    if options.enrich {
        for (kind, ids) in touched {
            if let Err(err) =
                enrich_ids(db, &gateway, project, kind, &ids, options, on_progress).await
            {
                tracing::warn!(kind = %kind, error = %err, "profile enrichment failed");
            }
        }
    }

    authors_report.calls = gateway.stats();
    let mut reports = vec![authors_report];
    reports.extend(scans.into_iter().map(|mut scan| {
        scan.report.calls = gateway.stats();
        scan.report
    }));
    Ok(reports)
}

/// Chunked fetch of every content item of the community.
async fn fetch_content(
    gateway: &CallGateway,
    project: &Project,
    scope: &SyncScope,
    compiler: &Arc<dyn BatchRequestCompiler>,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<(BTreeMap<i64, ContentItem>, SyncReport)> {
    let mut report = SyncReport::new(scope.clone());
    let params = content_params(project.community_id);
    let total = discover_total(gateway, &project.pool, Endpoint::Content, &params)
        .await
        .map_err(|source| SyncError::Discovery {
            scope: scope.clone(),
            source,
        })?;
    report.expected = total;

    let chunks = plan_chunks(scope, total, options.content_chunk_size, &project.pool);
    emit(
        on_progress.map(Arc::as_ref),
        SyncProgress::Discovered {
            scope: scope.to_string(),
            total,
            chunks: chunks.len(),
            workers: ChunkScheduler::new(project.pool.clone(), options.max_workers).workers(),
        },
    );

    let fetcher: ListFetcher<ContentItem> =
        ListFetcher::new(gateway.clone(), Arc::clone(compiler), Endpoint::Content, params);
    let fetched = fetch_chunks(fetcher, chunks, total, &project.pool, options, on_progress).await;
    report.chunks = fetched.chunks;
    report.requeued = fetched.requeued;
    report.lost = fetched.lost.len();

    let mut items = BTreeMap::new();
    for item in fetched.outputs.into_iter().flat_map(|s| s.output) {
        items.entry(item.id).or_insert(item);
    }
    report.fetched = items.len() as u64;
    ensure_complete(scope, report.fetched, total, options)?;
    Ok((items, report))
}

/// Fast pass plus deep scan of one engagement kind.
///
/// An item counts as retrieved when its first page arrived and none of its
/// deep windows was lost.
#[allow(clippy::too_many_arguments)]
async fn scan_kind(
    gateway: &CallGateway,
    project: &Project,
    items: &BTreeMap<i64, ContentItem>,
    kind: CollectionKind,
    endpoint: Endpoint,
    compiler: &Arc<dyn BatchRequestCompiler>,
    options: &SyncOptions,
    on_progress: Option<&Arc<ProgressCallback>>,
) -> Result<KindScan> {
    let scope = project.scope(kind);
    let gateway = gateway.for_scope(scope.to_string());
    let mut report = SyncReport::new(scope.clone());

    let targets: Vec<EngagementTarget> = items
        .values()
        .filter_map(|item| {
            let reported = item.engagement_count(kind);
            (reported > 0).then_some(EngagementTarget {
                item_id: item.id,
                owner_id: item.owner_id,
                reported,
            })
        })
        .collect();
    let expected = targets.len() as u64;
    report.expected = expected;

    let chunks = plan_chunks(&scope, expected, options.engagement_chunk_items, &project.pool);
    emit(
        on_progress.map(Arc::as_ref),
        SyncProgress::Discovered {
            scope: scope.to_string(),
            total: expected,
            chunks: chunks.len(),
            workers: ChunkScheduler::new(project.pool.clone(), options.max_workers).workers(),
        },
    );
    let fast_fetcher =
        FastScanFetcher::new(gateway.clone(), Arc::clone(compiler), endpoint, targets);
    let fast =
        fetch_chunks(fast_fetcher, chunks, expected, &project.pool, options, on_progress).await;
    report.chunks = fast.chunks;
    report.requeued = fast.requeued;
    report.lost = fast.lost.len();

    let fast_items: Vec<ItemEngagement> = fast.outputs.into_iter().flat_map(|s| s.output).collect();
    let expander = DeepScanExpander::new(endpoint, compiler.calls_per_request());
    let windows = expander.plan(&fast_items);

    let mut hits: Vec<EngagementHit> = fast_items
        .iter()
        .flat_map(|item| item.hits.iter().copied())
        .collect();
    let mut incomplete: HashSet<i64> = HashSet::new();

    if !windows.is_empty() {
        let overflowing: HashSet<i64> = windows.iter().map(|w| w.target.item_id).collect();
        report.deep_scanned = overflowing.len();
        tracing::info!(
            scope = %scope,
            items = overflowing.len(),
            requests = windows.len(),
            step = expander.step(),
            "deep scanning overflowing items"
        );
        emit(
            on_progress.map(Arc::as_ref),
            SyncProgress::DeepScan {
                scope: scope.to_string(),
                items: overflowing.len(),
                requests: windows.len(),
            },
        );

        let deep_chunks = expander.chunks(&scope, &windows, &project.pool);
        let deep_fetcher =
            DeepScanFetcher::new(gateway.clone(), Arc::clone(compiler), endpoint, windows.clone());
        let deep = fetch_chunks(
            deep_fetcher,
            deep_chunks,
            windows.len() as u64,
            &project.pool,
            options,
            on_progress,
        )
        .await;
        report.chunks += deep.chunks;
        report.requeued += deep.requeued;
        report.lost += deep.lost.len();

        for lost in &deep.lost {
            if let Some(window) = windows.get(lost.chunk.index) {
                incomplete.insert(window.target.item_id);
            }
        }
        hits.extend(deep.outputs.into_iter().flat_map(|s| s.output.hits));
    }

    let retrieved = fast_items
        .iter()
        .filter(|item| !incomplete.contains(&item.target.item_id))
        .count() as u64;
    report.fetched = retrieved;
    ensure_complete(&scope, retrieved, expected, options)?;

    let observations = collect_observations(hits.into_iter().filter(|hit| hit.actor_id > 0));
    tracing::info!(
        scope = %scope,
        items = retrieved,
        expected,
        actors = observations.len(),
        "engagement scanned"
    );
    Ok(KindScan {
        report,
        observations,
    })
}
