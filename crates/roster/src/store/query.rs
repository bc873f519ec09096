use std::collections::{HashMap, HashSet};

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::entity::collection_kind::CollectionKind;
use crate::entity::engagement_record::{
    Column as EngagementColumn, Entity as EngagementRecord, Model as EngagementModel,
};
use crate::entity::history_event::{
    Column as HistoryColumn, Entity as HistoryEvent, Model as HistoryModel,
};
use crate::entity::member_record::{
    Column as MemberColumn, Entity as MemberRecord, Model as MemberModel,
};

use super::bulk::ROWS_PER_STATEMENT;
use super::errors::Result;

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    /// Page number (0-indexed).
    pub page: u64,
    /// Items per page.
    pub per_page: u64,
}

impl Pagination {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page,
            per_page: per_page.max(MIN_PER_PAGE),
        }
    }
}

const MIN_PER_PAGE: u64 = 1;

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: 50,
        }
    }
}

/// Result of a paginated query.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

// ─── Membership ──────────────────────────────────────────────────────────────

/// Remote ids currently cached for a membership-style scope.
pub async fn load_member_ids<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
) -> Result<HashSet<i64>> {
    let ids: Vec<i64> = MemberRecord::find()
        .select_only()
        .column(MemberColumn::RemoteId)
        .filter(MemberColumn::Project.eq(project))
        .filter(MemberColumn::Kind.eq(kind))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Name snapshots of cached actors, used when recording leaves.
pub async fn load_member_names<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
    remote_ids: &[i64],
) -> Result<HashMap<i64, (Option<String>, Option<String>)>> {
    let mut names = HashMap::with_capacity(remote_ids.len());
    for chunk in remote_ids.chunks(ROWS_PER_STATEMENT) {
        let rows: Vec<(i64, Option<String>, Option<String>)> = MemberRecord::find()
            .select_only()
            .column(MemberColumn::RemoteId)
            .column(MemberColumn::FirstName)
            .column(MemberColumn::LastName)
            .filter(MemberColumn::Project.eq(project))
            .filter(MemberColumn::Kind.eq(kind))
            .filter(MemberColumn::RemoteId.is_in(chunk.iter().copied()))
            .into_tuple()
            .all(conn)
            .await?;
        names.extend(rows.into_iter().map(|(id, first, last)| (id, (first, last))));
    }
    Ok(names)
}

/// Cached actors of a scope, ordered by remote id.
pub async fn find_members<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
    pagination: Pagination,
) -> Result<PaginatedResult<MemberModel>> {
    let paginator = MemberRecord::find()
        .filter(MemberColumn::Project.eq(project))
        .filter(MemberColumn::Kind.eq(kind))
        .order_by_asc(MemberColumn::RemoteId)
        .paginate(conn, pagination.per_page);

    let total = paginator.num_items().await?;
    let total_pages = paginator.num_pages().await?;
    let items = paginator.fetch_page(pagination.page).await?;

    Ok(PaginatedResult {
        items,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages,
    })
}

// ─── Engagement ──────────────────────────────────────────────────────────────

/// Stored engagement rows for the given actors, keyed by remote id.
pub async fn load_engagements<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
    actor_ids: &[i64],
) -> Result<HashMap<i64, EngagementModel>> {
    let mut rows = HashMap::with_capacity(actor_ids.len());
    for chunk in actor_ids.chunks(ROWS_PER_STATEMENT) {
        let models = EngagementRecord::find()
            .filter(EngagementColumn::Project.eq(project))
            .filter(EngagementColumn::Kind.eq(kind))
            .filter(EngagementColumn::RemoteId.is_in(chunk.iter().copied()))
            .all(conn)
            .await?;
        rows.extend(models.into_iter().map(|m| (m.remote_id, m)));
    }
    Ok(rows)
}

/// Actor ids cached for an engagement scope.
pub async fn load_engagement_ids<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
) -> Result<Vec<i64>> {
    Ok(EngagementRecord::find()
        .select_only()
        .column(EngagementColumn::RemoteId)
        .filter(EngagementColumn::Project.eq(project))
        .filter(EngagementColumn::Kind.eq(kind))
        .order_by_asc(EngagementColumn::RemoteId)
        .into_tuple()
        .all(conn)
        .await?)
}

/// Top engagers of a scope, most interactions first.
pub async fn find_engagements<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
    pagination: Pagination,
) -> Result<PaginatedResult<EngagementModel>> {
    let paginator = EngagementRecord::find()
        .filter(EngagementColumn::Project.eq(project))
        .filter(EngagementColumn::Kind.eq(kind))
        .order_by_desc(EngagementColumn::InteractionCount)
        .order_by_asc(EngagementColumn::RemoteId)
        .paginate(conn, pagination.per_page);

    let total = paginator.num_items().await?;
    let total_pages = paginator.num_pages().await?;
    let items = paginator.fetch_page(pagination.page).await?;

    Ok(PaginatedResult {
        items,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages,
    })
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Most recent history events of a project, optionally limited to joins or leaves.
pub async fn history_for<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    event: Option<CollectionKind>,
    limit: u64,
) -> Result<Vec<HistoryModel>> {
    let mut query = HistoryEvent::find().filter(HistoryColumn::Project.eq(project));
    if let Some(event) = event {
        query = query.filter(HistoryColumn::Event.eq(event));
    }
    Ok(query
        .order_by_desc(HistoryColumn::OccurredAt)
        .limit(limit)
        .all(conn)
        .await?)
}

// ─── Counts ──────────────────────────────────────────────────────────────────

/// Number of cached rows for a scope, whichever table holds it.
pub async fn count_records<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
) -> Result<u64> {
    let count = if kind.is_engagement() {
        EngagementRecord::find()
            .filter(EngagementColumn::Project.eq(project))
            .filter(EngagementColumn::Kind.eq(kind))
            .count(conn)
            .await?
    } else if kind.is_history() {
        HistoryEvent::find()
            .filter(HistoryColumn::Project.eq(project))
            .filter(HistoryColumn::Event.eq(kind))
            .count(conn)
            .await?
    } else {
        MemberRecord::find()
            .filter(MemberColumn::Project.eq(project))
            .filter(MemberColumn::Kind.eq(kind))
            .count(conn)
            .await?
    };
    Ok(count)
}
