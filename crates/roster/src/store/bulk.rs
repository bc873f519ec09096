use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    sea_query::{Alias, Expr, Func, IntoIden, OnConflict, SimpleExpr},
};

use crate::entity::collection_kind::CollectionKind;
use crate::entity::engagement_record::{
    ActiveModel as EngagementActiveModel, Column as EngagementColumn, Entity as EngagementRecord,
};
use crate::entity::history_event::{ActiveModel as HistoryActiveModel, Entity as HistoryEvent};
use crate::entity::member_record::{
    ActiveModel as MemberActiveModel, Column as MemberColumn, Entity as MemberRecord,
};

use super::errors::Result;

/// Rows per INSERT statement. Keeps bind parameters well under backend limits.
pub const ROWS_PER_STATEMENT: usize = 500;

// ─── Conflict Clauses ────────────────────────────────────────────────────────

/// `col = COALESCE(excluded.col, table.col)`: a NULL observation keeps stored data.
fn keep_when_null<E, C>(table: E, column: C) -> (C, SimpleExpr)
where
    E: IntoIden + 'static,
    C: IntoIden + Copy + 'static,
{
    let excluded: SimpleExpr = Expr::col((Alias::new("excluded"), column)).into();
    let current: SimpleExpr = Expr::col((table, column)).into();
    (column, Func::coalesce([excluded, current]).into())
}

/// `col = excluded.col`.
fn overwrite<C>(column: C) -> (C, SimpleExpr)
where
    C: IntoIden + Copy + 'static,
{
    (column, Expr::col((Alias::new("excluded"), column)).into())
}

/// Conflict on the composite id. Profile columns coalesce, the activity
/// timestamp is refreshed, and provenance/first-seen keep their first values.
pub(crate) fn member_on_conflict() -> OnConflict {
    OnConflict::column(MemberColumn::Id)
        .values([
            keep_when_null(MemberRecord, MemberColumn::FirstName),
            keep_when_null(MemberRecord, MemberColumn::LastName),
            keep_when_null(MemberRecord, MemberColumn::Sex),
            keep_when_null(MemberRecord, MemberColumn::City),
            keep_when_null(MemberRecord, MemberColumn::Country),
            keep_when_null(MemberRecord, MemberColumn::Birthdate),
            keep_when_null(MemberRecord, MemberColumn::Platform),
            keep_when_null(MemberRecord, MemberColumn::LastSeen),
            keep_when_null(MemberRecord, MemberColumn::Deactivated),
            keep_when_null(MemberRecord, MemberColumn::IsClosed),
            keep_when_null(MemberRecord, MemberColumn::CanMessage),
            overwrite(MemberColumn::LastActivityAt),
        ])
        .to_owned()
}

/// Engagement rows carry the already-merged item set, so those columns overwrite.
pub(crate) fn engagement_on_conflict() -> OnConflict {
    OnConflict::column(EngagementColumn::Id)
        .values([
            keep_when_null(EngagementRecord, EngagementColumn::FirstName),
            keep_when_null(EngagementRecord, EngagementColumn::LastName),
            keep_when_null(EngagementRecord, EngagementColumn::Sex),
            keep_when_null(EngagementRecord, EngagementColumn::City),
            keep_when_null(EngagementRecord, EngagementColumn::Country),
            keep_when_null(EngagementRecord, EngagementColumn::Birthdate),
            keep_when_null(EngagementRecord, EngagementColumn::Platform),
            keep_when_null(EngagementRecord, EngagementColumn::LastSeen),
            keep_when_null(EngagementRecord, EngagementColumn::Deactivated),
            keep_when_null(EngagementRecord, EngagementColumn::IsClosed),
            keep_when_null(EngagementRecord, EngagementColumn::CanMessage),
            overwrite(EngagementColumn::ItemIds),
            overwrite(EngagementColumn::InteractionCount),
            keep_when_null(EngagementRecord, EngagementColumn::LastInteractionAt),
            overwrite(EngagementColumn::LastActivityAt),
        ])
        .to_owned()
}

// ─── Bulk Operations ─────────────────────────────────────────────────────────

/// Upsert member rows by composite id.
///
/// Runs on any connection, including an open transaction.
pub async fn upsert_members<C: ConnectionTrait>(
    conn: &C,
    models: Vec<MemberActiveModel>,
) -> Result<u64> {
    let mut written = 0u64;
    for chunk in models.chunks(ROWS_PER_STATEMENT) {
        MemberRecord::insert_many(chunk.to_vec())
            .on_conflict(member_on_conflict())
            .exec_without_returning(conn)
            .await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Upsert engagement rows by composite id.
pub async fn upsert_engagements<C: ConnectionTrait>(
    conn: &C,
    models: Vec<EngagementActiveModel>,
) -> Result<u64> {
    let mut written = 0u64;
    for chunk in models.chunks(ROWS_PER_STATEMENT) {
        EngagementRecord::insert_many(chunk.to_vec())
            .on_conflict(engagement_on_conflict())
            .exec_without_returning(conn)
            .await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Append history rows.
pub async fn insert_history<C: ConnectionTrait>(
    conn: &C,
    models: Vec<HistoryActiveModel>,
) -> Result<u64> {
    let mut written = 0u64;
    for chunk in models.chunks(ROWS_PER_STATEMENT) {
        HistoryEvent::insert_many(chunk.to_vec())
            .exec_without_returning(conn)
            .await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Delete member rows of one scope by remote id.
///
/// Returns the number of rows deleted.
pub async fn delete_members<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
    remote_ids: &[i64],
) -> Result<u64> {
    let mut deleted = 0u64;
    // Delete in batches to avoid overly large IN lists
    for chunk in remote_ids.chunks(ROWS_PER_STATEMENT) {
        let result = MemberRecord::delete_many()
            .filter(MemberColumn::Project.eq(project))
            .filter(MemberColumn::Kind.eq(kind))
            .filter(MemberColumn::RemoteId.is_in(chunk.iter().copied()))
            .exec(conn)
            .await?;
        deleted += result.rows_affected;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, QueryTrait};

    use super::*;
    use crate::api::RemoteEntity;
    use crate::entity::provenance::Provenance;
    use crate::store::convert::{engagement_active_model, member_active_model};
    use crate::sync::reconcile::MergedEngagement;

    fn model(id: i64) -> MemberActiveModel {
        member_active_model(
            "acme",
            CollectionKind::Members,
            &RemoteEntity::bare(id),
            Provenance::MemberList,
            Utc::now(),
        )
    }

    #[test]
    fn member_upsert_sql_coalesces_profile_columns() {
        let sql = MemberRecord::insert_many(vec![model(1)])
            .on_conflict(member_on_conflict())
            .build(DatabaseBackend::Sqlite)
            .to_string();

        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE"), "{sql}");
        assert!(
            sql.contains(
                "\"first_name\" = COALESCE(\"excluded\".\"first_name\", \"member_records\".\"first_name\")"
            ),
            "{sql}"
        );
        assert!(
            sql.contains("\"last_activity_at\" = \"excluded\".\"last_activity_at\""),
            "{sql}"
        );
        let update_clause = sql.split("DO UPDATE").nth(1).unwrap_or_default();
        assert!(!update_clause.contains("\"first_seen_at\""), "{sql}");
        assert!(!update_clause.contains("\"provenance\""), "{sql}");
    }

    #[test]
    fn engagement_upsert_overwrites_item_set() {
        let merged = MergedEngagement {
            actor_id: 5,
            item_ids: [1, 2].into_iter().collect(),
            last_interaction_at: None,
            profile: Default::default(),
        };
        let row = engagement_active_model("acme", CollectionKind::Likes, &merged, Utc::now());
        let sql = EngagementRecord::insert_many(vec![row])
            .on_conflict(engagement_on_conflict())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains("\"item_ids\" = \"excluded\".\"item_ids\""), "{sql}");
        assert!(
            sql.contains("\"interaction_count\" = \"excluded\".\"interaction_count\""),
            "{sql}"
        );
    }

    #[tokio::test]
    async fn upsert_members_splits_statements() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([
                MockExecResult {
                    rows_affected: ROWS_PER_STATEMENT as u64,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 1,
                    last_insert_id: 0,
                },
            ])
            .into_connection();

        let models: Vec<_> = (0..=ROWS_PER_STATEMENT as i64).map(model).collect();
        let written = upsert_members(&db, models).await.expect("mock upsert");
        assert_eq!(written, ROWS_PER_STATEMENT as u64 + 1);
        assert_eq!(db.into_transaction_log().len(), 2);
    }

    #[tokio::test]
    async fn empty_inputs_issue_no_statements() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        assert_eq!(upsert_members(&db, Vec::new()).await.unwrap(), 0);
        assert_eq!(insert_history(&db, Vec::new()).await.unwrap(), 0);
        assert_eq!(
            delete_members(&db, "acme", CollectionKind::Members, &[])
                .await
                .unwrap(),
            0
        );
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn delete_members_sums_rows_affected() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([MockExecResult {
                rows_affected: 3,
                last_insert_id: 0,
            }])
            .into_connection();
        let deleted = delete_members(&db, "acme", CollectionKind::Members, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(deleted, 3);
    }
}
