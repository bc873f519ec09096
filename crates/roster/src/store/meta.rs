//! SyncMeta freshness counters.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

use crate::entity::collection_kind::CollectionKind;
use crate::entity::sync_meta::{
    ActiveModel, Column as SyncMetaColumn, Entity as SyncMeta, Model, meta_id,
};

use super::errors::Result;

pub fn meta_active_model(
    project: &str,
    kind: CollectionKind,
    count: u64,
    now: DateTime<Utc>,
) -> ActiveModel {
    ActiveModel {
        id: Set(meta_id(project, kind)),
        project: Set(project.to_string()),
        kind: Set(kind),
        count: Set(i64::try_from(count).unwrap_or(i64::MAX)),
        last_updated: Set(now.fixed_offset()),
    }
}

/// Write freshness counters, replacing any previous values.
pub async fn upsert_meta<C: ConnectionTrait>(conn: &C, models: Vec<ActiveModel>) -> Result<()> {
    if models.is_empty() {
        return Ok(());
    }
    SyncMeta::insert_many(models)
        .on_conflict(
            OnConflict::column(SyncMetaColumn::Id)
                .update_columns([SyncMetaColumn::Count, SyncMetaColumn::LastUpdated])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

pub async fn get_meta<C: ConnectionTrait>(
    conn: &C,
    project: &str,
    kind: CollectionKind,
) -> Result<Option<Model>> {
    Ok(SyncMeta::find_by_id(meta_id(project, kind))
        .one(conn)
        .await?)
}

/// All freshness counters of a project.
pub async fn sync_meta_for<C: ConnectionTrait>(conn: &C, project: &str) -> Result<Vec<Model>> {
    Ok(SyncMeta::find()
        .filter(SyncMetaColumn::Project.eq(project))
        .order_by_asc(SyncMetaColumn::Kind)
        .all(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, QueryTrait};

    #[test]
    fn meta_upsert_replaces_count_and_timestamp() {
        let sql = SyncMeta::insert_many(vec![meta_active_model(
            "acme",
            CollectionKind::Members,
            12,
            Utc::now(),
        )])
        .on_conflict(
            OnConflict::column(SyncMetaColumn::Id)
                .update_columns([SyncMetaColumn::Count, SyncMetaColumn::LastUpdated])
                .to_owned(),
        )
        .build(DatabaseBackend::Sqlite)
        .to_string();
        assert!(sql.contains("\"count\" = \"excluded\".\"count\""), "{sql}");
        assert!(sql.contains("'acme:members'"), "{sql}");
    }

    #[tokio::test]
    async fn get_meta_returns_row() {
        let now = Utc::now().fixed_offset();
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([vec![Model {
                id: "acme:members".to_string(),
                project: "acme".to_string(),
                kind: CollectionKind::Members,
                count: 500,
                last_updated: now,
            }]])
            .into_connection();
        let meta = get_meta(&db, "acme", CollectionKind::Members)
            .await
            .unwrap()
            .expect("row");
        assert_eq!(meta.count, 500);
    }

    #[tokio::test]
    async fn upsert_meta_with_nothing_is_noop() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        upsert_meta(&db, Vec::new()).await.unwrap();
        assert!(db.into_transaction_log().is_empty());
    }
}
