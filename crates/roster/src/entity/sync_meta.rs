//! SyncMeta entity - per-scope freshness counters.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::collection_kind::CollectionKind;

/// One row per (project, collection kind). Written only after an accepted run.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_meta")]
pub struct Model {
    /// `{project}:{kind}`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project: String,
    pub kind: CollectionKind,
    pub count: i64,
    pub last_updated: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub fn meta_id(project: &str, kind: CollectionKind) -> String {
    format!("{}:{}", project, kind.as_str())
}

impl Model {
    /// Freshness timestamp rendered as ISO-8601.
    pub fn last_updated_iso(&self) -> String {
        self.last_updated.to_rfc3339()
    }
}
