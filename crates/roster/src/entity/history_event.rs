//! HistoryEvent entity - append-only join/leave trail.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::collection_kind::CollectionKind;

/// A join or leave observed by diff reconciliation. Rows are never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "history_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project: String,
    /// `join_history` or `leave_history`.
    pub event: CollectionKind,
    /// The membership scope the event was derived from.
    pub source: CollectionKind,
    pub remote_id: i64,
    /// Name snapshot at the time of the event.
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub occurred_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
