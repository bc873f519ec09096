//! EngagementRecord entity - per-actor interaction sets for likes, comments and reshares.

use std::collections::BTreeSet;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "engagement_records")]
pub struct Model {
    /// Composite key `{project}:{kind}:{remote_id}`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    // ─── Scope ───────────────────────────────────────────────────────────────
    pub project: String,
    pub kind: CollectionKind,
    pub remote_id: i64,

    // ─── Profile ─────────────────────────────────────────────────────────────
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Option<i32>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub birthdate: Option<String>,
    pub platform: Option<i32>,
    pub last_seen: Option<DateTimeWithTimeZone>,
    pub deactivated: Option<String>,
    pub is_closed: Option<bool>,
    pub can_message: Option<bool>,

    // ─── Engagement ──────────────────────────────────────────────────────────
    /// Content item ids the actor interacted with (JSON array, sorted, unique).
    #[sea_orm(column_type = "Json")]
    pub item_ids: serde_json::Value,
    /// Always equal to the size of `item_ids`.
    pub interaction_count: i32,
    pub last_interaction_at: Option<DateTimeWithTimeZone>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub provenance: Provenance,
    pub first_seen_at: DateTimeWithTimeZone,
    pub last_activity_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the stored item id set. Malformed entries are skipped.
    pub fn item_set(&self) -> BTreeSet<i64> {
        self.item_ids
            .as_array()
            .map(|items| items.iter().filter_map(serde_json::Value::as_i64).collect())
            .unwrap_or_default()
    }
}

/// Encode an item id set the way it is stored.
pub fn encode_item_set(items: &BTreeSet<i64>) -> serde_json::Value {
    serde_json::Value::Array(items.iter().map(|id| (*id).into()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_set_round_trips_and_ignores_garbage() {
        let set: BTreeSet<i64> = [3, 1, 2].into_iter().collect();
        let encoded = encode_item_set(&set);
        assert_eq!(encoded, serde_json::json!([1, 2, 3]));

        let now = chrono::Utc::now().fixed_offset();
        let model = Model {
            id: "p:likes:1".to_string(),
            project: "p".to_string(),
            kind: CollectionKind::Likes,
            remote_id: 1,
            first_name: None,
            last_name: None,
            sex: None,
            city: None,
            country: None,
            birthdate: None,
            platform: None,
            last_seen: None,
            deactivated: None,
            is_closed: None,
            can_message: None,
            item_ids: serde_json::json!([1, "x", 2, 3]),
            interaction_count: 3,
            last_interaction_at: None,
            provenance: Provenance::Engagement,
            first_seen_at: now,
            last_activity_at: now,
        };
        assert_eq!(model.item_set(), set);
    }
}
