//! MemberRecord entity - cached actors of membership-style and author scopes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::collection_kind::CollectionKind;
use crate::entity::provenance::Provenance;

/// One cached actor per (project, kind, remote id).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "member_records")]
pub struct Model {
    /// Composite key, see [`record_id`].
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    // ─── Scope ───────────────────────────────────────────────────────────────
    pub project: String,
    /// Members, dialog participants or authors.
    pub kind: CollectionKind,
    /// Platform-side numeric actor id.
    pub remote_id: i64,

    // ─── Profile ─────────────────────────────────────────────────────────────
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// 0 unknown, 1 female, 2 male.
    pub sex: Option<i32>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Birthdate as reported (`D.M` or `D.M.YYYY`).
    pub birthdate: Option<String>,
    /// Platform code of the last seen session.
    pub platform: Option<i32>,
    pub last_seen: Option<DateTimeWithTimeZone>,
    /// `deleted` or `banned` when the account is deactivated.
    pub deactivated: Option<String>,
    pub is_closed: Option<bool>,
    pub can_message: Option<bool>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub provenance: Provenance,
    /// First time this actor was seen in the scope. Never updated.
    pub first_seen_at: DateTimeWithTimeZone,
    /// Last successful refresh of this row.
    pub last_activity_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Build the composite primary key for a cached actor.
pub fn record_id(project: &str, kind: CollectionKind, remote_id: i64) -> String {
    format!("{}:{}:{}", project, kind.as_str(), remote_id)
}

impl Model {
    /// Display name assembled from the name parts.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => format!("id{}", self.remote_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn record_id_is_scoped_by_project_and_kind() {
        assert_eq!(record_id("acme", CollectionKind::Members, 42), "acme:members:42");
        assert_ne!(
            record_id("acme", CollectionKind::Members, 42),
            record_id("acme", CollectionKind::Authors, 42)
        );
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let now = Utc::now().fixed_offset();
        let mut model = Model {
            id: record_id("acme", CollectionKind::Members, 7),
            project: "acme".to_string(),
            kind: CollectionKind::Members,
            remote_id: 7,
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
            provenance: Provenance::MemberList,
            first_seen_at: now,
            last_activity_at: now,
        };
        assert_eq!(model.display_name(), "id7");

        model.first_name = Some("Ada".to_string());
        model.last_name = Some("Lovelace".to_string());
        assert_eq!(model.display_name(), "Ada Lovelace");
    }
}
