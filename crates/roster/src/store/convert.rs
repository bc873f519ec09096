//! Conversions from fetched payloads to cache rows.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::Set;
use uuid::Uuid;

use crate::api::{Profile, RemoteEntity};
use crate::entity::collection_kind::CollectionKind;
use crate::entity::engagement_record::{self, encode_item_set};
use crate::entity::history_event;
use crate::entity::member_record::{self, record_id};
use crate::entity::provenance::Provenance;
use crate::sync::reconcile::MergedEngagement;

fn offset(ts: DateTime<Utc>) -> DateTime<FixedOffset> {
    ts.fixed_offset()
}

/// Row for a membership or author scope.
pub fn member_active_model(
    project: &str,
    kind: CollectionKind,
    entity: &RemoteEntity,
    provenance: Provenance,
    now: DateTime<Utc>,
) -> member_record::ActiveModel {
    let p = &entity.profile;
    member_record::ActiveModel {
        id: Set(record_id(project, kind, entity.id)),
        project: Set(project.to_string()),
        kind: Set(kind),
        remote_id: Set(entity.id),
        first_name: Set(p.first_name.clone()),
        last_name: Set(p.last_name.clone()),
        sex: Set(p.sex),
        city: Set(p.city.clone()),
        country: Set(p.country.clone()),
        birthdate: Set(p.birthdate.clone()),
        platform: Set(p.platform),
        last_seen: Set(p.last_seen.map(offset)),
        deactivated: Set(p.deactivated.clone()),
        is_closed: Set(p.is_closed),
        can_message: Set(p.can_message),
        provenance: Set(provenance),
        first_seen_at: Set(offset(now)),
        last_activity_at: Set(offset(now)),
    }
}

/// Row for an engagement scope, carrying the merged item set.
pub fn engagement_active_model(
    project: &str,
    kind: CollectionKind,
    merged: &MergedEngagement,
    now: DateTime<Utc>,
) -> engagement_record::ActiveModel {
    let p = &merged.profile;
    engagement_record::ActiveModel {
        id: Set(record_id(project, kind, merged.actor_id)),
        project: Set(project.to_string()),
        kind: Set(kind),
        remote_id: Set(merged.actor_id),
        first_name: Set(p.first_name.clone()),
        last_name: Set(p.last_name.clone()),
        sex: Set(p.sex),
        city: Set(p.city.clone()),
        country: Set(p.country.clone()),
        birthdate: Set(p.birthdate.clone()),
        platform: Set(p.platform),
        last_seen: Set(p.last_seen.map(offset)),
        deactivated: Set(p.deactivated.clone()),
        is_closed: Set(p.is_closed),
        can_message: Set(p.can_message),
        item_ids: Set(encode_item_set(&merged.item_ids)),
        interaction_count: Set(i32::try_from(merged.item_ids.len()).unwrap_or(i32::MAX)),
        last_interaction_at: Set(merged.last_interaction_at.map(offset)),
        provenance: Set(Provenance::Engagement),
        first_seen_at: Set(offset(now)),
        last_activity_at: Set(offset(now)),
    }
}

/// Append-only join or leave row.
pub fn history_active_model(
    project: &str,
    event: CollectionKind,
    source: CollectionKind,
    remote_id: i64,
    names: (Option<String>, Option<String>),
    now: DateTime<Utc>,
) -> history_event::ActiveModel {
    history_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        project: Set(project.to_string()),
        event: Set(event),
        source: Set(source),
        remote_id: Set(remote_id),
        first_name: Set(names.0),
        last_name: Set(names.1),
        occurred_at: Set(offset(now)),
    }
}

/// Profile view of a stored engagement row.
pub fn stored_profile(model: &engagement_record::Model) -> Profile {
    Profile {
        first_name: model.first_name.clone(),
        last_name: model.last_name.clone(),
        sex: model.sex,
        city: model.city.clone(),
        country: model.country.clone(),
        birthdate: model.birthdate.clone(),
        platform: model.platform,
        last_seen: model.last_seen.map(|t| t.with_timezone(&Utc)),
        deactivated: model.deactivated.clone(),
        is_closed: model.is_closed,
        can_message: model.can_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ActiveValue;
    use std::collections::BTreeSet;

    #[test]
    fn member_model_uses_composite_id() {
        let entity = RemoteEntity::bare(42);
        let model = member_active_model(
            "acme",
            CollectionKind::Members,
            &entity,
            Provenance::MemberList,
            Utc::now(),
        );
        assert_eq!(model.id, ActiveValue::Set("acme:members:42".to_string()));
        assert_eq!(model.first_name, ActiveValue::Set(None));
    }

    #[test]
    fn engagement_count_matches_item_set() {
        let merged = MergedEngagement {
            actor_id: 9,
            item_ids: BTreeSet::from([1, 2, 3]),
            last_interaction_at: None,
            profile: Profile::default(),
        };
        let model = engagement_active_model("acme", CollectionKind::Likes, &merged, Utc::now());
        assert_eq!(model.interaction_count, ActiveValue::Set(3));
        assert_eq!(model.item_ids, ActiveValue::Set(serde_json::json!([1, 2, 3])));
    }
}
