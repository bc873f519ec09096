//! Comparing fresh observations with the cache.
//!
//! Membership-style scopes are diffed into joined/left/retained id sets.
//! Engagement scopes are append-only: new observations are merged into the
//! stored item set per actor.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::api::{EngagementHit, Profile};
use crate::entity::engagement_record;
use crate::store::convert::stored_profile;

/// Membership change between two snapshots. Every list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// `new - old`
    pub joined: Vec<i64>,
    /// `old - new`
    pub left: Vec<i64>,
    /// `old ∩ new`
    pub retained: Vec<i64>,
}

impl MembershipDiff {
    /// Drop leave detection. Used when part of the fresh snapshot is missing,
    /// because absence can no longer be told apart from loss.
    pub fn suppress_leaves(&mut self) -> usize {
        let dropped = self.left.len();
        self.left.clear();
        dropped
    }
}

pub fn diff(old_ids: &HashSet<i64>, new_ids: &HashSet<i64>) -> MembershipDiff {
    let mut joined: Vec<i64> = new_ids.difference(old_ids).copied().collect();
    let mut left: Vec<i64> = old_ids.difference(new_ids).copied().collect();
    let mut retained: Vec<i64> = old_ids.intersection(new_ids).copied().collect();
    joined.sort_unstable();
    left.sort_unstable();
    retained.sort_unstable();
    MembershipDiff {
        joined,
        left,
        retained,
    }
}

/// What one run observed for one actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementObservation {
    pub item_ids: BTreeSet<i64>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub profile: Profile,
}

/// Group hits by actor.
pub fn collect_observations(
    hits: impl IntoIterator<Item = EngagementHit>,
) -> BTreeMap<i64, EngagementObservation> {
    let mut observations: BTreeMap<i64, EngagementObservation> = BTreeMap::new();
    for hit in hits {
        let entry = observations.entry(hit.actor_id).or_default();
        entry.item_ids.insert(hit.item_id);
        entry.last_interaction_at = latest(entry.last_interaction_at, hit.at);
    }
    observations
}

/// Stored state of one actor after a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEngagement {
    pub actor_id: i64,
    pub item_ids: BTreeSet<i64>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub profile: Profile,
}

impl MergedEngagement {
    pub fn interaction_count(&self) -> usize {
        self.item_ids.len()
    }
}

/// Union the item sets, keep the latest interaction, and let only non-empty
/// profile fields of the observation replace stored ones.
pub fn merge_engagement(
    actor_id: i64,
    stored: Option<&engagement_record::Model>,
    observed: EngagementObservation,
) -> MergedEngagement {
    let (mut item_ids, stored_at, mut profile) = match stored {
        Some(model) => (
            model.item_set(),
            model.last_interaction_at.map(|t| t.with_timezone(&Utc)),
            stored_profile(model),
        ),
        None => (BTreeSet::new(), None, Profile::default()),
    };
    item_ids.extend(observed.item_ids);
    profile.merge_from(&observed.profile);
    MergedEngagement {
        actor_id,
        item_ids,
        last_interaction_at: latest(stored_at, observed.last_interaction_at),
        profile,
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::collection_kind::CollectionKind;
    use crate::entity::engagement_record::encode_item_set;
    use crate::entity::provenance::Provenance;
    use chrono::TimeZone;

    fn ids(values: &[i64]) -> HashSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn diff_classifies_ids() {
        let d = diff(&ids(&[1, 2, 3, 4]), &ids(&[3, 4, 5]));
        assert_eq!(d.joined, vec![5]);
        assert_eq!(d.left, vec![1, 2]);
        assert_eq!(d.retained, vec![3, 4]);
    }

    #[test]
    fn diff_invariants_hold_for_varied_snapshots() {
        let cases: [(&[i64], &[i64]); 5] = [
            (&[], &[]),
            (&[], &[1, 2, 3]),
            (&[1, 2, 3], &[]),
            (&[1, 2, 3], &[1, 2, 3]),
            (&[1, 3, 5, 7, 9], &[2, 3, 4, 5, 6]),
        ];
        for (old, new) in cases {
            let (old, new) = (ids(old), ids(new));
            let d = diff(&old, &new);
            assert_eq!(d.joined.len() + d.retained.len(), new.len());
            assert_eq!(d.left.len() + d.retained.len(), old.len());
            assert!(d.left.iter().all(|id| !d.retained.contains(id)));
        }
    }

    #[test]
    fn suppressing_leaves_keeps_joins() {
        let mut d = diff(&ids(&[1, 2]), &ids(&[2, 3]));
        assert_eq!(d.suppress_leaves(), 1);
        assert!(d.left.is_empty());
        assert_eq!(d.joined, vec![3]);
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn stored(items: &[i64], last: Option<DateTime<Utc>>) -> engagement_record::Model {
        let now = Utc::now().fixed_offset();
        engagement_record::Model {
            id: "acme:likes:7".to_string(),
            project: "acme".to_string(),
            kind: CollectionKind::Likes,
            remote_id: 7,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            sex: Some(1),
            city: Some("London".to_string()),
            country: None,
            birthdate: None,
            platform: None,
            last_seen: None,
            deactivated: None,
            is_closed: None,
            can_message: None,
            item_ids: encode_item_set(&items.iter().copied().collect()),
            interaction_count: items.len() as i32,
            last_interaction_at: last.map(|t| t.fixed_offset()),
            provenance: Provenance::Engagement,
            first_seen_at: now,
            last_activity_at: now,
        }
    }

    #[test]
    fn merge_unions_items_and_keeps_latest_date() {
        let model = stored(&[1, 2], Some(at(2_000)));
        let observed = EngagementObservation {
            item_ids: BTreeSet::from([2, 3]),
            last_interaction_at: Some(at(1_000)),
            profile: Profile::default(),
        };
        let merged = merge_engagement(7, Some(&model), observed);
        assert_eq!(merged.item_ids, BTreeSet::from([1, 2, 3]));
        assert_eq!(merged.interaction_count(), 3);
        assert_eq!(merged.last_interaction_at, Some(at(2_000)));
    }

    #[test]
    fn empty_observation_does_not_clobber_profile() {
        let model = stored(&[1], None);
        let observed = EngagementObservation {
            item_ids: BTreeSet::from([4]),
            last_interaction_at: Some(at(5)),
            profile: Profile {
                city: Some("Paris".to_string()),
                ..Profile::default()
            },
        };
        let merged = merge_engagement(7, Some(&model), observed);
        assert_eq!(merged.profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(merged.profile.city.as_deref(), Some("Paris"));
        assert_eq!(merged.last_interaction_at, Some(at(5)));
    }

    #[test]
    fn observations_group_hits_by_actor() {
        let hits = vec![
            EngagementHit {
                actor_id: 1,
                item_id: 10,
                at: Some(at(100)),
            },
            EngagementHit {
                actor_id: 1,
                item_id: 11,
                at: Some(at(50)),
            },
            EngagementHit {
                actor_id: 2,
                item_id: 10,
                at: None,
            },
            EngagementHit {
                actor_id: 1,
                item_id: 10,
                at: None,
            },
        ];
        let obs = collect_observations(hits);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[&1].item_ids, BTreeSet::from([10, 11]));
        assert_eq!(obs[&1].last_interaction_at, Some(at(100)));
        assert_eq!(obs[&2].last_interaction_at, None);
    }

    #[test]
    fn merge_without_stored_row() {
        let merged = merge_engagement(
            9,
            None,
            EngagementObservation {
                item_ids: BTreeSet::from([1]),
                ..Default::default()
            },
        );
        assert_eq!(merged.actor_id, 9);
        assert_eq!(merged.interaction_count(), 1);
    }
}
