//! Typed views over remote payloads.
//!
//! Everything loosely typed stops here: list pages, actor profiles, content
//! items and engagement entries are decoded into explicit optional fields, and
//! downstream code never touches raw JSON.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ApiError, Result};
use crate::entity::collection_kind::CollectionKind;

// ─── Pages ───────────────────────────────────────────────────────────────────

/// One page (or a concatenation of pages) of a paginated collection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Page<T> {
    /// True size of the remote collection at the time of the call.
    #[serde(default)]
    pub count: u64,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            count: 0,
            items: Vec::new(),
        }
    }

    /// Append another page, keeping the most recent reported count.
    pub fn extend(&mut self, other: Page<T>) {
        self.count = other.count;
        self.items.extend(other.items);
    }
}

/// Decode a `{count, items}` payload.
pub fn decode_page(method: &str, value: Value) -> Result<Page<Value>> {
    serde_json::from_value(value).map_err(|e| ApiError::decode(method, e.to_string()))
}

// ─── Profiles ────────────────────────────────────────────────────────────────

/// Profile fields mirrored into the cache. Every field is optional because
/// list endpoints routinely return truncated objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Option<i32>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub birthdate: Option<String>,
    pub platform: Option<i32>,
    pub last_seen: Option<DateTime<Utc>>,
    pub deactivated: Option<String>,
    pub is_closed: Option<bool>,
    pub can_message: Option<bool>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite fields with `other`'s values where `other` has one.
    ///
    /// A truncated observation never erases richer stored data.
    pub fn merge_from(&mut self, other: &Profile) {
        fn take<T: Clone>(slot: &mut Option<T>, new: &Option<T>) {
            if new.is_some() {
                slot.clone_from(new);
            }
        }
        take(&mut self.first_name, &other.first_name);
        take(&mut self.last_name, &other.last_name);
        take(&mut self.sex, &other.sex);
        take(&mut self.city, &other.city);
        take(&mut self.country, &other.country);
        take(&mut self.birthdate, &other.birthdate);
        take(&mut self.platform, &other.platform);
        take(&mut self.last_seen, &other.last_seen);
        take(&mut self.deactivated, &other.deactivated);
        take(&mut self.is_closed, &other.is_closed);
        take(&mut self.can_message, &other.can_message);
    }
}

/// One remote actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntity {
    pub id: i64,
    pub profile: Profile,
}

impl RemoteEntity {
    pub fn bare(id: i64) -> Self {
        Self {
            id,
            profile: Profile::default(),
        }
    }
}

/// List endpoints return either bare ids or profile objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEntity {
    Id(i64),
    Full(Box<WireUser>),
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    sex: Option<i32>,
    #[serde(default)]
    city: Option<Titled>,
    #[serde(default)]
    country: Option<Titled>,
    #[serde(default)]
    bdate: Option<String>,
    #[serde(default)]
    last_seen: Option<WireLastSeen>,
    #[serde(default)]
    deactivated: Option<String>,
    #[serde(default)]
    is_closed: Option<Flag>,
    #[serde(default)]
    can_write_private_message: Option<Flag>,
}

#[derive(Debug, Deserialize)]
struct Titled {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLastSeen {
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    platform: Option<i32>,
}

/// Boolean flags arrive as `true`/`false` or `0`/`1` depending on the method.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn get(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Int(i) => *i != 0,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn unix_time(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

impl From<WireUser> for RemoteEntity {
    fn from(user: WireUser) -> Self {
        let (last_seen, platform) = match user.last_seen {
            Some(seen) => (seen.time.and_then(unix_time), seen.platform),
            None => (None, None),
        };
        Self {
            id: user.id,
            profile: Profile {
                first_name: non_empty(user.first_name),
                last_name: non_empty(user.last_name),
                sex: user.sex,
                city: non_empty(user.city.and_then(|c| c.title)),
                country: non_empty(user.country.and_then(|c| c.title)),
                birthdate: non_empty(user.bdate),
                platform,
                last_seen,
                deactivated: non_empty(user.deactivated),
                is_closed: user.is_closed.map(|f| f.get()),
                can_message: user.can_write_private_message.map(|f| f.get()),
            },
        }
    }
}

impl RemoteEntity {
    /// Decode one list entry (bare id or profile object).
    pub fn from_value(method: &str, value: Value) -> Result<Self> {
        let wire: WireEntity =
            serde_json::from_value(value).map_err(|e| ApiError::decode(method, e.to_string()))?;
        Ok(match wire {
            WireEntity::Id(id) => Self::bare(id),
            WireEntity::Full(user) => (*user).into(),
        })
    }

    /// Decode a list of entries, e.g. the payload of a profile lookup.
    pub fn from_values(method: &str, values: Vec<Value>) -> Result<Vec<Self>> {
        values
            .into_iter()
            .map(|v| Self::from_value(method, v))
            .collect()
    }
}

// ─── Dialogs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireConversation {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    items: Vec<WireConversationMember>,
    #[serde(default)]
    profiles: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireConversationMember {
    member_id: i64,
}

/// Decode a conversation member listing.
///
/// Members are listed by id; profiles arrive in a separate array. Community
/// members (non-positive ids) are dropped.
pub fn decode_conversation_members(method: &str, value: Value) -> Result<Page<RemoteEntity>> {
    let wire: WireConversation =
        serde_json::from_value(value).map_err(|e| ApiError::decode(method, e.to_string()))?;
    let mut profiles: std::collections::HashMap<i64, RemoteEntity> =
        RemoteEntity::from_values(method, wire.profiles)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
    let items = wire
        .items
        .into_iter()
        .filter(|m| m.member_id > 0)
        .map(|m| {
            profiles
                .remove(&m.member_id)
                .unwrap_or_else(|| RemoteEntity::bare(m.member_id))
        })
        .collect();
    Ok(Page {
        count: wire.count,
        items,
    })
}

// ─── Content ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Counter {
    #[serde(default)]
    pub count: u64,
}

/// A content item (wall post) of a community.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentItem {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub from_id: Option<i64>,
    #[serde(default)]
    pub signer_id: Option<i64>,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub likes: Counter,
    #[serde(default)]
    pub comments: Counter,
    #[serde(default)]
    pub reposts: Counter,
}

impl ContentItem {
    /// Reported size of the engagement sub-collection of `kind`.
    pub fn engagement_count(&self, kind: CollectionKind) -> u64 {
        match kind {
            CollectionKind::Likes => self.likes.count,
            CollectionKind::Comments => self.comments.count,
            CollectionKind::Reshares => self.reposts.count,
            _ => 0,
        }
    }

    /// The human author: the signer when present, otherwise the poster if it is a person.
    pub fn author_id(&self) -> Option<i64> {
        self.signer_id
            .or(self.from_id)
            .filter(|id| *id > 0)
    }
}

/// One actor interacting with one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementHit {
    pub actor_id: i64,
    pub item_id: i64,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireInteraction {
    #[serde(default)]
    from_id: Option<i64>,
    #[serde(default)]
    owner_id: Option<i64>,
    #[serde(default)]
    date: Option<i64>,
}

impl EngagementHit {
    /// Decode one engagement list entry. Likes are bare ids; comments and
    /// reshares are objects carrying the actor and a timestamp.
    ///
    /// Entries from communities (non-positive ids) are skipped.
    pub fn from_value(item_id: i64, value: &Value) -> Option<Self> {
        if let Some(actor_id) = value.as_i64() {
            return (actor_id > 0).then_some(Self {
                actor_id,
                item_id,
                at: None,
            });
        }
        let wire: WireInteraction = serde_json::from_value(value.clone()).ok()?;
        let actor_id = wire.from_id.or(wire.owner_id).filter(|id| *id > 0)?;
        Some(Self {
            actor_id,
            item_id,
            at: wire.date.and_then(unix_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_ids_decode_to_empty_profiles() {
        let entity = RemoteEntity::from_value("m", json!(42)).unwrap();
        assert_eq!(entity.id, 42);
        assert!(entity.profile.is_empty());
    }

    #[test]
    fn full_profiles_are_normalised() {
        let entity = RemoteEntity::from_value(
            "m",
            json!({
                "id": 7,
                "first_name": "Ada",
                "last_name": "",
                "sex": 1,
                "city": {"id": 1, "title": "London"},
                "country": {"id": 2, "title": ""},
                "bdate": "10.12.1815",
                "last_seen": {"time": 1_700_000_000, "platform": 7},
                "is_closed": false,
                "can_write_private_message": 1
            }),
        )
        .unwrap();
        let p = &entity.profile;
        assert_eq!(p.first_name.as_deref(), Some("Ada"));
        assert_eq!(p.last_name, None);
        assert_eq!(p.city.as_deref(), Some("London"));
        assert_eq!(p.country, None);
        assert_eq!(p.platform, Some(7));
        assert!(p.last_seen.is_some());
        assert_eq!(p.is_closed, Some(false));
        assert_eq!(p.can_message, Some(true));
    }

    #[test]
    fn malformed_entries_are_decode_errors() {
        let err = RemoteEntity::from_value("m", json!({"first_name": "no id"})).unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[test]
    fn merge_keeps_richer_fields() {
        let mut stored = Profile {
            first_name: Some("Ada".into()),
            city: Some("London".into()),
            ..Profile::default()
        };
        let truncated = Profile {
            first_name: Some("Ada".into()),
            sex: Some(1),
            ..Profile::default()
        };
        stored.merge_from(&truncated);
        assert_eq!(stored.city.as_deref(), Some("London"));
        assert_eq!(stored.sex, Some(1));
    }

    #[test]
    fn page_extend_keeps_latest_count() {
        let mut page = Page {
            count: 10,
            items: vec![1, 2],
        };
        page.extend(Page {
            count: 11,
            items: vec![3],
        });
        assert_eq!(page.count, 11);
        assert_eq!(page.items, vec![1, 2, 3]);
    }

    #[test]
    fn content_item_counts_and_author() {
        let item: ContentItem = serde_json::from_value(json!({
            "id": 5,
            "owner_id": -100,
            "from_id": -100,
            "signer_id": 77,
            "date": 1_700_000_000,
            "likes": {"count": 1500},
            "comments": {"count": 3},
        }))
        .unwrap();
        assert_eq!(item.engagement_count(CollectionKind::Likes), 1500);
        assert_eq!(item.engagement_count(CollectionKind::Reshares), 0);
        assert_eq!(item.author_id(), Some(77));
    }

    #[test]
    fn conversation_members_join_profiles() {
        let page = decode_conversation_members(
            "messages.getConversationMembers",
            json!({
                "count": 3,
                "items": [{"member_id": 5}, {"member_id": -20}, {"member_id": 6}],
                "profiles": [{"id": 6, "first_name": "Grace"}]
            }),
        )
        .unwrap();
        assert_eq!(page.count, 3);
        let ids: Vec<_> = page.items.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(page.items[1].profile.first_name.as_deref(), Some("Grace"));
    }

    #[test]
    fn engagement_hits_from_ids_and_objects() {
        assert_eq!(
            EngagementHit::from_value(1, &json!(9)).map(|h| h.actor_id),
            Some(9)
        );
        assert_eq!(EngagementHit::from_value(1, &json!(-9)), None);

        let hit = EngagementHit::from_value(1, &json!({"from_id": 12, "date": 1_700_000_000}))
            .unwrap();
        assert_eq!(hit.actor_id, 12);
        assert!(hit.at.is_some());
    }
}
