//! Catalog of remote methods used by the sync pipeline.
//!
//! Each paginated endpoint has a fixed per-call item ceiling; the page
//! builders here produce the base parameters, and the batch compiler adds
//! `offset` and `count`.

use super::transport::Params;
use crate::entity::collection_kind::CollectionKind;

/// Profile fields requested from list and lookup endpoints.
pub const PROFILE_FIELDS: &str =
    "sex,city,country,bdate,last_seen,is_closed,can_write_private_message";

/// Maximum number of ids accepted by one profile lookup.
pub const PROFILE_LOOKUP_CEILING: usize = 1000;

/// Script execution method.
pub const EXECUTE: &str = "execute";

/// Community lookup, used as the privilege probe.
pub const COMMUNITY_LOOKUP: &str = "groups.getById";

/// Profile lookup.
pub const PROFILE_LOOKUP: &str = "users.get";

/// A paginated list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Community member list.
    Members,
    /// Members of one message dialog.
    ConversationMembers,
    /// Content items of a community.
    Content,
    /// Actors who liked one item.
    Likes,
    /// Comments on one item.
    Comments,
    /// Reshares of one item.
    Reshares,
}

impl Endpoint {
    pub fn method(self) -> &'static str {
        match self {
            Endpoint::Members => "groups.getMembers",
            Endpoint::ConversationMembers => "messages.getConversationMembers",
            Endpoint::Content => "wall.get",
            Endpoint::Likes => "likes.getList",
            Endpoint::Comments => "wall.getComments",
            Endpoint::Reshares => "wall.getReposts",
        }
    }

    /// Largest `count` one call may request.
    pub fn page_ceiling(self) -> u64 {
        match self {
            Endpoint::Members => 1000,
            Endpoint::ConversationMembers => 200,
            Endpoint::Content => 100,
            Endpoint::Likes => 1000,
            Endpoint::Comments => 100,
            Endpoint::Reshares => 1000,
        }
    }

    /// The engagement endpoint backing an engagement kind.
    pub fn for_engagement(kind: CollectionKind) -> Option<Self> {
        match kind {
            CollectionKind::Likes => Some(Endpoint::Likes),
            CollectionKind::Comments => Some(Endpoint::Comments),
            CollectionKind::Reshares => Some(Endpoint::Reshares),
            _ => None,
        }
    }
}

/// Community ids are positive; owner ids of community content are negative.
pub fn community_owner_id(community_id: i64) -> i64 {
    -community_id.abs()
}

pub fn members_params(community_id: i64) -> Params {
    Params::new()
        .with("group_id", community_id.abs())
        .with("fields", PROFILE_FIELDS)
        .with("sort", "id_asc")
}

pub fn conversation_members_params(peer_id: i64) -> Params {
    Params::new()
        .with("peer_id", peer_id)
        .with("fields", PROFILE_FIELDS)
}

pub fn content_params(community_id: i64) -> Params {
    Params::new().with("owner_id", community_owner_id(community_id))
}

/// Base parameters for an engagement list of one content item.
pub fn engagement_params(endpoint: Endpoint, owner_id: i64, item_id: i64) -> Params {
    match endpoint {
        Endpoint::Likes => Params::new()
            .with("type", "post")
            .with("owner_id", owner_id)
            .with("item_id", item_id),
        Endpoint::Comments => Params::new()
            .with("owner_id", owner_id)
            .with("post_id", item_id)
            .with("sort", "asc"),
        Endpoint::Reshares => Params::new()
            .with("owner_id", owner_id)
            .with("post_id", item_id),
        _ => Params::new(),
    }
}

pub fn profile_lookup_params(ids: &[i64]) -> Params {
    let joined = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    Params::new()
        .with("user_ids", joined)
        .with("fields", PROFILE_FIELDS)
}

pub fn privilege_probe_params(community_id: i64) -> Params {
    Params::new()
        .with("group_id", community_id.abs())
        .with("fields", "is_admin,admin_level")
}
