//! Collection kinds mirrored into the local cache.

use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Remote collection kinds, one per sync scope.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Community members.
    #[sea_orm(string_value = "members")]
    Members,
    /// Participants of the project's message dialogs.
    #[sea_orm(string_value = "dialog_participants")]
    DialogParticipants,
    /// Join events derived from membership diffs.
    #[sea_orm(string_value = "join_history")]
    JoinHistory,
    /// Leave events derived from membership diffs.
    #[sea_orm(string_value = "leave_history")]
    LeaveHistory,
    /// Authors of content items.
    #[sea_orm(string_value = "authors")]
    Authors,
    /// Actors who liked a content item.
    #[sea_orm(string_value = "likes")]
    Likes,
    /// Actors who commented on a content item.
    #[sea_orm(string_value = "comments")]
    Comments,
    /// Actors who reshared a content item.
    #[sea_orm(string_value = "reshares")]
    Reshares,
}

impl CollectionKind {
    /// Every kind, in a stable order.
    pub const ALL: [CollectionKind; 8] = [
        CollectionKind::Members,
        CollectionKind::DialogParticipants,
        CollectionKind::JoinHistory,
        CollectionKind::LeaveHistory,
        CollectionKind::Authors,
        CollectionKind::Likes,
        CollectionKind::Comments,
        CollectionKind::Reshares,
    ];

    /// The engagement kinds (append-only, merged per actor).
    pub const ENGAGEMENT: [CollectionKind; 3] = [
        CollectionKind::Likes,
        CollectionKind::Comments,
        CollectionKind::Reshares,
    ];

    /// Stable snake_case name, identical to the stored value.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Members => "members",
            CollectionKind::DialogParticipants => "dialog_participants",
            CollectionKind::JoinHistory => "join_history",
            CollectionKind::LeaveHistory => "leave_history",
            CollectionKind::Authors => "authors",
            CollectionKind::Likes => "likes",
            CollectionKind::Comments => "comments",
            CollectionKind::Reshares => "reshares",
        }
    }

    /// Membership-style kinds: rows are deleted when the actor leaves.
    pub fn is_membership(self) -> bool {
        matches!(
            self,
            CollectionKind::Members | CollectionKind::DialogParticipants
        )
    }

    /// Engagement kinds: per-actor interaction sets, never deleted.
    pub fn is_engagement(self) -> bool {
        matches!(
            self,
            CollectionKind::Likes | CollectionKind::Comments | CollectionKind::Reshares
        )
    }

    /// History kinds, produced by diff reconciliation rather than fetched.
    pub fn is_history(self) -> bool {
        matches!(
            self,
            CollectionKind::JoinHistory | CollectionKind::LeaveHistory
        )
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collection kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection kind: {0}")]
pub struct UnknownCollectionKind(pub String);

impl FromStr for CollectionKind {
    type Err = UnknownCollectionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownCollectionKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_stored_value() {
        for kind in CollectionKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn parses_kebab_and_snake_case() {
        assert_eq!(
            "dialog-participants".parse::<CollectionKind>().unwrap(),
            CollectionKind::DialogParticipants
        );
        assert_eq!(
            "Likes".parse::<CollectionKind>().unwrap(),
            CollectionKind::Likes
        );
        assert!("followers".parse::<CollectionKind>().is_err());
    }

    #[test]
    fn kind_families_are_disjoint() {
        for kind in CollectionKind::ALL {
            let families = [kind.is_membership(), kind.is_engagement(), kind.is_history()]
                .into_iter()
                .filter(|f| *f)
                .count();
            if kind == CollectionKind::Authors {
                assert_eq!(families, 0);
            } else {
                assert_eq!(families, 1, "{kind} should belong to exactly one family");
            }
        }
    }
}
