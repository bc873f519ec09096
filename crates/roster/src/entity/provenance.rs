//! Provenance tag recording how a row first entered the cache.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Seen in the community member list.
    #[sea_orm(string_value = "member_list")]
    #[default]
    MemberList,
    /// Seen in a message dialog's participant list.
    #[sea_orm(string_value = "dialog_list")]
    DialogList,
    /// Authored a content item.
    #[sea_orm(string_value = "content_author")]
    ContentAuthor,
    /// Interacted with a content item.
    #[sea_orm(string_value = "engagement")]
    Engagement,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::MemberList => write!(f, "member_list"),
            Provenance::DialogList => write!(f, "dialog_list"),
            Provenance::ContentAuthor => write!(f, "content_author"),
            Provenance::Engagement => write!(f, "engagement"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_member_list() {
        assert_eq!(Provenance::default(), Provenance::MemberList);
    }

    #[test]
    fn display_outputs_expected_strings() {
        assert_eq!(Provenance::DialogList.to_string(), "dialog_list");
        assert_eq!(Provenance::Engagement.to_string(), "engagement");
    }
}
