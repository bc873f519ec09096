//! Common re-exports for convenient entity usage.

pub use super::collection_kind::CollectionKind;
pub use super::engagement_record::{
    ActiveModel as EngagementRecordActiveModel, Column as EngagementRecordColumn,
    Entity as EngagementRecord, Model as EngagementRecordModel,
};
pub use super::history_event::{
    ActiveModel as HistoryEventActiveModel, Column as HistoryEventColumn, Entity as HistoryEvent,
    Model as HistoryEventModel,
};
pub use super::member_record::{
    ActiveModel as MemberRecordActiveModel, Column as MemberRecordColumn, Entity as MemberRecord,
    Model as MemberRecordModel,
};
pub use super::provenance::Provenance;
pub use super::sync_meta::{
    ActiveModel as SyncMetaActiveModel, Column as SyncMetaColumn, Entity as SyncMeta,
    Model as SyncMetaModel,
};
