//! SeaORM entity definitions for the roster cache schema.

pub mod collection_kind;
pub mod engagement_record;
pub mod history_event;
pub mod member_record;
pub mod prelude;
pub mod provenance;
pub mod sync_meta;
