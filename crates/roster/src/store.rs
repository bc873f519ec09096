//! Cache persistence: bulk writes, reads and freshness counters.
//!
//! Write functions take any [`sea_orm::ConnectionTrait`], so the split-session
//! writer can run them inside short transactions.

mod bulk;
pub mod convert;
mod errors;
pub mod meta;
pub mod query;

pub use bulk::{
    ROWS_PER_STATEMENT, delete_members, insert_history, upsert_engagements, upsert_members,
};
pub use errors::{Result, StoreError};
pub use meta::{get_meta, sync_meta_for, upsert_meta};
pub use query::{
    PaginatedResult, Pagination, count_records, find_engagements, find_members, history_for,
    load_engagement_ids, load_engagements, load_member_ids, load_member_names,
};
