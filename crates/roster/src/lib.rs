//! Roster - mirror large social-platform collections into a local cache.
//!
//! Community members, dialog participants, content authors and engagement
//! actors are fetched through a pool of rate-limited credentials, in chunks
//! run on a bounded set of workers, and committed in short write sessions
//! together with per-scope freshness counters and a join/leave history.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - Database backends.
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//! - `http` - The [`api::HttpRemoteApi`] transport.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use roster::api::{CredentialPool, HttpRemoteApi};
//! use roster::sync::{Project, SyncContext};
//!
//! let db = Arc::new(roster::connect_and_migrate("sqlite://roster.db?mode=rwc").await?);
//! let ctx = SyncContext::builder()
//!     .api(Arc::new(HttpRemoteApi::new("https://api.example.com", None, timeout)?))
//!     .database(db)
//!     .build()?;
//!
//! let project = Project::new("acme", 123, CredentialPool::from_secrets(&tokens, 3));
//! let report = ctx.sync_members(&project).await?;
//! ```

pub mod api;
pub mod db;
pub mod entity;
pub mod retry;
pub mod store;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use store::StoreError;
pub use sync::{SyncContext, SyncError, SyncOptions, SyncReport};
