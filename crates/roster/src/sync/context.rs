//! Sync context builder.
//!
//! Bundles the remote API, database, options and progress callback so that
//! callers run a sync with one argument: the project.
//!
//! # Example
//!
//! ```ignore
//! use roster::sync::{SyncContext, SyncOptions};
//!
//! let ctx = SyncContext::builder()
//!     .api(api)
//!     .database(db)
//!     .options(SyncOptions::default())
//!     .progress(callback)
//!     .build()?;
//!
//! let report = ctx.sync_members(&project).await?;
//! ```

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use super::engine::{
    enrich_profiles, enrich_scope, sync_content_and_engagement, sync_dialog_participants,
    sync_members,
};
use super::error::Result as SyncResult;
use super::progress::ProgressCallback;
use super::types::{Project, SyncOptions, SyncReport};
use crate::api::{CallGateway, CallStatsSnapshot, RemoteApi};
use crate::entity::collection_kind::CollectionKind;

/// Error type for sync context construction.
#[derive(Debug, thiserror::Error)]
pub enum SyncContextError {
    /// Missing required field in builder.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Result type for sync context construction.
pub type Result<T> = std::result::Result<T, SyncContextError>;

/// Builder for a [`SyncContext`].
#[derive(Default)]
pub struct SyncContextBuilder {
    api: Option<Arc<dyn RemoteApi>>,
    options: Option<SyncOptions>,
    database: Option<Arc<DatabaseConnection>>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote API transport.
    pub fn api(mut self, api: Arc<dyn RemoteApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn database(mut self, db: Arc<DatabaseConnection>) -> Self {
        self.database = Some(db);
        self
    }

    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build the sync context.
    ///
    /// # Errors
    ///
    /// Returns `SyncContextError::MissingField` if the API or database is not set.
    pub fn build(self) -> Result<SyncContext> {
        let api = self
            .api
            .ok_or(SyncContextError::MissingField { field: "api" })?;
        let database = self
            .database
            .ok_or(SyncContextError::MissingField { field: "database" })?;
        let options = self.options.unwrap_or_default();
        let gateway = CallGateway::new(api, options.gateway.clone());

        Ok(SyncContext {
            gateway,
            options,
            database,
            progress: self.progress,
        })
    }
}

/// Everything a sync run needs besides the project.
pub struct SyncContext {
    gateway: CallGateway,
    options: SyncOptions,
    database: Arc<DatabaseConnection>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn database(&self) -> &Arc<DatabaseConnection> {
        &self.database
    }

    pub fn gateway(&self) -> &CallGateway {
        &self.gateway
    }

    /// Call counters accumulated by every run of this context.
    pub fn call_stats(&self) -> CallStatsSnapshot {
        self.gateway.stats()
    }

    pub async fn sync_members(&self, project: &Project) -> SyncResult<SyncReport> {
        sync_members(
            &self.database,
            &self.gateway,
            project,
            &self.options,
            self.progress.as_ref(),
        )
        .await
    }

    /// Sync the participants of every dialog configured for the project.
    pub async fn sync_dialog_participants(&self, project: &Project) -> SyncResult<SyncReport> {
        self.sync_dialogs(project, &project.dialog_peers).await
    }

    /// Sync the participants of the given dialogs.
    pub async fn sync_dialogs(&self, project: &Project, peers: &[i64]) -> SyncResult<SyncReport> {
        sync_dialog_participants(
            &self.database,
            &self.gateway,
            project,
            peers,
            &self.options,
            self.progress.as_ref(),
        )
        .await
    }

    pub async fn sync_content_and_engagement(
        &self,
        project: &Project,
        kinds: &[CollectionKind],
    ) -> SyncResult<Vec<SyncReport>> {
        sync_content_and_engagement(
            &self.database,
            &self.gateway,
            project,
            kinds,
            &self.options,
            self.progress.as_ref(),
        )
        .await
    }

    pub async fn enrich_profiles(
        &self,
        project: &Project,
        kind: CollectionKind,
        ids: &[i64],
    ) -> SyncResult<u64> {
        enrich_profiles(
            &self.database,
            &self.gateway,
            project,
            kind,
            ids,
            &self.options,
            self.progress.as_ref(),
        )
        .await
    }

    /// Enrich every actor cached in one scope.
    pub async fn enrich_scope(&self, project: &Project, kind: CollectionKind) -> SyncResult<u64> {
        enrich_scope(
            &self.database,
            &self.gateway,
            project,
            kind,
            &self.options,
            self.progress.as_ref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gateway::tests::Scripted;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn builder_requires_api() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let err = SyncContext::builder()
            .database(Arc::new(db))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SyncContextError::MissingField { field: "api" }));
    }

    #[test]
    fn builder_requires_database() {
        let err = SyncContext::builder()
            .api(Arc::new(Scripted::new(Vec::new())))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SyncContextError::MissingField { field: "database" }
        ));
    }

    #[test]
    fn builder_defaults_options() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let ctx = SyncContext::builder()
            .api(Arc::new(Scripted::new(Vec::new())))
            .database(Arc::new(db))
            .build()
            .unwrap();
        assert_eq!(ctx.options().chunk_size, SyncOptions::default().chunk_size);
        assert_eq!(ctx.call_stats().calls, 0);
    }
}
