//! Split-session persistence.
//!
//! Results are written only after the network phase, in bounded sessions,
//! each its own short transaction. Freshness counters ride in the last session,
//! so they are committed only when every data session before them was.
//!
//! ```text
//! fetch (minutes) ──► WritePlan ──► session 1 │ session 2 │ … │ session n + meta
//! ```
//!
//! Rows that describe each other (a member and its join event, a leave event
//! and the deletion of the leaver) are queued as one group, so a session that
//! fails midway never leaves one half of a pair behind.

use std::time::Instant;

use sea_orm::{DatabaseConnection, TransactionTrait};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::SyncScope;
use crate::entity::collection_kind::CollectionKind;
use crate::entity::{engagement_record, history_event, member_record, sync_meta};
use crate::retry::RetryConfig;
use crate::store::{self, StoreError};

/// One write operation. Large operations are split across sessions.
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertMembers(Vec<member_record::ActiveModel>),
    UpsertEngagements(Vec<engagement_record::ActiveModel>),
    DeleteMembers {
        project: String,
        kind: CollectionKind,
        remote_ids: Vec<i64>,
    },
    AppendHistory(Vec<history_event::ActiveModel>),
    CommitMeta(Vec<sync_meta::ActiveModel>),
}

impl WriteOp {
    pub fn rows(&self) -> usize {
        match self {
            WriteOp::UpsertMembers(rows) => rows.len(),
            WriteOp::UpsertEngagements(rows) => rows.len(),
            WriteOp::DeleteMembers { remote_ids, .. } => remote_ids.len(),
            WriteOp::AppendHistory(rows) => rows.len(),
            WriteOp::CommitMeta(rows) => rows.len(),
        }
    }

    /// Pieces of at most `batch` rows.
    fn split(self, batch: usize) -> Vec<WriteOp> {
        let batch = batch.max(1);
        match self {
            WriteOp::UpsertMembers(rows) => rows
                .chunks(batch)
                .map(|c| WriteOp::UpsertMembers(c.to_vec()))
                .collect(),
            WriteOp::UpsertEngagements(rows) => rows
                .chunks(batch)
                .map(|c| WriteOp::UpsertEngagements(c.to_vec()))
                .collect(),
            WriteOp::DeleteMembers {
                project,
                kind,
                remote_ids,
            } => remote_ids
                .chunks(batch)
                .map(|c| WriteOp::DeleteMembers {
                    project: project.clone(),
                    kind,
                    remote_ids: c.to_vec(),
                })
                .collect(),
            WriteOp::AppendHistory(rows) => rows
                .chunks(batch)
                .map(|c| WriteOp::AppendHistory(c.to_vec()))
                .collect(),
            meta @ WriteOp::CommitMeta(_) => vec![meta],
        }
    }
}

/// Everything one run wants to persist, in order.
///
/// The plan is a list of units. A unit queued with [`push`](Self::push) may be
/// split across sessions; one queued with [`push_together`](Self::push_together)
/// always lands in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    units: Vec<WriteUnit>,
    meta: Vec<sync_meta::ActiveModel>,
}

#[derive(Debug, Clone)]
enum WriteUnit {
    Splittable(WriteOp),
    Together(Vec<WriteOp>),
}

impl WriteUnit {
    fn rows(&self) -> usize {
        match self {
            WriteUnit::Splittable(op) => op.rows(),
            WriteUnit::Together(ops) => ops.iter().map(WriteOp::rows).sum(),
        }
    }
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a data operation. Empty operations are dropped.
    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        if op.rows() > 0 {
            self.units.push(WriteUnit::Splittable(op));
        }
        self
    }

    /// Queue operations that must commit or roll back together, such as a
    /// batch of upserts and the join rows they cause.
    pub fn push_together(&mut self, ops: Vec<WriteOp>) -> &mut Self {
        let ops: Vec<WriteOp> = ops.into_iter().filter(|op| op.rows() > 0).collect();
        if !ops.is_empty() {
            self.units.push(WriteUnit::Together(ops));
        }
        self
    }

    /// Queue a freshness counter for the final session.
    pub fn meta(&mut self, model: sync_meta::ActiveModel) -> &mut Self {
        self.meta.push(model);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.meta.is_empty()
    }

    /// Pack units into sessions of at most `batch` rows; counters go last.
    ///
    /// A grouped unit larger than `batch` gets a session of its own.
    pub fn into_sessions(self, batch: usize) -> Vec<Vec<WriteOp>> {
        let batch = batch.max(1);
        let mut sessions: Vec<Vec<WriteOp>> = Vec::new();
        let mut current: Vec<WriteOp> = Vec::new();
        let mut current_rows = 0usize;

        let pieces = self.units.into_iter().flat_map(|unit| match unit {
            WriteUnit::Splittable(op) => op
                .split(batch)
                .into_iter()
                .map(WriteUnit::Splittable)
                .collect::<Vec<_>>(),
            together => vec![together],
        });
        for piece in pieces {
            let rows = piece.rows();
            if current_rows + rows > batch && !current.is_empty() {
                sessions.push(std::mem::take(&mut current));
                current_rows = 0;
            }
            current_rows += rows;
            match piece {
                WriteUnit::Splittable(op) => current.push(op),
                WriteUnit::Together(ops) => current.extend(ops),
            }
        }
        if !self.meta.is_empty() {
            current.push(WriteOp::CommitMeta(self.meta));
        }
        if !current.is_empty() {
            sessions.push(current);
        }
        sessions
    }
}

/// Rows written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub sessions: usize,
    pub upserted: u64,
    pub deleted: u64,
    pub appended: u64,
    pub meta: u64,
}

impl WriteSummary {
    fn add(&mut self, other: WriteSummary) {
        self.sessions += other.sessions;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.appended += other.appended;
        self.meta += other.meta;
    }
}

pub struct SplitSessionWriter<'a> {
    db: &'a DatabaseConnection,
    batch_size: usize,
    retry: RetryConfig,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a> SplitSessionWriter<'a> {
    pub fn new(db: &'a DatabaseConnection, batch_size: usize, retry: RetryConfig) -> Self {
        Self {
            db,
            batch_size,
            retry,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: Option<&'a ProgressCallback>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// Write the plan session by session.
    ///
    /// A failing session stops the commit; sessions already committed stay,
    /// and the counters (always in the last session) are not written.
    pub async fn commit(&self, scope: &SyncScope, plan: WritePlan) -> store::Result<WriteSummary> {
        let sessions = plan.into_sessions(self.batch_size);
        let total = sessions.len();
        let mut summary = WriteSummary::default();

        for (index, session) in sessions.into_iter().enumerate() {
            let rows: usize = session.iter().map(WriteOp::rows).sum();
            emit(
                self.on_progress,
                SyncProgress::Writing {
                    scope: scope.to_string(),
                    session: index + 1,
                    sessions: total,
                    rows,
                },
            );
            let started = Instant::now();
            let written = self.run_with_retry(scope, &session).await?;
            tracing::debug!(
                scope = %scope,
                session = index + 1,
                sessions = total,
                rows,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "write session committed"
            );
            summary.add(written);
        }
        Ok(summary)
    }

    async fn run_with_retry(
        &self,
        scope: &SyncScope,
        session: &[WriteOp],
    ) -> store::Result<WriteSummary> {
        let mut delays = self.retry.delays();
        loop {
            match self.run_session(session).await {
                Ok(summary) => return Ok(summary),
                Err(err) if err.is_retryable() => match delays.next() {
                    Some(delay) => {
                        tracing::warn!(
                            scope = %scope,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "write session failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_session(&self, session: &[WriteOp]) -> store::Result<WriteSummary> {
        let txn = self.db.begin().await.map_err(StoreError::from)?;
        let mut summary = WriteSummary {
            sessions: 1,
            ..WriteSummary::default()
        };
        for op in session {
            match op {
                WriteOp::UpsertMembers(rows) => {
                    summary.upserted += store::upsert_members(&txn, rows.clone()).await?;
                }
                WriteOp::UpsertEngagements(rows) => {
                    summary.upserted += store::upsert_engagements(&txn, rows.clone()).await?;
                }
                WriteOp::DeleteMembers {
                    project,
                    kind,
                    remote_ids,
                } => {
                    summary.deleted +=
                        store::delete_members(&txn, project, *kind, remote_ids).await?;
                }
                WriteOp::AppendHistory(rows) => {
                    summary.appended += store::insert_history(&txn, rows.clone()).await?;
                }
                WriteOp::CommitMeta(rows) => {
                    store::upsert_meta(&txn, rows.clone()).await?;
                    summary.meta += rows.len() as u64;
                }
            }
        }
        txn.commit().await.map_err(StoreError::from)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RemoteEntity;
    use crate::entity::provenance::Provenance;
    use crate::store::convert::member_active_model;
    use crate::store::meta::meta_active_model;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn members(n: i64) -> Vec<member_record::ActiveModel> {
        (0..n)
            .map(|id| {
                member_active_model(
                    "acme",
                    CollectionKind::Members,
                    &RemoteEntity::bare(id),
                    Provenance::MemberList,
                    Utc::now(),
                )
            })
            .collect()
    }

    fn meta() -> sync_meta::ActiveModel {
        meta_active_model("acme", CollectionKind::Members, 5, Utc::now())
    }

    #[test]
    fn sessions_are_bounded_and_meta_is_last() {
        let mut plan = WritePlan::new();
        plan.push(WriteOp::UpsertMembers(members(5)))
            .push(WriteOp::DeleteMembers {
                project: "acme".to_string(),
                kind: CollectionKind::Members,
                remote_ids: vec![10, 11, 12],
            })
            .meta(meta());

        let sessions = plan.into_sessions(2);
        let sizes: Vec<usize> = sessions
            .iter()
            .map(|s| s.iter().map(WriteOp::rows).sum())
            .collect();
        // 2 | 2 | 1 upserts + 1 delete | 2 deletes + 1 counter
        assert_eq!(sizes, vec![2, 2, 2, 3]);
        let counters = sessions
            .iter()
            .flatten()
            .filter(|op| matches!(op, WriteOp::CommitMeta(_)))
            .count();
        assert_eq!(counters, 1);
        assert!(matches!(
            sessions.last().and_then(|s| s.last()),
            Some(WriteOp::CommitMeta(_))
        ));
    }

    #[test]
    fn meta_alone_forms_one_session() {
        let mut plan = WritePlan::new();
        plan.push(WriteOp::UpsertMembers(Vec::new())).meta(meta());
        let sessions = plan.into_sessions(100);
        assert_eq!(sessions.len(), 1);
        assert!(matches!(sessions[0][0], WriteOp::CommitMeta(_)));
    }

    #[test]
    fn grouped_operations_never_straddle_sessions() {
        let mut plan = WritePlan::new();
        for pair in members(6).chunks(2) {
            plan.push_together(vec![
                WriteOp::UpsertMembers(pair.to_vec()),
                WriteOp::DeleteMembers {
                    project: "acme".to_string(),
                    kind: CollectionKind::Members,
                    remote_ids: vec![99],
                },
            ]);
        }
        plan.meta(meta());

        // 3 rows per group, 5 per session: one group each
        let sessions = plan.into_sessions(5);
        assert_eq!(sessions.len(), 3);
        for session in &sessions {
            assert!(matches!(session[0], WriteOp::UpsertMembers(ref rows) if rows.len() == 2));
            assert!(matches!(session[1], WriteOp::DeleteMembers { .. }));
        }
    }

    #[test]
    fn oversized_group_gets_its_own_session() {
        let mut plan = WritePlan::new();
        plan.push(WriteOp::UpsertMembers(members(1)))
            .push_together(vec![WriteOp::UpsertMembers(members(4))])
            .push_together(vec![WriteOp::UpsertMembers(Vec::new())]);

        let sizes: Vec<usize> = plan
            .into_sessions(3)
            .iter()
            .map(|s| s.iter().map(WriteOp::rows).sum())
            .collect();
        assert_eq!(sizes, vec![1, 4]);
    }

    #[test]
    fn empty_plan_has_no_sessions() {
        assert!(WritePlan::new().into_sessions(10).is_empty());
    }

    #[tokio::test]
    async fn each_session_is_its_own_transaction() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([
                MockExecResult {
                    rows_affected: 2,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 1,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 1,
                    last_insert_id: 0,
                },
            ])
            .into_connection();
        let writer = SplitSessionWriter::new(&db, 2, RetryConfig::immediate(0));

        let mut plan = WritePlan::new();
        plan.push(WriteOp::UpsertMembers(members(3))).meta(meta());
        let summary = writer
            .commit(&SyncScope::new("acme", CollectionKind::Members), plan)
            .await
            .unwrap();

        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.upserted, 3);
        assert_eq!(summary.meta, 1);
    }
}
