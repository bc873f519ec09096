//! Pollable per-task progress records.
//!
//! A presentation layer registers a task, hands the run a callback from
//! [`ProgressRegistry::tracker`], and polls [`ProgressRegistry::snapshot`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use uuid::Uuid;

use super::progress::{ProgressCallback, SyncProgress};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Fetching,
    Processing,
    Done,
    Error,
}

/// Progress of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub loaded: u64,
    pub total: u64,
    pub message: String,
    pub error: Option<String>,
}

/// Task-id keyed progress records. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct ProgressRegistry {
    tasks: Arc<RwLock<HashMap<Uuid, TaskProgress>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending task and return its id.
    pub fn register(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.write(|tasks| {
            tasks.insert(id, TaskProgress::default());
        });
        id
    }

    pub fn snapshot(&self, task_id: Uuid) -> Option<TaskProgress> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&task_id)
            .cloned()
    }

    pub fn remove(&self, task_id: Uuid) -> Option<TaskProgress> {
        let mut removed = None;
        self.write(|tasks| removed = tasks.remove(&task_id));
        removed
    }

    pub fn set_status(&self, task_id: Uuid, status: TaskStatus, message: impl Into<String>) {
        let message = message.into();
        self.update(task_id, |task| {
            task.status = status;
            task.message = message;
        });
    }

    /// Raise `loaded`. Within one scope a smaller value never replaces a
    /// larger one.
    pub fn advance(&self, task_id: Uuid, loaded: u64) {
        self.update(task_id, |task| task.loaded = task.loaded.max(loaded));
    }

    pub fn finish(&self, task_id: Uuid, message: impl Into<String>) {
        self.set_status(task_id, TaskStatus::Done, message);
    }

    pub fn fail(&self, task_id: Uuid, error: impl Into<String>) {
        let error = error.into();
        self.update(task_id, |task| {
            task.status = TaskStatus::Error;
            task.message = error.clone();
            task.error = Some(error);
        });
    }

    /// A progress callback that folds sync events into the task's record.
    pub fn tracker(&self, task_id: Uuid) -> Arc<ProgressCallback> {
        let registry = self.clone();
        Arc::new(move |event| registry.apply(task_id, event))
    }

    fn apply(&self, task_id: Uuid, event: SyncProgress) {
        match event {
            SyncProgress::Discovered { scope, total, .. } => {
                // A new scope restarts the count; `loaded` never exceeds `total`.
                self.update(task_id, |task| {
                    task.total = total;
                    task.loaded = 0;
                    task.status = TaskStatus::Fetching;
                    task.message = format!("fetching {scope}");
                });
            }
            SyncProgress::ChunkFetched { loaded, .. } => self.advance(task_id, loaded),
            SyncProgress::Requeueing { scope, count } => self.set_status(
                task_id,
                TaskStatus::Fetching,
                format!("retrying {count} chunks of {scope}"),
            ),
            SyncProgress::DeepScan { scope, items, .. } => self.set_status(
                task_id,
                TaskStatus::Fetching,
                format!("deep scan of {items} items in {scope}"),
            ),
            SyncProgress::Reconciled { scope, .. } | SyncProgress::Writing { scope, .. } => {
                self.set_status(task_id, TaskStatus::Processing, format!("saving {scope}"));
            }
            SyncProgress::Enriching { scope, ids } => self.set_status(
                task_id,
                TaskStatus::Processing,
                format!("enriching {ids} profiles of {scope}"),
            ),
            SyncProgress::Committed { scope, count } => {
                self.advance(task_id, count);
                let message = format!("{scope}: {count} stored");
                self.set_status(task_id, TaskStatus::Processing, message);
            }
            SyncProgress::Finished { scope } => self.finish(task_id, format!("{scope} done")),
            SyncProgress::Aborted { message, .. } => self.fail(task_id, message),
            _ => {}
        }
    }

    fn update(&self, task_id: Uuid, f: impl FnOnce(&mut TaskProgress)) {
        self.write(|tasks| {
            if let Some(task) = tasks.get_mut(&task_id) {
                f(task);
            }
        });
    }

    fn write(&self, f: impl FnOnce(&mut HashMap<Uuid, TaskProgress>)) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        f(&mut tasks);
    }
}
