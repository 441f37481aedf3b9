//! On-demand background tasks with pollable outcomes.
//!
//! `submit` records the task as queued, spawns it on tokio and returns its
//! id right away; `status` reports what happened. Finished records beyond
//! [`MAX_FINISHED_TASKS`] are forgotten oldest first.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::processor::JobProcessor;

pub const MAX_FINISHED_TASKS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessNow,
    CleanupNow,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ProcessNow => "process_now",
            TaskKind::CleanupNow => "cleanup_now",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// Summary of what the task did, when it succeeded.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TaskQueue {
    processor: Arc<JobProcessor>,
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskQueue {
    pub fn new(processor: Arc<JobProcessor>) -> Self {
        Self {
            processor,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queues `kind` and returns the task id.
    pub fn submit(&self, kind: TaskKind) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.update(|tasks| {
            tasks.insert(
                id.clone(),
                TaskRecord {
                    id: id.clone(),
                    kind,
                    status: TaskStatus::Queued,
                    error: None,
                    result: None,
                    created_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                },
            );
        });
        log::info!("Queued task {} ({})", id, kind);

        let queue = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move { queue.run(task_id, kind).await });
        id
    }

    pub fn status(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.lock().ok()?.get(id).cloned()
    }

    /// All known tasks, newest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = match self.tasks.lock() {
            Ok(tasks) => tasks.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    async fn run(&self, id: String, kind: TaskKind) {
        self.set(&id, |record| {
            record.status = TaskStatus::Running;
            record.started_at = Some(Utc::now());
        });

        let outcome = match kind {
            TaskKind::ProcessNow => self
                .processor
                .process_pending()
                .await
                .map(|summary| serde_json::to_value(summary).ok()),
            TaskKind::CleanupNow => self
                .processor
                .cleanup_expired()
                .await
                .map(|summary| serde_json::to_value(summary).ok()),
        };

        self.set(&id, |record| {
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(result) => {
                    record.status = TaskStatus::Succeeded;
                    record.result = result;
                }
                Err(e) => {
                    log::error!("Task {} ({}) failed: {}", record.id, record.kind, e);
                    record.status = TaskStatus::Failed;
                    record.error = Some(e.to_string());
                }
            }
        });
        self.update(evict_finished);
    }

    fn set(&self, id: &str, change: impl FnOnce(&mut TaskRecord)) {
        self.update(|tasks| {
            if let Some(record) = tasks.get_mut(id) {
                change(record);
            }
        });
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, TaskRecord>)) {
        match self.tasks.lock() {
            Ok(mut tasks) => change(&mut tasks),
            Err(_) => log::error!("Task registry lock poisoned"),
        }
    }
}

fn evict_finished(tasks: &mut HashMap<String, TaskRecord>) {
    let mut finished: Vec<(DateTime<Utc>, String)> = tasks
        .values()
        .filter(|r| r.status.is_finished())
        .map(|r| (r.finished_at.unwrap_or(r.created_at), r.id.clone()))
        .collect();
    if finished.len() <= MAX_FINISHED_TASKS {
        return;
    }
    finished.sort();
    let excess = finished.len() - MAX_FINISHED_TASKS;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
}
