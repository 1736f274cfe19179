//! Tuning tasks and the priority queue they wait in.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use pf_optimizer::{OptimizationConfig, OptimizationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduler task identifier.
pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of scheduler work: optimize one algorithm with one config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningTask {
    pub id: TaskId,
    pub algorithm_key: String,
    /// Lower runs sooner.
    pub priority: i32,
    pub config: OptimizationConfig,
    pub status: TaskStatus,
    /// Fraction of the strategy budget spent, in [0, 1].
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<OptimizationResult>,
    pub error_message: Option<String>,
}

impl TuningTask {
    pub fn new(algorithm_key: &str, priority: i32, config: OptimizationConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            algorithm_key: algorithm_key.to_string(),
            priority,
            config,
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            result: None,
            error_message: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: OptimizationResult) {
        self.status = TaskStatus::Completed;
        self.progress = 1.0;
        self.end_time = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error_message = Some(error);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock seconds between start and end, when both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

struct QueuedTask {
    seq: u64,
    task: TuningTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // BinaryHeap is a max-heap: the lowest priority value, then the earliest
    // insertion, must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending tasks ordered by priority, ties by insertion order.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.heap.len()).finish()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TuningTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedTask { seq, task });
    }

    pub fn pop(&mut self) -> Option<TuningTask> {
        self.heap.pop().map(|q| q.task)
    }

    /// Take a task out of the queue regardless of its position.
    pub fn remove(&mut self, task_id: &str) -> Option<TuningTask> {
        let mut removed = None;
        let remaining: Vec<QueuedTask> = std::mem::take(&mut self.heap)
            .into_iter()
            .filter_map(|q| {
                if removed.is_none() && q.task.id == task_id {
                    removed = Some(q.task);
                    None
                } else {
                    Some(q)
                }
            })
            .collect();
        self.heap = remaining.into();
        removed
    }

    /// Snapshot of the queued tasks in the order they would run.
    pub fn snapshot(&self) -> Vec<TuningTask> {
        let mut queued: Vec<&QueuedTask> = self.heap.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.task.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
