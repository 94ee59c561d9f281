use std::collections::HashMap;
use std::time::{Duration, Instant};

use flotilla_protocol::TaskStatus;

use crate::error::DispatchError;

pub const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 3600; // 1 hour

/// Where a task sits in its lifecycle. A task id that is not tracked is
/// idle; `Admitted` means the command was accepted but nothing has been
/// published yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Admitted,
    Started,
    Completed,
    Failed,
}

impl TaskPhase {
    pub fn for_status(status: TaskStatus) -> Self {
        if status == TaskStatus::Error {
            Self::Failed
        } else if status.is_started() {
            Self::Started
        } else {
            Self::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

struct TrackedTask {
    phase: TaskPhase,
    updated: Instant,
}

/// Per-task lifecycle ledger.
///
/// Guarantees at most one STARTED and exactly one terminal status per task
/// id, and suppresses redelivered commands whose task id was seen within
/// the window. Terminal entries older than the window are evicted on each
/// admission.
pub struct TaskTracker {
    window: Duration,
    tasks: HashMap<String, TrackedTask>,
}

impl TaskTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            tasks: HashMap::new(),
        }
    }

    pub fn admit(&mut self, task_id: &str) -> Result<(), DispatchError> {
        self.admit_at(task_id, Instant::now())
    }

    pub fn admit_at(&mut self, task_id: &str, now: Instant) -> Result<(), DispatchError> {
        let window = self.window;
        self.tasks.retain(|_, task| {
            !task.phase.is_terminal() || now.saturating_duration_since(task.updated) < window
        });

        if self.tasks.contains_key(task_id) {
            return Err(DispatchError::Duplicate(task_id.to_string()));
        }
        self.tasks.insert(
            task_id.to_string(),
            TrackedTask {
                phase: TaskPhase::Admitted,
                updated: now,
            },
        );
        Ok(())
    }

    /// Whether `task_id` may move to `to`. Legal moves are Admitted →
    /// Started, Admitted → terminal and Started → terminal.
    pub fn check(&self, task_id: &str, to: TaskPhase) -> Result<(), DispatchError> {
        let from = self.phase(task_id);
        let legal = match (from, to) {
            (Some(TaskPhase::Admitted), TaskPhase::Started) => true,
            (Some(TaskPhase::Admitted | TaskPhase::Started), next) => next.is_terminal(),
            _ => false,
        };
        if legal {
            Ok(())
        } else {
            Err(DispatchError::IllegalTransition {
                task_id: task_id.to_string(),
                from,
                to,
            })
        }
    }

    /// Move `task_id` to `to` if [`check`](Self::check) allows it.
    pub fn advance(&mut self, task_id: &str, to: TaskPhase) -> Result<(), DispatchError> {
        self.check(task_id, to)?;
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.phase = to;
            task.updated = Instant::now();
        }
        Ok(())
    }

    pub fn phase(&self, task_id: &str) -> Option<TaskPhase> {
        self.tasks.get(task_id).map(|t| t.phase)
    }

    /// Returns the number of tracked task ids.
    pub fn size(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS))
    }
}
