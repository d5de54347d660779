use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use tracing::{debug, info};
use crate::runtime::error::TaskError;
use crate::runtime::task::{Task, TaskId, TaskStatus};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Snapshot of a task, as exposed to the management surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub completion: Option<f64>,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub parent: Option<TaskId>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            name: task.name(),
            status: task.status(),
            completion: task.completion(),
            status_text: task.status_text(),
            parent: task.parent(),
            error: task.error().map(|e| e.to_string()),
        }
    }
}

struct Entry {
    task: Task,
    seq: u64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<TaskId, Entry>,
}

impl Registry {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, entry| match entry.expires_at {
            Some(deadline) if deadline <= now => {
                debug!(task_id = %id, "Task unregistered after grace period");
                false
            }
            _ => true,
        });
        before - self.entries.len()
    }
}

/// Registry of live tasks, keyed by id. Settled tasks stay queryable for a
/// grace period and are then dropped.
///
/// Lives on the control thread; clones share the same registry.
#[derive(Clone)]
pub struct TaskManager {
    registry: Rc<RefCell<Registry>>,
    next_seq: Rc<Cell<u64>>,
    grace_period: Duration,
    notify_granularity: Option<f64>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::default())),
            next_seq: Rc::new(Cell::new(0)),
            grace_period,
            notify_granularity: None,
        }
    }

    /// Applies a progress notification granularity to every task registered from now on.
    pub fn set_notify_granularity(&mut self, granularity: f64) {
        self.notify_granularity = Some(granularity);
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn register(&self, task: &Task) -> Result<(), TaskError> {
        let id = task.id();
        {
            let mut registry = self.registry.borrow_mut();
            registry.purge_expired(Instant::now());
            if registry.entries.contains_key(&id) {
                return Err(TaskError::DuplicateTask(id));
            }
            let seq = self.next_seq.get();
            self.next_seq.set(seq + 1);
            registry.entries.insert(
                id.clone(),
                Entry {
                    task: task.clone(),
                    seq,
                    expires_at: None,
                },
            );
        }

        if let Some(granularity) = self.notify_granularity {
            if !task.is_compound() {
                task.set_notify_granularity(granularity);
            }
        }

        let registry = Rc::downgrade(&self.registry);
        let grace_period = self.grace_period;
        task.on_settled(move |task| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut registry = registry.borrow_mut();
            if let Some(entry) = registry.entries.get_mut(&task.id()) {
                if entry.task.ptr_eq(task) {
                    entry.expires_at = Some(Instant::now() + grace_period);
                }
            }
        });

        debug!(task_id = %id, name = %task.name(), "Task registered");
        Ok(())
    }

    /// Registers and invokes a task. Children of a compound task are registered
    /// individually once it has been invoked, so they can be queried and
    /// controlled on their own.
    pub fn schedule(&self, task: &Task) -> Result<(), TaskError> {
        self.register(task)?;
        info!(task_id = %task.id(), name = %task.name(), "Scheduling task");
        let started = task.start();
        self.register_children(task)?;
        started
    }

    fn register_children(&self, task: &Task) -> Result<(), TaskError> {
        for child in task.children() {
            self.register(&child)?;
            self.register_children(&child)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut registry = self.registry.borrow_mut();
        registry.purge_expired(Instant::now());
        registry
            .entries
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.get(id).is_ok()
    }

    /// Removes a task. Removing an id that is not registered is a caller bug
    /// and is reported as `TaskNotFound`.
    pub fn unregister(&self, id: &TaskId) -> Result<Task, TaskError> {
        let removed = self.registry.borrow_mut().entries.remove(id);
        match removed {
            Some(entry) => {
                debug!(task_id = %id, "Task unregistered");
                Ok(entry.task)
            }
            None => Err(TaskError::TaskNotFound(id.clone())),
        }
    }

    /// Drops every settled task whose grace period is over. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.registry.borrow_mut().purge_expired(Instant::now())
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks().iter().map(Task::id).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered tasks in registration order.
    pub fn tasks(&self) -> Vec<Task> {
        let mut registry = self.registry.borrow_mut();
        registry.purge_expired(Instant::now());
        let mut entries: Vec<(u64, Task)> = registry
            .entries
            .values()
            .map(|entry| (entry.seq, entry.task.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, task)| task).collect()
    }

    // --- Management surface ---

    pub fn all_tasks(&self) -> Vec<TaskInfo> {
        self.tasks().iter().map(TaskInfo::from).collect()
    }

    pub fn task_info(&self, id: &TaskId) -> Result<TaskInfo, TaskError> {
        self.get(id).map(|task| TaskInfo::from(&task))
    }

    pub fn abort_task(&self, id: &TaskId) -> Result<(), TaskError> {
        let task = self.get(id)?;
        info!(task_id = %id, "Abort requested");
        task.cancel()
    }

    /// Pauses a task and reports whether it was running beforehand.
    pub fn pause_task(&self, id: &TaskId) -> Result<bool, TaskError> {
        let task = self.get(id)?;
        let was_running = task.status() == TaskStatus::Running;
        task.pause()?;
        Ok(was_running)
    }

    /// Resumes a task and reports whether it was paused beforehand.
    pub fn resume_task(&self, id: &TaskId) -> Result<bool, TaskError> {
        let task = self.get(id)?;
        if !task.is_paused() {
            return Ok(false);
        }
        task.unpause()?;
        Ok(true)
    }
}
