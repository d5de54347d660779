use std::ops::Deref;
use anyhow::Result;
use tracing::{debug, warn};
use crate::runtime::error::TaskError;
use crate::runtime::runner::{Cancelable, Pausable};
use crate::runtime::task::{Driver, Task, TaskId, TaskStatus};

/// Decides how and when the children of a [`CompoundTask`] are started.
pub trait Coordinator {
    /// Runs once when the compound task is invoked, before any child is
    /// dispatched. Children may still be added here.
    fn prepare(&mut self, _compound: &CompoundTask) -> Result<()> {
        Ok(())
    }

    /// Starts the children that are ready. After this point the child set is sealed.
    fn dispatch(&mut self, compound: &CompoundTask) -> Result<()>;

    fn as_pausable(&mut self) -> Option<&mut dyn Pausable> {
        None
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        None
    }
}

/// Aggregates child tasks into one observable unit. Status and completion are
/// derived from the children on every read.
#[derive(Clone, Debug)]
pub struct CompoundTask(Task);

impl Deref for CompoundTask {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.0
    }
}

impl From<CompoundTask> for Task {
    fn from(compound: CompoundTask) -> Self {
        compound.0
    }
}

impl CompoundTask {
    pub fn new(name: impl Into<String>, coordinator: impl Coordinator + 'static) -> Self {
        Self(Task::from_parts(
            TaskId::new(),
            name.into(),
            Driver::Compound(Box::new(coordinator)),
            Some(Vec::new()),
            0,
        ))
    }

    /// Pre-populated compound task. It starts held: invoking it has no effect
    /// until [`CompoundTask::release`] is called.
    pub fn with_tasks(
        name: impl Into<String>,
        coordinator: impl Coordinator + 'static,
        tasks: Vec<Task>,
    ) -> Result<Self, TaskError> {
        let compound = Self(Task::from_parts(
            TaskId::new(),
            name.into(),
            Driver::Compound(Box::new(coordinator)),
            Some(Vec::new()),
            1,
        ));
        for task in tasks {
            compound.add_task(task)?;
        }
        Ok(compound)
    }

    /// Plain fan-out job: every child starts as soon as the compound is released.
    pub fn fan_out(name: impl Into<String>, tasks: Vec<Task>) -> Result<Self, TaskError> {
        Self::with_tasks(name, FanOut, tasks)
    }

    pub(crate) fn from_task(task: Task) -> Self {
        Self(task)
    }

    pub fn task(&self) -> &Task {
        &self.0
    }

    pub fn release(&self) -> Result<(), TaskError> {
        self.0.unpause()
    }

    pub fn add_task(&self, task: Task) -> Result<(), TaskError> {
        let compound_id = self.0.id();
        if self.is_dispatched() {
            return Err(TaskError::AlreadyStarted(compound_id));
        }

        task.set_parent(compound_id.clone());

        let weak = self.0.downgrade();
        task.add_observer(move |_| {
            if let Some(compound) = weak.upgrade() {
                compound.notify();
            }
        });
        let weak = self.0.downgrade();
        task.on_settled(move |_| {
            if let Some(compound) = weak.upgrade() {
                compound.fire_settled();
            }
        });

        debug!(compound_id = %compound_id, task_id = %task.id(), "Task added to compound");
        self.0.push_child(task);
        Ok(())
    }
}

/// Starts every child immediately.
#[derive(Debug, Default)]
pub struct FanOut;

impl Coordinator for FanOut {
    fn dispatch(&mut self, compound: &CompoundTask) -> Result<()> {
        for child in compound.children() {
            if child.is_invoked() || child.is_settled() {
                continue;
            }
            if let Err(e) = child.start() {
                // Already reflected in the child's own status.
                warn!(task_id = %child.id(), error = %e, "Child task failed to start");
            }
        }
        Ok(())
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        Some(self)
    }
}

impl Cancelable for FanOut {
    fn cancel(&mut self, task: &Task) -> Result<()> {
        cancel_children(task);
        Ok(())
    }
}

/// Fails children that never ran and asks running ones to stop. Children
/// without cancel support are left running.
pub(crate) fn cancel_children(compound: &Task) {
    for child in compound.children() {
        if child.is_settled() {
            continue;
        }
        if !child.is_compound() && child.status() == TaskStatus::Waiting {
            let _ = child.fail(TaskError::Cancelled);
            continue;
        }
        if let Err(e) = child.cancel() {
            warn!(task_id = %child.id(), error = %e, "Child task could not be cancelled");
        }
    }
}
