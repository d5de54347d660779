use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use anyhow::Result;
use tracing::{debug, info, warn};
use crate::actions::RunnerRegistry;
use crate::runtime::blueprint::WorkflowDefinition;
use crate::runtime::compound::{cancel_children, CompoundTask, Coordinator};
use crate::runtime::runner::Cancelable;
use crate::runtime::task::{when_all_settled, Task};
use crate::trigger::Asset;

/// One run of a [`WorkflowDefinition`] against an asset.
///
/// The workflow coordinates an umbrella [`CompoundTask`]: when the umbrella is
/// invoked every task of the graph is instantiated and wired, then the tasks
/// without dependencies are started. A dependent task starts once all of its
/// dependencies have settled, whether they completed or failed, and a failing
/// branch never stops the others.
pub struct Workflow {
    definition: Arc<WorkflowDefinition>,
    asset: Asset,
    registry: Arc<RunnerRegistry>,
    tasks: Vec<Task>,
    gate: Rc<Gate>,
}

/// Shared between the workflow and its dependency joins.
#[derive(Default)]
struct Gate {
    released: Cell<bool>,
    cancelled: Cell<bool>,
    // Dependents whose prerequisites settled before the release.
    early: RefCell<Vec<Task>>,
}

impl Gate {
    fn fire(&self, task: &Task) {
        if self.cancelled.get() || task.is_settled() {
            return;
        }
        if !self.released.get() {
            self.early.borrow_mut().push(task.clone());
            return;
        }
        start_logged(task);
    }
}

fn start_logged(task: &Task) {
    debug!(task_id = %task.id(), name = %task.name(), "Starting workflow task");
    if let Err(e) = task.start() {
        warn!(task_id = %task.id(), name = %task.name(), error = %e, "Workflow task failed to start");
    }
}

impl Workflow {
    pub fn new(definition: Arc<WorkflowDefinition>, asset: Asset, registry: Arc<RunnerRegistry>) -> Self {
        Self {
            definition,
            asset,
            registry,
            tasks: Vec::new(),
            gate: Rc::new(Gate::default()),
        }
    }

    /// Wraps a new run into its umbrella task.
    pub fn build(definition: Arc<WorkflowDefinition>, asset: Asset, registry: Arc<RunnerRegistry>) -> CompoundTask {
        let name = definition.name.clone();
        CompoundTask::new(name, Self::new(definition, asset, registry))
    }

    fn instantiate(&self, index: usize) -> Task {
        let spec = &self.definition.tasks[index];
        match self.registry.create(&spec.run, &self.asset, &spec.params) {
            Ok(runner) => Task::from_boxed(spec.name.clone(), runner),
            Err(e) => {
                warn!(
                    workflow_id = %self.definition.id,
                    task = %spec.name,
                    error = %format!("{:#}", e),
                    "Failed to instantiate workflow task"
                );
                Task::failed(spec.name.clone(), e)
            }
        }
    }
}

impl Coordinator for Workflow {
    fn prepare(&mut self, compound: &CompoundTask) -> Result<()> {
        info!(
            workflow_id = %self.definition.id,
            asset = %self.asset.filename.display(),
            tasks = self.definition.tasks.len(),
            "Preparing workflow run"
        );

        // 1. Instantiate
        for index in 0..self.definition.tasks.len() {
            let task = self.instantiate(index);
            compound.add_task(task.clone())?;
            self.tasks.push(task);
        }

        // 2. Wire wait-all joins
        for (index, spec) in self.definition.tasks.iter().enumerate() {
            if spec.depends_on.is_empty() {
                continue;
            }
            let dependencies: Vec<Task> = spec.depends_on.iter()
                .map(|&dep| self.tasks[dep].clone())
                .collect();
            let dependent = self.tasks[index].clone();
            let gate = self.gate.clone();
            when_all_settled(&dependencies, move || gate.fire(&dependent));
        }
        Ok(())
    }

    fn dispatch(&mut self, _compound: &CompoundTask) -> Result<()> {
        self.gate.released.set(true);

        for index in self.definition.roots() {
            let task = &self.tasks[index];
            if !task.is_settled() {
                start_logged(task);
            }
        }

        let early = std::mem::take(&mut *self.gate.early.borrow_mut());
        for task in early {
            self.gate.fire(&task);
        }
        Ok(())
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        Some(self)
    }
}

impl Cancelable for Workflow {
    fn cancel(&mut self, task: &Task) -> Result<()> {
        info!(workflow_id = %self.definition.id, "Cancelling workflow run");
        self.gate.cancelled.set(true);
        cancel_children(task);
        Ok(())
    }
}
