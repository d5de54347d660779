use crate::actions::RunnerRegistry;
use crate::dsl::{TaskSpec, WorkflowDocument};
use crate::runtime::blueprint::{TaskDefinition, TaskIndex, WorkflowDefinition};
use crate::trigger::Trigger;
use std::collections::{HashMap, VecDeque};
use anyhow::{Result, anyhow, Context as AnyhowContext};
use serde_json::Value;

/// Validates a [`WorkflowDocument`] and turns it into a [`WorkflowDefinition`].
pub struct Compiler<'a> {
    registry: Option<&'a RunnerRegistry>,
    id_map: HashMap<String, TaskIndex>,
}

impl<'a> Compiler<'a> {
    pub fn new() -> Self {
        Self {
            registry: None,
            id_map: HashMap::new(),
        }
    }

    /// Also checks that every implementation is registered and accepts its params.
    pub fn with_registry(registry: &'a RunnerRegistry) -> Self {
        Self {
            registry: Some(registry),
            id_map: HashMap::new(),
        }
    }

    pub fn compile(&mut self, document: WorkflowDocument) -> Result<WorkflowDefinition> {
        self.id_map.clear();

        if document.id.trim().is_empty() {
            return Err(anyhow!("Workflow id must not be empty"));
        }

        // 1. Pass 1: Indexing
        for (idx, task) in document.tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(anyhow!("Task #{} has an empty name", idx));
            }
            if self.id_map.insert(task.name.clone(), idx).is_some() {
                return Err(anyhow!("Duplicate task name: {}", task.name));
            }
        }

        // 2. Pass 2: Transform
        let mut tasks = Vec::with_capacity(document.tasks.len());
        for task in &document.tasks {
            tasks.push(self.transform_task(task)?);
        }

        check_acyclic(&tasks)?;

        let trigger = Trigger::parse(&document.trigger)
            .with_context(|| format!("Invalid trigger in workflow {}", document.id))?;

        Ok(WorkflowDefinition {
            name: document.display_name().to_string(),
            id: document.id,
            trigger,
            tasks,
        })
    }

    fn transform_task(&self, task: &TaskSpec) -> Result<TaskDefinition> {
        let mut depends_on = Vec::with_capacity(task.depends_on.len());
        for dep in &task.depends_on {
            if *dep == task.name {
                return Err(anyhow!("Task {} depends on itself", task.name));
            }
            let idx = self.resolve_target(dep)
                .with_context(|| format!("Invalid dependency of task {}", task.name))?;
            if !depends_on.contains(&idx) {
                depends_on.push(idx);
            }
        }

        let params = Value::Object(task.params.clone().into_iter().collect());

        if let Some(registry) = self.registry {
            let factory = registry.get(&task.run)
                .ok_or_else(|| anyhow!("Unknown implementation '{}' for task {}", task.run, task.name))?;
            factory.validate(&params)
                .with_context(|| format!("Invalid parameters for task {}", task.name))?;
        }

        Ok(TaskDefinition {
            name: task.name.clone(),
            run: task.run.clone(),
            params,
            depends_on,
        })
    }

    fn resolve_target(&self, name: &str) -> Result<TaskIndex> {
        self.id_map.get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Target task not found: {}", name))
    }
}

impl Default for Compiler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm; a task on a cycle would never become ready.
fn check_acyclic(tasks: &[TaskDefinition]) -> Result<()> {
    let mut pending: Vec<usize> = tasks.iter().map(|t| t.depends_on.len()).collect();
    let mut dependents: Vec<Vec<TaskIndex>> = vec![Vec::new(); tasks.len()];
    for (idx, task) in tasks.iter().enumerate() {
        for &dep in &task.depends_on {
            dependents[dep].push(idx);
        }
    }

    let mut ready: VecDeque<TaskIndex> = pending.iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut visited = 0;

    while let Some(idx) = ready.pop_front() {
        visited += 1;
        for &next in &dependents[idx] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if visited != tasks.len() {
        let stuck: Vec<&str> = tasks.iter()
            .zip(&pending)
            .filter(|(_, n)| **n > 0)
            .map(|(t, _)| t.name.as_str())
            .collect();
        return Err(anyhow!("Dependency cycle between tasks: {}", stuck.join(", ")));
    }
    Ok(())
}
