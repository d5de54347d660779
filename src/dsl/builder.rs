use crate::dsl::{TaskSpec, WorkflowDocument};
use crate::trigger::PredicateSpec;
use std::collections::HashMap;
use serde_json::Value;

pub struct WorkflowBuilder {
    id: String,
    name: String,
    trigger: Vec<PredicateSpec>,
    tasks: Vec<TaskSpec>,
}

impl WorkflowBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            trigger: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Adds a top-level trigger predicate; all of them must hold.
    pub fn when(mut self, predicate: PredicateSpec) -> Self {
        self.trigger.push(predicate);
        self
    }

    pub fn task(self, name: &str, run: &str) -> TaskBuilder {
        TaskBuilder {
            workflow_builder: self,
            name: name.to_string(),
            run: run.to_string(),
            params: HashMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn build(self) -> WorkflowDocument {
        WorkflowDocument {
            id: self.id,
            name: self.name,
            trigger: self.trigger,
            tasks: self.tasks,
        }
    }
}

pub struct TaskBuilder {
    workflow_builder: WorkflowBuilder,
    name: String,
    run: String,
    params: HashMap<String, Value>,
    depends_on: Vec<String>,
}

impl TaskBuilder {
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn after(mut self, dependency: &str) -> Self {
        self.depends_on.push(dependency.to_string());
        self
    }

    pub fn build(mut self) -> WorkflowBuilder {
        self.workflow_builder.tasks.push(TaskSpec {
            name: self.name,
            run: self.run,
            params: self.params,
            depends_on: self.depends_on,
        });
        self.workflow_builder
    }
}
