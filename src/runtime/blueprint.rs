use serde_json::Value;
use crate::trigger::{Asset, Trigger};

pub type TaskIndex = usize;

/// 编译后的工作流定义: a validated document, ready to be run any number of times.
#[derive(Debug)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    /// In document order.
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn matches(&self, asset: &Asset) -> bool {
        self.trigger.evaluate(asset)
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks without dependencies, started as soon as a run is released.
    pub fn roots(&self) -> impl Iterator<Item = TaskIndex> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.depends_on.is_empty())
            .map(|(idx, _)| idx)
    }
}

#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    /// Implementation name (e.g. "command", "download").
    pub run: String,
    /// JSON object handed to the runner factory.
    pub params: Value,
    /// Indexes into `WorkflowDefinition::tasks`, deduplicated.
    pub depends_on: Vec<TaskIndex>,
}
