pub mod builder;

use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::trigger::PredicateSpec;

/// 原始 DSL 定义的 Workflow: a trigger plus a task graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    // serde_yaml only reads enums from `!tag` syntax unless told otherwise.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub trigger: Vec<PredicateSpec>,
    pub tasks: Vec<TaskSpec>,
}

impl WorkflowDocument {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// DSL 中的任务节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Unique within the document.
    pub name: String,
    /// Implementation name, resolved through the runner registry.
    pub run: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default, rename = "depends-on", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}
