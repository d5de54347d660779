use std::path::Path;
use std::sync::Arc;
use anyhow::Result;
use dashmap::DashMap;
use crate::actions::RunnerRegistry;
use crate::compiler::loader::load_workflow_dir;
use crate::runtime::blueprint::WorkflowDefinition;
use crate::trigger::Asset;

/// Workflow definitions known to the engine, keyed by id. Shareable across
/// threads so that definitions can be reloaded while the engine runs.
#[derive(Default)]
pub struct Catalog {
    workflows: DashMap<String, Arc<WorkflowDefinition>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition.
    pub fn insert(&self, definition: WorkflowDefinition) -> Option<Arc<WorkflowDefinition>> {
        let id = definition.id.clone();
        self.workflows.insert(id, Arc::new(definition))
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(id).map(|d| d.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.remove(id).map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Definitions whose trigger accepts `asset`, ordered by id.
    pub fn matching(&self, asset: &Asset) -> Vec<Arc<WorkflowDefinition>> {
        let mut matches: Vec<Arc<WorkflowDefinition>> = self.workflows
            .iter()
            .filter(|e| e.value().matches(asset))
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// Loads a directory of documents; returns how many were accepted.
    pub fn load_dir(&self, dir: impl AsRef<Path>, registry: &RunnerRegistry) -> Result<usize> {
        let definitions = load_workflow_dir(dir, registry)?;
        let count = definitions.len();
        for definition in definitions {
            self.insert(definition);
        }
        Ok(count)
    }
}
