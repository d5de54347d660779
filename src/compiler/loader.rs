use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use crate::actions::RunnerRegistry;
use crate::compiler::core::Compiler;
use crate::dsl::WorkflowDocument;
use crate::runtime::blueprint::WorkflowDefinition;

pub fn parse_workflow(yaml_content: &str) -> Result<WorkflowDocument> {
    let workflow: WorkflowDocument = serde_yaml::from_str(yaml_content)
        .context("Failed to deserialize workflow document")?;
    Ok(workflow)
}

pub fn load_workflow_from_yaml(file_path: impl AsRef<Path>) -> Result<WorkflowDocument> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    parse_workflow(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))
}

/// Loads and compiles a single document against `registry`.
pub fn load_definition(file_path: impl AsRef<Path>, registry: &RunnerRegistry) -> Result<WorkflowDefinition> {
    let file_path = file_path.as_ref();
    let document = load_workflow_from_yaml(file_path)?;
    Compiler::with_registry(registry)
        .compile(document)
        .with_context(|| format!("Invalid workflow in {}", file_path.display()))
}

/// Loads every `*.yaml`/`*.yml` file of `dir`, in file name order. Invalid
/// documents are skipped with a warning.
pub fn load_workflow_dir(dir: impl AsRef<Path>, registry: &RunnerRegistry) -> Result<Vec<WorkflowDefinition>> {
    let dir = dir.as_ref();
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflow directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
        })
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        match load_definition(&path, registry) {
            Ok(definition) => {
                info!(workflow_id = %definition.id, path = %path.display(), "Workflow loaded");
                definitions.push(definition);
            }
            Err(e) => warn!(path = %path.display(), error = %format!("{:#}", e), "Skipping invalid workflow"),
        }
    }
    Ok(definitions)
}
