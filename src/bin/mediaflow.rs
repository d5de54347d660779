use clap::{Parser, Subcommand};
use mediaflow::actions::RunnerRegistry;
use mediaflow::compiler::loader::load_definition;
use mediaflow::config::EngineConfig;
use mediaflow::runtime::engine::Engine;
use mediaflow::runtime::task::TaskStatus;
use mediaflow::trigger::Asset;
use std::path::PathBuf;
use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{info, error};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one asset and run every matching workflow to completion
    Run {
        /// Directory containing workflow YAML files
        #[arg(long, short)]
        workflows: Option<PathBuf>,

        /// Engine configuration file (YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Role of the asset (e.g. video, image)
        #[arg(long, short)]
        role: String,

        /// Asset file name
        file: PathBuf,

        /// Extra asset attributes (key=value)
        #[arg(long, short = 'A', value_parser = parse_key_val)]
        attr: Vec<(String, Value)>,
    },

    /// Validate workflow files without running them
    Check {
        /// Workflow YAML files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| Value::String(val_str.to_string()));
    Ok((key, val))
}

async fn run(config: EngineConfig, asset: Asset) -> Result<bool> {
    let engine = Engine::new(config);
    let loaded = engine.load_workflows()?;
    info!("Loaded {} workflow(s).", loaded);

    let ids = engine.submit(&asset)?;
    if ids.is_empty() {
        info!("No workflow matched {}.", asset.filename.display());
        return Ok(true);
    }

    let mut succeeded = true;
    for id in ids {
        let info = engine.wait_settled(&id).await?;
        info!(task_id = %info.id, name = %info.name, status = %info.status, "Workflow run settled");
        // A run settles COMPLETED only if every task in it did.
        for child in engine.manager().all_tasks().iter().filter(|t| t.parent.as_ref() == Some(&id)) {
            if child.status == TaskStatus::Failed {
                error!(task = %child.name, error = child.error.as_deref().unwrap_or(""), "Task failed");
            }
        }
        succeeded &= info.status == TaskStatus::Completed;
    }
    Ok(succeeded)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { workflows, config, role, file, attr } => {
            let mut config = match config {
                Some(path) => EngineConfig::from_yaml_file(path)?,
                None => EngineConfig::default(),
            };
            if workflows.is_some() {
                config.workflows_dir = workflows;
            }
            if config.workflows_dir.is_none() {
                bail!("No workflow directory given (use --workflows or workflows_dir in the configuration)");
            }

            let mut asset = Asset::new(role, file);
            asset.attributes.extend(attr);

            // Tasks live on one control thread.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let local = tokio::task::LocalSet::new();
            let succeeded = local.block_on(&runtime, run(config, asset))?;
            if !succeeded {
                bail!("At least one workflow run failed");
            }
        }

        Commands::Check { files } => {
            let registry = RunnerRegistry::with_builtins();
            let mut invalid = 0;
            for file in &files {
                match load_definition(file, &registry) {
                    Ok(definition) => info!("{}: ok ({} tasks)", definition.id, definition.tasks.len()),
                    Err(e) => {
                        error!("{}: {:#}", file.display(), e);
                        invalid += 1;
                    }
                }
            }
            if invalid > 0 {
                bail!("{} of {} workflow file(s) are invalid", invalid, files.len());
            }
        }
    }

    Ok(())
}
