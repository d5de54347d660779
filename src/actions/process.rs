use std::path::PathBuf;
use std::process::Stdio;
use anyhow::{Result, anyhow, bail, Context as AnyhowContext};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;
use crate::actions::offload::{Job, JobRunner};
use crate::runtime::context::JobContext;
use crate::runtime::runner::{Runner, RunnerFactory};
use crate::trigger::Asset;

/// Runs an external program.
///
/// ```yaml
/// - name: thumbnail
///   run: command
///   params:
///     program: ffmpeg
///     args: ["-i", "${filename}", "thumb.jpg"]
/// ```
///
/// Lines of the form `progress=<0..1>` on stdout drive the task completion;
/// every other line becomes the status text. Cancelling kills the process.
#[derive(Debug)]
pub struct CommandFactory;

impl CommandFactory {
    fn job(params: &Value) -> Result<CommandJob> {
        let program = params.get("program")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: program"))?
            .to_string();

        let args = match params.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    other => Err(anyhow!("Invalid command argument: {}", other)),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => bail!("args must be a list, got {}", other),
        };

        let cwd = params.get("cwd").and_then(|v| v.as_str()).map(PathBuf::from);
        Ok(CommandJob { program, args, cwd })
    }
}

impl RunnerFactory for CommandFactory {
    fn name(&self) -> &str {
        "command"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::job(params).map(|_| ())
    }

    fn create(&self, _asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        Ok(Box::new(JobRunner::new(Self::job(params)?)))
    }
}

#[derive(Debug, Clone)]
pub struct CommandJob {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[async_trait(?Send)]
impl Job for CommandJob {
    async fn run(&mut self, ctx: JobContext) -> Result<Value> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        debug!(program = %self.program, args = ?self.args, "Spawning command");
        let mut child = command.spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    match parse_progress(&line) {
                        Some(value) => ctx.progress(value),
                        None if !line.trim().is_empty() => ctx.status(line.trim()),
                        None => {}
                    }
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        };

        let (stdout_result, stderr_text) = tokio::join!(read_stdout, read_stderr);
        stdout_result.context("Failed to read command output")?;

        let status = child.wait().await
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}: {}", self.program, status, stderr_text.trim());
        }
        Ok(json!({ "exit_code": status.code() }))
    }
}

/// Parses `progress=<value>` where value is a ratio within `[0, 1]`.
pub fn parse_progress(line: &str) -> Option<f64> {
    let value = line.trim().strip_prefix("progress=")?;
    let value: f64 = value.trim().parse().ok()?;
    (0.0..=1.0).contains(&value).then_some(value)
}
