use std::time::Duration;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use crate::actions::offload::{Job, JobRunner};
use crate::runtime::context::JobContext;
use crate::runtime::runner::{Runner, RunnerFactory};
use crate::runtime::task::Task;
use crate::trigger::Asset;

#[derive(Debug)]
pub struct LogFactory;

impl RunnerFactory for LogFactory {
    fn name(&self) -> &str {
        "log"
    }

    fn create(&self, asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        let message = match params.get("msg").and_then(|v| v.as_str()) {
            Some(msg) => msg.to_string(),
            None => format!("{} ({})", asset.filename.display(), asset.role),
        };
        Ok(Box::new(LogRunner { message }))
    }
}

/// Logs a line and completes on the spot.
pub struct LogRunner {
    message: String,
}

impl Runner for LogRunner {
    fn start(&mut self, task: &Task) -> Result<()> {
        info!(task_id = %task.id(), "[LOG] {}", self.message);
        task.complete(Value::Null)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FailFactory;

impl RunnerFactory for FailFactory {
    fn name(&self) -> &str {
        "fail"
    }

    fn create(&self, _asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        let message = params.get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Task failed")
            .to_string();
        Ok(Box::new(FailRunner { message }))
    }
}

/// Fails as soon as it is started.
pub struct FailRunner {
    message: String,
}

impl Runner for FailRunner {
    fn start(&mut self, task: &Task) -> Result<()> {
        task.fail(anyhow!("{}", self.message))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct DelayFactory;

impl DelayFactory {
    fn seconds(params: &Value) -> Result<f64> {
        let seconds = params.get("seconds")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("Missing required parameter: seconds"))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(anyhow!("seconds must be a positive number, got {}", seconds));
        }
        Ok(seconds)
    }
}

impl RunnerFactory for DelayFactory {
    fn name(&self) -> &str {
        "delay"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::seconds(params).map(|_| ())
    }

    fn create(&self, _asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        let seconds = Self::seconds(params)?;
        let steps = params.get("steps").and_then(|v| v.as_u64()).unwrap_or(10).max(1) as u32;
        Ok(Box::new(JobRunner::new(DelayJob {
            duration: Duration::from_secs_f64(seconds),
            steps,
        })))
    }
}

/// Sleeps in `steps` slices, reporting progress after each one. Pausable
/// between slices.
pub struct DelayJob {
    pub duration: Duration,
    pub steps: u32,
}

#[async_trait(?Send)]
impl Job for DelayJob {
    async fn run(&mut self, ctx: JobContext) -> Result<Value> {
        let slice = self.duration / self.steps;
        ctx.progress(0.0);
        for step in 1..=self.steps {
            ctx.checkpoint().await;
            tokio::time::sleep(slice).await;
            ctx.progress(step as f64 / self.steps as f64);
        }
        Ok(json!({ "slept_ms": self.duration.as_millis() as u64 }))
    }

    fn pausable(&self) -> bool {
        true
    }
}
