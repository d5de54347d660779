use std::future::Future;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use crate::runtime::context::{JobContext, Update};
use crate::runtime::error::TaskError;
use crate::runtime::runner::{Cancelable, Pausable, Runner};
use crate::runtime::task::{Task, WeakTask};

/// Asynchronous work driven by a [`JobRunner`].
///
/// The job runs as a local future next to the control thread; blocking or
/// CPU-heavy parts belong in [`run_blocking`].
#[async_trait(?Send)]
pub trait Job: 'static {
    async fn run(&mut self, ctx: JobContext) -> Result<Value>;

    /// Whether the job calls [`JobContext::checkpoint`] and can therefore be paused.
    fn pausable(&self) -> bool {
        false
    }
}

/// Adapts a [`Job`] to the [`Runner`] contract: the job is spawned on the
/// current `LocalSet` and its updates and result are applied to the task.
///
/// # Panics
///
/// Starting the task panics when not called from inside a `LocalSet`.
pub struct JobRunner<J> {
    job: Option<J>,
    pausable: bool,
    paused: watch::Sender<bool>,
    cancel: Option<oneshot::Sender<()>>,
}

impl<J: Job> JobRunner<J> {
    pub fn new(job: J) -> Self {
        let pausable = job.pausable();
        let (paused, _) = watch::channel(false);
        Self {
            job: Some(job),
            pausable,
            paused,
            cancel: None,
        }
    }
}

impl<J: Job> Runner for JobRunner<J> {
    fn start(&mut self, task: &Task) -> Result<()> {
        let mut job = self.job.take().ok_or_else(|| anyhow!("Job already started"))?;

        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);

        let ctx = JobContext::new(updates_tx, self.paused.subscribe());
        let weak = task.downgrade();

        tokio::task::spawn_local(async move {
            // The job is dropped at the end of this block, before settling.
            let outcome: Result<Value, TaskError> = {
                let work = async move { job.run(ctx).await };
                tokio::pin!(work);
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut cancel_rx => break Err(TaskError::Cancelled),
                        Some(update) = updates_rx.recv() => apply(&weak, update),
                        result = &mut work => break result.map_err(TaskError::from),
                    }
                }
            };

            while let Ok(update) = updates_rx.try_recv() {
                apply(&weak, update);
            }
            settle(&weak, outcome);
        });
        Ok(())
    }

    fn as_pausable(&mut self) -> Option<&mut dyn Pausable> {
        if self.pausable { Some(self) } else { None }
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        Some(self)
    }
}

impl<J: Job> Pausable for JobRunner<J> {
    fn pause(&mut self, _task: &Task) -> Result<()> {
        self.paused.send_replace(true);
        Ok(())
    }

    fn unpause(&mut self, _task: &Task) -> Result<()> {
        self.paused.send_replace(false);
        Ok(())
    }
}

impl<J: Job> Cancelable for JobRunner<J> {
    fn cancel(&mut self, task: &Task) -> Result<()> {
        match self.cancel.take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None if self.job.is_some() => {
                self.job = None;
                task.fail(TaskError::Cancelled)?;
            }
            None => {}
        }
        Ok(())
    }
}

fn apply(weak: &WeakTask, update: Update) {
    let Some(task) = weak.upgrade() else {
        return;
    };
    match update {
        // Reached when the job returns.
        Update::Completion(Some(value)) if value >= 1.0 => {}
        Update::Completion(value) => {
            if let Err(e) = task.set_completion(value) {
                debug!(task_id = %task.id(), error = %e, "Progress update dropped");
            }
        }
        Update::StatusText(text) => task.set_status_text(text),
    }
}

fn settle(weak: &WeakTask, outcome: Result<Value, TaskError>) {
    let Some(task) = weak.upgrade() else {
        return;
    };
    if task.is_settled() {
        return;
    }
    let result = match outcome {
        Ok(value) => task.complete(value),
        Err(e) => task.fail(e),
    };
    if let Err(e) = result {
        warn!(task_id = %task.id(), error = %e, "Could not settle task");
    }
}

/// Runs blocking work on tokio's blocking pool, keeping the job's context.
pub async fn run_blocking<T, F>(ctx: &JobContext, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(JobContext) -> Result<T> + Send + 'static,
{
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || f(ctx)).await?
}

/// Job built from a closure, for one-off work.
pub struct FnJob<F> {
    f: Option<F>,
}

#[async_trait(?Send)]
impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(JobContext) -> Fut + 'static,
    Fut: Future<Output = Result<Value>> + 'static,
{
    async fn run(&mut self, ctx: JobContext) -> Result<Value> {
        let f = self.f.take().ok_or_else(|| anyhow!("Job already ran"))?;
        f(ctx).await
    }
}

pub fn job_fn<F, Fut>(f: F) -> JobRunner<FnJob<F>>
where
    F: FnOnce(JobContext) -> Fut + 'static,
    Fut: Future<Output = Result<Value>> + 'static,
{
    JobRunner::new(FnJob { f: Some(f) })
}
