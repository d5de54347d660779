use std::sync::Arc;
use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use crate::actions::RunnerRegistry;
use crate::config::EngineConfig;
use crate::runtime::catalog::Catalog;
use crate::runtime::error::TaskError;
use crate::runtime::manager::{TaskInfo, TaskManager};
use crate::runtime::task::{Task, TaskId};
use crate::runtime::workflow::Workflow;
use crate::trigger::Asset;

type Reply<T> = oneshot::Sender<Result<T, TaskError>>;

/// Requests served by the control loop on behalf of other threads.
pub enum Command {
    Submit { asset: Asset, reply: Reply<Vec<TaskId>> },
    AllTasks { reply: Reply<Vec<TaskInfo>> },
    TaskInfo { id: TaskId, reply: Reply<TaskInfo> },
    Abort { id: TaskId, reply: Reply<()> },
    Pause { id: TaskId, reply: Reply<bool> },
    Resume { id: TaskId, reply: Reply<bool> },
    /// Answers once the task has settled.
    Wait { id: TaskId, reply: Reply<TaskInfo> },
    Shutdown,
}

/// Owns the control-thread state: the task manager, the runner registry and
/// the workflow catalog.
///
/// `Engine` is `!Send`; run it on a `LocalSet` and talk to it from elsewhere
/// through an [`EngineHandle`].
pub struct Engine {
    config: EngineConfig,
    manager: TaskManager,
    registry: Arc<RunnerRegistry>,
    catalog: Arc<Catalog>,
    command_sender: mpsc::Sender<Command>,
    command_receiver: Option<mpsc::Receiver<Command>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, RunnerRegistry::with_builtins())
    }

    pub fn with_registry(config: EngineConfig, registry: RunnerRegistry) -> Self {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let mut manager = TaskManager::with_grace_period(config.grace_period());
        manager.set_notify_granularity(config.notify_granularity);
        Self {
            config,
            manager,
            registry: Arc::new(registry),
            catalog: Arc::new(Catalog::new()),
            command_sender: tx,
            command_receiver: Some(rx),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<RunnerRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Loads the configured workflow directory, if any.
    pub fn load_workflows(&self) -> Result<usize> {
        match &self.config.workflows_dir {
            Some(dir) => self.catalog.load_dir(dir, &self.registry),
            None => Ok(0),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.command_sender.clone(),
        }
    }

    /// Schedules one workflow run per definition whose trigger accepts the
    /// asset. Returns the ids of the umbrella tasks.
    ///
    /// # Panics
    ///
    /// Must be called from inside a `LocalSet`: runs whose first tasks offload
    /// work (`delay`, `command`, `download`) spawn it as local tasks, which
    /// panics anywhere else. [`Engine::run`] and the CLI already satisfy this.
    pub fn submit(&self, asset: &Asset) -> Result<Vec<TaskId>, TaskError> {
        let definitions = self.catalog.matching(asset);
        if definitions.is_empty() {
            info!(asset = %asset.filename.display(), role = %asset.role, "No workflow matches asset");
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let workflow_id = definition.id.clone();
            let run: Task = Workflow::build(definition, asset.clone(), self.registry.clone()).into();
            match self.manager.schedule(&run) {
                Ok(()) => {}
                Err(e @ TaskError::DuplicateTask(_)) => return Err(e),
                // The run is registered and already reflects the failure.
                Err(e) => warn!(workflow_id = %workflow_id, task_id = %run.id(), error = %e, "Workflow run failed to start"),
            }
            info!(workflow_id = %workflow_id, task_id = %run.id(), asset = %asset.filename.display(), "Workflow run scheduled");
            ids.push(run.id());
        }
        Ok(ids)
    }

    /// Resolves once the task settles.
    pub async fn wait_settled(&self, id: &TaskId) -> Result<TaskInfo, TaskError> {
        let (tx, rx) = oneshot::channel();
        self.watch_settled(id, tx);
        rx.await.map_err(|_| TaskError::EngineStopped)?
    }

    fn watch_settled(&self, id: &TaskId, reply: Reply<TaskInfo>) {
        match self.manager.get(id) {
            Ok(task) => task.on_settled(move |task| {
                let _ = reply.send(Ok(TaskInfo::from(task)));
            }),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// The control loop. Serves commands until [`EngineHandle::shutdown`] and
    /// drops settled tasks once their grace period is over.
    pub async fn run(&mut self) -> Result<()> {
        let mut rx = self.command_receiver.take()
            .ok_or_else(|| anyhow!("Engine is already running"))?;
        let mut purge = tokio::time::interval(self.config.purge_interval());
        info!("Engine started.");

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = purge.tick() => {
                    let purged = self.manager.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Expired tasks purged");
                    }
                }
            }
        }

        info!("Engine stopped.");
        Ok(())
    }

    fn handle_command(&self, command: Command) {
        match command {
            Command::Submit { asset, reply } => {
                let _ = reply.send(self.submit(&asset));
            }
            Command::AllTasks { reply } => {
                let _ = reply.send(Ok(self.manager.all_tasks()));
            }
            Command::TaskInfo { id, reply } => {
                let _ = reply.send(self.manager.task_info(&id));
            }
            Command::Abort { id, reply } => {
                let _ = reply.send(self.manager.abort_task(&id));
            }
            Command::Pause { id, reply } => {
                let _ = reply.send(self.manager.pause_task(&id));
            }
            Command::Resume { id, reply } => {
                let _ = reply.send(self.manager.resume_task(&id));
            }
            Command::Wait { id, reply } => self.watch_settled(&id, reply),
            Command::Shutdown => {}
        }
    }
}

/// Thread-safe entry point into a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, TaskError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await
            .map_err(|_| TaskError::EngineStopped)?;
        rx.await.map_err(|_| TaskError::EngineStopped)?
    }

    pub async fn submit(&self, asset: Asset) -> Result<Vec<TaskId>, TaskError> {
        self.request(|reply| Command::Submit { asset, reply }).await
    }

    pub async fn all_tasks(&self) -> Result<Vec<TaskInfo>, TaskError> {
        self.request(|reply| Command::AllTasks { reply }).await
    }

    pub async fn task_info(&self, id: TaskId) -> Result<TaskInfo, TaskError> {
        self.request(|reply| Command::TaskInfo { id, reply }).await
    }

    pub async fn abort_task(&self, id: TaskId) -> Result<(), TaskError> {
        self.request(|reply| Command::Abort { id, reply }).await
    }

    pub async fn pause_task(&self, id: TaskId) -> Result<bool, TaskError> {
        self.request(|reply| Command::Pause { id, reply }).await
    }

    pub async fn resume_task(&self, id: TaskId) -> Result<bool, TaskError> {
        self.request(|reply| Command::Resume { id, reply }).await
    }

    pub async fn wait_settled(&self, id: TaskId) -> Result<TaskInfo, TaskError> {
        self.request(|reply| Command::Wait { id, reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), TaskError> {
        self.commands.send(Command::Shutdown).await
            .map_err(|_| TaskError::EngineStopped)
    }
}
