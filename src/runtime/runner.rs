use anyhow::Result;
use serde_json::Value;
use crate::runtime::task::Task;
use crate::trigger::Asset;

/// The payload driven by a [`Task`].
///
/// The task owns its runner; `start` receives the owning task so the runner can
/// report progress, status text and its terminal result through it.
pub trait Runner {
    /// Invoked exactly once, on the control thread. Long work must be handed
    /// off (see [`crate::actions::offload`]) rather than done inline.
    fn start(&mut self, task: &Task) -> Result<()>;

    fn as_pausable(&mut self) -> Option<&mut dyn Pausable> {
        None
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        None
    }
}

/// Optional capability: the runner can suspend and resume its work.
pub trait Pausable {
    fn pause(&mut self, task: &Task) -> Result<()>;
    fn unpause(&mut self, task: &Task) -> Result<()>;
}

/// Optional capability: the runner can be asked to stop. Cancellation is
/// cooperative; the runner acknowledges by failing the task.
pub trait Cancelable {
    fn cancel(&mut self, task: &Task) -> Result<()>;
}

/// 工厂接口: builds runners for an implementation name used in workflow documents.
pub trait RunnerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    fn create(&self, asset: &Asset, params: &Value) -> Result<Box<dyn Runner>>;
}
