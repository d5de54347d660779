pub mod actions;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod runtime;
pub mod trigger;

pub use runtime::compound::{CompoundTask, Coordinator};
pub use runtime::error::TaskError;
pub use runtime::manager::{TaskInfo, TaskManager};
pub use runtime::runner::{Cancelable, Pausable, Runner, RunnerFactory};
pub use runtime::task::{Task, TaskId, TaskStatus};
