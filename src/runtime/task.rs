use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::runtime::compound::{CompoundTask, Coordinator};
use crate::runtime::error::{Operation, TaskError};
use crate::runtime::runner::Runner;

/// Default distance between two notified completion values (1% of the range).
pub const DEFAULT_NOTIFY_GRANULARITY: f64 = 0.01;

// Absorbs the rounding error of progress values such as `i / 1000.0`.
const COMPLETION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Aggregation order of a compound task: the first state present among
    /// the children wins.
    pub const PRIORITY: [TaskStatus; 5] = [
        TaskStatus::Waiting,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Failed,
        TaskStatus::Completed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

pub type TaskOutcome = Result<Value, TaskError>;

type Observer = Rc<dyn Fn(&Task)>;
type Continuation = Box<dyn FnOnce(&Task)>;

pub(crate) enum Driver {
    Leaf(Box<dyn Runner>),
    Compound(Box<dyn Coordinator>),
    /// Placeholder for tasks that settled before they could get a runner.
    Inert,
    /// The runner or coordinator is out of its slot for the duration of a call.
    Busy,
}

struct State {
    id: TaskId,
    name: String,
    status_text: String,
    status: TaskStatus,
    completion: Option<f64>,
    last_notified: Option<f64>,
    granularity: f64,
    observers: Vec<Observer>,
    continuations: Vec<Continuation>,
    pause_depth: u32,
    pause_forwarded: bool,
    parent: Option<TaskId>,
    invoked: bool,
    start_pending: bool,
    settled_fired: bool,
    outcome: Option<TaskOutcome>,
    // Cancel requested while the driver was busy.
    cancel_deferred: bool,
    // `Some` for compound tasks.
    children: Option<Vec<Task>>,
    dispatched: bool,
}

struct Inner {
    state: RefCell<State>,
    driver: RefCell<Driver>,
}

/// A single observable, cancellable unit of asynchronous work.
///
/// `Task` is a cheap handle onto control-thread state; clones refer to the same
/// task. It is deliberately `!Send`: work running elsewhere reports back through
/// messages that are applied on the control thread.
#[derive(Clone)]
pub struct Task {
    inner: Rc<Inner>,
}

#[derive(Clone)]
pub struct WeakTask(Weak<Inner>);

impl WeakTask {
    pub fn upgrade(&self) -> Option<Task> {
        self.0.upgrade().map(|inner| Task { inner })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .field("completion", &self.completion())
            .finish()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, runner: impl Runner + 'static) -> Self {
        Self::with_id(TaskId::new(), name, runner)
    }

    pub fn with_id(id: TaskId, name: impl Into<String>, runner: impl Runner + 'static) -> Self {
        Self::from_parts(id, name.into(), Driver::Leaf(Box::new(runner)), None, 0)
    }

    pub fn from_boxed(name: impl Into<String>, runner: Box<dyn Runner>) -> Self {
        Self::from_parts(TaskId::new(), name.into(), Driver::Leaf(runner), None, 0)
    }

    /// A task that is already FAILED, standing in for work that could not be set up.
    pub fn failed(name: impl Into<String>, error: impl Into<TaskError>) -> Self {
        let task = Self::from_parts(TaskId::new(), name.into(), Driver::Inert, None, 0);
        {
            let mut state = task.inner.state.borrow_mut();
            state.invoked = true;
            state.status = TaskStatus::Failed;
            state.outcome = Some(Err(error.into()));
            state.settled_fired = true;
        }
        task
    }

    pub(crate) fn from_parts(
        id: TaskId,
        name: String,
        driver: Driver,
        children: Option<Vec<Task>>,
        pause_depth: u32,
    ) -> Self {
        let state = State {
            id,
            name,
            status_text: String::new(),
            status: TaskStatus::Waiting,
            completion: None,
            last_notified: None,
            granularity: DEFAULT_NOTIFY_GRANULARITY,
            observers: Vec::new(),
            continuations: Vec::new(),
            pause_depth,
            pause_forwarded: false,
            parent: None,
            invoked: false,
            start_pending: false,
            settled_fired: false,
            outcome: None,
            cancel_deferred: false,
            children,
            dispatched: false,
        };
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
                driver: RefCell::new(driver),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakTask {
        WeakTask(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Task) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Accessors ---

    pub fn id(&self) -> TaskId {
        self.inner.state.borrow().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.state.borrow().name.clone()
    }

    pub fn status_text(&self) -> String {
        self.inner.state.borrow().status_text.clone()
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.inner.state.borrow().parent.clone()
    }

    pub(crate) fn set_parent(&self, parent: TaskId) {
        self.inner.state.borrow_mut().parent = Some(parent);
    }

    pub fn is_compound(&self) -> bool {
        self.inner.state.borrow().children.is_some()
    }

    pub fn children(&self) -> Vec<Task> {
        self.inner.state.borrow().children.clone().unwrap_or_default()
    }

    pub(crate) fn push_child(&self, child: Task) {
        if let Some(children) = self.inner.state.borrow_mut().children.as_mut() {
            children.push(child);
        }
    }

    pub(crate) fn is_dispatched(&self) -> bool {
        self.inner.state.borrow().dispatched
    }

    pub fn is_invoked(&self) -> bool {
        self.inner.state.borrow().invoked
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().pause_depth > 0
    }

    pub fn pause_depth(&self) -> u32 {
        self.inner.state.borrow().pause_depth
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn set_notify_granularity(&self, granularity: f64) {
        self.inner.state.borrow_mut().granularity = granularity;
    }

    /// The result or error the task settled with. Compound tasks only carry an
    /// outcome when their coordinator failed.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.state.borrow().outcome.clone()
    }

    pub fn error(&self) -> Option<TaskError> {
        match self.outcome() {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        let children = {
            let state = self.inner.state.borrow();
            match &state.children {
                None => return state.status,
                Some(_) if matches!(state.outcome, Some(Err(_))) => return TaskStatus::Failed,
                Some(children) => children.clone(),
            }
        };
        aggregate_status(children.iter().map(Task::status))
    }

    pub fn completion(&self) -> Option<f64> {
        let children = {
            let state = self.inner.state.borrow();
            match &state.children {
                None => return state.completion,
                Some(children) => children.clone(),
            }
        };
        aggregate_completion(children.iter().map(Task::completion))
    }

    // --- Observation ---

    /// Observers run synchronously, in registration order, whenever the
    /// status, the status text or the (thresholded) completion changes.
    pub fn add_observer(&self, observer: impl Fn(&Task) + 'static) {
        self.inner.state.borrow_mut().observers.push(Rc::new(observer));
    }

    /// Runs `continuation` once the task reaches a terminal status. While the
    /// task is paused, continuations are held back until it is unpaused.
    pub fn on_settled(&self, continuation: impl FnOnce(&Task) + 'static) {
        let fired = {
            let mut state = self.inner.state.borrow_mut();
            if !state.settled_fired {
                state.continuations.push(Box::new(continuation));
                None
            } else {
                Some(continuation)
            }
        };
        match fired {
            Some(continuation) => continuation(self),
            None => self.fire_settled(),
        }
    }

    pub(crate) fn notify(&self) {
        let observers = self.inner.state.borrow().observers.clone();
        for observer in observers {
            observer(self);
        }
    }

    pub(crate) fn fire_settled(&self) {
        {
            let state = self.inner.state.borrow();
            if state.settled_fired || state.pause_depth > 0 {
                return;
            }
            if state.children.is_some() && !state.dispatched && state.outcome.is_none() {
                return;
            }
        }
        if !self.status().is_terminal() {
            return;
        }
        let continuations = {
            let mut state = self.inner.state.borrow_mut();
            if state.settled_fired {
                return;
            }
            state.settled_fired = true;
            std::mem::take(&mut state.continuations)
        };
        for continuation in continuations {
            continuation(self);
        }
    }

    // --- Lifecycle ---

    /// Invokes the runner. A task can only be invoked once; while paused the
    /// invocation is queued until the task is released.
    pub fn start(&self) -> Result<(), TaskError> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.invoked {
                return Err(TaskError::AlreadyStarted(state.id.clone()));
            }
            // Cancelled before it ever ran.
            if state.outcome.is_some() {
                return Err(TaskError::AlreadySettled(state.id.clone()));
            }
            state.invoked = true;
            if state.pause_depth > 0 {
                debug!(task_id = %state.id, "Task is paused, start deferred");
                state.start_pending = true;
                return Ok(());
            }
        }
        self.invoke()
    }

    fn invoke(&self) -> Result<(), TaskError> {
        if self.is_compound() {
            return self.invoke_compound();
        }

        self.transition(TaskStatus::Running);

        let result = self
            .with_driver(|driver| match driver {
                Driver::Leaf(runner) => runner.start(self),
                _ => Ok(()),
            })
            .unwrap_or_else(|| Err(TaskError::Busy(self.id()).into()));

        if let Err(e) = result {
            let error = TaskError::from(e);
            warn!(task_id = %self.id(), error = %error, "Runner failed to start");
            if !self.is_settled() {
                self.fail(error.clone())?;
            }
            return Err(error);
        }
        Ok(())
    }

    fn invoke_compound(&self) -> Result<(), TaskError> {
        let compound = CompoundTask::from_task(self.clone());

        let prepared = self.with_coordinator(|c| c.prepare(&compound));
        if let Err(e) = prepared {
            return Err(self.coordinator_failed(e));
        }

        self.inner.state.borrow_mut().dispatched = true;
        debug!(task_id = %self.id(), children = self.children().len(), "Dispatching compound task");

        let dispatched = self.with_coordinator(|c| c.dispatch(&compound));
        if let Err(e) = dispatched {
            return Err(self.coordinator_failed(e));
        }

        self.notify();
        self.fire_settled();
        Ok(())
    }

    fn with_coordinator(
        &self,
        f: impl FnOnce(&mut dyn Coordinator) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        self.with_driver(|driver| match driver {
            Driver::Compound(coordinator) => f(coordinator.as_mut()),
            _ => Ok(()),
        })
        .unwrap_or_else(|| Err(TaskError::Busy(self.id()).into()))
    }

    /// Runs `f` with the runner or coordinator moved out of its slot, so that
    /// observers reached from inside the call can still control this task.
    /// Returns `None` if the task is already inside such a call.
    fn with_driver<R>(&self, f: impl FnOnce(&mut Driver) -> R) -> Option<R> {
        let mut driver = std::mem::replace(&mut *self.inner.driver.borrow_mut(), Driver::Busy);
        if matches!(driver, Driver::Busy) {
            return None;
        }
        let result = f(&mut driver);
        *self.inner.driver.borrow_mut() = driver;
        self.run_deferred_cancel();
        Some(result)
    }

    fn run_deferred_cancel(&self) {
        loop {
            let pending = std::mem::take(&mut self.inner.state.borrow_mut().cancel_deferred);
            if !pending || self.is_settled() {
                return;
            }
            debug!(task_id = %self.id(), "Running deferred cancel");
            if let Err(e) = self.forward(Operation::Cancel) {
                warn!(task_id = %self.id(), error = %e, "Deferred cancel failed");
            }
        }
    }

    fn coordinator_failed(&self, err: anyhow::Error) -> TaskError {
        let error = TaskError::from(err);
        warn!(task_id = %self.id(), error = %error, "Coordinator failed");
        self.inner.state.borrow_mut().outcome = Some(Err(error.clone()));
        self.notify();
        self.fire_settled();
        error
    }

    fn transition(&self, status: TaskStatus) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            debug!(task_id = %self.id(), status = %status, "Task status changed");
            self.notify();
        }
    }

    /// Sets the completion ratio, `None` meaning undefined. Reaching 1 completes
    /// the task with a null result, as [`Task::complete`] would.
    pub fn set_completion(&self, value: Option<f64>) -> Result<(), TaskError> {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(TaskError::InvalidArgument(format!(
                    "completion must be within [0, 1], got {}",
                    v
                )));
            }
            if v == 1.0 {
                return self.complete(Value::Null);
            }
        }

        let notify = {
            let mut state = self.inner.state.borrow_mut();
            if state.children.is_some() {
                return Err(TaskError::InvalidArgument(
                    "completion of a compound task is derived from its children".to_string(),
                ));
            }
            if state.outcome.is_some() {
                return Err(TaskError::AlreadySettled(state.id.clone()));
            }
            state.completion = value;

            let notify = match (state.last_notified, value) {
                (None, None) => false,
                (None, Some(_)) | (Some(_), None) => true,
                (Some(last), Some(v)) => {
                    (v - last).abs() + COMPLETION_EPSILON >= state.granularity
                }
            };
            if notify {
                state.last_notified = value;
            }
            notify
        };

        if notify {
            self.notify();
        }
        Ok(())
    }

    pub fn set_status_text(&self, text: impl Into<String>) {
        let text = text.into();
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            if state.status_text == text {
                false
            } else {
                state.status_text = text;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    pub fn complete(&self, result: Value) -> Result<(), TaskError> {
        self.settle(Ok(result))
    }

    pub fn fail(&self, error: impl Into<TaskError>) -> Result<(), TaskError> {
        self.settle(Err(error.into()))
    }

    fn settle(&self, outcome: TaskOutcome) -> Result<(), TaskError> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.children.is_some() {
                return Err(TaskError::InvalidArgument(
                    "compound tasks settle through their children".to_string(),
                ));
            }
            if state.outcome.is_some() {
                return Err(TaskError::AlreadySettled(state.id.clone()));
            }
            match &outcome {
                Ok(_) => {
                    state.status = TaskStatus::Completed;
                    state.completion = Some(1.0);
                    state.last_notified = Some(1.0);
                    debug!(task_id = %state.id, "Task completed");
                }
                Err(e) => {
                    state.status = TaskStatus::Failed;
                    debug!(task_id = %state.id, error = %e, "Task failed");
                }
            }
            state.outcome = Some(outcome);
        }
        self.notify();
        self.fire_settled();
        Ok(())
    }

    // --- Control ---

    /// Reference-counted pause. Only the first pause of a running task is
    /// forwarded to the runner.
    pub fn pause(&self) -> Result<(), TaskError> {
        let running = self.status() == TaskStatus::Running;
        let first = self.pause_depth() == 0;

        if first && running {
            self.forward(Operation::Pause)?;
            {
                let mut state = self.inner.state.borrow_mut();
                state.pause_depth += 1;
                state.pause_forwarded = true;
                if state.children.is_none() {
                    state.status = TaskStatus::Paused;
                }
            }
            debug!(task_id = %self.id(), "Task paused");
            self.notify();
        } else {
            self.inner.state.borrow_mut().pause_depth += 1;
        }
        Ok(())
    }

    pub fn unpause(&self) -> Result<(), TaskError> {
        let (depth, forwarded) = {
            let state = self.inner.state.borrow();
            (state.pause_depth, state.pause_forwarded)
        };
        if depth == 0 {
            return Err(TaskError::NotPaused(self.id()));
        }
        if depth > 1 {
            self.inner.state.borrow_mut().pause_depth -= 1;
            return Ok(());
        }

        let resume = forwarded && !self.is_settled();
        if resume {
            self.forward(Operation::Unpause)?;
        }

        let start_pending = {
            let mut state = self.inner.state.borrow_mut();
            state.pause_depth = 0;
            state.pause_forwarded = false;
            if state.status == TaskStatus::Paused {
                state.status = TaskStatus::Running;
            }
            std::mem::take(&mut state.start_pending)
        };
        if resume {
            debug!(task_id = %self.id(), "Task resumed");
            self.notify();
        }

        if start_pending {
            if self.is_settled() {
                // Cancelled while held: nothing left to dispatch.
                self.inner.state.borrow_mut().dispatched = true;
            } else {
                self.invoke()?;
            }
        }
        self.fire_settled();
        Ok(())
    }

    /// Requests cancellation. The task keeps its status until the runner
    /// acknowledges by settling it.
    pub fn cancel(&self) -> Result<(), TaskError> {
        if self.is_settled() {
            return Err(TaskError::AlreadySettled(self.id()));
        }
        self.forward(Operation::Cancel)
    }

    fn forward(&self, operation: Operation) -> Result<(), TaskError> {
        let result = self.with_driver(|driver| match driver {
            Driver::Leaf(runner) => match operation {
                Operation::Pause => runner.as_pausable().map(|p| p.pause(self)),
                Operation::Unpause => runner.as_pausable().map(|p| p.unpause(self)),
                Operation::Cancel => runner.as_cancelable().map(|c| c.cancel(self)),
            },
            Driver::Compound(coordinator) => match operation {
                Operation::Pause => coordinator.as_pausable().map(|p| p.pause(self)),
                Operation::Unpause => coordinator.as_pausable().map(|p| p.unpause(self)),
                Operation::Cancel => coordinator.as_cancelable().map(|c| c.cancel(self)),
            },
            Driver::Inert | Driver::Busy => None,
        });

        match result {
            // Cancellation is a request anyway: it runs once the current call returns.
            None if operation == Operation::Cancel => {
                debug!(task_id = %self.id(), "Task busy, cancel deferred");
                self.inner.state.borrow_mut().cancel_deferred = true;
                Ok(())
            }
            None => Err(TaskError::Busy(self.id())),
            Some(None) => Err(TaskError::NotSupported {
                task: self.id(),
                operation,
            }),
            Some(Some(r)) => r.map_err(TaskError::from),
        }
    }
}

pub(crate) fn aggregate_status(statuses: impl Iterator<Item = TaskStatus>) -> TaskStatus {
    let present: Vec<TaskStatus> = statuses.collect();
    TaskStatus::PRIORITY
        .into_iter()
        .find(|s| present.contains(s))
        .unwrap_or(TaskStatus::Waiting)
}

pub(crate) fn aggregate_completion(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value?;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Invokes `then` once every task in `tasks` has settled, whatever the outcome.
pub fn when_all_settled(tasks: &[Task], then: impl FnOnce() + 'static) {
    if tasks.is_empty() {
        then();
        return;
    }

    let remaining = Rc::new(Cell::new(tasks.len()));
    let then: Rc<RefCell<Option<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Some(Box::new(then))));

    for task in tasks {
        let remaining = remaining.clone();
        let then = then.clone();
        task.on_settled(move |_| {
            let left = remaining.get() - 1;
            remaining.set(left);
            if left == 0 {
                let then = then.borrow_mut().take();
                if let Some(then) = then {
                    then();
                }
            }
        });
    }
}
