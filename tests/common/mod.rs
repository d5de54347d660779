#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use mediaflow::runtime::error::TaskError;
use mediaflow::runtime::runner::{Cancelable, Pausable, Runner};
use mediaflow::runtime::task::Task;

/// Shared log of the calls a [`ManualRunner`] received.
#[derive(Clone, Default)]
pub struct Calls(Rc<RefCell<Vec<&'static str>>>);

impl Calls {
    pub fn push(&self, call: &'static str) {
        self.0.borrow_mut().push(call);
    }

    pub fn get(&self) -> Vec<&'static str> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.borrow().iter().filter(|c| **c == call).count()
    }
}

/// Runner driven by hand from the test body.
#[derive(Default)]
pub struct ManualRunner {
    pub calls: Calls,
    pub pausable: bool,
    pub cancelable: bool,
    pub fail_start: bool,
}

impl ManualRunner {
    pub fn new(calls: &Calls) -> Self {
        Self {
            calls: calls.clone(),
            ..Default::default()
        }
    }

    pub fn pausable(mut self) -> Self {
        self.pausable = true;
        self
    }

    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl Runner for ManualRunner {
    fn start(&mut self, _task: &Task) -> anyhow::Result<()> {
        self.calls.push("start");
        if self.fail_start {
            anyhow::bail!("runner refused to start");
        }
        Ok(())
    }

    fn as_pausable(&mut self) -> Option<&mut dyn Pausable> {
        if self.pausable { Some(self) } else { None }
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        if self.cancelable { Some(self) } else { None }
    }
}

impl Pausable for ManualRunner {
    fn pause(&mut self, _task: &Task) -> anyhow::Result<()> {
        self.calls.push("pause");
        Ok(())
    }

    fn unpause(&mut self, _task: &Task) -> anyhow::Result<()> {
        self.calls.push("unpause");
        Ok(())
    }
}

impl Cancelable for ManualRunner {
    fn cancel(&mut self, task: &Task) -> anyhow::Result<()> {
        self.calls.push("cancel");
        task.fail(TaskError::Cancelled)?;
        Ok(())
    }
}

pub fn manual(name: &str) -> (Task, Calls) {
    let calls = Calls::default();
    (Task::new(name, ManualRunner::new(&calls)), calls)
}

/// Counts observer notifications.
pub fn count_notifications(task: &Task) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    task.add_observer(move |_| c.set(c.get() + 1));
    count
}

/// Factory for the `record` implementation: each runner appends its `label`
/// param to a shared log when started, then completes unless `hold` is set.
pub struct RecordFactory {
    pub log: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl RecordFactory {
    pub fn new() -> Self {
        Self { log: Default::default() }
    }

    pub fn started(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl mediaflow::runtime::runner::RunnerFactory for RecordFactory {
    fn name(&self) -> &str {
        "record"
    }

    fn validate(&self, params: &serde_json::Value) -> anyhow::Result<()> {
        if params.get("label").and_then(|v| v.as_str()).is_none() {
            anyhow::bail!("Missing required parameter: label");
        }
        Ok(())
    }

    fn create(
        &self,
        _asset: &mediaflow::trigger::Asset,
        params: &serde_json::Value,
    ) -> anyhow::Result<Box<dyn Runner>> {
        Ok(Box::new(RecordRunner {
            label: params["label"].as_str().unwrap_or_default().to_string(),
            hold: params.get("hold").and_then(|v| v.as_bool()).unwrap_or(false),
            log: self.log.clone(),
        }))
    }
}

pub struct RecordRunner {
    label: String,
    hold: bool,
    log: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl Runner for RecordRunner {
    fn start(&mut self, task: &Task) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.label.clone());
        if !self.hold {
            task.complete(serde_json::Value::String(self.label.clone()))?;
        }
        Ok(())
    }

    fn as_cancelable(&mut self) -> Option<&mut dyn Cancelable> {
        Some(self)
    }
}

impl Cancelable for RecordRunner {
    fn cancel(&mut self, task: &Task) -> anyhow::Result<()> {
        task.fail(TaskError::Cancelled)?;
        Ok(())
    }
}

/// Resolves with the outcome of a leaf task once it settles.
pub async fn settled(task: &Task) -> mediaflow::runtime::task::TaskOutcome {
    let (tx, rx) = tokio::sync::oneshot::channel();
    task.on_settled(move |t| {
        let _ = tx.send(t.outcome());
    });
    rx.await
        .expect("task dropped before settling")
        .expect("settled task without outcome")
}
