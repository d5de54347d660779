use tokio::sync::{mpsc, watch};

/// Progress report sent from running work back to the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Completion(Option<f64>),
    StatusText(String),
}

/// 运行时上下文 (Job Context)
/// Handed to off-thread work. It is `Send` and cheap to clone: updates are
/// queued and applied to the owning task on the control thread.
#[derive(Clone)]
pub struct JobContext {
    updates: mpsc::UnboundedSender<Update>,
    paused: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(updates: mpsc::UnboundedSender<Update>, paused: watch::Receiver<bool>) -> Self {
        Self { updates, paused }
    }

    /// Reports a completion ratio. Values are clamped to `[0, 1]`.
    pub fn progress(&self, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let _ = self.updates.send(Update::Completion(Some(value)));
    }

    pub fn clear_progress(&self) {
        let _ = self.updates.send(Update::Completion(None));
    }

    pub fn status(&self, text: impl Into<String>) {
        let _ = self.updates.send(Update::StatusText(text.into()));
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns immediately unless the task is paused, in which case it waits
    /// for the resume.
    pub async fn checkpoint(&self) {
        let mut paused = self.paused.clone();
        // A dropped sender means the task is gone; nothing left to wait for.
        let _ = paused.wait_for(|p| !*p).await;
    }
}
