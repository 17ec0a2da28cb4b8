//! Hand-off from background threads to the UI thread.
//!
//! Everything that touches the document runs on the single consumer of a
//! [`UiQueue`]. Producers (the PTY reader thread, the scraper task) only
//! ever `post`, which never blocks: the channel is unbounded, so a producer
//! holding the terminal model lock can't wait on a UI thread that is itself
//! waiting for that lock.

use tokio::sync::mpsc;

use crate::scraper::StyledOutput;

/// Notifications the UI thread reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A fresh snapshot of the running command's output.
    OutputChanged(StyledOutput),
    CommandStarted {
        command: Option<String>,
        prompt: Option<String>,
        /// Model epoch the command's output is recorded in.
        epoch: u64,
    },
    CommandFinished {
        exit_code: i32,
        /// Last snapshot taken before the model was reset.
        output: StyledOutput,
    },
    /// The shell cleared the screen and scrollback.
    Cleared,
    AlternateBufferChanged(bool),
    /// The shell process went away.
    Terminated,
    /// The session was disposed; nothing else will arrive.
    Disposed,
}

pub enum UiTask {
    Event(UiEvent),
    Invoke(Box<dyn FnOnce() + Send>),
}

impl std::fmt::Debug for UiTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiTask::Event(event) => f.debug_tuple("Event").field(event).finish(),
            UiTask::Invoke(_) => f.write_str("Invoke(..)"),
        }
    }
}

/// Producer side. Cheap to clone; safe to use from any thread.
#[derive(Debug, Clone)]
pub struct UiDispatcher {
    tx: mpsc::UnboundedSender<UiTask>,
}

/// Consumer side, owned by the UI thread.
#[derive(Debug)]
pub struct UiQueue {
    rx: mpsc::UnboundedReceiver<UiTask>,
}

pub fn ui_channel() -> (UiDispatcher, UiQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiDispatcher { tx }, UiQueue { rx })
}

impl UiDispatcher {
    /// Queue an event. Returns `false` if the UI side is gone.
    pub fn post(&self, event: UiEvent) -> bool {
        self.tx.send(UiTask::Event(event)).is_ok()
    }

    /// Run `f` on the UI thread after everything already queued.
    pub fn invoke_later<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(UiTask::Invoke(Box::new(f))).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl UiQueue {
    /// Next task without waiting.
    pub fn try_next(&mut self) -> Option<UiTask> {
        self.rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<UiTask> {
        self.rx.recv().await
    }
}
