//! The running shell.
//!
//! `TerminalSession` owns the transport, the terminal model, the scraper
//! and the reader thread. The reader thread is the only writer of the
//! model: it decodes PTY bytes, turns shell-integration markers into
//! command lifecycle notifications and keeps the type-ahead predictions in
//! step with the echo. Everything meant for the UI leaves through the
//! [`UiDispatcher`].

pub mod connector;
pub mod ready;

use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use connector::{PtyConnector, TtyConnector};
pub use ready::{Readiness, ReadySignal};

use crate::config::SessionConfig;
use crate::context::ContextKey;
use crate::dispatch::{ui_channel, UiDispatcher, UiEvent, UiQueue};
use crate::error::SessionError;
use crate::listeners::{ListenerId, ListenerList};
use crate::scraper::OutputScraper;
use crate::term::integration::command_from_input;
use crate::term::{ShellIntegration, ShellSignal, TermSize, TerminalModel};
use crate::typeahead::{Prediction, TypeAheadPredictor};

/// Ctrl+U: erase whatever was typed on the prompt line.
const CLEAR_LINE: char = '\u{15}';

const READ_BUFFER: usize = 4096;

const DEBOUNCE_TICK: Duration = Duration::from_millis(50);

/// Command lifecycle, reported on the reader thread.
pub trait ShellCommandListener: Send + Sync {
    fn command_started(&self, _command: Option<&str>, _prompt: Option<&str>) {}

    /// Called before the model is reset, so the output is still readable.
    fn command_finished(&self, _exit_code: i32) {}

    fn clear_invoked(&self) {}
}

pub trait TerminalModelListener: Send + Sync {
    fn on_alternate_buffer_changed(&self, enabled: bool);
}

/// Outcome of a request queued against the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Nothing to do (e.g. resize to the current size).
    Skipped,
    /// The session was disposed, or the transport failed.
    NoTransport,
}

pub struct TerminalSession {
    shared: Arc<Shared>,
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    config: SessionConfig,
    model: TerminalModel,
    scraper: OutputScraper,
    dispatcher: UiDispatcher,
    ready: ReadySignal<Arc<Transport>>,
    started: AtomicBool,
    disposed: AtomicBool,
    command_listeners: ListenerList<dyn ShellCommandListener>,
    model_listeners: ListenerList<dyn TerminalModelListener>,
    termination_callbacks: ListenerList<dyn Fn() + Send + Sync>,
    predictor: Mutex<TypeAheadPredictor>,
    /// Last text sent through `send_command_to_execute`; labels the next
    /// block when the echo can't be recovered.
    sent_command: Mutex<Option<String>>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("model", &self.shared.model)
            .field("started", &self.shared.started.load(Ordering::Relaxed))
            .field("disposed", &self.shared.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl TerminalSession {
    pub const KEY: ContextKey<Arc<TerminalSession>> = ContextKey::new("TerminalSession");

    /// Build a session on the current tokio runtime. The returned queue is
    /// the UI side of the session and belongs to the UI thread.
    pub fn new(config: SessionConfig) -> Result<(Self, UiQueue), SessionError> {
        let handle = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let model = TerminalModel::new(config.size(), config.scrollback_lines);
        let scraper = OutputScraper::new(model.clone());
        let (dispatcher, queue) = ui_channel();
        let predictor = TypeAheadPredictor::new(&config.typeahead);

        let shared = Arc::new(Shared {
            config,
            model,
            scraper,
            dispatcher,
            ready: ReadySignal::new(),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            command_listeners: ListenerList::new(),
            model_listeners: ListenerList::new(),
            termination_callbacks: ListenerList::new(),
            predictor: Mutex::new(predictor),
            sent_command: Mutex::new(None),
        });

        let session = Self {
            shared,
            handle,
            tasks: Mutex::new(Vec::new()),
        };
        Ok((session, queue))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn model(&self) -> &TerminalModel {
        &self.shared.model
    }

    pub fn scraper(&self) -> &OutputScraper {
        &self.shared.scraper
    }

    pub fn dispatcher(&self) -> &UiDispatcher {
        &self.shared.dispatcher
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Attach the transport and start the reader thread. Only the first
    /// successful call counts; a failed start leaves the session unstarted
    /// and can be retried with another connector.
    pub fn start(&self, connector: Box<dyn TtyConnector>) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        // Watch the model before the reader thread can change it.
        let mut tasks = Vec::with_capacity(2);
        if let Some(task) = self
            .shared
            .scraper
            .spawn(&self.handle, self.shared.config.scrape_interval())
        {
            tasks.push(task);
        }
        if self.shared.config.typeahead.enabled {
            tasks.push(self.spawn_debounce_tick());
        }

        let transport = match self.spawn_reader(connector) {
            Ok(transport) => transport,
            Err(err) => {
                tasks.iter().for_each(JoinHandle::abort);
                self.shared.started.store(false, Ordering::SeqCst);
                tracing::warn!(error = %err, "terminal session failed to start");
                return Err(err);
            }
        };
        self.tasks.lock().extend(tasks);

        self.shared.ready.resolve(transport);
        tracing::info!(size = ?self.shared.model.size(), "terminal session started");
        Ok(())
    }

    /// Resize the transport and the model once the transport is ready.
    /// Resolves to `Skipped` when the size doesn't change.
    pub fn post_resize(&self, size: TermSize) -> JoinHandle<Delivery> {
        let shared = self.shared.clone();
        self.handle.spawn(async move {
            let Some(transport) = shared.ready.wait().await else {
                return Delivery::NoTransport;
            };
            if shared.model.size() == size {
                return Delivery::Skipped;
            }
            shared.predictor.lock().on_resize();
            if let Err(err) = transport.resize(size) {
                tracing::warn!(error = %err, "resize failed");
                return Delivery::NoTransport;
            }
            shared.model.resize(size);
            tracing::debug!(?size, "terminal resized");
            Delivery::Delivered
        })
    }

    /// Clear the prompt line, then type `command` followed by Enter.
    pub fn send_command_to_execute(&self, command: &str) -> JoinHandle<Delivery> {
        let command = command.trim_end_matches(&['\r', '\n'][..]);
        *self.shared.sent_command.lock() = Some(command.trim().to_string()).filter(|c| !c.is_empty());

        let mut payload = String::with_capacity(command.len() + 3);
        payload.push(CLEAR_LINE);
        payload.push_str(command);
        payload.push_str(connector::line_ending());
        self.write_when_ready(payload)
    }

    /// Forward keystrokes, predicting their echo.
    pub fn type_keys(&self, text: &str) -> JoinHandle<Delivery> {
        if self.shared.started.load(Ordering::SeqCst) && !self.shared.model.is_alternate_screen() {
            let (_, column) = self.shared.model.cursor_line();
            self.shared
                .predictor
                .lock()
                .on_key_typed(text, column, Instant::now());
        }
        self.write_when_ready(text.to_string())
    }

    /// Predicted characters not yet confirmed by the shell.
    pub fn predictions(&self) -> Vec<Prediction> {
        self.shared.predictor.lock().overlay()
    }

    pub fn add_command_listener(&self, listener: Arc<dyn ShellCommandListener>) -> ListenerId {
        self.shared.command_listeners.add(listener)
    }

    pub fn remove_command_listener(&self, id: ListenerId) -> bool {
        self.shared.command_listeners.remove(id)
    }

    pub fn add_model_listener(&self, listener: Arc<dyn TerminalModelListener>) -> ListenerId {
        self.shared.model_listeners.add(listener)
    }

    pub fn remove_model_listener(&self, id: ListenerId) -> bool {
        self.shared.model_listeners.remove(id)
    }

    /// `callback` runs on the UI thread once the shell has gone away and the
    /// transport is closed.
    pub fn add_termination_callback<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.termination_callbacks.add(Arc::new(callback))
    }

    pub fn remove_termination_callback(&self, id: ListenerId) -> bool {
        self.shared.termination_callbacks.remove(id)
    }

    /// Tear the session down. Pending transport requests resolve to
    /// `NoTransport`, the scraper stops and the transport is closed.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = self.shared.ready.dispose() {
            transport.close();
        }
        self.shared.model.dispose();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.dispatcher.post(UiEvent::Disposed);
        tracing::info!("terminal session disposed");
    }

    fn spawn_reader(
        &self,
        mut connector: Box<dyn TtyConnector>,
    ) -> Result<Arc<Transport>, SessionError> {
        let reader = connector.take_reader()?;
        let transport = Arc::new(Transport::new(connector));

        let shared = self.shared.clone();
        let reader_transport = transport.clone();
        let spawned = std::thread::Builder::new()
            .name("blockterm-reader".to_string())
            .spawn(move || {
                ReaderLoop::new(shared, reader_transport).run(reader);
            });
        if let Err(err) = spawned {
            transport.close();
            return Err(err.into());
        }
        Ok(transport)
    }

    fn write_when_ready(&self, payload: String) -> JoinHandle<Delivery> {
        let ready = self.shared.ready.clone();
        self.handle.spawn(async move {
            let Some(transport) = ready.wait().await else {
                return Delivery::NoTransport;
            };
            match transport.write(payload.as_bytes()) {
                Ok(()) => Delivery::Delivered,
                Err(err) => {
                    tracing::warn!(error = %err, "write to transport failed");
                    Delivery::NoTransport
                }
            }
        })
    }

    fn spawn_debounce_tick(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(DEBOUNCE_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.predictor.lock().debounce(Instant::now()) {
                    tracing::trace!("stale type-ahead predictions cleared");
                }
            }
        })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The connector behind a lock, closed at most once.
struct Transport {
    connector: Mutex<Box<dyn TtyConnector>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Transport {
    fn new(connector: Box<dyn TtyConnector>) -> Self {
        Self {
            connector: Mutex::new(connector),
            closed: AtomicBool::new(false),
        }
    }

    fn write(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("transport closed");
        }
        self.connector.lock().write(bytes)
    }

    fn resize(&self, size: TermSize) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("transport closed");
        }
        self.connector.lock().resize(size)
    }

    /// Failures here are expected (the shell may already be gone) and only logged.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.connector.lock().close() {
            tracing::debug!(error = %err, "closing transport failed");
        }
    }
}

/// State owned by the reader thread.
struct ReaderLoop {
    shared: Arc<Shared>,
    transport: Arc<Transport>,
    integration: ShellIntegration,
    prompt: Option<String>,
    running: bool,
}

impl ReaderLoop {
    fn new(shared: Arc<Shared>, transport: Arc<Transport>) -> Self {
        Self {
            shared,
            transport,
            integration: ShellIntegration::new(),
            prompt: None,
            running: false,
        }
    }

    fn run(mut self, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; READ_BUFFER];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.process(&buf[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "PTY read ended");
                    break;
                }
            }
        }
        self.terminate();
    }

    fn process(&mut self, chunk: &[u8]) {
        let model = self.shared.model.clone();
        let mut fed = 0;
        for (end, signal) in self.integration.feed(chunk) {
            model.process_bytes(&chunk[fed..end]);
            fed = end;
            self.on_signal(signal);
        }
        model.process_bytes(&chunk[fed..]);

        for reply in model.take_replies() {
            if let Err(err) = self.transport.write(reply.as_bytes()) {
                tracing::debug!(error = %err, "terminal reply dropped");
            }
        }

        let mut predictor = self.shared.predictor.lock();
        if predictor.has_pending() {
            let (line, column) = model.cursor_line();
            predictor.reconcile(&line, column);
        }
    }

    fn on_signal(&mut self, signal: ShellSignal) {
        match signal {
            ShellSignal::PromptStart => {}
            ShellSignal::CommandStart => {
                let prompt = self.shared.model.text_to_cursor();
                self.prompt = (!prompt.trim().is_empty()).then_some(prompt);
            }
            ShellSignal::CommandExecuted => self.command_started(),
            ShellSignal::CommandFinished { exit_code } => self.command_finished(exit_code),
            ShellSignal::CommandLine(_) => {}
            ShellSignal::Cwd(cwd) => tracing::debug!(%cwd, "working directory changed"),
            ShellSignal::AlternateBuffer(enabled) => {
                self.shared
                    .predictor
                    .lock()
                    .on_alternate_buffer_changed(enabled);
                for listener in self.shared.model_listeners.snapshot() {
                    listener.on_alternate_buffer_changed(enabled);
                }
            }
            ShellSignal::Cleared => {
                for listener in self.shared.command_listeners.snapshot() {
                    listener.clear_invoked();
                }
            }
        }
    }

    fn command_started(&mut self) {
        if self.running {
            // No end marker for the previous command (interrupted integration).
            let exit_code = self.integration.state().last_exit.unwrap_or(0);
            self.command_finished(exit_code);
        }

        let sent = self.shared.sent_command.lock().take();
        let command = self
            .integration
            .take_reported_command()
            .or_else(|| command_from_input(&self.shared.model.plain_text(), self.prompt.as_deref()))
            .or(sent);
        let prompt = self.prompt.take();

        self.shared.predictor.lock().on_command_changed();
        let epoch = self.shared.model.clear_all();
        self.running = true;
        tracing::debug!(?command, epoch, "command started");

        for listener in self.shared.command_listeners.snapshot() {
            listener.command_started(command.as_deref(), prompt.as_deref());
        }
    }

    fn command_finished(&mut self, exit_code: i32) {
        if !self.running {
            return;
        }
        self.running = false;
        tracing::debug!(exit_code, "command finished");

        for listener in self.shared.command_listeners.snapshot() {
            listener.command_finished(exit_code);
        }
        self.shared.model.clear_all();
    }

    fn terminate(self) {
        self.transport.close();
        self.shared.model.dispose();

        let callbacks = self.shared.termination_callbacks.snapshot();
        for callback in callbacks {
            self.shared.dispatcher.invoke_later(move || callback());
        }
        self.shared.dispatcher.post(UiEvent::Terminated);
        tracing::info!("shell terminated");
    }
}
