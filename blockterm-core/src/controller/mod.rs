//! Output controller.
//!
//! Runs on the UI thread and is the only writer of the [`OutputModel`].
//! It opens a block when a command starts, keeps replacing the block's
//! output with the latest scraped snapshot while the command runs, and on
//! finish trims the trailing prompt line, drops blank blocks and marks
//! failed ones.
//!
//! ```text
//!            start                    alt screen on
//!   Idle ─────────────▶ CommandRunning ────────────▶ Suspended
//!    ▲                    │     ▲                       │
//!    └──── finish ────────┘     └──── alt screen off ───┘
//! ```
//!
//! Snapshots reach the controller only through its [`UiQueue`]; nothing on
//! a background thread ever touches the document.

mod forwarder;
mod scope;

use std::rc::Rc;
use std::sync::Arc;

pub use scope::{InputRouter, ListenerScope};

use self::forwarder::UiForwarder;
use crate::blocks::{
    BlockId, BlockSection, CommandBlock, DecorationState, DocumentListener, HighlightStyle,
    Highlighting, OutputModel,
};
use crate::context::ContextKey;
use crate::dispatch::{UiDispatcher, UiEvent, UiQueue, UiTask};
use crate::error::OutputError;
use crate::listeners::ListenerId;
use crate::scraper::{OutputScraper, StyledOutput};
use crate::session::TerminalSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No open block.
    Idle,
    CommandRunning,
    /// A full-screen program owns the terminal; the block is left alone.
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollRequest {
    /// Keep the caret visible, biased towards the lower part of the view.
    CaretCenterDown,
    Bottom,
}

/// What the host view should show. The controller only records requests;
/// the host applies them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewport {
    pub caret: usize,
    pub scroll_request: Option<ScrollRequest>,
    /// Set once the host surface is gone; later snapshots are dropped.
    pub disposed: bool,
}

pub struct OutputController {
    model: OutputModel,
    scraper: OutputScraper,
    queue: UiQueue,
    forwarder: Arc<UiForwarder>,
    router: Option<Rc<dyn InputRouter>>,
    scope: Option<ListenerScope>,
    state: ControllerState,
    /// Model epoch the open block records output from.
    block_epoch: Option<u64>,
    viewport: Viewport,
    terminated: bool,
}

impl std::fmt::Debug for OutputController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputController")
            .field("state", &self.state)
            .field("blocks", &self.model.blocks_len())
            .field("block_epoch", &self.block_epoch)
            .field("viewport", &self.viewport)
            .finish()
    }
}

impl OutputController {
    pub const KEY: ContextKey<OutputController> = ContextKey::new("OutputController");

    /// A controller fed by `scraper`. `dispatcher` must be the producer side
    /// of `queue`.
    pub fn new(scraper: OutputScraper, dispatcher: UiDispatcher, queue: UiQueue) -> Self {
        let forwarder = Arc::new(UiForwarder::new(dispatcher, scraper.clone()));
        Self {
            model: OutputModel::new(),
            scraper,
            queue,
            forwarder,
            router: None,
            scope: None,
            state: ControllerState::Idle,
            block_epoch: None,
            viewport: Viewport::default(),
            terminated: false,
        }
    }

    /// A controller driven by `session`'s command lifecycle.
    pub fn for_session(session: &TerminalSession, queue: UiQueue) -> Self {
        let controller = Self::new(session.scraper().clone(), session.dispatcher().clone(), queue);
        session.add_command_listener(controller.forwarder.clone());
        session.add_model_listener(controller.forwarder.clone());
        controller
    }

    pub fn output_model(&self) -> &OutputModel {
        &self.model
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn take_scroll_request(&mut self) -> Option<ScrollRequest> {
        self.viewport.scroll_request.take()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Scope of the listeners installed for the running block, if any.
    pub fn current_scope(&self) -> Option<&ListenerScope> {
        self.scope.as_ref()
    }

    /// Takes effect from the next listener installation.
    pub fn set_input_router(&mut self, router: Rc<dyn InputRouter>) {
        self.router = Some(router);
    }

    pub fn add_document_listener(&self, listener: Arc<dyn DocumentListener>) -> ListenerId {
        self.model.add_document_listener(listener)
    }

    pub fn remove_document_listener(&self, id: ListenerId) -> bool {
        self.model.remove_document_listener(id)
    }

    // ────────────────────────────────────────────────────────────────
    // Block lifecycle
    // ────────────────────────────────────────────────────────────────

    /// Open a block for `command`, rendered as `prompt` + `command` on one
    /// line. The returned scope is closed by [`finish_command_block`].
    ///
    /// The terminal model is reset first, so the block only ever shows
    /// output written after this call. Events from a session reset the
    /// model on the reader thread instead and don't come through here.
    ///
    /// [`finish_command_block`]: Self::finish_command_block
    pub fn start_command_block(
        &mut self,
        command: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<ListenerScope, OutputError> {
        if let Some(open) = self.model.active_block() {
            return Err(OutputError::BlockStillOpen(open.id));
        }
        let epoch = self.scraper.model().clear_all();
        self.start_block(command, prompt, epoch)
    }

    /// Model epoch the open block accepts snapshots from.
    pub fn block_epoch(&self) -> Option<u64> {
        self.block_epoch
    }

    /// Close the open block: flush the final output, strip the trailing
    /// empty prompt line, then drop the block if it is blank or mark it
    /// failed on a non-zero exit code.
    pub fn finish_command_block(&mut self, exit_code: i32) -> Result<(), OutputError> {
        self.close_running_listeners();
        let output = self.scraper.scrape_output();
        self.finish_block(exit_code, Some(output))
    }

    /// Close the last block and start a fresh line below it.
    pub fn insert_empty_line(&mut self) {
        self.close_running_listeners();
        self.model.close_last_block();
        self.model.append_line_break();
        self.state = ControllerState::Idle;
        self.block_epoch = None;
        self.viewport.caret = self.model.document().len();
        self.viewport.scroll_request = Some(ScrollRequest::Bottom);
    }

    pub fn on_alternate_buffer_changed(&mut self, enabled: bool) -> Result<(), OutputError> {
        match (self.state, enabled) {
            (ControllerState::CommandRunning, true) => {
                self.close_running_listeners();
                self.state = ControllerState::Suspended;
                tracing::debug!("alternate buffer on; block updates suspended");
            }
            (ControllerState::Suspended, false) => {
                let Some(id) = self.model.active_block().map(|b| b.id) else {
                    self.state = ControllerState::Idle;
                    return Ok(());
                };
                self.install_running_listeners(id);
                self.state = ControllerState::CommandRunning;
                tracing::debug!("alternate buffer off; resyncing block");
                // Snapshots were dropped while suspended; catch up in one go.
                let output = self.scraper.scrape_output();
                self.apply_output(output)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn clear_blocks(&mut self) {
        self.close_running_listeners();
        self.model.clear_blocks();
        self.state = ControllerState::Idle;
        self.block_epoch = None;
        self.viewport.caret = 0;
    }

    /// The host surface went away: stop listening and ignore further output.
    pub fn dispose(&mut self) {
        self.close_running_listeners();
        self.state = ControllerState::Idle;
        self.viewport.disposed = true;
    }

    // ────────────────────────────────────────────────────────────────
    // Event pump
    // ────────────────────────────────────────────────────────────────

    /// Apply everything queued so far without waiting. Returns the number of
    /// tasks run.
    pub fn pump(&mut self) -> usize {
        let mut count = 0;
        while let Some(task) = self.queue.try_next() {
            self.run_task(task);
            count += 1;
        }
        count
    }

    /// Apply queued tasks until the shell terminates or the session is
    /// disposed.
    pub async fn run(&mut self) {
        while let Some(task) = self.queue.next().await {
            let last = matches!(
                task,
                UiTask::Event(UiEvent::Terminated | UiEvent::Disposed)
            );
            self.run_task(task);
            if last {
                break;
            }
        }
    }

    pub fn handle_event(&mut self, event: UiEvent) -> Result<(), OutputError> {
        match event {
            UiEvent::OutputChanged(output) => {
                if self.state == ControllerState::CommandRunning {
                    self.apply_output(output)?;
                }
            }
            UiEvent::CommandStarted {
                command,
                prompt,
                epoch,
            } => {
                if self.state != ControllerState::Idle {
                    tracing::warn!("command started before the previous one finished");
                    self.finish_block(0, None)?;
                }
                self.start_block(command.as_deref(), prompt.as_deref(), epoch)?;
            }
            UiEvent::CommandFinished { exit_code, output } => {
                if self.state == ControllerState::Idle {
                    tracing::trace!(exit_code, "finish without an open block ignored");
                } else {
                    self.finish_block(exit_code, Some(output))?;
                }
            }
            UiEvent::Cleared => self.clear_blocks(),
            UiEvent::AlternateBufferChanged(enabled) => self.on_alternate_buffer_changed(enabled)?,
            UiEvent::Terminated => {
                self.close_running_listeners();
                self.terminated = true;
            }
            UiEvent::Disposed => self.dispose(),
        }
        Ok(())
    }

    fn run_task(&mut self, task: UiTask) {
        match task {
            UiTask::Invoke(f) => f(),
            UiTask::Event(event) => {
                if let Err(err) = self.handle_event(event) {
                    tracing::error!(error = %err, "failed to apply terminal event");
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────

    fn start_block(
        &mut self,
        command: Option<&str>,
        prompt: Option<&str>,
        epoch: u64,
    ) -> Result<ListenerScope, OutputError> {
        let command = command.filter(|c| !c.is_empty());
        let prompt = prompt.filter(|p| !p.is_empty());
        let id = self.model.create_block(command, prompt)?;

        match (prompt, command) {
            (Some(prompt), Some(command)) => {
                self.model.append_to_block(id, prompt, BlockSection::Prompt)?;
                self.model
                    .append_to_block(id, &format!("{command}\n"), BlockSection::Command)?;
            }
            (Some(prompt), None) => {
                self.model
                    .append_to_block(id, &format!("{prompt}\n"), BlockSection::Prompt)?;
            }
            (None, Some(command)) => {
                self.model
                    .append_to_block(id, &format!("{command}\n"), BlockSection::Command)?;
            }
            (None, None) => {}
        }

        let block = self.model.block(id).ok_or(OutputError::UnknownBlock(id))?;
        let spans = fixed_highlightings(block);
        let end = block.end_offset;
        self.model.put_highlightings(id, spans)?;
        if prompt.is_some() || command.is_some() {
            let first = self.model.blocks_len() == 1;
            self.model.install_decoration(id, first)?;
        }

        self.state = ControllerState::CommandRunning;
        self.block_epoch = Some(epoch);
        self.viewport.caret = end;
        self.viewport.scroll_request = Some(ScrollRequest::CaretCenterDown);
        let scope = self.install_running_listeners(id);
        tracing::debug!(block = %id, ?command, epoch, "block started");

        // Output produced before the listeners were in place.
        let output = self.scraper.scrape_output();
        self.apply_output(output)?;
        Ok(scope)
    }

    fn finish_block(
        &mut self,
        exit_code: i32,
        output: Option<StyledOutput>,
    ) -> Result<(), OutputError> {
        self.close_running_listeners();
        let active = self.model.active_block().map(|b| b.id);
        if let (Some(_), Some(output)) = (active, output) {
            self.apply_output(output)?;
        }
        self.state = ControllerState::Idle;
        self.block_epoch = None;
        let id = active.ok_or(OutputError::NoActiveBlock)?;

        self.model.finish_block(id, exit_code)?;
        self.strip_trailing_blank_line(id)?;

        let blank = self
            .model
            .block_text(id)
            .map_or(true, |text| text.trim().is_empty());
        if blank {
            self.model.remove_block(id)?;
            tracing::debug!(block = %id, "blank block removed");
        } else if exit_code != 0 {
            self.model.add_block_state(id, DecorationState::Error)?;
        }
        self.viewport.caret = self.model.document().len();
        Ok(())
    }

    /// Remove a blank last line (the shell's next, still empty prompt)
    /// together with the line break before it. The break is kept when the
    /// line is the block's first, since it separates the block from the one
    /// before.
    fn strip_trailing_blank_line(&mut self, id: BlockId) -> Result<(), OutputError> {
        let block = self.model.block(id).ok_or(OutputError::UnknownBlock(id))?;
        let (start, end) = (block.start_offset, block.end_offset);
        let document = self.model.document();
        let line_start = document.line_start_at(end).max(start);
        if !document.slice(line_start..end).trim().is_empty() {
            return Ok(());
        }
        let cut = if line_start > start {
            line_start - 1
        } else {
            line_start
        };
        self.model.truncate_block(id, cut)
    }

    /// Replace the open block's output with `output`.
    fn apply_output(&mut self, output: StyledOutput) -> Result<(), OutputError> {
        if self.viewport.disposed {
            tracing::trace!("viewport disposed; snapshot dropped");
            return Ok(());
        }
        if output.alternate {
            return Ok(());
        }
        // After a clear there is no block to write into.
        let Some(block) = self.model.active_block() else {
            return Ok(());
        };
        if self.block_epoch != Some(output.epoch) {
            tracing::trace!(epoch = output.epoch, "stale snapshot dropped");
            return Ok(());
        }
        let id = block.id;
        self.model.replace_output(id, &output.text)?;

        let block = self.model.block(id).ok_or(OutputError::UnknownBlock(id))?;
        let base = block.output_start_offset;
        let end = block.end_offset;
        let mut spans = fixed_highlightings(block);
        spans.extend(output.style_ranges.iter().map(|range| {
            let range = range.shifted(base);
            Highlighting::new(range.start, range.end, HighlightStyle::Output(range.style))
        }));
        self.model.put_highlightings(id, spans)?;

        // zsh prints a lone '%' at startup and erases it right away.
        let visible = output.text.trim();
        if self.model.get_decoration(id).is_none() && !visible.is_empty() && visible != "%" {
            let first = self.model.blocks_len() == 1;
            self.model.install_decoration(id, first)?;
        }

        self.viewport.caret = end;
        self.viewport.scroll_request = Some(ScrollRequest::CaretCenterDown);
        Ok(())
    }

    fn install_running_listeners(&mut self, id: BlockId) -> ListenerScope {
        self.close_running_listeners();
        let scope = ListenerScope::new();

        let listener = self.scraper.add_listener(self.forwarder.clone());
        let scraper = self.scraper.clone();
        scope.defer(move || {
            scraper.remove_listener(listener);
        });

        if let Some(router) = &self.router {
            router.install(id);
            let router = router.clone();
            scope.defer(move || router.uninstall(id));
        }

        self.scope = Some(scope.clone());
        scope
    }

    fn close_running_listeners(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.close();
        }
    }
}

/// Prompt and command spans, in that order. They always come first so the
/// output styles can never recolor them.
fn fixed_highlightings(block: &CommandBlock) -> Vec<Highlighting> {
    let mut spans = Vec::with_capacity(2);
    if let Some(prompt) = &block.prompt {
        spans.push(Highlighting::new(
            block.start_offset,
            block.start_offset + prompt.len(),
            HighlightStyle::Prompt,
        ));
    }
    if let Some(command) = &block.command {
        spans.push(Highlighting::new(
            block.command_start_offset,
            block.command_start_offset + command.len(),
            HighlightStyle::Command,
        ));
    }
    spans
}
