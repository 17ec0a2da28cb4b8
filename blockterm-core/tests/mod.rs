use blockterm_core::blocks::{
    BlockSection, DecorationState, DocumentEvent, DocumentListener, HighlightStyle,
};
use blockterm_core::context::DataContext;
use blockterm_core::controller::{InputRouter, ScrollRequest};
use blockterm_core::dispatch::ui_channel;
use blockterm_core::term::TermColor;
use blockterm_core::{
    BlockId, ControllerState, Delivery, OutputController, OutputError, OutputModel,
    OutputScraper, SessionConfig, SessionError, StyledOutput, TermSize, TerminalModel,
    TerminalSession, TtyConnector, UiEvent,
};
use parking_lot::Mutex;
use std::cell::Cell;
use std::io::Read;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn standalone() -> (TerminalModel, OutputScraper, OutputController) {
    let model = TerminalModel::new(TermSize::new(80, 24), 1000);
    let scraper = OutputScraper::new(model.clone());
    let (dispatcher, queue) = ui_channel();
    let controller = OutputController::new(scraper.clone(), dispatcher, queue);
    (model, scraper, controller)
}

fn doc(controller: &OutputController) -> &str {
    controller.output_model().document().text()
}

/// Snapshot stamped with the open block's epoch.
fn snapshot(controller: &OutputController, text: &str) -> StyledOutput {
    StyledOutput::plain(text, controller.block_epoch().unwrap_or_default())
}

fn output(controller: &mut OutputController, text: &str) {
    let output = snapshot(controller, text);
    controller
        .handle_event(UiEvent::OutputChanged(output))
        .unwrap();
}

fn finish(controller: &mut OutputController, exit_code: i32, text: &str) {
    let output = snapshot(controller, text);
    controller
        .handle_event(UiEvent::CommandFinished { exit_code, output })
        .unwrap();
}

fn assert_offsets_consistent(model: &OutputModel) {
    let len = model.document().len();
    let mut previous_end = 0;
    for block in model.blocks() {
        assert!(block.start_offset <= block.command_start_offset, "{block:?}");
        assert!(block.command_start_offset <= block.output_start_offset, "{block:?}");
        assert!(block.output_start_offset <= block.end_offset, "{block:?}");
        assert!(block.end_offset <= len, "{block:?}");
        assert!(block.start_offset >= previous_end, "{block:?}");
        previous_end = block.end_offset;
    }
}

/// Byte source the test pushes into; ends when every sender is gone.
struct ScriptReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ScriptReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(bytes) => self.pending = bytes,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

#[derive(Clone, Default)]
struct Script {
    tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    resized: Arc<Mutex<Vec<TermSize>>>,
    closed: Arc<AtomicBool>,
}

impl Script {
    fn feed(&self, bytes: &[u8]) {
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send(bytes.to_vec()).unwrap();
        }
    }

    fn finish(&self) {
        self.tx.lock().take();
    }

    fn written(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }
}

struct ScriptedConnector {
    script: Script,
    reader: Option<ScriptReader>,
}

fn scripted() -> (ScriptedConnector, Script) {
    let (tx, rx) = mpsc::channel();
    let script = Script::default();
    *script.tx.lock() = Some(tx);
    let connector = ScriptedConnector {
        script: script.clone(),
        reader: Some(ScriptReader {
            rx,
            pending: Vec::new(),
        }),
    };
    (connector, script)
}

impl TtyConnector for ScriptedConnector {
    fn take_reader(&mut self) -> anyhow::Result<Box<dyn Read + Send>> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| anyhow::anyhow!("reader already taken"))?;
        Ok(Box::new(reader))
    }

    fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.script.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> anyhow::Result<()> {
        self.script.resized.lock().push(size);
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.script.closed.store(true, Ordering::SeqCst);
        self.script.finish();
        Ok(())
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

const LINE_ENDING: &str = if cfg!(windows) { "\r\n" } else { "\n" };

// ============================================================================
// SessionConfig Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = SessionConfig::default();
    assert_eq!(config.size(), TermSize::new(80, 24));
    assert_eq!(config.scrollback_lines, 5000);
    assert_eq!(config.scrape_interval(), Duration::from_millis(10));
    assert!(config.shell.is_none());
    assert!(config.typeahead.enabled);
}

#[test]
fn test_config_partial_json() {
    let config =
        SessionConfig::from_json_str(r#"{"columns": 120, "typeahead": {"debounce_ms": 5000}}"#)
            .unwrap();
    assert_eq!(config.columns, 120);
    assert_eq!(config.rows, 24);
    assert_eq!(config.typeahead.debounce(), Duration::from_millis(5000));
    // The bound never undercuts the quiet period.
    assert_eq!(config.typeahead.max_delay(), Duration::from_millis(5000));
}

#[test]
fn test_config_invalid_json() {
    let err = SessionConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
}

// ============================================================================
// OutputModel Tests
// ============================================================================

#[test]
fn test_create_block_while_open_is_rejected() {
    let mut model = OutputModel::new();
    let open = model.create_block(Some("sleep 1"), None).unwrap();
    match model.create_block(None, None) {
        Err(OutputError::BlockStillOpen(id)) => assert_eq!(id, open),
        other => panic!("expected BlockStillOpen, got {other:?}"),
    }
    model.close_last_block();
    assert!(model.create_block(None, None).is_ok());
    assert_eq!(model.blocks_len(), 2);
}

#[test]
fn test_prompt_and_command_sections() {
    let mut model = OutputModel::new();
    let id = model.create_block(Some("ls"), Some("$ ")).unwrap();
    model.append_to_block(id, "$ ", BlockSection::Prompt).unwrap();
    model.append_to_block(id, "ls\n", BlockSection::Command).unwrap();
    model.replace_output(id, "a\n").unwrap();

    let block = model.block(id).unwrap();
    assert_eq!(block.command_start_offset, 2);
    assert_eq!(block.output_start_offset, 5);
    assert_eq!(model.block_text(id), Some("$ ls\na\n"));
    assert!(model.active_block().is_some());
}

#[test]
fn test_unknown_block_errors() {
    let mut model = OutputModel::new();
    let id = model.create_block(None, None).unwrap();
    model.remove_block(id).unwrap();
    assert!(matches!(model.remove_block(id), Err(OutputError::UnknownBlock(_))));
    assert!(model.last_block().is_none());
}

// ============================================================================
// OutputController Scenarios
// ============================================================================

#[test]
fn test_ls_scenario_from_terminal_model() {
    let (model, scraper, mut controller) = standalone();
    controller.start_command_block(Some("ls -la"), Some("$ ")).unwrap();
    assert_eq!(controller.state(), ControllerState::CommandRunning);

    model.process_bytes(b"file1\r\n");
    assert!(scraper.poll());
    controller.pump();
    assert_eq!(doc(&controller), "$ ls -la\nfile1\n");

    model.process_bytes(b"file2\r\n");
    assert!(scraper.poll());
    controller.pump();
    assert_eq!(doc(&controller), "$ ls -la\nfile1\nfile2\n");

    controller.finish_command_block(0).unwrap();
    assert_eq!(doc(&controller), "$ ls -la\nfile1\nfile2");
    assert_eq!(controller.state(), ControllerState::Idle);

    let block = controller.output_model().last_block().unwrap();
    assert_eq!(block.exit_code, Some(0));
    assert!(!block.is_open());
    let decoration = controller.output_model().get_decoration(block.id).unwrap();
    assert_eq!(decoration.state, DecorationState::Normal);
    assert!(decoration.first_block);
}

#[test]
fn test_each_block_starts_with_fresh_output() {
    let (model, scraper, mut controller) = standalone();

    controller.start_command_block(Some("echo a"), Some("$ ")).unwrap();
    model.process_bytes(b"a\r\n");
    scraper.poll();
    controller.pump();
    controller.finish_command_block(0).unwrap();

    controller.start_command_block(Some("echo b"), Some("$ ")).unwrap();
    model.process_bytes(b"b\r\n");
    scraper.poll();
    controller.pump();
    controller.finish_command_block(0).unwrap();

    assert_eq!(doc(&controller), "$ echo a\na\n$ echo b\nb");
    let model = controller.output_model();
    let second = model.blocks()[1].id;
    assert_eq!(model.block_text(second), Some("$ echo b\nb"));
}

#[test]
fn test_start_while_open_is_rejected() {
    let (model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("sleep 5"), None).unwrap();
    model.process_bytes(b"zzz\r\n");
    let epoch = model.epoch();

    assert!(matches!(
        controller.start_command_block(Some("ls"), None),
        Err(OutputError::BlockStillOpen(_))
    ));
    // The running block's output was left alone.
    assert_eq!(model.epoch(), epoch);
    assert_eq!(controller.output_model().blocks_len(), 1);
}

#[test]
fn test_ls_scenario_from_events() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("ls -la"), Some("$ ")).unwrap();
    output(&mut controller, "file1\n");
    output(&mut controller, "file1\nfile2\n");
    finish(&mut controller, 0, "file1\nfile2\n");
    assert_eq!(doc(&controller), "$ ls -la\nfile1\nfile2");
}

#[test]
fn test_second_block_follows_separator() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("echo a"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "a\n");
    controller.start_command_block(Some("echo b"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "b\n");

    assert_eq!(doc(&controller), "$ echo a\na\n$ echo b\nb");
    let blocks = controller.output_model().blocks();
    assert_eq!(blocks[1].start_offset, blocks[0].end_offset + 1);
    let second = controller.output_model().get_decoration(blocks[1].id).unwrap();
    assert!(!second.first_block);
}

#[test]
fn test_blank_block_leaves_no_trace() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("echo hi"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "hi\n");
    let before = doc(&controller).to_string();

    controller.start_command_block(None, None).unwrap();
    output(&mut controller, "  \n");
    finish(&mut controller, 1, " \n \n");

    assert_eq!(doc(&controller), before);
    assert_eq!(controller.output_model().blocks_len(), 1);
}

#[test]
fn test_blank_first_block_leaves_empty_document() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(None, None).unwrap();
    finish(&mut controller, 0, "\n");
    assert_eq!(doc(&controller), "");
    assert_eq!(controller.output_model().blocks_len(), 0);
}

#[test]
fn test_exit_code_decides_error_decoration() {
    let (_model, _scraper, mut controller) = standalone();

    controller.start_command_block(Some("true"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "ok\n");
    controller.start_command_block(Some("false"), Some("$ ")).unwrap();
    finish(&mut controller, 2, "boom\n");

    let model = controller.output_model();
    let states: Vec<_> = model
        .blocks()
        .iter()
        .map(|b| model.get_decoration(b.id).unwrap().state)
        .collect();
    assert_eq!(states, vec![DecorationState::Normal, DecorationState::Error]);
}

#[test]
fn test_decoration_waits_for_real_output() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(None, None).unwrap();
    let id = controller.output_model().last_block().unwrap().id;
    assert!(controller.output_model().get_decoration(id).is_none());

    output(&mut controller, "%\n");
    assert!(controller.output_model().get_decoration(id).is_none());

    output(&mut controller, "hello\n");
    assert!(controller.output_model().get_decoration(id).is_some());
}

#[test]
fn test_prompt_and_command_spans_come_first() {
    let (model, scraper, mut controller) = standalone();
    controller.start_command_block(Some("ls"), Some("$ ")).unwrap();
    model.process_bytes(b"\x1b[31mred\x1b[0m plain\r\n");
    scraper.poll();
    controller.pump();
    model.process_bytes(b"\x1b[1mbold\x1b[0m\r\n");
    scraper.poll();
    controller.pump();

    let block = controller.output_model().last_block().unwrap();
    let spans = controller.output_model().get_highlightings(block.id).unwrap();
    assert_eq!(spans[0].style, HighlightStyle::Prompt);
    assert_eq!((spans[0].start, spans[0].end), (0, 2));
    assert_eq!(spans[1].style, HighlightStyle::Command);
    assert_eq!((spans[1].start, spans[1].end), (2, 4));
    match spans[2].style {
        HighlightStyle::Output(style) => assert_eq!(style.fg, TermColor::Red),
        other => panic!("expected output style, got {other:?}"),
    }
    assert_eq!(spans[2].start, block.output_start_offset);
    assert!(spans[2..]
        .iter()
        .all(|s| matches!(s.style, HighlightStyle::Output(_))));
}

#[test]
fn test_offsets_stay_ordered() {
    let (_model, _scraper, mut controller) = standalone();
    let cases = [
        (Some("echo a"), "a\n", 0),
        (Some("true"), "", 0),
        (Some("false"), "boom\n\n", 1),
        (None, "   \n", 3),
        (Some("cat"), "x\ny\n", 0),
        (None, "", 0),
    ];
    for (command, text, exit_code) in cases {
        controller.start_command_block(command, Some("$ ")).unwrap();
        assert_offsets_consistent(controller.output_model());
        output(&mut controller, text);
        assert_offsets_consistent(controller.output_model());
        finish(&mut controller, exit_code, text);
        assert_offsets_consistent(controller.output_model());
    }
}

#[test]
fn test_alternate_buffer_drops_then_resyncs() {
    let (model, scraper, mut controller) = standalone();
    controller.start_command_block(Some("vim"), Some("$ ")).unwrap();
    model.process_bytes(b"before\r\n");
    scraper.poll();
    controller.pump();
    assert_eq!(doc(&controller), "$ vim\nbefore\n");

    model.process_bytes(b"\x1b[?1049h");
    controller
        .handle_event(UiEvent::AlternateBufferChanged(true))
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Suspended);

    model.process_bytes(b"full screen app");
    assert!(!scraper.poll());
    // A snapshot already queued when the program took over is dropped.
    output(&mut controller, "late");
    assert_eq!(doc(&controller), "$ vim\nbefore\n");

    model.process_bytes(b"\x1b[?1049lafter\r\n");
    controller
        .handle_event(UiEvent::AlternateBufferChanged(false))
        .unwrap();
    assert_eq!(controller.state(), ControllerState::CommandRunning);
    assert_eq!(doc(&controller), "$ vim\nbefore\nafter\n");

    controller.finish_command_block(0).unwrap();
    assert_eq!(doc(&controller), "$ vim\nbefore\nafter");
}

#[test]
fn test_stale_epoch_snapshot_is_ignored() {
    let (_model, _scraper, mut controller) = standalone();
    controller
        .handle_event(UiEvent::CommandStarted {
            command: Some("make".to_string()),
            prompt: None,
            epoch: 4,
        })
        .unwrap();
    controller
        .handle_event(UiEvent::OutputChanged(StyledOutput::plain(
            "from the previous prompt\n",
            3,
        )))
        .unwrap();
    assert_eq!(doc(&controller), "make\n");

    controller
        .handle_event(UiEvent::OutputChanged(StyledOutput::plain("built\n", 4)))
        .unwrap();
    assert_eq!(doc(&controller), "make\nbuilt\n");
}

#[test]
fn test_clear_removes_everything() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("echo a"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "a\n");
    controller.start_command_block(Some("clear"), Some("$ ")).unwrap();

    controller.handle_event(UiEvent::Cleared).unwrap();
    assert_eq!(doc(&controller), "");
    assert_eq!(controller.state(), ControllerState::Idle);

    // The finish of the cleared command has nothing left to close.
    finish(&mut controller, 0, "");
    output(&mut controller, "ignored");
    assert_eq!(doc(&controller), "");
}

#[test]
fn test_finish_without_block_is_an_error() {
    let (_model, _scraper, mut controller) = standalone();
    assert!(matches!(
        controller.finish_command_block(0),
        Err(OutputError::NoActiveBlock)
    ));
}

#[test]
fn test_disposed_viewport_ignores_output() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("tail -f log"), None).unwrap();
    controller.handle_event(UiEvent::Disposed).unwrap();
    assert!(controller.viewport().disposed);
    assert!(controller.current_scope().is_none());

    output(&mut controller, "line\n");
    assert_eq!(doc(&controller), "tail -f log\n");
}

#[test]
fn test_insert_empty_line() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("sleep 100"), Some("$ ")).unwrap();
    controller.insert_empty_line();

    assert_eq!(doc(&controller), "$ sleep 100\n\n");
    assert!(controller.output_model().active_block().is_none());
    assert_eq!(controller.take_scroll_request(), Some(ScrollRequest::Bottom));
    assert_eq!(controller.take_scroll_request(), None);
}

#[test]
fn test_empty_line_separates_next_block() {
    let (_model, _scraper, mut controller) = standalone();
    controller.start_command_block(Some("sleep 100"), Some("$ ")).unwrap();
    controller.insert_empty_line();
    controller.start_command_block(Some("ls"), Some("$ ")).unwrap();
    finish(&mut controller, 0, "a\n");

    assert_eq!(doc(&controller), "$ sleep 100\n\n$ ls\na");
    assert_offsets_consistent(controller.output_model());
    let blocks = controller.output_model().blocks();
    assert_eq!(blocks[1].start_offset, blocks[0].end_offset + 1);
}

#[derive(Default)]
struct CountingRouter {
    installs: Cell<usize>,
    uninstalls: Cell<usize>,
}

impl InputRouter for CountingRouter {
    fn install(&self, _block: BlockId) {
        self.installs.set(self.installs.get() + 1);
    }

    fn uninstall(&self, _block: BlockId) {
        self.uninstalls.set(self.uninstalls.get() + 1);
    }
}

#[test]
fn test_listener_scope_follows_block_lifetime() {
    let (_model, _scraper, mut controller) = standalone();
    let router = Rc::new(CountingRouter::default());
    controller.set_input_router(router.clone());

    let scope = controller.start_command_block(Some("top"), None).unwrap();
    assert_eq!(router.installs.get(), 1);
    assert!(!scope.is_closed());

    controller.on_alternate_buffer_changed(true).unwrap();
    assert_eq!(router.uninstalls.get(), 1);
    assert!(scope.is_closed());

    controller.on_alternate_buffer_changed(false).unwrap();
    assert_eq!(router.installs.get(), 2);

    controller.finish_command_block(0).unwrap();
    assert_eq!(router.uninstalls.get(), 2);
    assert!(controller.current_scope().is_none());

    scope.close();
    assert_eq!(router.uninstalls.get(), 2);
}

#[derive(Default)]
struct EditRecorder(Mutex<Vec<DocumentEvent>>);

impl DocumentListener for EditRecorder {
    fn document_changed(&self, event: &DocumentEvent) {
        self.0.lock().push(event.clone());
    }
}

#[test]
fn test_document_listener_sees_block_edits() {
    let (_model, _scraper, mut controller) = standalone();
    let recorder = Arc::new(EditRecorder::default());
    controller.add_document_listener(recorder.clone());

    controller.start_command_block(Some("ls"), Some("$ ")).unwrap();
    output(&mut controller, "a\n");
    output(&mut controller, "a\nb\n");

    let edits = recorder.0.lock().clone();
    assert_eq!(edits[0].inserted, "$ ");
    assert_eq!(edits[1].inserted, "ls\n");
    let last = edits.last().unwrap();
    assert_eq!(last.removed, "a\n");
    assert_eq!(last.inserted, "a\nb\n");
}

#[test]
fn test_controller_context_key() {
    let (_model, _scraper, controller) = standalone();
    let mut ctx = DataContext::new();
    ctx.put(&OutputController::KEY, controller);
    let controller = ctx.get_mut(&OutputController::KEY).unwrap();
    controller.start_command_block(Some("pwd"), None).unwrap();
    assert_eq!(controller.output_model().blocks_len(), 1);
}

// ============================================================================
// TerminalSession Tests
// ============================================================================

#[test]
fn test_session_needs_runtime() {
    assert!(matches!(
        TerminalSession::new(SessionConfig::default()),
        Err(SessionError::NoRuntime)
    ));
}

#[tokio::test]
async fn test_dispose_releases_pending_requests() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let send = session.send_command_to_execute("make");
    let resize = session.post_resize(TermSize::new(100, 30));

    session.dispose();

    let send = tokio::time::timeout(Duration::from_secs(1), send).await;
    assert_eq!(send.unwrap().unwrap(), Delivery::NoTransport);
    let resize = tokio::time::timeout(Duration::from_secs(1), resize).await;
    assert_eq!(resize.unwrap().unwrap(), Delivery::NoTransport);
    assert!(session.model().is_disposed());
}

#[tokio::test]
async fn test_start_only_once() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (first, _script) = scripted();
    let (second, _other) = scripted();
    session.start(Box::new(first)).unwrap();
    assert!(matches!(
        session.start(Box::new(second)),
        Err(SessionError::AlreadyStarted)
    ));
    session.dispose();
    assert!(matches!(
        session.start(Box::new(scripted().0)),
        Err(SessionError::Disposed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_before_start_is_delivered_after() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let pending = session.send_command_to_execute("ls -la");

    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    assert_eq!(pending.await.unwrap(), Delivery::Delivered);
    assert_eq!(script.written(), format!("\u{15}ls -la{LINE_ENDING}"));
    session.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resize_skips_same_size() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    let same = session.post_resize(TermSize::new(80, 24)).await.unwrap();
    assert_eq!(same, Delivery::Skipped);

    let bigger = session.post_resize(TermSize::new(120, 40)).await.unwrap();
    assert_eq!(bigger, Delivery::Delivered);
    assert_eq!(session.model().size(), TermSize::new(120, 40));
    assert_eq!(*script.resized.lock(), vec![TermSize::new(120, 40)]);
    session.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scripted_shell_produces_blocks() {
    let (session, queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut controller = OutputController::for_session(&session, queue);
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    script.feed(b"\x1b]133;A\x07$ \x1b]133;B\x07");
    script.feed(b"ls -la\r\n\x1b]133;C\x07");
    script.feed(b"file1\r\n");
    script.feed(b"file2\r\n");
    script.feed(b"\x1b]133;D;0\x07\x1b]133;A\x07$ \x1b]133;B\x07");
    script.feed(b"false\r\n\x1b]133;C\x07");
    script.feed(b"\x1b]133;D;1\x07");
    script.finish();

    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();

    assert!(controller.is_terminated());
    assert_eq!(doc(&controller), "$ ls -la\nfile1\nfile2\n$ false");
    let model = controller.output_model();
    let blocks = model.blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].command.as_deref(), Some("ls -la"));
    assert_eq!(blocks[0].prompt.as_deref(), Some("$ "));
    assert_eq!(model.get_decoration(blocks[0].id).unwrap().state, DecorationState::Normal);
    assert_eq!(blocks[1].exit_code, Some(1));
    assert_eq!(model.get_decoration(blocks[1].id).unwrap().state, DecorationState::Error);
    assert!(script.closed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_screen_program_inside_block() {
    let (session, queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut controller = OutputController::for_session(&session, queue);
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    script.feed(b"\x1b]133;A\x07$ \x1b]133;B\x07less x\r\n\x1b]133;C\x07");
    script.feed(b"before\r\n\x1b[?1049h");
    script.feed(b"\x1b[2Jpage 1 of 9");
    script.feed(b"\x1b[?1049lafter\r\n\x1b]133;D;0\x07");
    script.finish();

    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();

    assert_eq!(doc(&controller), "$ less x\nbefore\nafter");
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sent_command_labels_block_without_echo() {
    let (session, queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut controller = OutputController::for_session(&session, queue);
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    session.send_command_to_execute("make test").await.unwrap();
    // No prompt markers and no echo: only the sent text is known.
    script.feed(b"\x1b]133;C\x07ok\r\n\x1b]133;D;0\x07");
    script.finish();

    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();
    assert_eq!(doc(&controller), "make test\nok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_termination_callback_runs_on_ui_queue() {
    let (session, queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut controller = OutputController::for_session(&session, queue);
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    session.add_termination_callback(move || flag.store(true, Ordering::SeqCst));

    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();
    script.finish();

    assert!(eventually(|| script.closed.load(Ordering::SeqCst)).await);
    // Queued, not run on the reader thread.
    assert!(!ran.load(Ordering::SeqCst));

    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert!(session.model().is_disposed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminal_replies_are_written_back() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    // Cursor position report request.
    script.feed(b"ab\x1b[6n");
    assert!(eventually(|| script.written().contains("\x1b[1;3R")).await);
    session.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_typeahead_confirmed_by_echo() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    let delivered = session.type_keys("ls").await.unwrap();
    assert_eq!(delivered, Delivery::Delivered);
    let predicted: String = session.predictions().iter().map(|p| p.character).collect();
    assert_eq!(predicted, "ls");

    script.feed(b"ls");
    assert!(eventually(|| session.predictions().is_empty()).await);
    session.dispose();
}

#[tokio::test]
async fn test_session_context_key() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut ctx = DataContext::new();
    ctx.put(&TerminalSession::KEY, Arc::new(session));
    let session = ctx.get(&TerminalSession::KEY).unwrap();
    assert!(!session.is_started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_enter_keeps_prompt_only() {
    let (session, queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let mut controller = OutputController::for_session(&session, queue);
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    script.feed(b"\x1b]133;A\x07$ \x1b]133;B\x07\r\n\x1b]133;C\x07\x1b]133;D;0\x07");
    script.finish();
    tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .unwrap();

    let model = controller.output_model();
    assert_eq!(model.blocks_len(), 1);
    assert_eq!(model.blocks()[0].command, None);
    assert_eq!(doc(&controller), "$ ");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resize_drops_predictions() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (connector, _script) = scripted();
    session.start(Box::new(connector)).unwrap();

    session.type_keys("ls").await.unwrap();
    assert_eq!(session.predictions().len(), 2);

    let resized = session.post_resize(TermSize::new(100, 30)).await.unwrap();
    assert_eq!(resized, Delivery::Delivered);
    assert!(session.predictions().is_empty());
    session.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_screen_program_drops_predictions() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();

    session.type_keys("q").await.unwrap();
    assert_eq!(session.predictions().len(), 1);

    script.feed(b"\x1b[?1049h");
    assert!(eventually(|| session.predictions().is_empty()).await);
    assert!(session.model().is_alternate_screen());
    session.dispose();
}

struct BrokenConnector;

impl TtyConnector for BrokenConnector {
    fn take_reader(&mut self) -> anyhow::Result<Box<dyn Read + Send>> {
        anyhow::bail!("no pty available")
    }

    fn write(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn resize(&mut self, _size: TermSize) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_start_can_be_retried() {
    let (session, _queue) = TerminalSession::new(SessionConfig::default()).unwrap();
    let pending = session.send_command_to_execute("pwd");

    assert!(matches!(
        session.start(Box::new(BrokenConnector)),
        Err(SessionError::Transport(_))
    ));
    assert!(!session.is_started());

    let (connector, script) = scripted();
    session.start(Box::new(connector)).unwrap();
    assert!(session.is_started());
    assert_eq!(pending.await.unwrap(), Delivery::Delivered);
    assert!(script.written().ends_with(&format!("pwd{LINE_ENDING}")));
    session.dispose();
}
