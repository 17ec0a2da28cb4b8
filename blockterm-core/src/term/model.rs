use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::{Dimensions, Row};
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::{Cell, Flags};
use alacritty_terminal::term::{Config, Term, TermMode};
use alacritty_terminal::vte::ansi;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::style::{StyleRange, TextStyle};

/// Home the cursor, erase the screen, drop the scrollback.
const RESET_SEQUENCE: &[u8] = b"\x1b[H\x1b[2J\x1b[3J";

/// Grid dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermSize {
    pub columns: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.rows as usize
    }

    fn screen_lines(&self) -> usize {
        self.rows as usize
    }

    fn columns(&self) -> usize {
        self.columns as usize
    }
}

/// The headless terminal the PTY output is decoded into.
///
/// The reader thread is the only writer; the scraper and the UI take
/// short read locks for snapshots. Every mutation bumps a generation
/// counter published through a `watch` channel, which is how the scraper
/// learns that the buffer changed. Several bumps between two reads collapse
/// into one wake-up.
///
/// The `epoch` counts full resets ([`TerminalModel::clear_all`]). A block
/// only accepts snapshots taken in the epoch it started in.
#[derive(Clone)]
pub struct TerminalModel {
    inner: Arc<Mutex<ModelInner>>,
    changes: Arc<Mutex<Option<watch::Sender<u64>>>>,
    replies: Arc<Mutex<Vec<String>>>,
}

struct ModelInner {
    term: Term<EventProxy>,
    parser: ansi::Processor,
    size: TermSize,
    generation: u64,
    epoch: u64,
}

impl std::fmt::Debug for TerminalModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TerminalModel")
            .field("size", &inner.size)
            .field("generation", &inner.generation)
            .field("epoch", &inner.epoch)
            .finish()
    }
}

impl TerminalModel {
    pub fn new(size: TermSize, scrollback_lines: usize) -> Self {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let config = Config {
            scrolling_history: scrollback_lines,
            ..Config::default()
        };
        let proxy = EventProxy {
            replies: replies.clone(),
        };
        let term = Term::new(config, &size, proxy);
        let (tx, _rx) = watch::channel(0);

        Self {
            inner: Arc::new(Mutex::new(ModelInner {
                term,
                parser: ansi::Processor::new(),
                size,
                generation: 0,
                epoch: 0,
            })),
            changes: Arc::new(Mutex::new(Some(tx))),
            replies,
        }
    }

    /// Decode raw PTY bytes into the grid.
    pub fn process_bytes(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let generation = {
            let mut inner = self.inner.lock();
            let ModelInner { term, parser, .. } = &mut *inner;
            parser.advance(term, bytes);
            inner.generation += 1;
            inner.generation
        };
        self.publish(generation);
    }

    /// Wipe screen and scrollback and start a new epoch.
    pub fn clear_all(&self) -> u64 {
        let (generation, epoch) = {
            let mut inner = self.inner.lock();
            let ModelInner { term, parser, .. } = &mut *inner;
            parser.advance(term, RESET_SEQUENCE);
            inner.generation += 1;
            inner.epoch += 1;
            (inner.generation, inner.epoch)
        };
        self.publish(generation);
        epoch
    }

    pub fn resize(&self, size: TermSize) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.term.resize(size);
            inner.size = size;
            inner.generation += 1;
            inner.generation
        };
        self.publish(generation);
    }

    pub fn size(&self) -> TermSize {
        self.inner.lock().size
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn is_alternate_screen(&self) -> bool {
        self.inner.lock().term.mode().contains(TermMode::ALT_SCREEN)
    }

    /// Plain text of the active buffer, trailing blanks trimmed per line.
    pub fn plain_text(&self) -> String {
        let inner = self.inner.lock();
        render_grid(&inner.term).0
    }

    /// Text from the top of history up to the cursor. Unlike
    /// [`plain_text`](Self::plain_text), blanks left of the cursor on its
    /// row are kept, so a prompt like `"$ "` keeps its trailing space.
    pub fn text_to_cursor(&self) -> String {
        let inner = self.inner.lock();
        let grid = inner.term.grid();
        let columns = grid.columns();
        let point = grid.cursor.point;
        let top = -(grid.history_size() as i32);

        let mut text = String::new();
        for line in top..=point.line.0 {
            let row = &grid[Line(line)];
            let at_cursor = line == point.line.0;
            let wrapped = !at_cursor && row[Column(columns - 1)].flags.contains(Flags::WRAPLINE);
            let width = if at_cursor {
                point.column.0.min(columns)
            } else if wrapped {
                columns
            } else {
                visible_width(row, columns)
            };
            for col in 0..width {
                let cell = &row[Column(col)];
                if !cell
                    .flags
                    .intersects(Flags::WIDE_CHAR_SPACER | Flags::LEADING_WIDE_CHAR_SPACER)
                {
                    text.push(cell.c);
                }
            }
            if !at_cursor && !wrapped {
                text.push('\n');
            }
        }
        text
    }

    /// Characters of the cursor row (one per cell) and the cursor column.
    pub fn cursor_line(&self) -> (Vec<char>, usize) {
        let inner = self.inner.lock();
        let grid = inner.term.grid();
        let point = grid.cursor.point;
        let row = &grid[point.line];
        let chars = (0..grid.columns()).map(|col| row[Column(col)].c).collect();
        (chars, point.column.0)
    }

    /// Subscribe to change notifications. `None` once the model is disposed.
    pub fn subscribe(&self) -> Option<watch::Receiver<u64>> {
        self.changes.lock().as_ref().map(|tx| tx.subscribe())
    }

    /// Drain replies the terminal wants written back to the PTY
    /// (device attribute reports, cursor position reports, ...).
    pub fn take_replies(&self) -> Vec<String> {
        std::mem::take(&mut *self.replies.lock())
    }

    /// Ends every change subscription. The grid stays readable.
    pub fn dispose(&self) {
        self.changes.lock().take();
    }

    pub fn is_disposed(&self) -> bool {
        self.changes.lock().is_none()
    }

    /// Run `f` against the grid under the model lock, with the current epoch.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Term<EventProxy>, u64) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.term, inner.epoch)
    }

    fn publish(&self, generation: u64) {
        if let Some(tx) = self.changes.lock().as_ref() {
            tx.send_replace(generation);
        }
    }
}

/// Collects the terminal's write-back requests; everything else is the
/// host's business.
#[derive(Clone)]
pub struct EventProxy {
    replies: Arc<Mutex<Vec<String>>>,
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        if let Event::PtyWrite(text) = event {
            self.replies.lock().push(text);
        }
    }
}

/// Render the active grid as text plus style runs.
///
/// Lines run from the oldest history line down to the cursor line or the
/// last non-empty line, whichever is lower. Soft-wrapped rows are joined
/// without a line break. Offsets in the returned ranges are byte offsets
/// into the returned text; only non-default styles produce a range.
pub(crate) fn render_grid<T: EventListener>(term: &Term<T>) -> (String, Vec<StyleRange>) {
    let grid = term.grid();
    let columns = grid.columns();
    let top = -(grid.history_size() as i32);
    let screen_lines = grid.screen_lines() as i32;

    let mut last = grid.cursor.point.line.0;
    for line in (last + 1)..screen_lines {
        if visible_width(&grid[Line(line)], columns) > 0 {
            last = line;
        }
    }

    let mut text = String::new();
    let mut ranges: Vec<StyleRange> = Vec::new();

    for line in top..=last {
        let row = &grid[Line(line)];
        let wrapped = columns > 0 && row[Column(columns - 1)].flags.contains(Flags::WRAPLINE);
        let width = if wrapped {
            columns
        } else {
            visible_width(row, columns)
        };

        for col in 0..width {
            let cell = &row[Column(col)];
            if cell
                .flags
                .intersects(Flags::WIDE_CHAR_SPACER | Flags::LEADING_WIDE_CHAR_SPACER)
            {
                continue;
            }
            let start = text.len();
            text.push(cell.c);
            if let Some(zerowidth) = cell.zerowidth() {
                text.extend(zerowidth.iter());
            }
            push_style(&mut ranges, start, text.len(), TextStyle::from_cell(cell));
        }

        if line < last && !wrapped {
            text.push('\n');
        }
    }

    (text, ranges)
}

fn visible_width(row: &Row<Cell>, columns: usize) -> usize {
    let mut width = columns;
    while width > 0 && row[Column(width - 1)].c == ' ' {
        width -= 1;
    }
    width
}

/// Extend the previous run when it is adjacent and has the same style.
fn push_style(ranges: &mut Vec<StyleRange>, start: usize, end: usize, style: TextStyle) {
    if style.is_default() {
        return;
    }
    if let Some(prev) = ranges.last_mut() {
        if prev.end == start && prev.style == style {
            prev.end = end;
            return;
        }
    }
    ranges.push(StyleRange { start, end, style });
}
