//! Output scraper.
//!
//! Watches the terminal model and turns its content into immutable
//! [`StyledOutput`] snapshots. The model is the single source of truth: a
//! snapshot is always rendered from the live grid, never patched from the
//! previous one. The previous snapshot is only kept to suppress duplicate
//! notifications.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use alacritty_terminal::term::TermMode;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::listeners::{ListenerId, ListenerList};
use crate::term::model::render_grid;
use crate::term::{StyleRange, TerminalModel};

/// Text of the current command's output plus its style runs.
///
/// Offsets are byte offsets relative to the start of `text`, i.e. relative
/// to the block's output start once applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledOutput {
    pub text: String,
    pub style_ranges: Vec<StyleRange>,
    /// Model epoch the snapshot was taken in.
    pub epoch: u64,
    /// Taken while a full-screen program owned the alternate buffer.
    pub alternate: bool,
}

impl StyledOutput {
    pub fn plain(text: impl Into<String>, epoch: u64) -> Self {
        Self {
            text: text.into(),
            style_ranges: Vec::new(),
            epoch,
            alternate: false,
        }
    }
}

/// Receives snapshots on the scraper's background task.
pub trait CommandOutputListener: Send + Sync {
    fn command_output_changed(&self, output: StyledOutput);
}

#[derive(Clone)]
pub struct OutputScraper {
    inner: Arc<ScraperInner>,
}

struct ScraperInner {
    model: TerminalModel,
    listeners: ListenerList<dyn CommandOutputListener>,
    last_emitted: Mutex<Option<StyledOutput>>,
}

impl std::fmt::Debug for OutputScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputScraper")
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl OutputScraper {
    pub fn new(model: TerminalModel) -> Self {
        Self {
            inner: Arc::new(ScraperInner {
                model,
                listeners: ListenerList::new(),
                last_emitted: Mutex::new(None),
            }),
        }
    }

    pub fn model(&self) -> &TerminalModel {
        &self.inner.model
    }

    /// Synchronous snapshot of the current model content.
    pub fn scrape_output(&self) -> StyledOutput {
        self.inner.model.read(|term, epoch| {
            let (text, style_ranges) = render_grid(term);
            StyledOutput {
                text,
                style_ranges,
                epoch,
                alternate: term.mode().contains(TermMode::ALT_SCREEN),
            }
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn CommandOutputListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Snapshot the model and notify listeners if the content changed since
    /// the last notification. Alternate-buffer content is never broadcast.
    pub fn poll(&self) -> bool {
        if self.inner.model.is_disposed() {
            return false;
        }
        let output = self.scrape_output();
        if output.alternate {
            return false;
        }
        {
            let mut last = self.inner.last_emitted.lock();
            if last.as_ref() == Some(&output) {
                return false;
            }
            *last = Some(output.clone());
        }

        let listeners = self.inner.listeners.snapshot();
        tracing::trace!(
            bytes = output.text.len(),
            epoch = output.epoch,
            listeners = listeners.len(),
            "scraped output changed"
        );
        for listener in listeners {
            listener.command_output_changed(output.clone());
        }
        true
    }

    /// Run the change-watch loop on `handle`.
    ///
    /// Bursts of buffer mutations collapse into one poll per `interval`
    /// (or per scheduler tick when the interval is zero). The loop ends
    /// quietly once the model is disposed. Returns `None` if it already is.
    pub fn spawn(&self, handle: &Handle, interval: Duration) -> Option<JoinHandle<()>> {
        let mut changes = self.inner.model.subscribe()?;
        let scraper = self.clone();

        Some(handle.spawn(async move {
            while changes.changed().await.is_ok() {
                if interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(interval).await;
                }
                let _ = changes.borrow_and_update();
                scraper.poll();
            }
            tracing::debug!("terminal model disposed; scraper stopped");
        }))
    }
}
