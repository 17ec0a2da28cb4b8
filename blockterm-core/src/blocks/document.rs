use std::ops::Range;
use std::sync::Arc;

use crate::listeners::{ListenerId, ListenerList};

/// One edit applied to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub offset: usize,
    pub removed: String,
    pub inserted: String,
}

pub trait DocumentListener {
    fn document_changed(&self, event: &DocumentEvent);
}

/// The text surface the blocks are rendered into.
///
/// Offsets are byte offsets and must fall on char boundaries; every offset
/// handed out by the output model does.
#[derive(Default)]
pub struct Document {
    text: String,
    listeners: ListenerList<dyn DocumentListener>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.text.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> &str {
        &self.text[range]
    }

    pub fn insert(&mut self, offset: usize, text: &str) {
        self.replace(offset..offset, text);
    }

    pub fn delete(&mut self, range: Range<usize>) {
        self.replace(range, "");
    }

    pub fn replace(&mut self, range: Range<usize>, text: &str) {
        if range.is_empty() && text.is_empty() {
            return;
        }
        let removed = self.text[range.clone()].to_string();
        self.text.replace_range(range.clone(), text);

        let event = DocumentEvent {
            offset: range.start,
            removed,
            inserted: text.to_string(),
        };
        for listener in self.listeners.snapshot() {
            listener.document_changed(&event);
        }
    }

    /// Zero-based line containing `offset`.
    pub fn line_number(&self, offset: usize) -> usize {
        self.text.as_bytes()[..offset]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
    }

    /// Offset where the line containing `offset` starts.
    pub fn line_start_at(&self, offset: usize) -> usize {
        self.text[..offset].rfind('\n').map_or(0, |nl| nl + 1)
    }

    pub fn line_count(&self) -> usize {
        self.line_number(self.text.len()) + 1
    }

    pub fn add_listener(&self, listener: Arc<dyn DocumentListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
