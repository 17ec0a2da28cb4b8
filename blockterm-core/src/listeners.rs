use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by every `add_*_listener`; pass it back to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Copy-on-notify listener registry.
///
/// `snapshot()` clones the current listeners out of the lock, so callbacks
/// never run while the registry is locked and may add or remove listeners
/// themselves.
pub struct ListenerList<L: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerList<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl<L: ?Sized> ListenerList<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
