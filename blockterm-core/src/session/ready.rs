use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    Pending,
    Ready(T),
    /// Disposed before (or after) becoming ready; there will be no value.
    Disposed,
}

/// One-shot, many-reader signal.
///
/// Resolves at most once; `dispose` moves it to its terminal `Disposed`
/// state from anywhere, waking every waiter with `None`.
#[derive(Debug)]
pub struct ReadySignal<T> {
    tx: Arc<watch::Sender<Readiness<T>>>,
}

impl<T> Clone for ReadySignal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Default for ReadySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ReadySignal<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Readiness::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `false` if the signal was already resolved or disposed.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, Readiness::Pending) {
                *state = Readiness::Ready(value);
                true
            } else {
                false
            }
        })
    }

    /// Move to `Disposed`, handing back the value if there was one.
    pub fn dispose(&self) -> Option<T> {
        match self.tx.send_replace(Readiness::Disposed) {
            Readiness::Ready(value) => Some(value),
            Readiness::Pending | Readiness::Disposed => None,
        }
    }

    pub fn peek(&self) -> Readiness<T> {
        self.tx.borrow().clone()
    }

    /// Wait until the signal leaves `Pending`.
    pub async fn wait(&self) -> Option<T> {
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, Readiness::Pending))
            .await
            .ok()?;
        match &*state {
            Readiness::Ready(value) => Some(value.clone()),
            Readiness::Pending | Readiness::Disposed => None,
        }
    }
}
