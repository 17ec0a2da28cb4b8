use std::cell::RefCell;
use std::rc::Rc;

use crate::blocks::BlockId;

/// Host input layer (key and mouse handling) for the running command.
///
/// Installed when a block starts or the main screen comes back, uninstalled
/// when the block finishes or a full-screen program takes over.
pub trait InputRouter {
    fn install(&self, block: BlockId);
    fn uninstall(&self, block: BlockId);
}

/// Listener registrations tied to one block's running lifetime.
///
/// Handles are clones of the same scope. Closing runs the registered
/// teardown actions once, newest first; closing again does nothing. The
/// scope is not `Send`, so it can only be closed on the UI thread that
/// installed it.
#[derive(Clone, Default)]
pub struct ListenerScope {
    inner: Rc<RefCell<ScopeInner>>,
}

#[derive(Default)]
struct ScopeInner {
    closed: bool,
    teardown: Vec<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for ListenerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ListenerScope")
            .field("closed", &inner.closed)
            .field("teardown", &inner.teardown.len())
            .finish()
    }
}

impl ListenerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown action. Runs immediately if already closed.
    pub fn defer(&self, teardown: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            drop(inner);
            teardown();
        } else {
            inner.teardown.push(Box::new(teardown));
        }
    }

    pub fn close(&self) {
        let teardown = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.teardown)
        };
        for action in teardown.into_iter().rev() {
            action();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}
