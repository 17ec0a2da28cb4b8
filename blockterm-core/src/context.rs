//! Typed lookup keys into host-provided storage.
//!
//! Hosts keep one [`DataContext`] per terminal widget and look the engine
//! objects up by key (`OutputController::KEY`, `TerminalSession::KEY`).

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> std::fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

#[derive(Default)]
pub struct DataContext {
    values: HashMap<&'static str, Box<dyn Any>>,
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning whatever was stored under the key before.
    pub fn put<T: 'static>(&mut self, key: &ContextKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.values.get(key.name)?.downcast_ref()
    }

    pub fn get_mut<T: 'static>(&mut self, key: &ContextKey<T>) -> Option<&mut T> {
        self.values.get_mut(key.name)?.downcast_mut()
    }

    pub fn remove<T: 'static>(&mut self, key: &ContextKey<T>) -> Option<T> {
        let value = self.values.remove(key.name)?;
        value.downcast::<T>().ok().map(|value| *value)
    }
}
