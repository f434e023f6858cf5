//! Shared handle to one epoch of the committed state.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::path::{resolve, Path};

/// A reference to a committed state value.
///
/// Two `StateRef`s are the "same object" when [`StateRef::ptr_eq`] holds.
/// Mutate-style commits change the value behind an existing reference, so
/// every holder observes them. Replace-style commits install a brand new
/// reference; holders of the old one keep reading the old values forever.
#[derive(Clone)]
pub struct StateRef(Arc<RwLock<Value>>);

impl StateRef {
    pub(crate) fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Run `f` against the current value.
    pub fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Deep copy of the current value.
    pub fn snapshot(&self) -> Value {
        self.read(Value::clone)
    }

    pub fn get(&self, path: &Path) -> Option<Value> {
        self.read(|root| resolve(root, path).cloned())
    }

    /// Look up a value by RFC 6901 pointer, e.g. `/profile/avatar`.
    pub fn pointer(&self, pointer: &str) -> Option<Value> {
        self.read(|root| root.pointer(pointer).cloned())
    }

    /// Deserialize the whole value into `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.snapshot())?)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|value| f.debug_tuple("StateRef").field(value).finish())
    }
}
