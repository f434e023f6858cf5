//! The state engine.
//!
//! Owns the committed state, the subscriber set, the selector table and the
//! reducers behind the action table. Every action runs its reducer against a
//! [`Draft`] of the current epoch, then commits:
//!
//! - mutate-style (`None`/`null` returned): nothing more to do, each draft
//!   write already landed in place and notified;
//! - replace-style (a value returned): subscribers are notified with the new
//!   state, then the epoch is swapped. Readers of the old [`StateRef`] keep
//!   the old values, and drafts of the old epoch are abandoned.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::Actions;
use crate::config::{ReducerEntry, ReducerResult, Selector, StoreConfig};
use crate::draft::Draft;
use crate::error::{Result, StoreError};
use crate::listeners::{Listeners, Subscription};
use crate::state_ref::StateRef;

/// One committed state and the draft tree bound to it.
struct Epoch {
    state: StateRef,
    draft: Draft,
}

impl Epoch {
    fn new(value: Value, listeners: &Arc<Listeners>) -> Self {
        let state = StateRef::new(value);
        let listeners = Arc::clone(listeners);
        let draft = Draft::root(
            state.clone(),
            Arc::new(move |root: &StateRef| listeners.notify(root)),
        );
        Self { state, draft }
    }
}

pub(crate) struct Inner {
    epoch: ArcSwap<Epoch>,
    listeners: Arc<Listeners>,
    pub(crate) reducers: HashMap<String, ReducerEntry>,
    selectors: HashMap<String, Selector>,
}

impl Inner {
    pub(crate) fn current_draft(&self) -> Draft {
        self.epoch.load().draft.clone()
    }

    /// Apply a finished reducer's outcome.
    pub(crate) fn settle(&self, action: &str, result: ReducerResult) -> Result<()> {
        match result {
            Err(e) => {
                warn!(action = %action, error = %e, "Reducer failed, in-place writes are kept");
                Err(StoreError::Reducer {
                    action: action.to_string(),
                    source: e.into(),
                })
            }
            Ok(None) | Ok(Some(Value::Null)) => {
                debug!(action = %action, "Committed in place");
                Ok(())
            }
            Ok(Some(next)) => {
                self.replace(next);
                debug!(action = %action, "Committed replacement state");
                Ok(())
            }
        }
    }

    // The new epoch is fully built before anyone sees it; listeners get it
    // before `get()` does.
    fn replace(&self, next: Value) {
        let epoch = Epoch::new(next, &self.listeners);
        self.listeners.notify(&epoch.state);
        self.epoch.store(Arc::new(epoch));
    }
}

/// A single source of truth, changed only through its actions.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    pub fn create(config: StoreConfig) -> Self {
        let StoreConfig {
            initial_state,
            reducers,
            selectors,
        } = config;
        let listeners = Arc::new(Listeners::default());
        let epoch = Epoch::new(initial_state, &listeners);

        debug!(
            reducers = reducers.len(),
            selectors = selectors.len(),
            "Store created"
        );

        Self {
            inner: Arc::new(Inner {
                epoch: ArcSwap::new(Arc::new(epoch)),
                listeners,
                reducers,
                selectors,
            }),
        }
    }

    /// The committed state reference.
    pub fn get(&self) -> StateRef {
        self.inner.epoch.load().state.clone()
    }

    /// Apply `f` to the committed state.
    pub fn get_with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.get().read(f)
    }

    /// Run the selector registered as `name` against the committed state.
    pub fn select(&self, name: &str) -> Result<Value> {
        let selector = self
            .inner
            .selectors
            .get(name)
            .ok_or_else(|| StoreError::UnknownSelector(name.to_string()))?;
        Ok(self.get_with(|state| selector(state)))
    }

    pub fn select_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.select(name)?)?)
    }

    pub fn selector_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.selectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call `listener` with the new state on every commit: once per draft
    /// write for mutate-style reducers, once with the replacement for
    /// replace-style ones.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateRef) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// The generated action table, one entry per reducer.
    pub fn actions(&self) -> Actions {
        Actions::new(Arc::clone(&self.inner))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.get())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
