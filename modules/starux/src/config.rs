use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::draft::Draft;
use crate::error::Result;

/// What a reducer hands back: `None` (or `null`) for mutate-style, a full
/// replacement state for replace-style.
pub type ReducerResult = anyhow::Result<Option<Value>>;

/// Mutate-style return: the writes already made through the draft are the commit.
pub fn mutated() -> ReducerResult {
    Ok(None)
}

/// Replace-style return: `state` becomes the new committed state.
pub fn replace(state: impl Serialize) -> ReducerResult {
    Ok(Some(serde_json::to_value(state)?))
}

pub(crate) enum Reduction {
    Ready(ReducerResult),
    Deferred(BoxFuture<'static, ReducerResult>),
}

/// Type-erased reducer for arguments `A`, recovered by downcast at dispatch.
pub(crate) struct Handler<A>(pub(crate) Arc<dyn Fn(Draft, A) -> Reduction + Send + Sync>);

pub(crate) struct ReducerEntry {
    pub(crate) handler: Arc<dyn Any + Send + Sync>,
    pub(crate) args: &'static str,
}

pub(crate) type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Everything a store is built from: the initial state, the reducers that
/// become its actions, and optional named selectors.
pub struct StoreConfig {
    pub initial_state: Value,
    pub(crate) reducers: HashMap<String, ReducerEntry>,
    pub(crate) selectors: HashMap<String, Selector>,
}

impl StoreConfig {
    /// Serializes `initial_state`, so the store never aliases the caller's value.
    pub fn new(initial_state: impl Serialize) -> Result<Self> {
        Ok(Self::from_value(serde_json::to_value(initial_state)?))
    }

    pub fn from_value(initial_state: Value) -> Self {
        Self {
            initial_state,
            reducers: HashMap::new(),
            selectors: HashMap::new(),
        }
    }

    /// Register a synchronous reducer. `A` is the action's argument type;
    /// use `()` for none and a tuple for several.
    pub fn reducer<A, F>(self, name: impl Into<String>, reducer: F) -> Self
    where
        A: Send + 'static,
        F: Fn(&Draft, A) -> ReducerResult + Send + Sync + 'static,
    {
        self.register::<A>(
            name.into(),
            Arc::new(move |draft: Draft, args: A| Reduction::Ready(reducer(&draft, args))),
        )
    }

    /// Register an asynchronous reducer. Writes before and after each
    /// suspension point notify subscribers as they happen.
    pub fn async_reducer<A, F, Fut>(self, name: impl Into<String>, reducer: F) -> Self
    where
        A: Send + 'static,
        F: Fn(Draft, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReducerResult> + Send + 'static,
    {
        self.register::<A>(
            name.into(),
            Arc::new(move |draft: Draft, args: A| {
                Reduction::Deferred(Box::pin(reducer(draft, args)))
            }),
        )
    }

    pub fn selector<F>(mut self, name: impl Into<String>, selector: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        if self.selectors.insert(name.clone(), Arc::new(selector)).is_some() {
            warn!(selector = %name, "Selector registered twice, keeping the last one");
        }
        self
    }

    fn register<A: Send + 'static>(
        mut self,
        name: String,
        handler: Arc<dyn Fn(Draft, A) -> Reduction + Send + Sync>,
    ) -> Self {
        let entry = ReducerEntry {
            handler: Arc::new(Handler(handler)),
            args: type_name::<A>(),
        };
        if self.reducers.insert(name.clone(), entry).is_some() {
            warn!(action = %name, "Reducer registered twice, keeping the last one");
        }
        self
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut reducers: Vec<_> = self.reducers.keys().collect();
        reducers.sort();
        let mut selectors: Vec<_> = self.selectors.keys().collect();
        selectors.sort();
        f.debug_struct("StoreConfig")
            .field("initial_state", &self.initial_state)
            .field("reducers", &reducers)
            .field("selectors", &selectors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Counter {
        count: i64,
    }

    #[test]
    fn new_copies_the_initial_state() {
        let initial = Counter { count: 3 };
        let config = StoreConfig::new(&initial).unwrap();
        assert_eq!(config.initial_state, json!({"count": 3}));
    }

    #[test]
    fn replace_serializes_and_mutated_is_empty() {
        assert_eq!(replace(Counter { count: 1 }).unwrap(), Some(json!({"count": 1})));
        assert_eq!(mutated().unwrap(), None);
    }

    #[test]
    fn registration_records_argument_types() {
        let config = StoreConfig::from_value(json!({}))
            .reducer("noop", |_: &Draft, _: ()| mutated())
            .reducer("rename", |_: &Draft, _: String| mutated())
            .selector("everything", |s: &Value| s.clone());

        assert_eq!(config.reducers["noop"].args, "()");
        assert_eq!(config.reducers["rename"].args, type_name::<String>());
        assert!(config.selectors.contains_key("everything"));
    }

    #[test]
    fn later_registration_wins() {
        let config = StoreConfig::from_value(json!({}))
            .reducer("set", |_: &Draft, _: String| mutated())
            .reducer("set", |_: &Draft, _: i64| mutated());
        assert_eq!(config.reducers.len(), 1);
        assert_eq!(config.reducers["set"].args, "i64");
    }
}
