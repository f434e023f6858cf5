//! The generated action table.
//!
//! Each reducer is reachable by name with the argument type it was registered
//! with. A lookup with the wrong argument type fails once, at
//! [`Actions::action`], and the returned [`Action`] is then fully typed.

use std::any::type_name;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::config::{Handler, Reduction, ReducerResult};
use crate::error::{Result, StoreError};
use crate::queue::{serialize, SerialQueue};
use crate::store::Inner;

#[derive(Clone)]
pub struct Actions {
    store: Arc<Inner>,
}

impl Actions {
    pub(crate) fn new(store: Arc<Inner>) -> Self {
        Self { store }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.store.reducers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.reducers.contains_key(name)
    }

    /// Typed handle to the action `name`.
    pub fn action<A: Send + 'static>(&self, name: &str) -> Result<Action<A>> {
        let entry = self
            .store
            .reducers
            .get(name)
            .ok_or_else(|| StoreError::UnknownAction(name.to_string()))?;
        let handler = Arc::clone(&entry.handler)
            .downcast::<Handler<A>>()
            .map_err(|_| StoreError::ArgumentMismatch {
                action: name.to_string(),
                expected: entry.args,
                actual: type_name::<A>(),
            })?;
        Ok(Action {
            name: Arc::from(name),
            handler,
            store: Arc::clone(&self.store),
        })
    }

    pub fn call<A: Send + 'static>(&self, name: &str, args: A) -> Result<Dispatch> {
        Ok(self.action::<A>(name)?.call(args))
    }

    /// The action `name` behind a serialization queue: each call starts only
    /// after every earlier call through the same queue has fully committed.
    /// On an idle queue the reducer runs up to its first suspension before
    /// `call` returns, the same as [`Action::call`].
    pub fn serialized<A: Send + 'static>(&self, name: &str) -> Result<SerialQueue<A, Result<()>>> {
        let action = self.action::<A>(name)?;
        Ok(serialize(move |args: A| action.call(args).into_future()))
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One action with its argument type fixed.
pub struct Action<A> {
    name: Arc<str>,
    handler: Arc<Handler<A>>,
    store: Arc<Inner>,
}

impl<A> Clone for Action<A> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            handler: Arc::clone(&self.handler),
            store: Arc::clone(&self.store),
        }
    }
}

impl<A: Send + 'static> Action<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the reducer against the current epoch and commit its outcome.
    ///
    /// A synchronous reducer has finished (and committed) when this returns.
    /// An asynchronous one has run up to its first suspension point; the rest
    /// is spawned on the current Tokio runtime and finishes even if the
    /// returned [`Dispatch`] is dropped. Outside a runtime the caller has to
    /// drive it by awaiting the dispatch.
    pub fn call(&self, args: A) -> Dispatch {
        debug!(action = %self.name, "Dispatching action");
        let draft = self.store.current_draft();
        match (self.handler.0)(draft, args) {
            Reduction::Ready(result) => Dispatch::Completed(self.store.settle(&self.name, result)),
            Reduction::Deferred(reduction) => self.drive(reduction),
        }
    }

    fn drive(&self, reduction: BoxFuture<'static, ReducerResult>) -> Dispatch {
        let store = Arc::clone(&self.store);
        let name = Arc::clone(&self.name);
        let mut commit: BoxFuture<'static, Result<()>> = Box::pin(async move {
            let result = reduction.await;
            store.settle(&name, result)
        });

        // First poll inline: writes before the first suspension land now.
        let mut cx = Context::from_waker(noop_waker_ref());
        if let Poll::Ready(result) = commit.as_mut().poll(&mut cx) {
            return Dispatch::Completed(result);
        }

        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(commit);
                let name = Arc::clone(&self.name);
                Dispatch::Pending(Box::pin(async move {
                    task.await.unwrap_or_else(|err| {
                        if err.is_panic() {
                            error!(action = %name, "Reducer panicked");
                            Err(StoreError::ReducerPanicked(name.to_string()))
                        } else {
                            Err(StoreError::ReducerAborted(name.to_string()))
                        }
                    })
                }))
            }
            Err(_) => {
                debug!(action = %self.name, "No Tokio runtime, reducer is driven by the caller");
                Dispatch::Pending(commit)
            }
        }
    }
}

impl<A> fmt::Debug for Action<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("args", &type_name::<A>())
            .finish()
    }
}

/// Outcome of invoking an action.
///
/// Await it to get the commit result either way.
#[must_use = "a dispatch carries the reducer's result"]
pub enum Dispatch {
    Completed(Result<()>),
    Pending(BoxFuture<'static, Result<()>>),
}

impl Dispatch {
    pub fn is_pending(&self) -> bool {
        matches!(self, Dispatch::Pending(_))
    }

    /// The result, if the reducer already finished.
    pub fn into_completed(self) -> Option<Result<()>> {
        match self {
            Dispatch::Completed(result) => Some(result),
            Dispatch::Pending(_) => None,
        }
    }
}

impl IntoFuture for Dispatch {
    type Output = Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Dispatch::Completed(result) => Box::pin(std::future::ready(result)),
            Dispatch::Pending(future) => future,
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Completed(result) => f.debug_tuple("Completed").field(result).finish(),
            Dispatch::Pending(_) => f.write_str("Pending"),
        }
    }
}
