//! Application state container.
//!
//! A [`Store`] holds one JSON state value that changes only through named
//! reducers. Reducers either write through a [`Draft`] (mutate-style: each
//! write lands in place and notifies subscribers immediately) or return a
//! replacement state (replace-style: subscribers are notified once, then the
//! committed reference is swapped).
//!
//! [`serialize`] turns any async function into a FIFO of one-at-a-time calls.
//! The store does not serialize overlapping async reducers on its own; use
//! [`Actions::serialized`] when an action must not interleave with itself.
//!
//! ```
//! use serde_json::json;
//! use starux::{mutated, Draft, Store, StoreConfig};
//!
//! let store = Store::create(
//!     StoreConfig::new(json!({"count": 0}))
//!         .unwrap()
//!         .reducer("increment", |state: &Draft, _: ()| {
//!             let count: i64 = state.read_as("count")?;
//!             state.set("count", count + 1)?;
//!             mutated()
//!         }),
//! );
//!
//! let before = store.get();
//! store.actions().call("increment", ()).unwrap().into_completed().unwrap().unwrap();
//! assert_eq!(before.pointer("/count"), Some(json!(1)));
//! ```

pub mod action;
pub mod config;
pub mod draft;
pub mod error;
pub mod listeners;
pub mod path;
pub mod queue;
pub mod state_ref;
pub mod store;

pub use action::{Action, Actions, Dispatch};
pub use config::{mutated, replace, ReducerResult, StoreConfig};
pub use draft::{Draft, Field};
pub use error::{value_type_name, QueueError, Result, StoreError};
pub use listeners::Subscription;
pub use path::{Path, Seg};
pub use queue::{serialize, serialize_sync, SerialQueue};
pub use state_ref::StateRef;
pub use store::Store;

pub use serde_json::Value;
