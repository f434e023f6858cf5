//! Mutation proxy handed to reducers.
//!
//! A [`Draft`] is a (tree, path) handle onto the live state of one epoch.
//! Reads resolve the path against the epoch's root; writes land in place and
//! fire the change callback synchronously, before the write call returns.
//!
//! Child handles are memoized per path, so reading the same unchanged path
//! twice yields the same handle ([`Draft::ptr_eq`]). Reassigning a key through
//! the draft drops the memo entries at and below that key.
//!
//! Reducers must not keep a draft past their own return. A draft from a
//! superseded epoch still writes, but only into the orphaned value: the
//! current committed state never sees it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::error::{value_type_name, Result, StoreError};
use crate::path::{resolve, resolve_mut, Path, Seg};
use crate::state_ref::StateRef;

pub(crate) type ChangeFn = Arc<dyn Fn(&StateRef) + Send + Sync>;

/// Result of reading one field through a draft.
#[derive(Debug, Clone)]
pub enum Field {
    /// Object or array: a memoized child handle.
    Node(Draft),
    /// Scalar (including `null`), copied out.
    Value(Value),
    Missing,
}

impl Field {
    pub fn into_node(self) -> Option<Draft> {
        match self {
            Field::Node(draft) => Some(draft),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Handle tree for one epoch: the root it is bound to plus the path memo.
struct Tree {
    root: StateRef,
    memo: Mutex<HashMap<Path, Weak<Node>>>,
    on_change: ChangeFn,
}

impl Tree {
    fn node(self: &Arc<Self>, path: Path) -> Draft {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        match memo.get(&path).map(Weak::upgrade) {
            Some(Some(node)) => return Draft(node),
            // Found a dead handle: sweep every dead one, not just this path.
            Some(None) => memo.retain(|_, node| node.strong_count() > 0),
            None => {}
        }
        let node = Arc::new(Node {
            tree: Arc::clone(self),
            path: path.clone(),
        });
        memo.insert(path, Arc::downgrade(&node));
        Draft(node)
    }

    fn invalidate(&self, changed: &Path) {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        memo.retain(|path, node| !path.starts_with(changed) && node.strong_count() > 0);
    }

    /// Drop memo entries strictly below `parent` (array slots shifted).
    fn invalidate_children(&self, parent: &Path) {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        memo.retain(|path, node| {
            !(path.len() > parent.len() && path.starts_with(parent)) && node.strong_count() > 0
        });
    }
}

struct Node {
    tree: Arc<Tree>,
    path: Path,
}

#[derive(Clone)]
pub struct Draft(Arc<Node>);

impl Draft {
    pub(crate) fn root(state: StateRef, on_change: ChangeFn) -> Self {
        let tree = Arc::new(Tree {
            root: state,
            memo: Mutex::new(HashMap::new()),
            on_change,
        });
        tree.node(Path::root())
    }

    /// Where this handle points, relative to the state root.
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Read field `key`: a child handle for objects/arrays, the scalar otherwise.
    pub fn get(&self, key: impl Into<Seg>) -> Field {
        let path = self.0.path.child(key.into());
        let scalar = self.0.tree.root.read(|root| match resolve(root, &path) {
            None => Some(None),
            Some(v) if v.is_object() || v.is_array() => None,
            Some(v) => Some(Some(v.clone())),
        });
        match scalar {
            None => Field::Node(self.0.tree.node(path)),
            Some(Some(value)) => Field::Value(value),
            Some(None) => Field::Missing,
        }
    }

    /// Child handle for `key`, if it holds an object or array.
    pub fn child(&self, key: impl Into<Seg>) -> Option<Draft> {
        self.get(key).into_node()
    }

    /// Copy of the value at `key`, whatever its kind.
    pub fn read(&self, key: impl Into<Seg>) -> Option<Value> {
        let path = self.0.path.child(key.into());
        self.0.tree.root.read(|root| resolve(root, &path).cloned())
    }

    pub fn read_as<T: DeserializeOwned>(&self, key: impl Into<Seg>) -> Result<T> {
        let path = self.0.path.child(key.into());
        let value = self
            .0
            .tree
            .root
            .read(|root| resolve(root, &path).cloned())
            .ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Copy of the whole sub-value this handle points at.
    pub fn value(&self) -> Option<Value> {
        self.0.tree.root.read(|root| resolve(root, &self.0.path).cloned())
    }

    /// Write `value` at `key`. Objects gain or replace the key; arrays replace
    /// an existing slot or append when `key == len`.
    pub fn set(&self, key: impl Into<Seg>, value: impl Serialize) -> Result<()> {
        let seg = key.into();
        let value = serde_json::to_value(value)?;
        self.modify(&seg, |parent, at| assign(parent, &seg, value, at))?;
        self.0.tree.invalidate(&self.0.path.child(seg));
        self.changed();
        Ok(())
    }

    /// Read-modify-write on one field with a single change notification.
    /// A missing object key starts out as `null`.
    pub fn update(&self, key: impl Into<Seg>, f: impl FnOnce(&mut Value)) -> Result<()> {
        let seg = key.into();
        self.modify(&seg, |parent, at| {
            let slot = slot_mut(parent, &seg, at)?;
            f(slot);
            Ok(())
        })?;
        self.0.tree.invalidate(&self.0.path.child(seg));
        self.changed();
        Ok(())
    }

    /// Delete an object key or array slot. Returns the removed value.
    pub fn remove(&self, key: impl Into<Seg>) -> Result<Option<Value>> {
        let seg = key.into();
        let removed = self.modify(&seg, |parent, at| remove(parent, &seg, at))?;
        match seg {
            Seg::Key(_) => self.0.tree.invalidate(&self.0.path.child(seg)),
            Seg::Index(_) => self.0.tree.invalidate_children(&self.0.path),
        }
        self.changed();
        Ok(removed)
    }

    fn modify<R>(
        &self,
        seg: &Seg,
        f: impl FnOnce(&mut Value, &Path) -> Result<R>,
    ) -> Result<R> {
        let at = &self.0.path;
        trace!(path = %at, key = %seg, "Draft write");
        self.0.tree.root.write(|root| {
            let parent =
                resolve_mut(root, at).ok_or_else(|| StoreError::PathNotFound(at.to_string()))?;
            f(parent, at)
        })
    }

    fn changed(&self) {
        (self.0.tree.on_change)(&self.0.tree.root);
    }
}

impl fmt::Debug for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft").field("path", &self.0.path).finish()
    }
}

fn assign(parent: &mut Value, seg: &Seg, value: Value, at: &Path) -> Result<()> {
    match (parent, seg) {
        (Value::Object(map), Seg::Key(k)) => {
            map.insert(k.clone(), value);
            Ok(())
        }
        (Value::Array(items), Seg::Index(i)) => {
            let len = items.len();
            if *i < len {
                items[*i] = value;
            } else if *i == len {
                items.push(value);
            } else {
                return Err(StoreError::IndexOutOfBounds {
                    path: at.to_string(),
                    index: *i,
                    len,
                });
            }
            Ok(())
        }
        (other, seg) => Err(mismatch(other, seg, at)),
    }
}

fn slot_mut<'a>(parent: &'a mut Value, seg: &Seg, at: &Path) -> Result<&'a mut Value> {
    match (parent, seg) {
        (Value::Object(map), Seg::Key(k)) => Ok(map.entry(k.clone()).or_insert(Value::Null)),
        (Value::Array(items), Seg::Index(i)) => {
            let len = items.len();
            items.get_mut(*i).ok_or_else(|| StoreError::IndexOutOfBounds {
                path: at.to_string(),
                index: *i,
                len,
            })
        }
        (other, seg) => Err(mismatch(other, seg, at)),
    }
}

fn remove(parent: &mut Value, seg: &Seg, at: &Path) -> Result<Option<Value>> {
    match (parent, seg) {
        (Value::Object(map), Seg::Key(k)) => Ok(map.remove(k)),
        (Value::Array(items), Seg::Index(i)) => {
            if *i < items.len() {
                Ok(Some(items.remove(*i)))
            } else {
                Ok(None)
            }
        }
        (other, seg) => Err(mismatch(other, seg, at)),
    }
}

fn mismatch(found: &Value, seg: &Seg, at: &Path) -> StoreError {
    StoreError::TypeMismatch {
        path: at.to_string(),
        expected: match seg {
            Seg::Key(_) => "object",
            Seg::Index(_) => "array",
        },
        found: value_type_name(found),
    }
}
