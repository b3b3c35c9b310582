//! Datastore and presence collaborator contracts, plus the in-memory
//! implementation used by tests and the demo binary.
//!
//! ## Design
//! - [`Datastore`] is the realtime key-path store contract: path-scoped
//!   `get`/`set`/`update`/`remove`, local unique-key generation
//!   (`push_key`), and `subscribe`.
//! - Subscriptions deliver the **current value** at the path — immediately
//!   on subscribe and again after every change that touches the path.
//!   `None` means the path is absent. Dropping the [`Subscription`]
//!   detaches the watcher.
//! - [`MemoryStore`]: one JSON tree behind `Arc<Mutex<..>>`, watchers
//!   fan out snapshots over unbounded channels. An empty object is pruned
//!   on removal, so "no children" and "absent" are the same observable
//!   state.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::RequestError;

/// Realtime key-path store used for room, member and message state.
///
/// Writes are path-scoped and idempotent; that is what makes the
/// redundant cleanup sweep and the retry wrapper safe.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Read the value at `path`, `None` when absent.
    async fn get(&self, path: &str) -> Result<Option<Value>, RequestError>;

    /// Write `value` at `path`, creating intermediate objects.
    async fn set(&self, path: &str, value: Value) -> Result<(), RequestError>;

    /// Merge `partial` into the object at `path`, creating it if absent.
    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<(), RequestError>;

    /// Remove the subtree at `path`. Removing an absent path is a no-op.
    async fn remove(&self, path: &str) -> Result<(), RequestError>;

    /// Generate a unique child key under `path` without a network round
    /// trip.
    fn push_key(&self, path: &str) -> String;

    /// Watch `path`. The current value is delivered immediately, then on
    /// every change.
    async fn subscribe(&self, path: &str) -> Result<Subscription, RequestError>;
}

/// A live watch on one datastore path. Dropping it detaches the watcher.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Build a subscription from a snapshot channel and a detach action.
    pub fn new(
        rx: mpsc::UnboundedReceiver<Option<Value>>,
        cancel: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self { rx, cancel: Some(cancel) }
    }

    /// Next snapshot; `None` when the store side is gone.
    pub async fn recv(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Option<Value>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Optional disconnect hook: registers a server-side removal that runs if
/// the client vanishes without an explicit leave.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Arm removal of `path` on abrupt disconnect.
    async fn arm_remove(&self, path: &str) -> Result<(), RequestError>;

    /// Cancel the armed removal (called before an explicit leave).
    async fn disarm(&self) -> Result<(), RequestError>;
}

/// Presence implementation that does nothing; for deployments whose
/// datastore offers no disconnect detection.
#[derive(Debug, Clone, Default)]
pub struct NoopPresence;

#[async_trait]
impl Presence for NoopPresence {
    async fn arm_remove(&self, _path: &str) -> Result<(), RequestError> {
        Ok(())
    }

    async fn disarm(&self) -> Result<(), RequestError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

struct Watcher {
    id: u64,
    path: String,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

struct StoreInner {
    root: Map<String, Value>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
}

/// In-memory [`Datastore`]: a JSON tree with snapshot fan-out.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                root: Map::new(),
                watchers: Vec::new(),
                next_watcher: 0,
            })),
        }
    }

    /// A [`Presence`] hook bound to this store; `fire` simulates the
    /// abrupt-disconnect cleanup a real backend would run server-side.
    pub fn presence(&self) -> MemoryPresence {
        MemoryPresence { store: self.clone(), armed: Arc::new(Mutex::new(None)) }
    }

    fn notify(inner: &StoreInner, changed: &str) {
        for watcher in &inner.watchers {
            if paths_related(&watcher.path, changed) {
                let snapshot = node_at(&inner.root, &watcher.path).cloned();
                let _ = watcher.tx.send(snapshot);
            }
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Two paths are related when either is a segment-prefix of the other.
fn paths_related(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

fn node_at<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segs = segments(path).into_iter();
    let first = segs.next()?;
    let mut current = root.get(first)?;
    for seg in segs {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

fn set_at(map: &mut Map<String, Value>, segs: &[&str], value: Value) {
    match segs {
        [] => {}
        [leaf] => {
            map.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Some(child) = entry.as_object_mut() {
                set_at(child, rest, value);
            }
        }
    }
}

/// Remove `segs` from `map`, pruning object nodes left empty.
fn remove_at(map: &mut Map<String, Value>, segs: &[&str]) {
    match segs {
        [] => {}
        [leaf] => {
            map.remove(*leaf);
        }
        [head, rest @ ..] => {
            let mut now_empty = false;
            if let Some(Value::Object(child)) = map.get_mut(*head) {
                remove_at(child, rest);
                now_empty = child.is_empty();
            }
            if now_empty {
                map.remove(*head);
            }
        }
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, RequestError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(node_at(&inner.root, path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), RequestError> {
        let mut inner = self.inner.lock().expect("store lock");
        set_at(&mut inner.root, &segments(path), value);
        MemoryStore::notify(&inner, path);
        Ok(())
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<(), RequestError> {
        let mut inner = self.inner.lock().expect("store lock");
        for (key, value) in partial {
            let child = format!("{path}/{key}");
            set_at(&mut inner.root, &segments(&child), value);
        }
        MemoryStore::notify(&inner, path);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), RequestError> {
        let mut inner = self.inner.lock().expect("store lock");
        remove_at(&mut inner.root, &segments(path));
        MemoryStore::notify(&inner, path);
        Ok(())
    }

    fn push_key(&self, _path: &str) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, RequestError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id;
        {
            let mut inner = self.inner.lock().expect("store lock");
            id = inner.next_watcher;
            inner.next_watcher += 1;
            let initial = node_at(&inner.root, path).cloned();
            let _ = tx.send(initial);
            inner.watchers.push(Watcher { id, path: path.to_string(), tx });
        }
        let store = Arc::clone(&self.inner);
        let cancel = Box::new(move || {
            if let Ok(mut inner) = store.lock() {
                inner.watchers.retain(|w| w.id != id);
            }
        });
        Ok(Subscription::new(rx, cancel))
    }
}

/// Disconnect hook backed by [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryPresence {
    store: MemoryStore,
    armed: Arc<Mutex<Option<String>>>,
}

impl MemoryPresence {
    /// Run the armed removal, as the backend would after losing the
    /// connection. No-op when nothing is armed.
    pub async fn fire(&self) -> Result<(), RequestError> {
        let path = self.armed.lock().expect("presence lock").take();
        match path {
            Some(path) => self.store.remove(&path).await,
            None => Ok(()),
        }
    }

    pub fn armed_path(&self) -> Option<String> {
        self.armed.lock().expect("presence lock").clone()
    }
}

#[async_trait]
impl Presence for MemoryPresence {
    async fn arm_remove(&self, path: &str) -> Result<(), RequestError> {
        *self.armed.lock().expect("presence lock") = Some(path.to_string());
        Ok(())
    }

    async fn disarm(&self) -> Result<(), RequestError> {
        *self.armed.lock().expect("presence lock") = None;
        Ok(())
    }
}
