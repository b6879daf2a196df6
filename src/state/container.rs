//! State Container
//!
//! Generic observable state holder. Updates produce a new immutable snapshot,
//! are optionally persisted and broadcast to sibling containers, and notify
//! every subscriber with `(new, old)`.
//!
//! Updates issued by a listener on the dispatching thread are queued and
//! applied by the running dispatch loop once the current round finishes, never
//! recursively. Updates from other threads wait for the running round and are
//! applied before `set_state` returns.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::persistence::SharedBackend;
use crate::state::sync::{SyncHub, SyncMessage};

type Listener<S> = Arc<dyn Fn(&S, &S) + Send + Sync>;
type Update<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Pending<S> {
    /// Local change: persisted and broadcast
    Local(Update<S>),
    /// Change received from a sibling: applied without re-broadcast
    Remote(S),
}

struct Dispatch<S> {
    current: Arc<S>,
    queue: VecDeque<Pending<S>>,
    /// Thread running the dispatch loop, if any
    dispatcher: Option<ThreadId>,
}

struct Persistence {
    backend: SharedBackend,
    key: String,
}

struct Inner<S> {
    dispatch: Mutex<Dispatch<S>>,
    /// Held for a whole dispatch loop; one thread dispatches at a time
    gate: Mutex<()>,
    listeners: Mutex<Vec<(u64, Listener<S>)>>,
    next_listener_id: AtomicU64,
    persistence: Option<Persistence>,
    sync: Mutex<Option<(SyncHub, JoinHandle<()>)>>,
    origin: String,
}

// == State Container ==
/// Clonable handle to an observable state value.
pub struct StateContainer<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for StateContainer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for StateContainer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}

// == Subscription ==
/// Handle returned by [`StateContainer::subscribe`].
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

impl<S> StateContainer<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an in-memory container.
    pub fn new(initial: S) -> Self {
        Self::build(initial, None)
    }

    /// Creates a container persisted under `key`, restoring any saved state.
    ///
    /// A missing or undecodable saved state falls back to `initial`.
    pub fn persistent(initial: S, backend: SharedBackend, key: impl Into<String>) -> Self {
        let key = key.into();
        let restored = match backend.read(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<S>(&raw) {
                Ok(state) => Some(state),
                Err(err) => {
                    warn!(key = %key, error = %err, "Discarding undecodable persisted state");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to read persisted state");
                None
            }
        };
        Self::build(restored.unwrap_or(initial), Some(Persistence { backend, key }))
    }

    fn build(initial: S, persistence: Option<Persistence>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatch: Mutex::new(Dispatch {
                    current: Arc::new(initial),
                    queue: VecDeque::new(),
                    dispatcher: None,
                }),
                gate: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                persistence,
                sync: Mutex::new(None),
                origin: uuid::Uuid::new_v4().to_string(),
            }),
        }
    }

    // == Get State ==
    /// Current snapshot. Snapshots are never mutated in place.
    pub fn get_state(&self) -> Arc<S> {
        Arc::clone(&self.inner.dispatch.lock().current)
    }

    // == Set State ==
    /// Applies `update` to a copy of the current state and publishes the result.
    pub fn set_state(&self, update: impl FnOnce(&mut S) + Send + 'static) {
        self.enqueue(Pending::Local(Box::new(update)));
    }

    // == Merge ==
    /// Merges a partial JSON object into the state (RFC 7386 merge patch).
    ///
    /// A patch that does not produce a valid state is logged and ignored.
    pub fn merge(&self, patch: Value) {
        self.set_state(move |current| {
            let mut doc = match serde_json::to_value(&*current) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(error = %err, "State is not representable as JSON; merge skipped");
                    return;
                }
            };
            merge_patch(&mut doc, &patch);
            match serde_json::from_value::<S>(doc) {
                Ok(next) => *current = next,
                Err(err) => warn!(error = %err, "Merge patch produced an invalid state; ignored"),
            }
        });
    }

    // == Subscribe ==
    /// Registers a listener called with `(new, old)` after every change,
    /// including changes received from sibling containers.
    pub fn subscribe(&self, listener: impl Fn(&S, &S) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));

        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    // == Cross-Context Sync ==
    /// Joins `hub`: local changes are broadcast, sibling changes are applied.
    ///
    /// Must be called from within a tokio runtime. Joining again replaces the
    /// previous hub.
    pub fn enable_sync(&self, hub: &SyncHub) {
        let mut receiver = hub.subscribe();
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let origin = self.inner.origin.clone();

        let task = tokio::spawn(async move {
            loop {
                let message = match receiver.recv().await {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "State sync receiver lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if message.origin == origin {
                    continue;
                }
                let Some(inner) = weak.upgrade() else { break };
                match serde_json::from_value::<S>(message.state) {
                    Ok(state) => StateContainer { inner }.enqueue(Pending::Remote(state)),
                    Err(err) => warn!(error = %err, "Ignoring undecodable synced state"),
                }
            }
        });

        if let Some((_, previous)) = self.inner.sync.lock().replace((hub.clone(), task)) {
            previous.abort();
        }
    }

    /// Leaves the sync hub, if joined.
    pub fn disable_sync(&self) {
        if let Some((_, task)) = self.inner.sync.lock().take() {
            task.abort();
        }
    }

    // == Dispatch Loop ==
    fn enqueue(&self, pending: Pending<S>) {
        let me = thread::current().id();
        {
            let mut dispatch = self.inner.dispatch.lock();
            if dispatch.dispatcher == Some(me) {
                debug!("Deferring state update issued during notification");
                dispatch.queue.push_back(pending);
                return;
            }
        }

        let _gate = self.inner.gate.lock();
        {
            let mut dispatch = self.inner.dispatch.lock();
            dispatch.dispatcher = Some(me);
            dispatch.queue.push_back(pending);
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let (old, new, broadcast) = {
                let mut dispatch = self.inner.dispatch.lock();
                let Some(pending) = dispatch.queue.pop_front() else {
                    dispatch.dispatcher = None;
                    return;
                };
                let old = Arc::clone(&dispatch.current);
                let (next, broadcast) = match pending {
                    Pending::Local(update) => {
                        let mut next = (*old).clone();
                        // A panicking updater leaves the state unchanged
                        match catch_unwind(AssertUnwindSafe(|| update(&mut next))) {
                            Ok(()) => (next, true),
                            Err(_) => {
                                warn!("State updater panicked; update dropped");
                                continue;
                            }
                        }
                    }
                    Pending::Remote(state) => (state, false),
                };
                let new = Arc::new(next);
                dispatch.current = Arc::clone(&new);
                (old, new, broadcast)
            };

            self.persist(&new);
            if broadcast {
                self.broadcast(&new);
            }
            self.notify_listeners(&new, &old);
        }
    }

    fn persist(&self, state: &S) {
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        let result = serde_json::to_string(state)
            .map_err(crate::persistence::PersistenceError::from)
            .and_then(|raw| persistence.backend.write(&persistence.key, &raw));
        if let Err(err) = result {
            warn!(key = %persistence.key, error = %err, "Failed to persist state");
        }
    }

    fn broadcast(&self, state: &S) {
        let hub = match &*self.inner.sync.lock() {
            Some((hub, _)) => hub.clone(),
            None => return,
        };
        match serde_json::to_value(state) {
            Ok(value) => hub.publish(SyncMessage {
                origin: self.inner.origin.clone(),
                state: value,
            }),
            Err(err) => warn!(error = %err, "Failed to serialize state for sync"),
        }
    }

    fn notify_listeners(&self, new: &S, old: &S) {
        let listeners: Vec<Listener<S>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(new, old))).is_err() {
                warn!("State listener panicked");
            }
        }
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        if let Some((_, task)) = self.sync.get_mut().take() {
            task.abort();
        }
    }
}

/// RFC 7386 JSON merge patch: objects merge recursively, `null` deletes,
/// everything else replaces.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
