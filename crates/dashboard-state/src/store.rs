//! Keyed observable store.
//!
//! The store maps dotted keys (`data.dashboardSummary`, `ui.wsStatus`) to JSON
//! values and notifies subscribers synchronously when a key is replaced. One
//! instance is created at bootstrap and handed to every component; clones share
//! the same underlying state.
//!
//! Subscribing to a key that already holds a value invokes the callback
//! immediately with that value, so a view mounted late never misses state that
//! existed before it subscribed.
//!
//! Callbacks always run outside the store lock. They may read, write,
//! subscribe or unsubscribe (including themselves) without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_subscriber_id: u64,
}

impl StoreInner {
    fn is_registered(&self, key: &str, id: u64) -> bool {
        self.subscribers
            .get(key)
            .is_some_and(|subs| subs.iter().any(|s| s.id == id))
    }

    fn remove_subscriber(&mut self, key: &str, id: u64) -> bool {
        let Some(subs) = self.subscribers.get_mut(key) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.subscribers.remove(key);
        }
        removed
    }
}

/// Shared keyed store. Cheap to clone.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("keys", &inner.values.len())
            .field("subscribed_keys", &inner.subscribers.len())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `None` if it was never set.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Current value of `key` decoded into `T`.
    ///
    /// A value that does not decode is logged and treated as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_state(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(key, error = %err, "store value has unexpected shape");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Replace the value under `key` and notify its subscribers.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.inner.lock().values.insert(key.clone(), value.clone());
        self.notify(&key, &value);
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_serialized<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_state(key, value);
        Ok(())
    }

    /// Read-modify-write under the store lock, then notify.
    ///
    /// `f` runs while the lock is held and must not touch the store.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        let next = {
            let mut inner = self.inner.lock();
            let next = f(inner.values.get(&key));
            inner.values.insert(key.clone(), next.clone());
            next
        };
        self.notify(&key, &next);
        next
    }

    /// Register `callback` for changes to `key`.
    ///
    /// If `key` already has a value the callback is invoked with it before this
    /// returns. Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = key.into();
        let callback: Callback = Arc::new(callback);
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            inner
                .subscribers
                .entry(key.clone())
                .or_default()
                .push(Subscriber {
                    id,
                    callback: Arc::clone(&callback),
                });
            (id, inner.values.get(&key).cloned())
        };

        trace!(key = %key, id, "subscribed");
        if let Some(value) = current {
            callback(&value);
        }

        Subscription {
            store: Arc::downgrade(&self.inner),
            key,
            id,
            detached: false,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Drop every value and subscriber. Used at logout and test teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.values.clear();
        inner.subscribers.clear();
    }

    fn notify(&self, key: &str, value: &Value) {
        // Snapshot first so callbacks may mutate the subscriber list.
        let snapshot: Vec<(u64, Callback)> = {
            let inner = self.inner.lock();
            match inner.subscribers.get(key) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.callback)))
                    .collect(),
                None => return,
            }
        };

        for (id, callback) in snapshot {
            // Skip subscribers removed by an earlier callback in this round.
            if !self.inner.lock().is_registered(key, id) {
                continue;
            }
            callback(value);
        }
    }
}

/// Handle returned by [`Store::subscribe`].
///
/// The callback stays registered for as long as this handle lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<Mutex<StoreInner>>,
    key: String,
    id: u64,
    detached: bool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the callback. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the callback registered for the lifetime of the store.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            if inner.lock().remove_subscriber(&self.key, self.id) {
                trace!(key = %self.key, id = self.id, "unsubscribed");
            }
        }
    }
}
