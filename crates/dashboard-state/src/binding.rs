//! Subscribes views to store keys.
//!
//! Views are read-only: they render what the store holds and request changes
//! through an [`ActionDispatcher`](crate::action::ActionDispatcher).

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::store::{Store, Subscription};

/// Something that renders store values.
pub trait View: Send + Sync + 'static {
    fn render(&self, key: &str, value: &Value);
}

impl<F> View for F
where
    F: Fn(&str, &Value) + Send + Sync + 'static,
{
    fn render(&self, key: &str, value: &Value) {
        self(key, value)
    }
}

/// Live subscriptions of one mounted view. Dropping it unmounts the view.
#[must_use = "dropping a ViewBinding unmounts the view"]
#[derive(Debug, Default)]
pub struct ViewBinding {
    subscriptions: Vec<Subscription>,
}

impl ViewBinding {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(Subscription::key)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Merge another binding into this one.
    pub fn extend(&mut self, other: ViewBinding) {
        self.subscriptions.extend(other.subscriptions);
    }

    pub fn unmount(self) {
        trace!(keys = self.subscriptions.len(), "view unmounted");
        drop(self);
    }
}

/// Subscribe `view` to every key in `keys`.
///
/// Keys that already hold a value are rendered immediately.
pub fn bind<V, I, K>(store: &Store, keys: I, view: Arc<V>) -> ViewBinding
where
    V: View + ?Sized,
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    let subscriptions = keys
        .into_iter()
        .map(|key| {
            let key: String = key.into();
            let view = Arc::clone(&view);
            let rendered_key = key.clone();
            store.subscribe(key, move |value| view.render(&rendered_key, value))
        })
        .collect();
    ViewBinding { subscriptions }
}

/// Subscribe to one field of a composite key.
///
/// `pointer` is a JSON pointer into the value under `key` (`/statusBreakdown/pending`).
/// The callback fires only when the selected sub-value differs from the last
/// one it saw; a missing field selects `null`.
pub fn bind_selector<F>(
    store: &Store,
    key: impl Into<String>,
    pointer: impl Into<String>,
    callback: F,
) -> ViewBinding
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    let pointer = pointer.into();
    let last: Mutex<Option<Value>> = Mutex::new(None);
    let subscription = store.subscribe(key, move |value| {
        let selected = value.pointer(&pointer).cloned().unwrap_or(Value::Null);
        {
            let mut last = last.lock();
            if last.as_ref() == Some(&selected) {
                return;
            }
            *last = Some(selected.clone());
        }
        callback(&selected);
    });
    ViewBinding {
        subscriptions: vec![subscription],
    }
}
