// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed state store with per-key subscriber fan-out.
//!
//! `set` invokes subscribers with (new, old); `delete` with (None, old).
//! Subscriber lists are copied before iteration so a subscriber may
//! unsubscribe (itself or others) during dispatch. Subscriber failures are
//! logged and isolated. No ordering is guaranteed between subscribers of
//! distinct keys.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::error::CoreError;

/// Subscriber invoked with (new, old) on change, (None, old) on delete.
pub type StoreSubscriber =
    Arc<dyn Fn(Option<&Value>, Option<&Value>) -> Result<(), CoreError> + Send + Sync>;

/// Token for removing a store subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreSubscriptionId(u64);

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<(u64, StoreSubscriber)>>,
    next_id: u64,
}

/// Clone-shared keyed store.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().values.keys().cloned().collect()
    }

    /// Set `key` to `value`, notifying subscribers with (new, old).
    pub fn set(&self, key: &str, value: Value) {
        let (old, subs) = {
            let mut inner = self.inner.lock();
            let old = inner.values.insert(key.to_string(), value.clone());
            (old, snapshot_subscribers(&inner, key))
        };
        notify(key, &subs, Some(&value), old.as_ref());
    }

    /// Remove `key`, notifying subscribers with (None, old). Returns true if
    /// the key existed.
    pub fn delete(&self, key: &str) -> bool {
        let (old, subs) = {
            let mut inner = self.inner.lock();
            let old = inner.values.remove(key);
            (old, snapshot_subscribers(&inner, key))
        };
        match old {
            Some(old) => {
                notify(key, &subs, None, Some(&old));
                true
            }
            None => false,
        }
    }

    /// Replace the value at `key` with `f(current)`.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<Value>) -> Value) {
        let current = self.get(key);
        self.set(key, f(current));
    }

    /// Subscribe to changes of one key.
    pub fn subscribe(&self, key: &str, subscriber: StoreSubscriber) -> StoreSubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push((id, subscriber));
        StoreSubscriptionId(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: StoreSubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        for subs in inner.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id.0);
            if subs.len() != before {
                return true;
            }
        }
        false
    }
}

fn snapshot_subscribers(inner: &StoreInner, key: &str) -> Vec<StoreSubscriber> {
    inner
        .subscribers
        .get(key)
        .map(|subs| subs.iter().map(|(_, s)| Arc::clone(s)).collect())
        .unwrap_or_default()
}

fn notify(key: &str, subs: &[StoreSubscriber], new: Option<&Value>, old: Option<&Value>) {
    for sub in subs {
        if let Err(e) = sub(new, old) {
            warn!(key = %key, error = %e, "store subscriber failed");
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
