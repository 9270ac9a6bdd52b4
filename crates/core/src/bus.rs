// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process publish/subscribe event bus.
//!
//! Supports exact-match, one-shot, and wildcard subscriptions. A wildcard
//! pattern is a literal string in which `*` matches any run of characters,
//! anchored at both ends; every other character is literal. Dispatch order
//! per publish: exact subscribers, then one-shot subscribers (cleared after
//! dispatch), then wildcard subscribers, each group in registration order.
//!
//! `publish` fires-and-forgets handler futures; `publish_and_wait` returns
//! only after every handler has settled. A failing handler is logged and
//! skipped without affecting the others.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::error::CoreError;

/// An event as delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Future returned by an event handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>>;

/// An event handler. Receives the full event (name and data).
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Token returned by `subscribe`; pass to `unsubscribe` to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: u64,
    pattern: String,
    handler: EventHandler,
}

impl Subscription {
    fn matches(&self, event: &str) -> bool {
        if self.pattern.contains('*') {
            wildcard_match(&self.pattern, event)
        } else {
            self.pattern == event
        }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    exact: Vec<Subscription>,
    once: Vec<Subscription>,
    wildcard: Vec<Subscription>,
}

/// Clone-shared event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to `pattern`. Patterns containing `*` are
    /// wildcard subscriptions; everything else is exact-match.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let pattern = pattern.into();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let sub = Subscription {
            id,
            pattern: pattern.clone(),
            handler,
        };
        if pattern.contains('*') {
            inner.wildcard.push(sub);
        } else {
            inner.exact.push(sub);
        }
        SubscriptionId(id)
    }

    /// Subscribe a handler that is removed after its first dispatch.
    pub fn subscribe_once(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.once.push(Subscription {
            id,
            pattern: pattern.into(),
            handler,
        });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before =
            inner.exact.len() + inner.once.len() + inner.wildcard.len();
        inner.exact.retain(|s| s.id != id.0);
        inner.once.retain(|s| s.id != id.0);
        inner.wildcard.retain(|s| s.id != id.0);
        before != inner.exact.len() + inner.once.len() + inner.wildcard.len()
    }

    /// Collect matching handlers in dispatch order, clearing matched
    /// one-shot subscriptions. Copy-on-iterate: the returned handlers are
    /// detached from the subscription lists, so handlers may freely
    /// subscribe or unsubscribe during dispatch.
    fn collect(&self, event: &str) -> Vec<EventHandler> {
        let mut inner = self.inner.lock();
        let mut handlers: Vec<EventHandler> = Vec::new();
        for sub in &inner.exact {
            if sub.matches(event) {
                handlers.push(Arc::clone(&sub.handler));
            }
        }
        let mut remaining = Vec::with_capacity(inner.once.len());
        for sub in inner.once.drain(..) {
            if sub.matches(event) {
                handlers.push(Arc::clone(&sub.handler));
            } else {
                remaining.push(sub);
            }
        }
        inner.once = remaining;
        for sub in &inner.wildcard {
            if sub.matches(event) {
                handlers.push(Arc::clone(&sub.handler));
            }
        }
        handlers
    }

    /// Publish an event. Handler futures are spawned and not awaited;
    /// failures are logged from the spawned task.
    pub fn publish(&self, name: impl Into<String>, data: Value) {
        let event = Event::new(name, data);
        for handler in self.collect(&event.name) {
            let ev = event.clone();
            let fut = handler(ev);
            let name = event.name.clone();
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    warn!(event = %name, error = %e, "event handler failed");
                }
            });
        }
    }

    /// Publish an event and wait for every handler (including asynchronous
    /// ones) to settle. Handlers run sequentially in dispatch order.
    pub async fn publish_and_wait(&self, name: impl Into<String>, data: Value) {
        let event = Event::new(name, data);
        for handler in self.collect(&event.name) {
            if let Err(e) = handler(event.clone()).await {
                warn!(event = %event.name, error = %e, "event handler failed");
            }
        }
    }

    /// Number of live subscriptions, all kinds.
    pub fn subscription_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.exact.len() + inner.once.len() + inner.wildcard.len()
    }
}

/// Anchored wildcard match: `*` matches any run of characters, everything
/// else is literal.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !text.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    let mut segments: Vec<&str> = parts.collect();
    let Some(last) = segments.pop() else {
        // No '*' in the pattern: exact comparison already done above.
        return pos == text.len();
    };
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        match text[pos..].find(segment) {
            Some(i) => pos += i + segment.len(),
            None => return false,
        }
    }
    text.len() >= pos + last.len() && text[pos..].ends_with(last)
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
