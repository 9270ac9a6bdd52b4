// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reusable table-driven state machine with async pre/post transition hooks.
//!
//! A transition is `(from, event) -> to`. `transition` fails without side
//! effects when the pair is absent from the table; on success it awaits all
//! pre-hooks, updates the state, then awaits all post-hooks. `force`
//! bypasses the table and the hooks.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

use crate::error::CoreError;

/// Future returned by a transition hook.
pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Hook invoked with (from, event, to). Pre-hooks run before the state
/// updates, post-hooks after.
pub type TransitionHook<S, E> = Box<dyn Fn(S, E, S) -> HookFuture + Send + Sync>;

pub struct StateMachine<S, E> {
    state: S,
    table: HashMap<(S, E), S>,
    pre_hooks: Vec<TransitionHook<S, E>>,
    post_hooks: Vec<TransitionHook<S, E>>,
}

impl<S, E> StateMachine<S, E>
where
    S: Clone + Eq + Hash + Debug + Send,
    E: Clone + Eq + Hash + Debug + Send,
{
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            table: HashMap::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    /// Builder-style transition registration.
    pub fn with_transition(mut self, from: S, event: E, to: S) -> Self {
        self.add_transition(from, event, to);
        self
    }

    pub fn add_transition(&mut self, from: S, event: E, to: S) {
        self.table.insert((from, event), to);
    }

    pub fn add_pre_hook(&mut self, hook: TransitionHook<S, E>) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: TransitionHook<S, E>) {
        self.post_hooks.push(hook);
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Whether `event` has a transition from the current state.
    pub fn can(&self, event: &E) -> bool {
        self.table
            .contains_key(&(self.state.clone(), event.clone()))
    }

    /// Apply `event`. Returns the new state, or an error (with no side
    /// effects) if the table has no entry for (current, event).
    pub async fn transition(&mut self, event: E) -> Result<S, CoreError> {
        let from = self.state.clone();
        let to = self
            .table
            .get(&(from.clone(), event.clone()))
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "no transition from {:?} on {:?}",
                    from, event
                ))
            })?;

        for hook in &self.pre_hooks {
            hook(from.clone(), event.clone(), to.clone()).await;
        }
        self.state = to.clone();
        for hook in &self.post_hooks {
            hook(from.clone(), event.clone(), to.clone()).await;
        }
        Ok(to)
    }

    /// Set the state directly, bypassing the table and hooks.
    pub fn force(&mut self, state: S) {
        self.state = state;
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
