// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared method table: plugins register handlers here, the server looks
//! them up by name. Registration order is preserved for introspection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use od_core::{CoreError, ErrorCode};

/// Identifier of the connection a request arrived on.
pub type ConnId = u64;

/// Future returned by a method handler.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, CoreError>> + Send>>;

/// A method handler: decoded params plus the originating connection.
pub type MethodHandler = Arc<dyn Fn(Value, ConnId) -> MethodFuture + Send + Sync>;

/// Clone-shared method table.
#[derive(Clone, Default)]
pub struct Methods {
    table: Arc<RwLock<IndexMap<String, MethodHandler>>>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate names are rejected.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: MethodHandler,
    ) -> Result<(), CoreError> {
        let name = name.into();
        let mut table = self.table.write();
        if table.contains_key(&name) {
            return Err(CoreError::new(
                ErrorCode::InvalidArgument,
                format!("RPC method already registered: {name}"),
            ));
        }
        table.insert(name, handler);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<MethodHandler> {
        self.table.read().get(name).cloned()
    }

    /// Registered method names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.table.read().keys().cloned().collect()
    }
}
