//! Session registry: which account name owns which live connection.
//!
//! The registry is the sole source of truth for "is user X currently
//! reachable for direct delivery". It enforces at most one active
//! session per account name; a second claim for a bound name is
//! rejected and the claiming connection is dropped by the dispatcher.

use std::collections::HashMap;

use crate::conn::ConnId;

/// Runtime (non-persisted) binding of account names to connections.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    bindings: HashMap<String, ConnId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `username` to `conn`.
    ///
    /// Returns `false` if the name is already bound to a *different*
    /// live connection; re-binding the same connection is a no-op that
    /// succeeds.
    pub fn bind(&mut self, username: &str, conn: ConnId) -> bool {
        match self.bindings.get(username) {
            Some(existing) if *existing != conn => false,
            _ => {
                self.bindings.insert(username.to_string(), conn);
                true
            }
        }
    }

    /// Removes the binding for `username`. Idempotent.
    pub fn unbind(&mut self, username: &str) {
        self.bindings.remove(username);
    }

    /// The connection bound to `username`, if any.
    pub fn find(&self, username: &str) -> Option<ConnId> {
        self.bindings.get(username).copied()
    }

    /// True if `username` has a live session.
    pub fn is_active(&self, username: &str) -> bool {
        self.bindings.contains_key(username)
    }

    /// All account names with a live session.
    pub fn all_active(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }
}
