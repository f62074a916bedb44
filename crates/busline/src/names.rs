//! Bus name bookkeeping.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Tracks the connection's bus-assigned unique name and the well-known
/// names it currently owns.
///
/// Reads take a shared lock so concurrent `is_known_name` checks do not
/// serialize; writes take the exclusive lock.
#[derive(Debug, Default)]
pub struct NameTracker {
    state: RwLock<NameState>,
}

#[derive(Debug, Default)]
struct NameState {
    unique: Option<String>,
    acquired: HashSet<String>,
}

impl NameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the bus-assigned identity. Single slot, last write wins.
    pub fn acquire_unique_connection_name(&self, name: impl Into<String>) {
        self.state.write().unique = Some(name.into());
    }

    /// The unique name, once the bus has assigned one.
    pub fn unique_name(&self) -> Option<String> {
        self.state.read().unique.clone()
    }

    /// Record ownership of a well-known name.
    pub fn acquire_name(&self, name: impl Into<String>) {
        self.state.write().acquired.insert(name.into());
    }

    /// Drop ownership of a well-known name.
    pub fn lose_name(&self, name: &str) {
        self.state.write().acquired.remove(name);
    }

    /// True iff `name` is the unique name or an acquired well-known name.
    pub fn is_known_name(&self, name: &str) -> bool {
        let state = self.state.read();
        state.unique.as_deref() == Some(name) || state.acquired.contains(name)
    }

    /// The unique name followed by all acquired names. Order among
    /// acquired names is unspecified.
    pub fn list_known_names(&self) -> Vec<String> {
        let state = self.state.read();
        let mut names = Vec::with_capacity(1 + state.acquired.len());
        if let Some(unique) = &state.unique {
            names.push(unique.clone());
        }
        names.extend(state.acquired.iter().cloned());
        names
    }
}
