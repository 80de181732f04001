//! Per-namespace state values.
//!
//! Each namespace holds exactly one `Arc<Value>`. Reducer results replace the
//! stored value; values are never mutated in place, so an `Arc` handed out by
//! [`Store::get_state`](crate::Store::get_state) stays valid and unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Shallow copy of every namespace's state.
///
/// Cloning the map clones the `Arc`s, not the values behind them.
pub type Snapshot = HashMap<String, Arc<Value>>;

#[derive(Debug, Default)]
pub(crate) struct StateStore {
    values: HashMap<String, Arc<Value>>,
}

impl StateStore {
    pub fn insert(&mut self, namespace: &str, value: Value) {
        self.values.insert(namespace.to_string(), Arc::new(value));
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Value>> {
        self.values.get(namespace).cloned()
    }

    /// Store `value` for `namespace` and return the shared handle to it.
    pub fn replace(&mut self, namespace: &str, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        self.values.insert(namespace.to_string(), value.clone());
        value
    }

    pub fn remove(&mut self, namespace: &str) -> Option<Arc<Value>> {
        self.values.remove(namespace)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.values.clone()
    }
}

/// Whether a reducer produced a structurally different value.
///
/// Deep equality on `serde_json::Value` is total. Anything that cannot be
/// compared counts as changed.
pub(crate) fn state_changed(previous: &Value, next: &Value) -> bool {
    previous != next
}
