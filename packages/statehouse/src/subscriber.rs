//! State-change subscribers.
//!
//! Subscribers observe reducer results. They cannot veto or alter a change;
//! they are called after the new state is stored, outside the store lock, so
//! a listener may dispatch further actions.
//!
//! # Lifecycle
//!
//! ```text
//! Subscriber::new(["todos"])
//!     │
//!     ▼ mount()      id generated on first mount, later mounts are no-ops
//! SubscriberTable["todos"][id] = listener
//!     │
//!     ▼ unmount()    last listener gone => "todos" entry removed
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::store::Store;

/// Identifies one registered listener across all its namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivered to listeners when a reducer changes a namespace's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    /// The action type that caused the change.
    #[serde(rename = "type")]
    pub action_type: String,
    pub new_state: Arc<Value>,
}

/// A state-change callback.
pub type Listener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Listeners per namespace.
#[derive(Default)]
pub struct SubscriberTable {
    entries: DashMap<String, HashMap<SubscriptionId, Listener>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on every namespace under a fresh id.
    pub fn subscribe<S: AsRef<str>>(&self, namespaces: &[S], listener: Listener) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.insert(id, namespaces, listener);
        id
    }

    pub(crate) fn insert<S: AsRef<str>>(&self, id: SubscriptionId, namespaces: &[S], listener: Listener) {
        for namespace in namespaces {
            self.entries
                .entry(namespace.as_ref().to_string())
                .or_default()
                .insert(id, listener.clone());
        }
    }

    /// Remove `id` from each namespace, dropping namespaces left empty.
    pub fn unsubscribe<S: AsRef<str>>(&self, id: SubscriptionId, namespaces: &[S]) {
        for namespace in namespaces {
            let namespace = namespace.as_ref();
            if let Some(mut listeners) = self.entries.get_mut(namespace) {
                listeners.remove(&id);
            }
            self.entries.remove_if(namespace, |_, listeners| listeners.is_empty());
        }
    }

    /// Listeners currently registered on `namespace`.
    ///
    /// Returned as an owned list so callers can invoke them without holding
    /// a map shard lock.
    pub(crate) fn listeners(&self, namespace: &str) -> SmallVec<[Listener; 4]> {
        self.entries
            .get(namespace)
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.entries.get(namespace).map(|l| l.len()).unwrap_or(0)
    }

    /// Whether `namespace` has an entry at all.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.entries.contains_key(namespace)
    }
}

impl fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberTable")
            .field("namespaces", &self.entries.len())
            .finish()
    }
}

/// One logical subscriber, such as a mounted view.
///
/// The id is generated lazily on the first [`mount`](Subscriber::mount), and
/// mounting again is a no-op, so a view that re-renders can call `mount`
/// unconditionally.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: Option<SubscriptionId>,
    namespaces: Vec<String>,
}

impl Subscriber {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// Register `listener` with `store` unless already mounted.
    pub fn mount<F>(&mut self, store: &Store, listener: F) -> SubscriptionId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        if let Some(id) = self.id {
            return id;
        }
        let id = SubscriptionId::new();
        store
            .subscribers()
            .insert(id, &self.namespaces, Arc::new(listener));
        self.id = Some(id);
        id
    }

    /// Deregister from `store`. Returns `false` if not mounted.
    pub fn unmount(&mut self, store: &Store) -> bool {
        match self.id.take() {
            Some(id) => {
                store.subscribers().unsubscribe(id, &self.namespaces);
                true
            }
            None => false,
        }
    }

    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }
}
