//! Testing utilities for statehouse models and workflows.
//!
//! Enable with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! statehouse = { path = "../statehouse", features = ["testing"] }
//! ```
//!
//! # Recording state changes
//!
//! ```ignore
//! use statehouse::testing::RecordingListener;
//!
//! let recorder = RecordingListener::new();
//! store.subscribe(&["todos"], recorder.listener());
//!
//! store.dispatch(Action::new("todos/add").with("title", "milk"));
//!
//! assert_eq!(recorder.count(), 1);
//! assert_eq!(recorder.last().unwrap().new_state["items"][0], json!("milk"));
//! ```
//!
//! # Waiting for workflows
//!
//! A workflow's first step runs inside `dispatch`, so its first `take` can be
//! met straight away. After a wait is resumed, the workflow continues on its
//! tokio task, so a test must let it reach its next suspension point before
//! dispatching what that one waits for:
//!
//! ```ignore
//! let handle = store.dispatch(Action::new("ns/twice"));
//! store.dispatch(Action::new("ns/tick"));
//! wait_until(|| store.pending_waits().contains(&"ns/tick".to_string())).await;
//! store.dispatch(Action::new("ns/tick"));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::subscriber::StateChange;

/// How long [`wait_until`] polls before panicking.
pub const WAIT_UNTIL_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Recording Listener
// =============================================================================

/// A subscriber that records every state change it sees.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    changes: Arc<Mutex<Vec<StateChange>>>,
    latch: Arc<Notify>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener closure to pass to `Store::subscribe`.
    pub fn listener(&self) -> impl Fn(&StateChange) + Send + Sync + 'static {
        let changes = self.changes.clone();
        let latch = self.latch.clone();
        move |change: &StateChange| {
            match changes.lock() {
                Ok(mut guard) => guard.push(change.clone()),
                Err(poisoned) => poisoned.into_inner().push(change.clone()),
            }
            latch.notify_waiters();
        }
    }

    pub fn changes(&self) -> Vec<StateChange> {
        match self.changes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.changes().len()
    }

    pub fn last(&self) -> Option<StateChange> {
        self.changes().pop()
    }

    /// Action types of every recorded change, in order.
    pub fn action_types(&self) -> Vec<String> {
        self.changes().into_iter().map(|c| c.action_type).collect()
    }

    pub fn clear(&self) {
        match self.changes.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Wait until at least `n` changes have been recorded.
    pub async fn wait_for(&self, n: usize) {
        loop {
            let notified = self.latch.notified();
            if self.count() >= n {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Event Latch
// =============================================================================

/// A countdown latch for "N things happened" assertions.
///
/// ```ignore
/// let latch = shared_latch(2);
/// let model = Model::new("ns", json!(null)).effect("job", {
///     let latch = latch.clone();
///     move |_action, _fx| {
///         let latch = latch.clone();
///         async move { latch.dec(); Ok(Value::Null) }
///     }
/// });
/// ```
#[derive(Debug)]
pub struct EventLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl EventLatch {
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Count one occurrence.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("EventLatch decremented below zero - more events than expected");
        }
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero.
    pub async fn await_zero(&self) {
        loop {
            // Register before checking so a dec() in between is not missed.
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

pub type SharedEventLatch = Arc<EventLatch>;

pub fn shared_latch(expected: usize) -> SharedEventLatch {
    Arc::new(EventLatch::new(expected))
}

// =============================================================================
// Polling
// =============================================================================

/// Yield to the runtime until `condition` holds.
///
/// # Panics
///
/// Panics after [`WAIT_UNTIL_TIMEOUT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    if tokio::time::timeout(WAIT_UNTIL_TIMEOUT, poll).await.is_err() {
        panic!("condition not met within {:?}", WAIT_UNTIL_TIMEOUT);
    }
}
