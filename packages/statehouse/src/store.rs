//! The store: model registry, action router, and the entry point for effects.
//!
//! ```text
//! dispatch(action)
//!     │
//!     ├─► namespace unregistered? ── warn, Unrouted
//!     │
//!     ├─► pending wait on this type? ── resume that workflow with the payload
//!     │
//!     ├─► effect for key? ── (takeLatest: cancel previous) spawn workflow ─► Effect(handle)
//!     │
//!     └─► reducer for key? ── reduce, compare ─► replace + notify subscribers
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use statehouse::{Action, Model, StoreBuilder};
//!
//! let store = StoreBuilder::new()
//!     .with_model(
//!         Model::new("counter", json!({ "n": 0 }))
//!             .reducer("inc", |s, _| json!({ "n": s["n"].as_i64().unwrap_or(0) + 1 })),
//!     )
//!     .build();
//!
//! store.dispatch(Action::new("counter/inc"));
//! assert_eq!(*store.get_state("counter").unwrap(), json!({ "n": 1 }));
//! ```
//!
//! # Sequencing
//!
//! One mutex guards state, models and the scheduler tables. Each dispatch
//! resolves waits, tracks a new workflow, or runs its reducer inside a single
//! critical section. Reducers run under the lock and must not dispatch.
//!
//! After the lock is released, a new workflow runs its first step on the
//! dispatching thread. Its first `take` is registered, or its first `put`
//! dispatched, before `dispatch` returns. Subscribers also run after the lock
//! is released, so they may dispatch.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use anyhow::Result;
use chrono::Utc;
use futures::future::{self, AbortHandle, Abortable, BoxFuture};
use futures::task::noop_waker_ref;
use futures::{FutureExt, TryFutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::action::{Action, Route};
use crate::effect::Effects;
use crate::error::StoreError;
use crate::model::{EffectEntry, Model, ModelInfo, TakeMode};
use crate::scheduler::{LiveWorkflow, Scheduler, WorkflowId, WorkflowInfo};
use crate::state::{state_changed, Snapshot, StateStore};
use crate::subscriber::{StateChange, SubscriberTable, SubscriptionId};

// =============================================================================
// Configuration
// =============================================================================

/// Store behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Log dispatches to unregistered namespaces at `warn`.
    pub warn_unrouted: bool,
    /// Log dispatches that match no reducer or effect at `debug`.
    pub log_unhandled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            warn_unrouted: true,
            log_unhandled: false,
        }
    }
}

// =============================================================================
// Dispatch Outcome
// =============================================================================

/// What a dispatch did.
///
/// `Dispatched` can be awaited: effect outcomes resolve with the workflow's
/// final value, everything else resolves to `Ok(None)` immediately.
///
/// ```ignore
/// let value = store.dispatch(Action::new("search/run")).await?;
/// ```
#[derive(Debug)]
pub enum Dispatched {
    /// The namespace is not registered.
    Unrouted,
    /// The namespace has no reducer or effect for the key.
    Unhandled,
    /// A reducer ran; `changed` is false when its result equalled the old state.
    Reduced { changed: bool },
    /// An effect workflow was started.
    Effect(EffectHandle),
}

impl Dispatched {
    pub fn is_effect(&self) -> bool {
        matches!(self, Dispatched::Effect(_))
    }

    /// Whether a reducer replaced the namespace state.
    pub fn changed(&self) -> bool {
        matches!(self, Dispatched::Reduced { changed: true })
    }

    pub fn into_effect(self) -> Option<EffectHandle> {
        match self {
            Dispatched::Effect(handle) => Some(handle),
            _ => None,
        }
    }
}

impl IntoFuture for Dispatched {
    type Output = Result<Option<Value>>;
    type IntoFuture = BoxFuture<'static, Result<Option<Value>>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Dispatched::Effect(handle) => handle.map_ok(Some).boxed(),
            _ => future::ready(Ok(None)).boxed(),
        }
    }
}

// =============================================================================
// Effect Handle
// =============================================================================

enum HandleState {
    Waiting(oneshot::Receiver<Result<Value>>),
    Failed(Option<StoreError>),
    Abandoned,
}

/// Resolves when an effect workflow finishes.
///
/// If the workflow is cancelled (superseded under `takeLatest`, its namespace
/// unregistered, or the store shut down) the handle never resolves. Use
/// [`EffectHandle::is_abandoned`] after polling, or a timeout, to detect it.
pub struct EffectHandle {
    workflow: Option<WorkflowId>,
    state: HandleState,
}

impl EffectHandle {
    fn new(workflow: WorkflowId, receiver: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            workflow: Some(workflow),
            state: HandleState::Waiting(receiver),
        }
    }

    fn failed(error: StoreError) -> Self {
        Self {
            workflow: None,
            state: HandleState::Failed(Some(error)),
        }
    }

    /// The workflow this handle follows, if one was started.
    pub fn workflow_id(&self) -> Option<WorkflowId> {
        self.workflow
    }

    /// Whether the workflow was discarded without finishing.
    ///
    /// Only known once the handle has been polled after the cancellation.
    pub fn is_abandoned(&self) -> bool {
        matches!(self.state, HandleState::Abandoned)
    }
}

impl Future for EffectHandle {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            HandleState::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Some(result),
                Poll::Ready(Err(_)) => None,
                Poll::Pending => return Poll::Pending,
            },
            HandleState::Failed(error) => Some(Err(match error.take() {
                Some(error) => error.into(),
                None => anyhow::anyhow!("effect handle polled after completion"),
            })),
            HandleState::Abandoned => return Poll::Pending,
        };
        match outcome {
            Some(result) => Poll::Ready(result),
            None => {
                // The sender went away without a result: the workflow was cancelled.
                this.state = HandleState::Abandoned;
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            HandleState::Waiting(_) => "waiting",
            HandleState::Failed(_) => "failed",
            HandleState::Abandoned => "abandoned",
        };
        f.debug_struct("EffectHandle")
            .field("workflow", &self.workflow)
            .field("state", &state)
            .finish()
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
struct Core {
    state: StateStore,
    models: HashMap<String, Model>,
    scheduler: Scheduler,
}

struct Inner {
    core: Mutex<Core>,
    subscribers: SubscriberTable,
    config: StoreConfig,
    runtime: Option<Handle>,
}

/// A namespaced state store with an effect scheduler.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// An empty store with default configuration.
    pub fn new() -> Self {
        StoreBuilder::new().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        match self.inner.core.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Model registry
    // -------------------------------------------------------------------------

    /// Register a model. Returns `false` (and changes nothing) if its
    /// namespace is already registered.
    pub fn register_model(&self, model: Model) -> bool {
        let mut core = self.lock();
        let namespace = model.namespace().to_string();
        if core.models.contains_key(&namespace) {
            debug!(namespace = %namespace, "model already registered");
            return false;
        }
        core.state.insert(&namespace, model.initial_state().clone());
        core.models.insert(namespace.clone(), model);
        info!(namespace = %namespace, "model registered");
        true
    }

    /// Unregister a namespace: its state, model, workflows and pending waits.
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister_model(&self, namespace: &str) -> bool {
        let mut core = self.lock();
        core.state.remove(namespace);
        let cancelled = core.scheduler.purge_namespace(namespace);
        let removed = core.models.remove(namespace).is_some();
        if removed {
            info!(namespace = %namespace, cancelled, "model unregistered");
        }
        removed
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.lock().models.contains_key(namespace)
    }

    /// Registered models, sorted by namespace.
    pub fn models(&self) -> Vec<ModelInfo> {
        let mut infos: Vec<ModelInfo> = self.lock().models.values().map(Model::info).collect();
        infos.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        infos
    }

    // -------------------------------------------------------------------------
    // State access
    // -------------------------------------------------------------------------

    /// Current state of `namespace`, or `None` if it is not registered.
    pub fn get_state(&self, namespace: &str) -> Option<Arc<Value>> {
        self.lock().state.get(namespace)
    }

    /// Shallow copy of every namespace's state.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().state.snapshot()
    }

    /// Apply `selector` to a snapshot.
    pub fn select<R>(&self, selector: impl FnOnce(&Snapshot) -> R) -> R {
        selector(&self.snapshot())
    }

    // -------------------------------------------------------------------------
    // Subscribers
    // -------------------------------------------------------------------------

    pub fn subscribers(&self) -> &SubscriberTable {
        &self.inner.subscribers
    }

    /// Register `listener` for state changes in each of `namespaces`.
    pub fn subscribe<S, F>(&self, namespaces: &[S], listener: F) -> SubscriptionId
    where
        S: AsRef<str>,
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(namespaces, Arc::new(listener))
    }

    pub fn unsubscribe<S: AsRef<str>>(&self, id: SubscriptionId, namespaces: &[S]) {
        self.inner.subscribers.unsubscribe(id, namespaces)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Route `action` to a pending wait, an effect, or a reducer.
    pub fn dispatch(&self, action: Action) -> Dispatched {
        let route = Route::parse(&action.action_type);
        let namespace = route.namespace.to_string();
        let key = route.key.map(str::to_string);

        let change = {
            let mut core = self.lock();
            if !core.models.contains_key(&namespace) {
                if self.inner.config.warn_unrouted {
                    warn!(
                        action_type = %action.action_type,
                        namespace = %namespace,
                        "dispatch to unregistered namespace ignored"
                    );
                }
                return Dispatched::Unrouted;
            }

            let payload = action.payload_value();
            core.scheduler
                .resolve_wait(&action.action_type, payload.clone());

            let Some(key) = key else {
                return self.unhandled(&action);
            };

            let effect = core
                .models
                .get(&namespace)
                .and_then(|model| model.effect_for(&key))
                .cloned();
            if let Some(effect) = effect {
                let (handle, launch) = self.launch(&mut core, namespace, effect, action);
                drop(core);
                if let Some(launch) = launch {
                    launch.start();
                }
                return Dispatched::Effect(handle);
            }

            let reducer = core
                .models
                .get(&namespace)
                .and_then(|model| model.reducer_for(&key))
                .cloned();
            let Some(reducer) = reducer else {
                return self.unhandled(&action);
            };

            let current = core
                .state
                .get(&namespace)
                .unwrap_or_else(|| Arc::new(Value::Null));
            let next = reducer(&*current, &payload);
            if !state_changed(&current, &next) {
                return Dispatched::Reduced { changed: false };
            }
            StateChange {
                action_type: action.action_type,
                new_state: core.state.replace(&namespace, next),
            }
        };

        for listener in self.inner.subscribers.listeners(&namespace) {
            listener(&change);
        }
        Dispatched::Reduced { changed: true }
    }

    fn unhandled(&self, action: &Action) -> Dispatched {
        if self.inner.config.log_unhandled {
            debug!(action_type = %action.action_type, "no reducer or effect for action");
        }
        Dispatched::Unhandled
    }

    /// Prepare a workflow for `action` and track it. Runs under the store lock;
    /// the returned [`Launch`] must be started once the lock is released.
    fn launch(
        &self,
        core: &mut Core,
        namespace: String,
        effect: EffectEntry,
        action: Action,
    ) -> (EffectHandle, Option<Launch>) {
        let action_type = action.action_type.clone();

        if effect.mode == TakeMode::Latest {
            if let Some(previous) = core.scheduler.latest(&action_type) {
                core.scheduler.cancel(previous);
                debug!(
                    action_type = %action_type,
                    superseded = %previous,
                    "takeLatest superseded running workflow"
                );
            }
        }

        let Some(runtime) = self.runtime() else {
            error!(action_type = %action_type, "no tokio runtime to run effect");
            let handle = EffectHandle::failed(StoreError::NoRuntime { action_type });
            return (handle, None);
        };

        let id = WorkflowId::new();
        let (done, receiver) = oneshot::channel();
        let fx = Effects::new(self.clone(), namespace.clone(), id);
        let store = self.clone();
        let workflow = effect.workflow.clone();
        let task_action_type = action_type.clone();

        let run = async move {
            let result = match AssertUnwindSafe(workflow.run(action, fx))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(action_type = %task_action_type, panic = %message, "workflow panicked");
                    Err(StoreError::WorkflowPanicked {
                        action_type: task_action_type,
                        message,
                    }
                    .into())
                }
            };
            // A workflow cancelled mid-step still runs to its next await;
            // its result is dropped with the handle.
            if store.finish(id) {
                let _ = done.send(result);
            }
        };
        let (abort, registration) = AbortHandle::new_pair();
        let task = Abortable::new(run, registration).map(|_| ()).boxed();

        core.scheduler.track(
            id,
            LiveWorkflow {
                namespace,
                action_type: action_type.clone(),
                mode: effect.mode,
                started_at: Utc::now(),
                abort,
            },
        );
        debug!(action_type = %action_type, workflow = %id, "workflow started");

        (EffectHandle::new(id, receiver), Some(Launch { task, runtime }))
    }

    fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    // -------------------------------------------------------------------------
    // Scheduler plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn is_live(&self, workflow: WorkflowId) -> bool {
        self.lock().scheduler.is_live(workflow)
    }

    pub(crate) fn register_wait(
        &self,
        action_type: String,
        workflow: WorkflowId,
    ) -> Option<oneshot::Receiver<Value>> {
        self.lock().scheduler.register_wait(action_type, workflow)
    }

    fn finish(&self, workflow: WorkflowId) -> bool {
        self.lock().scheduler.finish(workflow)
    }

    /// Live workflows, oldest first.
    pub fn workflows(&self) -> Vec<WorkflowInfo> {
        self.lock().scheduler.workflows()
    }

    /// Action types some workflow is currently waiting for.
    pub fn pending_waits(&self) -> Vec<String> {
        self.lock().scheduler.pending_waits()
    }

    /// Cancel a live workflow. Its handle never resolves.
    pub fn cancel_workflow(&self, workflow: WorkflowId) -> bool {
        self.lock().scheduler.cancel(workflow)
    }

    /// Cancel every live workflow and drop every pending wait.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.lock().scheduler.cancel_all();
        info!(cancelled, "store shut down");
        cancelled
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("Store")
            .field("models", &core.models.len())
            .field("scheduler", &core.scheduler)
            .field("subscribers", &self.inner.subscribers)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A tracked workflow that has not run yet.
struct Launch {
    task: BoxFuture<'static, ()>,
    runtime: Handle,
}

impl Launch {
    /// Run the workflow up to its first suspension point on the calling
    /// thread, then hand the rest to the runtime.
    ///
    /// Commands yielded by the first step (a `take` registration, a `put`
    /// dispatch) have taken effect when this returns. The spawned task polls
    /// again straight away, which re-registers every waker left behind by the
    /// no-op one used here.
    fn start(self) {
        let Launch { mut task, runtime } = self;
        {
            let _entered = runtime.enter();
            let mut cx = Context::from_waker(noop_waker_ref());
            if task.as_mut().poll(&mut cx).is_ready() {
                return;
            }
        }
        runtime.spawn(task);
    }
}

// =============================================================================
// Store Builder
// =============================================================================

/// Builder for [`Store`].
#[derive(Default)]
pub struct StoreBuilder {
    models: Vec<Model>,
    config: StoreConfig,
    runtime: Option<Handle>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model when the store is built.
    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn workflows on `runtime` instead of the ambient one.
    ///
    /// Lets code outside a tokio context dispatch effects.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Store {
        let store = Store {
            inner: Arc::new(Inner {
                core: Mutex::new(Core::default()),
                subscribers: SubscriberTable::new(),
                config: self.config,
                runtime: self.runtime,
            }),
        };
        for model in self.models {
            store.register_model(model);
        }
        store
    }
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("models", &self.models.len())
            .field("config", &self.config)
            .finish()
    }
}
