//! # Statehouse
//!
//! A namespaced, in-process state store where reducers mutate state and
//! effect workflows coordinate through dispatch.
//!
//! ## Core Concepts
//!
//! - [`Model`] = one namespace: initial state, reducers, effects
//! - Reducer = pure `(state, payload) -> state`, applied synchronously
//! - Effect = async [`Workflow`] that suspends on [`Command`]s via [`Effects`]
//! - [`Store`] = the single sequencing point all of the above go through
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   │
//!   ▼ dispatch({ type: "ns/key", ...payload })
//! Store ──► pending wait for "ns/key"? ──► resume waiting workflow
//!   │
//!   ├─► effect "key" ──► Scheduler spawns workflow ─┐
//!   │                                              │ yields
//!   │      ┌──── put / put_resolve / all ◄─────────┤
//!   │      ▼                                       │
//!   │   dispatch (recursive)        take ──► PendingWait
//!   │
//!   └─► reducer "key" ──► new state ≠ old? ──► replace + notify subscribers
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One wait per action type** - a `take` is resumed by the very next
//!    matching dispatch, exactly once
//! 2. **One latest per action type** - a `takeLatest` dispatch cancels the
//!    previous live workflow of the same type
//! 3. **No-op reductions are invisible** - a reducer result equal to the old
//!    state is neither stored nor published
//! 4. **Unload is total** - unregistering a namespace drops its state,
//!    workflows and pending waits
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use statehouse::{Action, Effects, Model, StoreBuilder, TakeMode};
//!
//! let model = Model::new("counter", json!({ "n": 0 }))
//!     .reducer("inc", |state, _| json!({ "n": state["n"].as_i64().unwrap_or(0) + 1 }))
//!     .effect("incWhenReady", |_action, fx: Effects| async move {
//!         fx.take("ready").await?;
//!         fx.put(Action::new("inc")).await?;
//!         Ok(json!("done"))
//!     });
//!
//! let store = StoreBuilder::new().with_model(model).build();
//! store.subscribe(&["counter"], |change| println!("{} -> {}", change.action_type, change.new_state));
//!
//! // The workflow runs up to its first `take` before dispatch returns.
//! let pending = store.dispatch(Action::new("counter/incWhenReady"));
//! store.dispatch(Action::new("counter/ready"));
//! assert_eq!(pending.await?, Some(json!("done")));
//! ```
//!
//! ## Guarantees
//!
//! - **In-memory only**: state and workflows do not survive the process
//! - **Same-type ordering**: dispatches are processed in call order; nothing is
//!   promised across namespaces
//! - **Cancelled handles dangle**: a superseded workflow's handle never resolves

mod action;
mod command;
mod effect;
mod error;
mod model;
mod scheduler;
mod state;
mod store;
mod subscriber;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use action::{qualify, Action, Route, SEPARATOR};
pub use command::{all, await_value, call, put, put_resolve, select, take, Command};
pub use effect::Effects;
pub use error::StoreError;
pub use model::{Model, ModelInfo, ReducerFn, TakeMode, Workflow};
pub use scheduler::{WorkflowId, WorkflowInfo};
pub use state::Snapshot;
pub use store::{Dispatched, EffectHandle, Store, StoreBuilder, StoreConfig};
pub use subscriber::{Listener, StateChange, Subscriber, SubscriberTable, SubscriptionId};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde_json::{json, Value};
