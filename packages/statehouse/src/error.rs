//! Structured error types for statehouse.
//!
//! `StoreError` provides pattern-matchable errors for engine-level conditions.
//! Workflow results use `anyhow::Error` as the transport so effect code can
//! use `?` freely; a `StoreError` surfaced to a workflow can be recovered with
//! `downcast_ref`.
//!
//! # What is NOT an error
//!
//! Dispatching to an unregistered namespace is logged and reported as
//! [`Dispatched::Unrouted`](crate::Dispatched::Unrouted). Dispatching a key
//! with no reducer or effect is [`Dispatched::Unhandled`](crate::Dispatched::Unhandled).
//! Neither produces an error value.
//!
//! # Example
//!
//! ```ignore
//! match store.dispatch(Action::new("search/run")).await {
//!     Ok(value) => println!("done: {:?}", value),
//!     Err(e) => match e.downcast_ref::<StoreError>() {
//!         Some(StoreError::NoRuntime { action_type }) => {
//!             eprintln!("no tokio runtime to run {}", action_type);
//!         }
//!         _ => eprintln!("workflow failed: {}", e),
//!     },
//! }
//! ```

use thiserror::Error;

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An effect was dispatched with no tokio runtime available to run it.
    #[error("no tokio runtime available to run effect {action_type}")]
    NoRuntime {
        /// The action type whose effect could not be started.
        action_type: String,
    },

    /// A JSON value could not be read as an action.
    #[error("invalid action: {reason}")]
    InvalidAction {
        /// Why the value was rejected.
        reason: String,
    },

    /// A workflow panicked while running.
    #[error("workflow for {action_type} panicked: {message}")]
    WorkflowPanicked {
        /// The action type that started the workflow.
        action_type: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}
