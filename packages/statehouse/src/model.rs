//! Models: one namespace's initial state, reducers and effects.
//!
//! # Key Properties
//!
//! - **Reducers are pure**: `(state, payload) -> state`, synchronous, no IO
//! - **Effects are workflows**: async computations that talk to the store only
//!   through the [`Effects`] handle they are given
//! - **Effects win**: if a key has both a reducer and an effect, the effect runs
//!
//! # Example
//!
//! ```ignore
//! let model = Model::new("counter", json!({ "n": 0 }))
//!     .reducer("inc", |state, _payload| json!({ "n": state["n"].as_i64().unwrap_or(0) + 1 }))
//!     .effect("incLater", |_action, fx: Effects| async move {
//!         fx.wait(async { tokio::time::sleep(Duration::from_millis(10)).await; Ok(Value::Null) }).await?;
//!         fx.put(Action::new("inc")).await?;
//!         Ok(json!("done"))
//!     })
//!     .effect_with("poll", poll_workflow, TakeMode::Latest);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::effect::Effects;

/// Reducer function stored by a model.
pub type ReducerFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Cancellation policy for concurrent workflows started by the same action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TakeMode {
    /// Every dispatch starts an independent workflow.
    #[default]
    #[serde(rename = "takeEvery")]
    Every,
    /// A new dispatch cancels the previous, still-running workflow of the same type.
    #[serde(rename = "takeLatest")]
    Latest,
}

/// A suspendable effect workflow.
///
/// Implement this for workflows that carry their own configuration or
/// clients. Plain async closures can be registered with [`Model::effect`].
///
/// The workflow suspends only where it awaits one of the [`Effects`] methods;
/// if it is cancelled, it stops at that point and never resumes.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Run to completion. The returned value resolves the dispatch's handle.
    async fn run(&self, action: Action, fx: Effects) -> Result<Value>;
}

struct FnWorkflow<F>(F);

#[async_trait]
impl<F, Fut> Workflow for FnWorkflow<F>
where
    F: Fn(Action, Effects) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn run(&self, action: Action, fx: Effects) -> Result<Value> {
        (self.0)(action, fx).await
    }
}

#[derive(Clone)]
pub(crate) struct EffectEntry {
    pub workflow: Arc<dyn Workflow>,
    pub mode: TakeMode,
}

/// One namespace's state, reducers and effects.
pub struct Model {
    namespace: String,
    state: Value,
    reducers: HashMap<String, ReducerFn>,
    effects: HashMap<String, EffectEntry>,
}

impl Model {
    /// Create a model with its initial state and no handlers.
    pub fn new(namespace: impl Into<String>, state: Value) -> Self {
        Self {
            namespace: namespace.into(),
            state,
            reducers: HashMap::new(),
            effects: HashMap::new(),
        }
    }

    /// Register a reducer for `key`.
    pub fn reducer<F>(mut self, key: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.reducers.insert(key.into(), Arc::new(reducer));
        self
    }

    /// Register an async closure as a `takeEvery` effect for `key`.
    pub fn effect<F, Fut>(self, key: impl Into<String>, workflow: F) -> Self
    where
        F: Fn(Action, Effects) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.effect_with(key, workflow, TakeMode::Every)
    }

    /// Register an async closure as an effect for `key` with an explicit take mode.
    pub fn effect_with<F, Fut>(self, key: impl Into<String>, workflow: F, mode: TakeMode) -> Self
    where
        F: Fn(Action, Effects) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.workflow(key, FnWorkflow(workflow), mode)
    }

    /// Register a [`Workflow`] implementation for `key`.
    pub fn workflow<W: Workflow>(mut self, key: impl Into<String>, workflow: W, mode: TakeMode) -> Self {
        self.effects.insert(
            key.into(),
            EffectEntry {
                workflow: Arc::new(workflow),
                mode,
            },
        );
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn initial_state(&self) -> &Value {
        &self.state
    }

    pub(crate) fn effect_for(&self, key: &str) -> Option<&EffectEntry> {
        self.effects.get(key)
    }

    pub(crate) fn reducer_for(&self, key: &str) -> Option<&ReducerFn> {
        self.reducers.get(key)
    }

    /// Describe this model's handlers.
    pub fn info(&self) -> ModelInfo {
        let mut reducers: Vec<String> = self.reducers.keys().cloned().collect();
        reducers.sort();
        let mut effects: Vec<(String, TakeMode)> = self
            .effects
            .iter()
            .map(|(key, entry)| (key.clone(), entry.mode))
            .collect();
        effects.sort_by(|a, b| a.0.cmp(&b.0));
        ModelInfo {
            namespace: self.namespace.clone(),
            reducers,
            effects,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        f.debug_struct("Model")
            .field("namespace", &info.namespace)
            .field("reducers", &info.reducers)
            .field("effects", &info.effects)
            .finish_non_exhaustive()
    }
}

/// Read-only description of a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub namespace: String,
    /// Reducer keys, sorted.
    pub reducers: Vec<String>,
    /// Effect keys with their take mode, sorted by key.
    pub effects: Vec<(String, TakeMode)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> Model {
        Model::new("counter", json!({ "n": 0 }))
            .reducer("inc", |state, _| json!({ "n": state["n"].as_i64().unwrap_or(0) + 1 }))
            .effect("later", |_action, _fx| async move { Ok(json!("done")) })
            .effect_with(
                "poll",
                |_action, _fx| async move { Ok(Value::Null) },
                TakeMode::Latest,
            )
    }

    #[test]
    fn test_info_lists_handlers_sorted() {
        let info = counter().info();
        assert_eq!(info.namespace, "counter");
        assert_eq!(info.reducers, vec!["inc".to_string()]);
        assert_eq!(
            info.effects,
            vec![
                ("later".to_string(), TakeMode::Every),
                ("poll".to_string(), TakeMode::Latest)
            ]
        );
    }

    #[test]
    fn test_reducer_lookup() {
        let model = counter();
        let reducer = model.reducer_for("inc").unwrap();
        assert_eq!(reducer(&json!({ "n": 4 }), &json!({})), json!({ "n": 5 }));
        assert!(model.reducer_for("later").is_none());
        assert!(model.effect_for("inc").is_none());
    }

    #[test]
    fn test_take_mode_serde_names() {
        assert_eq!(serde_json::to_value(TakeMode::Latest).unwrap(), json!("takeLatest"));
        assert_eq!(
            serde_json::from_value::<TakeMode>(json!("takeEvery")).unwrap(),
            TakeMode::Every
        );
        assert_eq!(TakeMode::default(), TakeMode::Every);
    }

    #[test]
    fn test_debug_impl() {
        let debug = format!("{:?}", counter());
        assert!(debug.contains("counter"));
        assert!(debug.contains("poll"));
    }
}
