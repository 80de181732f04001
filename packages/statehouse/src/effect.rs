//! The command API handed to effect workflows.
//!
//! # Narrow API
//!
//! `Effects` is the only way a workflow touches the store. It is bound to the
//! workflow's namespace and id, and every method that can suspend goes through
//! [`Effects::run`], the single suspension point the scheduler interprets.
//!
//! `Effects` is cheap to clone; clones share the same workflow identity, so
//! concurrent branches of one workflow are cancelled together.
//!
//! # Example
//!
//! ```ignore
//! async fn checkout(action: Action, fx: Effects) -> anyhow::Result<Value> {
//!     let cart = fx.select(|state| state["cart"].as_ref().clone());
//!     let order = fx.call(api::place_order, cart).await?;
//!     fx.put(Action::new("placed").with("order", order.clone())).await?;
//!     let confirmation = fx.take("confirmed").await?;
//!     Ok(confirmation)
//! }
//! ```

use std::fmt;
use std::future::Future;

use anyhow::Result;
use serde_json::Value;

use crate::action::{qualify, Action};
use crate::command::{self, Command};
use crate::scheduler::{self, WorkflowId};
use crate::state::Snapshot;
use crate::store::Store;

/// Scoped command API for one running workflow.
#[derive(Clone)]
pub struct Effects {
    store: Store,
    namespace: String,
    workflow: WorkflowId,
}

impl Effects {
    pub(crate) fn new(store: Store, namespace: String, workflow: WorkflowId) -> Self {
        Self {
            store,
            namespace,
            workflow,
        }
    }

    /// The namespace this workflow runs under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow
    }

    /// Qualify a bare action key with this workflow's namespace.
    pub fn qualify(&self, action_type: &str) -> String {
        qualify(action_type, &self.namespace)
    }

    /// Yield `command` and resume with what the scheduler hands back.
    ///
    /// If the workflow is cancelled while suspended here, this never returns.
    pub async fn run(&self, command: Command) -> Result<Value> {
        scheduler::interpret(&self.store, self.workflow, &self.namespace, command).await
    }

    /// Wait for the next dispatch of `action_type` and return its payload.
    pub async fn take(&self, action_type: impl Into<String>) -> Result<Value> {
        self.run(command::take(action_type)).await
    }

    /// Dispatch `action` and continue without waiting for it to finish.
    pub async fn put(&self, action: Action) -> Result<()> {
        self.run(command::put(action)).await.map(|_| ())
    }

    /// Dispatch `action` and wait for its effect, if any, to finish.
    pub async fn put_resolve(&self, action: Action) -> Result<Value> {
        self.run(command::put_resolve(action)).await
    }

    /// Run every command concurrently; the first error wins.
    pub async fn all(&self, items: impl IntoIterator<Item = Command>) -> Result<Vec<Value>> {
        into_results(self.run(command::all(items)).await?)
    }

    /// Suspend until `future` settles; its error is returned here.
    pub async fn wait<F>(&self, future: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        self.run(command::await_value(future)).await
    }

    /// Call `f(args)` and suspend on the future it returns.
    pub async fn call<F, A, Fut>(&self, f: F, args: A) -> Result<Value>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.wait(command::call(f, args)).await
    }

    /// Apply `selector` to a snapshot of every namespace's state.
    pub fn select<R>(&self, selector: impl FnOnce(&Snapshot) -> R) -> R {
        command::select(&self.store.snapshot(), selector)
    }

    /// The whole state snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }
}

fn into_results(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(values) => Ok(values),
        other => Err(anyhow::anyhow!("all resumed with a non-array value: {other}")),
    }
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effects")
            .field("namespace", &self.namespace)
            .field("workflow", &self.workflow)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, TakeMode, Workflow};
    use crate::store::StoreBuilder;
    use crate::testing::{wait_until, RecordingListener};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ledger() -> Model {
        Model::new("ns", json!({ "n": 0, "last": null }))
            .reducer("inc", |state, _| {
                json!({ "n": state["n"].as_i64().unwrap_or(0) + 1, "last": state["last"].clone() })
            })
            .reducer("update", |state, payload| {
                json!({ "n": state["n"].clone(), "last": payload.clone() })
            })
    }

    #[tokio::test]
    async fn test_put_qualifies_with_own_namespace() {
        let model = ledger().effect("save", |_action, fx: Effects| async move {
            fx.put(Action::new("update").with("x", 1)).await?;
            Ok(Value::Null)
        });
        let store = StoreBuilder::new().with_model(model).build();
        let recorder = RecordingListener::new();
        store.subscribe(&["ns"], recorder.listener());

        store.dispatch(Action::new("ns/save")).await.unwrap();

        assert_eq!(recorder.action_types(), vec!["ns/update"]);
        assert_eq!(store.get_state("ns").unwrap()["last"], json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_put_to_other_namespace_is_not_requalified() {
        let other = Model::new("other", json!(0)).reducer("bump", |s, _| json!(s.as_i64().unwrap_or(0) + 1));
        let model = ledger().effect("poke", |_action, fx: Effects| async move {
            fx.put(Action::new("other/bump")).await?;
            Ok(Value::Null)
        });
        let store = StoreBuilder::new().with_model(model).with_model(other).build();

        store.dispatch(Action::new("ns/poke")).await.unwrap();
        assert_eq!(*store.get_state("other").unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_put_does_not_wait_for_target_effect() {
        let model = ledger()
            .effect("slow", |_action, fx: Effects| async move {
                fx.take("release").await?;
                Ok(json!("slow done"))
            })
            .effect("kick", |_action, fx: Effects| async move {
                fx.put(Action::new("slow")).await?;
                Ok(json!("kicked"))
            });
        let store = StoreBuilder::new().with_model(model).build();

        let kicked = store.dispatch(Action::new("ns/kick")).await.unwrap();
        assert_eq!(kicked, Some(json!("kicked")));

        assert_eq!(store.pending_waits(), vec!["ns/release".to_string()]);
        assert_eq!(store.workflows().len(), 1);
        store.dispatch(Action::new("ns/release"));
        wait_until(|| store.workflows().is_empty()).await;
    }

    #[tokio::test]
    async fn test_put_resolve_waits_for_effect_value() {
        let model = ledger()
            .effect("double", |action: Action, _fx| async move {
                let x = action.payload["x"].as_i64().unwrap_or(0);
                Ok(json!(x * 2))
            })
            .effect("compute", |_action, fx: Effects| async move {
                let doubled = fx.put_resolve(Action::new("double").with("x", 21)).await?;
                let reduced = fx.put_resolve(Action::new("inc")).await?;
                Ok(json!({ "doubled": doubled, "reduced": reduced }))
            });
        let store = StoreBuilder::new().with_model(model).build();

        let value = store.dispatch(Action::new("ns/compute")).await.unwrap();
        assert_eq!(value, Some(json!({ "doubled": 42, "reduced": null })));
        assert_eq!(store.get_state("ns").unwrap()["n"], json!(1));
    }

    #[tokio::test]
    async fn test_put_resolve_delivers_target_error() {
        let model = ledger()
            .effect("fail", |_action, _fx| async move { Err(anyhow!("target failed")) })
            .effect("caller", |_action, fx: Effects| async move {
                match fx.put_resolve(Action::new("fail")).await {
                    Ok(_) => Ok(json!("unexpected")),
                    Err(e) => Ok(json!(e.to_string())),
                }
            });
        let store = StoreBuilder::new().with_model(model).build();

        let value = store.dispatch(Action::new("ns/caller")).await.unwrap();
        assert_eq!(value, Some(json!("target failed")));
    }

    #[tokio::test]
    async fn test_all_collects_results_in_order() {
        let model = ledger()
            .effect("triple", |action: Action, _fx| async move {
                Ok(json!(action.payload["x"].as_i64().unwrap_or(0) * 3))
            })
            .effect("batch", |_action, fx: Effects| async move {
                let results = fx
                    .all([
                        crate::command::await_value(async {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(json!("slow"))
                        }),
                        crate::command::put(Action::new("triple").with("x", 2)),
                        crate::command::put(Action::new("inc")),
                        Command::Plain(json!("plain")),
                    ])
                    .await?;
                Ok(Value::Array(results))
            });
        let store = StoreBuilder::new().with_model(model).build();

        let value = store.dispatch(Action::new("ns/batch")).await.unwrap();
        assert_eq!(value, Some(json!(["slow", 6, null, "plain"])));
        assert_eq!(store.get_state("ns").unwrap()["n"], json!(1));
    }

    #[tokio::test]
    async fn test_all_propagates_first_error() {
        let model = ledger().effect("batch", |_action, fx: Effects| async move {
            fx.all([
                Command::Plain(json!(1)),
                crate::command::await_value(async { Err(anyhow!("one failed")) }),
            ])
            .await?;
            Ok(json!("unreachable"))
        });
        let store = StoreBuilder::new().with_model(model).build();

        let err = store.dispatch(Action::new("ns/batch")).await.unwrap_err();
        assert_eq!(err.to_string(), "one failed");
    }

    #[tokio::test]
    async fn test_await_error_is_raised_inside_workflow() {
        let model = ledger().effect("fetch", |_action, fx: Effects| async move {
            let recovered = match fx.wait(async { Err(anyhow!("network down")) }).await {
                Ok(value) => value,
                Err(e) => json!({ "error": e.to_string() }),
            };
            fx.put(Action::new("update").with("result", recovered.clone())).await?;
            Ok(recovered)
        });
        let store = StoreBuilder::new().with_model(model).build();

        let value = store.dispatch(Action::new("ns/fetch")).await.unwrap();
        assert_eq!(value, Some(json!({ "error": "network down" })));
        assert_eq!(
            store.get_state("ns").unwrap()["last"],
            json!({ "result": { "error": "network down" } })
        );
    }

    #[tokio::test]
    async fn test_call_and_select() {
        async fn lookup(id: i64) -> Result<Value> {
            Ok(json!({ "id": id, "name": "ada" }))
        }

        let model = ledger().effect("load", |_action, fx: Effects| async move {
            let user = fx.call(lookup, 7).await?;
            let n = fx.select(|state| state["ns"]["n"].clone());
            let sum = crate::command::call(|(a, b): (i64, i64)| a + b, (1, 2));
            Ok(json!({ "user": user, "n": n, "sum": sum, "namespace": fx.namespace() }))
        });
        let store = StoreBuilder::new().with_model(model).build();
        store.dispatch(Action::new("ns/inc"));

        let value = store.dispatch(Action::new("ns/load")).await.unwrap();
        assert_eq!(
            value,
            Some(json!({
                "user": { "id": 7, "name": "ada" },
                "n": 1,
                "sum": 3,
                "namespace": "ns"
            }))
        );
    }

    #[tokio::test]
    async fn test_plain_command_resumes_with_value() {
        let model = ledger().effect("echo", |_action, fx: Effects| async move {
            fx.run(Command::Plain(json!("same"))).await
        });
        let store = StoreBuilder::new().with_model(model).build();
        let value = store.dispatch(Action::new("ns/echo")).await.unwrap();
        assert_eq!(value, Some(json!("same")));
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let model = ledger().effect("listen", |_action, fx: Effects| async move {
            let payload = fx.take("ready").await?;
            fx.put(Action::new("inc")).await?;
            Ok(payload)
        });
        let store = StoreBuilder::new().with_model(model).build();

        let handle = store.dispatch(Action::new("ns/listen"));

        store.dispatch(Action::new("ns/ready").with("round", 1));
        assert!(store.pending_waits().is_empty());
        store.dispatch(Action::new("ns/ready").with("round", 2));

        assert_eq!(handle.await.unwrap(), Some(json!({ "round": 1 })));
        assert_eq!(store.get_state("ns").unwrap()["n"], json!(1));
    }

    #[tokio::test]
    async fn test_take_again_sees_later_dispatch() {
        let model = ledger().effect("twice", |_action, fx: Effects| async move {
            let first = fx.take("tick").await?;
            let second = fx.take("tick").await?;
            Ok(json!([first["i"], second["i"]]))
        });
        let store = StoreBuilder::new().with_model(model).build();

        let handle = store.dispatch(Action::new("ns/twice"));
        store.dispatch(Action::new("ns/tick").with("i", 0));
        // The second take is registered once the resumed workflow runs again.
        wait_until(|| !store.pending_waits().is_empty()).await;
        store.dispatch(Action::new("ns/tick").with("i", 1));
        assert_eq!(handle.await.unwrap(), Some(json!([0, 1])));
    }

    #[tokio::test]
    async fn test_take_other_namespace() {
        let other = Model::new("auth", json!(null));
        let model = ledger().effect("afterLogin", |_action, fx: Effects| async move {
            fx.take("auth/loggedIn").await
        });
        let store = StoreBuilder::new().with_model(model).with_model(other).build();

        let handle = store.dispatch(Action::new("ns/afterLogin"));
        assert_eq!(store.pending_waits(), vec!["auth/loggedIn".to_string()]);
        store.dispatch(Action::new("auth/loggedIn").with("user", "ada"));

        assert_eq!(handle.await.unwrap(), Some(json!({ "user": "ada" })));
    }

    #[tokio::test]
    async fn test_superseded_workflow_issues_no_more_commands() {
        let puts = Arc::new(AtomicUsize::new(0));
        let counted = puts.clone();
        let model = ledger().effect_with(
            "poll",
            move |_action, fx: Effects| {
                let counted = counted.clone();
                async move {
                    fx.take("tick").await?;
                    counted.fetch_add(1, Ordering::SeqCst);
                    fx.put(Action::new("inc")).await?;
                    Ok(Value::Null)
                }
            },
            TakeMode::Latest,
        );
        let store = StoreBuilder::new().with_model(model).build();

        let first = store.dispatch(Action::new("ns/poll")).into_effect().unwrap();
        let second = store.dispatch(Action::new("ns/poll"));
        assert_eq!(store.pending_waits(), vec!["ns/tick".to_string()]);
        assert_eq!(store.workflows().len(), 1);
        assert_ne!(Some(store.workflows()[0].id), first.workflow_id());

        store.dispatch(Action::new("ns/tick"));
        second.await.unwrap();

        assert_eq!(puts.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_state("ns").unwrap()["n"], json!(1));
    }

    struct Greeter {
        greeting: String,
    }

    #[async_trait]
    impl Workflow for Greeter {
        async fn run(&self, action: Action, fx: Effects) -> Result<Value> {
            let name = fx.take("named").await?;
            Ok(json!(format!(
                "{} {} from {}",
                self.greeting,
                name["name"].as_str().unwrap_or("nobody"),
                action.action_type
            )))
        }
    }

    #[tokio::test]
    async fn test_workflow_trait_implementation() {
        let model = ledger().workflow(
            "greet",
            Greeter {
                greeting: "hello".into(),
            },
            TakeMode::Every,
        );
        let store = StoreBuilder::new().with_model(model).build();

        let handle = store.dispatch(Action::new("ns/greet"));
        store.dispatch(Action::new("ns/named").with("name", "ada"));

        assert_eq!(handle.await.unwrap(), Some(json!("hello ada from ns/greet")));
    }

    #[test]
    fn test_into_results_rejects_non_array() {
        assert_eq!(into_results(json!([1, 2])).unwrap(), vec![json!(1), json!(2)]);
        let err = into_results(json!("oops")).unwrap_err();
        assert!(err.to_string().contains("non-array"));
    }

    #[tokio::test]
    async fn test_all_of_nothing_is_empty() {
        let model = ledger().effect("none", |_action, fx: Effects| async move {
            let results = fx.all(Vec::new()).await?;
            Ok(json!(results.len()))
        });
        let store = StoreBuilder::new().with_model(model).build();
        let value = store.dispatch(Action::new("ns/none")).await.unwrap();
        assert_eq!(value, Some(json!(0)));
    }

    #[test]
    fn test_debug_impl() {
        let fx = Effects::new(Store::new(), "ns".into(), WorkflowId::new());
        let debug = format!("{:?}", fx);
        assert!(debug.contains("Effects"));
        assert!(debug.contains("ns"));
        assert_eq!(fx.qualify("go"), "ns/go");
    }
}
