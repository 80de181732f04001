//! Commands a workflow yields to the scheduler, and their builders.
//!
//! A workflow suspends by handing one [`Command`] to
//! [`Effects::run`](crate::Effects::run). The variant is decided once, when the
//! command is built; the scheduler matches on it and never inspects values at
//! runtime.
//!
//! | Command      | Resumes with                                               |
//! |--------------|------------------------------------------------------------|
//! | `Await`      | the future's value, or its error raised into the workflow  |
//! | `Take`       | the payload of the next matching dispatch                  |
//! | `Put`        | `null`, on the next tick, without waiting for the dispatch |
//! | `PutResolve` | the dispatched effect's final value (`null` for reducers)  |
//! | `All`        | an array of every element's result, in order               |
//! | `Plain`      | the value itself                                           |
//!
//! The builders here are pure. Types are qualified with the workflow's
//! namespace when the command is run, so `put(Action::new("update"))` inside
//! namespace `ns` dispatches `ns/update`.

use std::fmt;
use std::future::Future;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::action::{qualify, Action};
use crate::state::Snapshot;

/// A suspension point in a workflow.
pub enum Command {
    Await(BoxFuture<'static, Result<Value>>),
    Take(String),
    Put(Action),
    PutResolve(Action),
    All(Vec<Command>),
    Plain(Value),
}

impl Command {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Await(_) => "await",
            Command::Take(_) => "take",
            Command::Put(_) => "put",
            Command::PutResolve(_) => "put.resolve",
            Command::All(_) => "all",
            Command::Plain(_) => "plain",
        }
    }

    /// Qualify every action type this command names with `namespace`.
    pub(crate) fn qualified(self, namespace: &str) -> Self {
        match self {
            Command::Take(action_type) => Command::Take(qualify(&action_type, namespace)),
            Command::Put(action) => Command::Put(action.qualified(namespace)),
            Command::PutResolve(action) => Command::PutResolve(action.qualified(namespace)),
            Command::All(items) => Command::All(
                items
                    .into_iter()
                    .map(|item| item.qualified(namespace))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Await(_) => f.write_str("Await(..)"),
            Command::Take(action_type) => f.debug_tuple("Take").field(action_type).finish(),
            Command::Put(action) => f.debug_tuple("Put").field(action).finish(),
            Command::PutResolve(action) => f.debug_tuple("PutResolve").field(action).finish(),
            Command::All(items) => f.debug_tuple("All").field(items).finish(),
            Command::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
        }
    }
}

impl From<Value> for Command {
    fn from(value: Value) -> Self {
        Command::Plain(value)
    }
}

/// Dispatch `action` and continue without waiting for it.
pub fn put(action: Action) -> Command {
    Command::Put(action)
}

/// Dispatch `action` and wait for its effect, if any, to finish.
pub fn put_resolve(action: Action) -> Command {
    Command::PutResolve(action)
}

/// Wait for the next dispatch of `action_type`.
pub fn take(action_type: impl Into<String>) -> Command {
    Command::Take(action_type.into())
}

/// Run every command concurrently and collect the results in order.
pub fn all(items: impl IntoIterator<Item = Command>) -> Command {
    Command::All(items.into_iter().collect())
}

/// Suspend until `future` settles.
pub fn await_value<F>(future: F) -> Command
where
    F: Future<Output = Result<Value>> + Send + 'static,
{
    Command::Await(future.boxed())
}

/// Call `f(args)` right away and hand back whatever it returns.
///
/// No suspension of its own: if `f` returns a future, wrap the result in
/// [`await_value`] (or use [`Effects::call`](crate::Effects::call)).
pub fn call<F, A, R>(f: F, args: A) -> R
where
    F: FnOnce(A) -> R,
{
    f(args)
}

/// Apply `selector` to a state snapshot.
pub fn select<R>(snapshot: &Snapshot, selector: impl FnOnce(&Snapshot) -> R) -> R {
    selector(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_qualify_nested_commands() {
        let command = all([
            put(Action::new("update").with("x", 1)),
            take("ready"),
            put_resolve(Action::new("other/load")),
            Command::Plain(json!(3)),
        ])
        .qualified("ns");

        let Command::All(items) = command else {
            panic!("expected All");
        };
        match &items[0] {
            Command::Put(action) => assert_eq!(action.action_type, "ns/update"),
            other => panic!("expected Put, got {:?}", other),
        }
        match &items[1] {
            Command::Take(action_type) => assert_eq!(action_type, "ns/ready"),
            other => panic!("expected Take, got {:?}", other),
        }
        match &items[2] {
            Command::PutResolve(action) => assert_eq!(action.action_type, "other/load"),
            other => panic!("expected PutResolve, got {:?}", other),
        }
        assert_eq!(items[3].kind(), "plain");
    }

    #[test]
    fn test_call_is_passthrough() {
        let sum = call(|(a, b): (i32, i32)| a + b, (2, 3));
        assert_eq!(sum, 5);
    }

    #[test]
    fn test_select_reads_snapshot() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("counter".into(), Arc::new(json!({ "n": 7 })));

        let n = select(&snapshot, |s| s["counter"]["n"].as_i64());
        assert_eq!(n, Some(7));
    }

    #[test]
    fn test_debug_hides_future() {
        let command = await_value(async { Ok(Value::Null) });
        assert_eq!(format!("{:?}", command), "Await(..)");
        assert_eq!(command.kind(), "await");
    }
}
