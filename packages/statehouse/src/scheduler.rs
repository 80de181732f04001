//! Effect scheduler: live workflows, `takeLatest` slots, pending waits, and
//! interpretation of yielded commands.
//!
//! # Workflow lifecycle
//!
//! ```text
//! dispatch(ns/poll)
//!     │
//!     ▼ (takeLatest) cancel previous ns/poll workflow, drop its waits
//! spawn ─► track(id) ─► run ──┬─► yield Take ─► PendingWait ─► dispatch(ns/ready) resumes it
//!                             ├─► yield Put / PutResolve / All / Await
//!                             └─► return ─► finish(id) ─► handle resolves
//! ```
//!
//! All tables live behind the store lock. A yield first checks that its
//! workflow is still live; a cancelled workflow is aborted at its current
//! suspension point and never issues another command.

use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::{self, AbortHandle, BoxFuture};
use futures::{FutureExt, TryFutureExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::action::Route;
use crate::command::Command;
use crate::model::TakeMode;
use crate::store::Store;

/// Identifies one running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct LiveWorkflow {
    pub namespace: String,
    pub action_type: String,
    pub mode: TakeMode,
    pub started_at: DateTime<Utc>,
    pub abort: AbortHandle,
}

/// Read-only description of a live workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowInfo {
    pub id: WorkflowId,
    pub namespace: String,
    pub action_type: String,
    pub mode: TakeMode,
    pub started_at: DateTime<Utc>,
}

struct PendingWait {
    owner: WorkflowId,
    resume: oneshot::Sender<Value>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    live: HashMap<WorkflowId, LiveWorkflow>,
    /// Action type -> the one live `takeLatest` workflow started by it.
    latest: HashMap<String, WorkflowId>,
    /// Action type -> the workflow waiting for it.
    waits: HashMap<String, PendingWait>,
}

impl Scheduler {
    pub fn track(&mut self, id: WorkflowId, workflow: LiveWorkflow) {
        if workflow.mode == TakeMode::Latest {
            self.latest.insert(workflow.action_type.clone(), id);
        }
        self.live.insert(id, workflow);
    }

    pub fn is_live(&self, id: WorkflowId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn latest(&self, action_type: &str) -> Option<WorkflowId> {
        self.latest.get(action_type).copied()
    }

    /// Abort a workflow and drop everything it holds.
    pub fn cancel(&mut self, id: WorkflowId) -> bool {
        let Some(workflow) = self.live.remove(&id) else {
            return false;
        };
        workflow.abort.abort();
        self.release(id, &workflow.action_type);
        debug!(
            workflow = %id,
            action_type = %workflow.action_type,
            "workflow cancelled"
        );
        true
    }

    /// Forget a workflow that ran to completion. Returns `false` if it had
    /// already been cancelled.
    pub fn finish(&mut self, id: WorkflowId) -> bool {
        match self.live.remove(&id) {
            Some(workflow) => {
                self.release(id, &workflow.action_type);
                true
            }
            None => false,
        }
    }

    fn release(&mut self, id: WorkflowId, action_type: &str) {
        if self.latest.get(action_type) == Some(&id) {
            self.latest.remove(action_type);
        }
        self.waits.retain(|_, wait| wait.owner != id);
    }

    /// Register `owner` as waiting for the next `action_type` dispatch.
    ///
    /// Returns `None` if `owner` is no longer live. A wait already registered
    /// for the same type is replaced; its workflow never resumes.
    pub fn register_wait(
        &mut self,
        action_type: String,
        owner: WorkflowId,
    ) -> Option<oneshot::Receiver<Value>> {
        if !self.is_live(owner) {
            return None;
        }
        let (resume, receiver) = oneshot::channel();
        if let Some(replaced) = self
            .waits
            .insert(action_type.clone(), PendingWait { owner, resume })
        {
            debug!(
                action_type = %action_type,
                replaced = %replaced.owner,
                workflow = %owner,
                "pending wait replaced"
            );
        }
        Some(receiver)
    }

    /// Consume the wait for `action_type`, resuming its workflow with `payload`.
    pub fn resolve_wait(&mut self, action_type: &str, payload: Value) -> bool {
        match self.waits.remove(action_type) {
            Some(wait) => {
                trace!(action_type = %action_type, workflow = %wait.owner, "pending wait resolved");
                wait.resume.send(payload).is_ok()
            }
            None => false,
        }
    }

    /// Cancel every workflow of `namespace` and drop waits on its action types.
    pub fn purge_namespace(&mut self, namespace: &str) -> usize {
        let ids: Vec<WorkflowId> = self
            .live
            .iter()
            .filter(|(_, workflow)| workflow.namespace == namespace)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        self.waits
            .retain(|action_type, _| Route::parse(action_type).namespace != namespace);
        ids.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let ids: Vec<WorkflowId> = self.live.keys().copied().collect();
        for id in &ids {
            self.cancel(*id);
        }
        self.waits.clear();
        ids.len()
    }

    pub fn workflows(&self) -> Vec<WorkflowInfo> {
        let mut infos: Vec<WorkflowInfo> = self
            .live
            .iter()
            .map(|(id, workflow)| WorkflowInfo {
                id: *id,
                namespace: workflow.namespace.clone(),
                action_type: workflow.action_type.clone(),
                mode: workflow.mode,
                started_at: workflow.started_at,
            })
            .collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    pub fn pending_waits(&self) -> Vec<String> {
        let mut waits: Vec<String> = self.waits.keys().cloned().collect();
        waits.sort();
        waits
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("live", &self.live.len())
            .field("latest", &self.latest.len())
            .field("waits", &self.waits.len())
            .finish()
    }
}

/// Interpret one yielded command on behalf of `workflow`.
pub(crate) fn interpret<'a>(
    store: &'a Store,
    workflow: WorkflowId,
    namespace: &'a str,
    command: Command,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        if !store.is_live(workflow) {
            return future::pending().await;
        }
        trace!(workflow = %workflow, command = command.kind(), "workflow yielded");

        match command.qualified(namespace) {
            Command::Await(pending) => pending.await,
            Command::Plain(value) => Ok(value),
            Command::Take(action_type) => match store.register_wait(action_type, workflow) {
                Some(resume) => match resume.await {
                    Ok(payload) => Ok(payload),
                    // Wait replaced or purged.
                    Err(_) => future::pending().await,
                },
                None => future::pending().await,
            },
            Command::Put(action) => {
                let _ = store.dispatch(action);
                tokio::task::yield_now().await;
                Ok(Value::Null)
            }
            Command::PutResolve(action) => store
                .dispatch(action)
                .await
                .map(|value| value.unwrap_or(Value::Null)),
            Command::All(items) => {
                let pending: Vec<BoxFuture<'a, Result<Value>>> = items
                    .into_iter()
                    .map(|item| match item {
                        Command::Put(action) => store
                            .dispatch(action)
                            .into_future()
                            .map_ok(|value| value.unwrap_or(Value::Null))
                            .boxed(),
                        other => interpret(store, workflow, namespace, other),
                    })
                    .collect();
                future::try_join_all(pending).await.map(Value::Array)
            }
        }
    }
    .boxed()
}
