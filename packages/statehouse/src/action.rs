//! Actions and action-type routing.
//!
//! An action is `{ "type": "<namespace>/<key>", ...payload }`. The `type` is
//! the only field the engine reads; payload fields are opaque and handed to
//! reducers, workflows and pending waits as a JSON object.
//!
//! # Routing
//!
//! The type is split at the first `/`:
//!
//! | type          | namespace | key       |
//! |---------------|-----------|-----------|
//! | `counter/inc` | `counter` | `inc`     |
//! | `a/b/c`       | `a`       | `b/c`     |
//! | `counter`     | `counter` | *(none)*  |
//!
//! A type with no key never matches a reducer or effect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Separator between namespace and key in an action type.
pub const SEPARATOR: char = '/';

/// A dispatched action.
///
/// # Example
///
/// ```ignore
/// let action = Action::new("todos/add").with("title", "buy milk");
/// store.dispatch(action);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Routing key, `"<namespace>/<key>"` or an unqualified `"<key>"` inside a workflow.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Everything else in the action.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Create an action with an empty payload.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Map::new(),
        }
    }

    /// Add one payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Read an action from a JSON value of the form `{ "type": ..., ... }`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidAction {
                reason: "action must be a JSON object".into(),
            });
        };
        match fields.remove("type") {
            Some(Value::String(action_type)) => Ok(Self {
                action_type,
                payload: fields,
            }),
            Some(_) => Err(StoreError::InvalidAction {
                reason: "action type must be a string".into(),
            }),
            None => Err(StoreError::InvalidAction {
                reason: "action has no type".into(),
            }),
        }
    }

    /// The payload as a JSON object value.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    /// Whether the type already names a namespace.
    pub fn is_qualified(&self) -> bool {
        self.action_type.contains(SEPARATOR)
    }

    /// Prefix an unqualified type with `namespace`.
    pub fn qualified(mut self, namespace: &str) -> Self {
        self.action_type = qualify(&self.action_type, namespace);
        self
    }
}

/// Prefix `action_type` with `namespace` unless it already contains a `/`.
pub fn qualify(action_type: &str, namespace: &str) -> String {
    if action_type.contains(SEPARATOR) {
        action_type.to_string()
    } else {
        format!("{namespace}{SEPARATOR}{action_type}")
    }
}

/// The namespace and key an action type routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub namespace: &'a str,
    pub key: Option<&'a str>,
}

impl<'a> Route<'a> {
    pub fn parse(action_type: &'a str) -> Self {
        match action_type.split_once(SEPARATOR) {
            Some((namespace, key)) => Self {
                namespace,
                key: Some(key),
            },
            None => Self {
                namespace: action_type,
                key: None,
            },
        }
    }
}
