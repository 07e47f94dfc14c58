//! Composite snapshot data model
//!
//! A `PendingAggregate` is an immutable map from field name to resolution
//! state. Updates are copy-on-write: resolving one field produces a new
//! aggregate, so a reader holding the old snapshot never sees it change
//! underneath them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FlowError;

/// Resolution state of a single field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value")]
pub enum FieldState {
    /// Computation still in flight
    Pending,
    /// Computation completed with a value
    Resolved(Value),
    /// Computation failed; the reason is carried per field and never
    /// aborts siblings
    Failed(String),
}

impl FieldState {
    pub fn is_pending(&self) -> bool {
        matches!(self, FieldState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, FieldState::Resolved(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FieldState::Failed(_))
    }

    /// The resolved value, if any
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldState::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// Fixed key set of a composite value
///
/// The key set is decided once, when the coordinator is built, and never
/// changes afterwards; only per-key resolution state moves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    keys: BTreeSet<String>,
}

impl Schema {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Panics unless `names` covers exactly this schema's key set.
    ///
    /// A mismatch is a caller bug, not runtime input, so this fails fast
    /// instead of silently producing a partial aggregate.
    pub fn assert_matches(&self, names: &BTreeSet<String>) {
        if *names == self.keys {
            return;
        }
        let missing: Vec<&str> = self
            .keys
            .iter()
            .filter(|k| !names.contains(*k))
            .map(String::as_str)
            .collect();
        let extra: Vec<&str> = names
            .iter()
            .filter(|k| !self.keys.contains(*k))
            .map(String::as_str)
            .collect();
        panic!(
            "field set does not match schema (missing: {:?}, extra: {:?})",
            missing, extra
        );
    }
}

/// Immutable snapshot of a composite value
///
/// Tagged with the generation that produced it, so observers can tell
/// which `start()` a given snapshot belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingAggregate {
    generation: u64,
    fields: BTreeMap<String, FieldState>,
}

impl PendingAggregate {
    /// Fresh snapshot with every schema field pending
    pub fn all_pending(schema: &Schema, generation: u64) -> Self {
        Self {
            generation,
            fields: schema
                .keys()
                .map(|k| (k.to_string(), FieldState::Pending))
                .collect(),
        }
    }

    /// Snapshot with every field already resolved to a seed value
    ///
    /// Used for a coordinator's initial state before the first `start()`.
    /// Panics unless `values` covers exactly the schema.
    pub fn all_resolved(schema: &Schema, generation: u64, values: BTreeMap<String, Value>) -> Self {
        let names: BTreeSet<String> = values.keys().cloned().collect();
        schema.assert_matches(&names);
        Self {
            generation,
            fields: values
                .into_iter()
                .map(|(k, v)| (k, FieldState::Resolved(v)))
                .collect(),
        }
    }

    /// Generation id this snapshot was published under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copy-on-write transform: same aggregate with one field resolved
    pub fn with_field_resolved(&self, name: &str, value: Value) -> Self {
        self.with_field(name, FieldState::Resolved(value))
    }

    /// Copy-on-write transform: same aggregate with one field failed
    pub fn with_field_failed(&self, name: &str, reason: impl Into<String>) -> Self {
        self.with_field(name, FieldState::Failed(reason.into()))
    }

    fn with_field(&self, name: &str, state: FieldState) -> Self {
        // Unknown names cannot come from a schema-checked start(), so
        // reaching here with one is a bug in the caller.
        if !self.fields.contains_key(name) {
            panic!("unknown field {:?} not in aggregate schema", name);
        }
        let mut next = self.clone();
        next.fields.insert(name.to_string(), state);
        next
    }

    pub fn state(&self, name: &str) -> Option<&FieldState> {
        self.fields.get(name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(FieldState::Pending))
    }

    /// True once no field is pending (each is resolved or failed)
    pub fn is_settled(&self) -> bool {
        self.fields.values().all(|s| !s.is_pending())
    }

    /// Iterate field names with their states, in key order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldState)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Typed read of a resolved field
    pub fn get<T>(&self, name: &str) -> Result<T, FlowError>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.fields.get(name) {
            None => Err(FlowError::UnknownField(name.to_string())),
            Some(FieldState::Pending) => Err(FlowError::FieldPending(name.to_string())),
            Some(FieldState::Failed(reason)) => Err(FlowError::FieldFailed {
                field: name.to_string(),
                reason: reason.clone(),
            }),
            Some(FieldState::Resolved(v)) => Ok(serde_json::from_value(v.clone())?),
        }
    }
}
