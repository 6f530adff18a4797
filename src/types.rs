//! Plan, import, and metadata types exchanged with the runtime.

use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A change to a single top-level attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Compute the plan for moving a resource from `prior` to `proposed`.
    ///
    /// Computed-only attributes never produce changes: they are carried over
    /// from `prior` unless the resource is replaced. Optional+computed
    /// attributes left null in `proposed` keep their prior value. A change
    /// to any force-new attribute or block marks the plan as a replacement.
    pub fn between(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> Self {
        let empty = Map::new();
        let proposed_obj = proposed.as_object().unwrap_or(&empty);

        let Some(prior_obj) = prior.and_then(Value::as_object) else {
            let changes = proposed_obj
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::added(k.as_str(), v.clone()))
                .collect();
            return Self::with_changes(proposed.clone(), changes, false);
        };

        if proposed.is_null() {
            let changes = prior_obj
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::removed(k.as_str(), v.clone()))
                .collect();
            return Self::with_changes(Value::Null, changes, false);
        }

        let computed_only = schema.computed_only_keys();
        let force_new = schema.force_new_keys();
        let mut planned = proposed_obj.clone();
        let mut changes = Vec::new();

        let mut keys: Vec<&String> = prior_obj.keys().chain(proposed_obj.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            if key == "id" || computed_only.contains(&key.as_str()) {
                continue;
            }
            let before = prior_obj.get(key).filter(|v| !v.is_null());
            let mut after = proposed_obj.get(key).filter(|v| !v.is_null());

            let optional_computed = schema
                .block
                .attributes
                .get(key)
                .is_some_and(|a| a.flags.optional && a.flags.computed);
            if after.is_none() && optional_computed {
                if let Some(b) = before {
                    planned.insert(key.clone(), b.clone());
                    after = before;
                }
            }

            let change = match (before, after) {
                (None, None) => continue,
                (Some(b), Some(a)) if b == a => continue,
                (Some(b), Some(a)) => AttributeChange::modified(key.as_str(), b.clone(), a.clone()),
                (None, Some(a)) => AttributeChange::added(key.as_str(), a.clone()),
                (Some(b), None) => AttributeChange::removed(key.as_str(), b.clone()),
            };
            changes.push(change);
        }

        let requires_replace = changes.iter().any(|c| force_new.contains(&c.path.as_str()));

        if !requires_replace {
            for key in computed_only.iter().copied().chain(std::iter::once("id")) {
                if let Some(v) = prior_obj.get(key) {
                    planned.insert(key.to_string(), v.clone());
                }
            }
        }

        Self::with_changes(Value::Object(planned), changes, requires_replace)
    }
}

/// A resource produced by an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state; a read fills in the rest.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Names of everything the provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}
