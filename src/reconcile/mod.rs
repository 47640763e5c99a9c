//! Idempotent reconciliation of one Azure resource.
//!
//! Every typed module describes its resource as a [`ResourceDefinition`]: where it
//! lives, how to turn the ARM representation into the module's result shape and
//! back, and which fields may change after creation. The [`Reconciler`] does the
//! rest:
//!
//! 1. fetch the current state (404 means absent)
//! 2. [`plan`] an [`Action`] by comparing desired and current state field by field
//! 3. issue at most one create, update or delete (nothing in check mode)
//! 4. report the normalized final state
//!
//! Desired and current state are compared in the *normalized* shape, the same
//! shape the module returns. Desired fields that are `null` were not specified and
//! are never compared.

pub mod cycle;
pub mod tags;

pub use cycle::{Outcome, Reconciler};
pub use tags::TagPolicy;

use crate::azure::{ArmClient, ResourceId};
use crate::modules::{ModuleError, ModuleResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// What the reconciler decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    NoOp,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn changes_anything(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::NoOp => write!(f, "no-op"),
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// `state` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
}

impl DesiredState {
    pub fn from_str(s: &str) -> ModuleResult<Self> {
        match s.to_lowercase().as_str() {
            "present" => Ok(DesiredState::Present),
            "absent" => Ok(DesiredState::Absent),
            _ => Err(ModuleError::InvalidParameter(format!(
                "Invalid state '{}'. Valid states: present, absent",
                s
            ))),
        }
    }
}

/// Whether a field may change once the resource exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    Mutable,
    /// A difference fails the run before any mutating call
    Immutable,
    /// Sent on writes, never compared after creation
    CreateOnly,
}

/// How two values of a field are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Exact,
    CaseInsensitive,
    /// Region names: case and whitespace are ignored
    Location,
    /// Lists compared as sets
    UnorderedList,
    /// Maps merged on write: equal when every desired member is already present
    Subset,
}

impl Comparison {
    pub fn equal(&self, desired: &Value, current: &Value) -> bool {
        match self {
            Comparison::Exact => desired == current,
            Comparison::CaseInsensitive => match (desired, current) {
                (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
                _ => desired == current,
            },
            Comparison::Location => match (desired, current) {
                (Value::String(a), Value::String(b)) => {
                    normalize_location(a) == normalize_location(b)
                }
                _ => desired == current,
            },
            Comparison::UnorderedList => match (desired, current) {
                (Value::Array(a), Value::Array(b)) => sorted_strings(a) == sorted_strings(b),
                (Value::Array(a), Value::Null) => a.is_empty(),
                _ => desired == current,
            },
            Comparison::Subset => match current {
                Value::Null => desired.as_object().map_or(false, |d| d.is_empty()),
                _ => is_subset(desired, current),
            },
        }
    }
}

fn sorted_strings(items: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string(),
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

/// `"East US"` and `"eastus"` name the same region.
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Comparison rule for one field of the normalized state.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    /// Dotted path into the normalized state
    pub path: &'static str,
    pub mutability: Mutability,
    pub comparison: Comparison,
    /// Error text for an immutable conflict; `{name}`, `{current}` and `{desired}` are substituted
    pub message: Option<&'static str>,
}

impl FieldRule {
    pub fn mutable(path: &'static str) -> Self {
        Self {
            path,
            mutability: Mutability::Mutable,
            comparison: Comparison::Exact,
            message: None,
        }
    }

    pub fn immutable(path: &'static str) -> Self {
        Self {
            mutability: Mutability::Immutable,
            ..Self::mutable(path)
        }
    }

    pub fn create_only(path: &'static str) -> Self {
        Self {
            mutability: Mutability::CreateOnly,
            ..Self::mutable(path)
        }
    }

    pub fn compare(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

/// One field that differs between desired and current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub path: String,
    pub before: Value,
    pub after: Value,
    pub mutability: Mutability,
}

/// All differences found for a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    pub changes: Vec<FieldChange>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changed field paths, in rule order.
    pub fn paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    pub fn immutable_violations(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes
            .iter()
            .filter(|c| c.mutability == Mutability::Immutable)
    }
}

/// Read a dotted path out of a JSON object.
pub fn lookup<'a>(value: &'a Value, path: &str) -> &'a Value {
    path.split('.')
        .try_fold(value, |v, key| v.get(key))
        .unwrap_or(&Value::Null)
}

/// Compare every rule-listed field that the desired state specifies.
///
/// `CreateOnly` fields are skipped: they cannot be read back once the resource exists.
pub fn compute_delta(rules: &[FieldRule], desired: &Value, current: &Value) -> Delta {
    let changes = rules
        .iter()
        .filter(|rule| rule.mutability != Mutability::CreateOnly)
        .filter_map(|rule| {
            let want = lookup(desired, rule.path);
            if want.is_null() {
                return None;
            }
            let have = lookup(current, rule.path);
            if rule.comparison.equal(want, have) {
                None
            } else {
                Some(FieldChange {
                    path: rule.path.to_string(),
                    before: have.clone(),
                    after: want.clone(),
                    mutability: rule.mutability,
                })
            }
        })
        .collect();
    Delta { changes }
}

/// Overlay `patch` onto `base`: objects merge recursively, `null` in `patch` keeps
/// the base value, everything else replaces.
pub fn overlay(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            let mut merged = b.clone();
            for (key, value) in p {
                if value.is_null() {
                    continue;
                }
                let next = match b.get(key) {
                    Some(existing) => overlay(existing, value),
                    None => prune_nulls(value),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (_, other) => prune_nulls(other),
    }
}

/// Drop `null` members from objects, recursively.
pub fn prune_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), prune_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Whether every member of `desired` is present and equal in `actual`.
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => d
            .iter()
            .all(|(k, v)| a.get(k).map(|av| is_subset(v, av)).unwrap_or(v.is_null())),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len() && d.iter().zip(a).all(|(dv, av)| is_subset(dv, av))
        }
        (Value::String(d), Value::String(a)) => d == a,
        _ => desired == actual,
    }
}

/// How existing resources are updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Put,
    Patch,
}

/// Everything the reconciler needs to know about one resource type.
#[async_trait]
pub trait ResourceDefinition: Send + Sync {
    /// Human name of the resource type, e.g. `Resource group`
    fn kind(&self) -> &'static str;

    /// Name of this resource
    fn name(&self) -> &str;

    /// Full ARM identifier
    fn resource_id(&self, subscription_id: &str) -> ResourceId;

    fn api_version(&self) -> &'static str;

    fn desired_state(&self) -> DesiredState;

    fn rules(&self) -> Vec<FieldRule>;

    /// Desired state in normalized shape, `null` for unspecified fields
    fn desired(&self) -> Value;

    /// Tag handling, for taggable resources
    fn tags(&self) -> Option<&TagPolicy> {
        None
    }

    /// Values applied only when creating
    fn create_defaults(&self) -> Value {
        Value::Null
    }

    /// ARM representation to normalized state
    fn normalize(&self, raw: &Value) -> Value;

    /// Normalized target state to ARM request body; `current` is the raw resource when updating
    fn to_body(&self, state: &Value, current: Option<&Value>) -> Value;

    fn update_method(&self) -> UpdateMethod {
        UpdateMethod::Put
    }

    /// Checks that only apply when the resource has to be created
    fn validate_create(&self) -> ModuleResult<()> {
        Ok(())
    }

    /// Adjust desired state against the existing resource before comparing
    fn reconcile_desired(&self, desired: Value, _current: &Value) -> Value {
        desired
    }

    /// Read-only checks before a delete; may fail the run
    async fn before_delete(&self, _client: &dyn ArmClient, _id: &str) -> ModuleResult<()> {
        Ok(())
    }

    /// Poll until the resource is gone after deleting it
    fn wait_for_absence(&self) -> bool {
        false
    }
}

/// Result of planning, before anything is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub action: Action,
    pub delta: Delta,
    /// Normalized state to write (create/update) or the unchanged current state (no-op)
    pub target: Option<Value>,
}

/// Decide what to do for one resource.
pub fn plan<D: ResourceDefinition + ?Sized>(
    definition: &D,
    current: Option<&Value>,
) -> ModuleResult<Plan> {
    let desired = definition.desired();

    match (definition.desired_state(), current) {
        (DesiredState::Absent, None) => Ok(Plan {
            action: Action::NoOp,
            delta: Delta::default(),
            target: None,
        }),
        (DesiredState::Absent, Some(_)) => Ok(Plan {
            action: Action::Delete,
            delta: Delta::default(),
            target: None,
        }),
        (DesiredState::Present, None) => {
            let mut target = overlay(&definition.create_defaults(), &desired);
            if let Some(tags) = definition.tags().and_then(|p| p.desired_on_create()) {
                target["tags"] = tags;
            }
            Ok(Plan {
                action: Action::Create,
                delta: Delta::default(),
                target: Some(prune_nulls(&target)),
            })
        }
        (DesiredState::Present, Some(current)) => {
            let desired = definition.reconcile_desired(desired, current);
            let mut delta = compute_delta(&definition.rules(), &desired, current);

            if let Some(violation) = delta.immutable_violations().next() {
                return Err(immutable_error(definition, violation));
            }

            let mut target = overlay(current, &desired);
            if let Some(policy) = definition.tags() {
                let current_tags = current.get("tags").unwrap_or(&Value::Null);
                if let Some(merged) = policy.reconcile(current_tags) {
                    delta.changes.push(FieldChange {
                        path: "tags".to_string(),
                        before: current_tags.clone(),
                        after: merged.clone(),
                        mutability: Mutability::Mutable,
                    });
                    target["tags"] = merged;
                }
            }

            if delta.is_empty() {
                Ok(Plan {
                    action: Action::NoOp,
                    delta,
                    target: Some(current.clone()),
                })
            } else {
                Ok(Plan {
                    action: Action::Update,
                    delta,
                    target: Some(target),
                })
            }
        }
    }
}

fn immutable_error<D: ResourceDefinition + ?Sized>(
    definition: &D,
    change: &FieldChange,
) -> ModuleError {
    let render = |v: &Value| match v {
        Value::String(s) => s.clone(),
        Value::Null => "unset".to_string(),
        other => other.to_string(),
    };
    let template = definition
        .rules()
        .into_iter()
        .find(|r| r.path == change.path)
        .and_then(|r| r.message)
        .unwrap_or("{kind} '{name}' has {field} '{current}' which cannot be changed to '{desired}'.");

    let message = template
        .replace("{kind}", definition.kind())
        .replace("{name}", definition.name())
        .replace("{field}", &change.path)
        .replace("{current}", &render(&change.before))
        .replace("{desired}", &render(&change.after));

    ModuleError::ImmutableField {
        field: change.path.clone(),
        message,
    }
}
