//! Tag merge and replace semantics.
//!
//! With `append_tags` (the default) only the keys named in `tags` are set; other
//! tags on the resource are left alone. Without it the resource ends up with
//! exactly the given tags. Leaving `tags` out never touches tags at all.

use crate::modules::{ModuleParams, ModuleResult, ParamExt};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagPolicy {
    pub tags: Option<Map<String, Value>>,
    pub append: bool,
}

impl TagPolicy {
    pub fn new(tags: Option<Map<String, Value>>, append: bool) -> Self {
        Self { tags, append }
    }

    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        let tags = params.get_string_map("tags")?.map(|map| {
            map.into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<Map<_, _>>()
        });
        Ok(Self {
            tags,
            append: params.get_bool_or("append_tags", true),
        })
    }

    /// Tags to send when creating, if any were given.
    pub fn desired_on_create(&self) -> Option<Value> {
        self.tags.clone().map(Value::Object)
    }

    /// The tag set the resource should end up with, or `None` when it already matches.
    pub fn reconcile(&self, current: &Value) -> Option<Value> {
        let desired = self.tags.as_ref()?;
        let current = current.as_object().cloned().unwrap_or_default();
        let merged = merge_tags(&current, desired, self.append);
        if merged == current {
            None
        } else {
            Some(Value::Object(merged))
        }
    }
}

/// Combine existing and desired tags.
pub fn merge_tags(
    current: &Map<String, Value>,
    desired: &Map<String, Value>,
    append: bool,
) -> Map<String, Value> {
    if !append {
        return desired.clone();
    }
    let mut merged = current.clone();
    for (key, value) in desired {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
