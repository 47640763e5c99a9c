//! Resource group facts.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `name` | No | Limit results to one group |
//! | `tags` | No | Filters, each `key` or `key:value` |
//! | `list_resources` | No | Include the resources of each group (default: false) |

use super::resourcegroup::{normalize_group, API_VERSION};
use crate::azure::{ArmClient, ArmClientExt, ResourceId};
use crate::modules::common;
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt, ParamSpec, ParamType,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// A `key` or `key:value` tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    key: String,
    value: Option<String>,
}

impl TagFilter {
    pub fn parse(filter: &str) -> Self {
        match filter.split_once(':') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: filter.to_string(),
                value: None,
            },
        }
    }

    pub fn matches(&self, tags: &Value) -> bool {
        match (tags.get(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(Value::String(actual)), Some(expected)) => actual == expected,
            _ => false,
        }
    }
}

/// Read-only listing of resource groups
pub struct ResourceGroupInfoModule;

impl ResourceGroupInfoModule {
    async fn fetch(
        &self,
        client: &dyn ArmClient,
        name: Option<&str>,
    ) -> ModuleResult<Vec<Value>> {
        let subscription = client.subscription_id();
        match name {
            Some(name) => {
                let id = ResourceId::resource_group(&subscription, name).to_string();
                let group = client.get_resource(&id, API_VERSION).await.map_err(|e| {
                    ModuleError::provider("read", format!("resource group '{}'", name), e)
                })?;
                Ok(group.into_iter().collect())
            }
            None => {
                let path = format!("{}/resourcegroups", ResourceId::subscription(&subscription));
                client
                    .list(&path, API_VERSION)
                    .await
                    .map_err(|e| ModuleError::provider("list", "resource groups", e))
            }
        }
    }
}

#[async_trait]
impl Module for ResourceGroupInfoModule {
    fn name(&self) -> &'static str {
        "azure_rm_resourcegroup_info"
    }

    fn description(&self) -> &'static str {
        "Get facts about Azure resource groups"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("name", ParamType::Str))
            .param(ParamSpec::new("tags", ParamType::List).elements(ParamType::Str))
            .param(ParamSpec::new("list_resources", ParamType::Bool).default_value(json!(false)))
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let name = params.get_string("name")?;
        let filters: Vec<TagFilter> = params
            .get_vec_string("tags")?
            .unwrap_or_default()
            .iter()
            .map(|f| TagFilter::parse(f))
            .collect();
        let list_resources = params.get_bool_or("list_resources", false);

        let client = common::resolve_client(params, context).await?;
        let raw = self.fetch(client.as_ref(), name.as_deref()).await?;

        let mut groups = Vec::new();
        for group in raw.iter().map(normalize_group) {
            let tags = group.get("tags").cloned().unwrap_or(Value::Null);
            if !filters.iter().all(|f| f.matches(&tags)) {
                continue;
            }
            let mut group = group;
            if list_resources {
                if let Some(id) = group.get("id").and_then(Value::as_str) {
                    let resources = client
                        .list(&format!("{}/resources", id), API_VERSION)
                        .await
                        .map_err(|e| ModuleError::provider("list resources in", id, e))?;
                    group["resources"] = Value::Array(resources);
                }
            }
            groups.push(group);
        }
        debug!("Found {} resource group(s)", groups.len());

        Ok(ModuleOutput::ok(format!("Found {} resource group(s)", groups.len()))
            .with_data("resourcegroups", Value::Array(groups)))
    }
}
