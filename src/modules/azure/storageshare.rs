//! File share module.
//!
//! Shares live under a storage account's default file service and carry no
//! location or tags. Deleting a share is eventually consistent, so the module
//! waits until a read returns not-found before reporting.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group of the storage account |
//! | `account_name` | Yes | Storage account name |
//! | `name` | Yes | Share name |
//! | `quota` | No | Maximum size in GiB |
//! | `access_tier` | No | TransactionOptimized, Hot, Cool or Premium |
//! | `metadata` | No | Name/value pairs merged into the share's metadata |
//! | `state` | No | present or absent (default: present) |

use super::finish;
use crate::azure::ResourceId;
use crate::modules::common;
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    ParamSpec, ParamType,
};
use crate::reconcile::{Comparison, DesiredState, FieldRule, ResourceDefinition, UpdateMethod};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageShareDefinition {
    pub resource_group: String,
    pub account_name: String,
    pub name: String,
    pub quota: Option<u32>,
    pub access_tier: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub state: DesiredState,
}

impl StorageShareDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        let metadata = params.get_string_map("metadata")?.map(|map| {
            map.into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<Map<_, _>>()
        });
        Ok(Self {
            resource_group: params.get_string_required("resource_group")?,
            account_name: params.get_string_required("account_name")?,
            name: params.get_string_required("name")?,
            quota: params.get_u32("quota")?,
            access_tier: params.get_string("access_tier")?,
            metadata,
            state: DesiredState::from_str(
                &params
                    .get_string("state")?
                    .unwrap_or_else(|| "present".to_string()),
            )?,
        })
    }
}

#[async_trait]
impl ResourceDefinition for StorageShareDefinition {
    fn kind(&self) -> &'static str {
        "File share"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.Storage",
            "storageAccounts",
            &self.account_name,
        )
        .child("fileServices", "default")
        .child("shares", &self.name)
    }

    fn api_version(&self) -> &'static str {
        "2022-09-01"
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![
            FieldRule::mutable("quota"),
            FieldRule::mutable("access_tier"),
            FieldRule::mutable("metadata").compare(Comparison::Subset),
        ]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "quota": self.quota,
            "access_tier": self.access_tier,
            "metadata": self.metadata,
        })
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = Map::new();
        state.insert("id".into(), raw["id"].clone());
        state.insert("name".into(), raw["name"].clone());
        state.insert("account_name".into(), json!(self.account_name));
        state.insert("resource_group".into(), json!(self.resource_group));
        super::copy_field(&mut state, "quota", raw, "properties.shareQuota");
        super::copy_field(&mut state, "access_tier", raw, "properties.accessTier");
        super::copy_field(&mut state, "metadata", raw, "properties.metadata");
        super::copy_field(&mut state, "etag", raw, "etag");
        finish(state)
    }

    fn to_body(&self, state: &Value, _current: Option<&Value>) -> Value {
        json!({
            "properties": {
                "shareQuota": state["quota"],
                "accessTier": state["access_tier"],
                "metadata": state["metadata"],
            }
        })
    }

    fn update_method(&self) -> UpdateMethod {
        UpdateMethod::Patch
    }

    fn wait_for_absence(&self) -> bool {
        true
    }
}

/// Module for managing Azure Files shares
pub struct StorageShareModule;

#[async_trait]
impl Module for StorageShareModule {
    fn name(&self) -> &'static str {
        "azure_rm_storageshare"
    }

    fn description(&self) -> &'static str {
        "Manage Azure storage file shares"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("account_name", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("quota", ParamType::Int))
            .param(
                ParamSpec::new("access_tier", ParamType::Str)
                    .choices(&["TransactionOptimized", "Hot", "Cool", "Premium"]),
            )
            .param(ParamSpec::new("metadata", ParamType::Dict))
            .param(common::state_param())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = StorageShareDefinition::from_params(params)?;
        info!(
            "Reconciling file share '{}' in account '{}'",
            definition.name, definition.account_name
        );
        common::reconcile(&definition, params, context).await
    }
}
