//! Container registry module.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group name |
//! | `name` | Yes | Registry name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `sku` | No | Basic, Standard or Premium (default at creation: Standard) |
//! | `admin_user_enabled` | No | Enable the admin user |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |

use super::{finish, tracked_state};
use crate::azure::ResourceId;
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    ParamSpec, ParamType,
};
use crate::reconcile::{
    Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy, UpdateMethod,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRegistryDefinition {
    pub resource_group: String,
    pub name: String,
    pub location: Option<String>,
    pub sku: Option<String>,
    pub admin_user_enabled: Option<bool>,
    pub state: DesiredState,
    pub tags: TagPolicy,
}

impl ContainerRegistryDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            resource_group: params.get_string_required("resource_group")?,
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            sku: params.get_string("sku")?,
            admin_user_enabled: params.get_bool("admin_user_enabled")?,
            state: DesiredState::from_str(
                &params
                    .get_string("state")?
                    .unwrap_or_else(|| "present".to_string()),
            )?,
            tags: TagPolicy::from_params(params)?,
        })
    }
}

#[async_trait]
impl ResourceDefinition for ContainerRegistryDefinition {
    fn kind(&self) -> &'static str {
        "Container registry"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.ContainerRegistry",
            "registries",
            &self.name,
        )
    }

    fn api_version(&self) -> &'static str {
        "2023-07-01"
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![
            FieldRule::immutable("location").compare(Comparison::Location),
            FieldRule::mutable("sku").compare(Comparison::CaseInsensitive),
            FieldRule::mutable("admin_user_enabled"),
        ]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "sku": self.sku,
            "admin_user_enabled": self.admin_user_enabled,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn create_defaults(&self) -> Value {
        json!({ "sku": "Standard", "admin_user_enabled": false })
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = tracked_state(raw);
        super::copy_field(&mut state, "sku", raw, "sku.name");
        super::copy_field(&mut state, "admin_user_enabled", raw, "properties.adminUserEnabled");
        super::copy_field(&mut state, "login_server", raw, "properties.loginServer");
        super::copy_field(&mut state, "provisioning_state", raw, "properties.provisioningState");
        finish(state)
    }

    fn to_body(&self, state: &Value, current: Option<&Value>) -> Value {
        // The update model has no location.
        let location = if current.is_some() {
            Value::Null
        } else {
            state["location"].clone()
        };
        json!({
            "location": location,
            "tags": state["tags"],
            "sku": { "name": state["sku"] },
            "properties": { "adminUserEnabled": state["admin_user_enabled"] }
        })
    }

    fn update_method(&self) -> UpdateMethod {
        UpdateMethod::Patch
    }

    fn validate_create(&self) -> ModuleResult<()> {
        if self.location.is_none() {
            return Err(required_to_create("location", self.kind(), &self.name));
        }
        Ok(())
    }
}

/// Module for managing container registries
pub struct ContainerRegistryModule;

#[async_trait]
impl Module for ContainerRegistryModule {
    fn name(&self) -> &'static str {
        "azure_rm_containerregistry"
    }

    fn description(&self) -> &'static str {
        "Manage Azure container registries"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(ParamSpec::new("sku", ParamType::Str).choices(&["Basic", "Standard", "Premium"]))
            .param(ParamSpec::new("admin_user_enabled", ParamType::Bool))
            .param(common::state_param())
            .params(common::tag_params())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = ContainerRegistryDefinition::from_params(params)?;
        info!(
            "Reconciling container registry '{}' in '{}'",
            definition.name, definition.resource_group
        );
        common::reconcile(&definition, params, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{plan, Action};

    fn definition(sku: Option<&str>) -> ContainerRegistryDefinition {
        ContainerRegistryDefinition {
            resource_group: "rg".into(),
            name: "acr".into(),
            location: Some("eastus".into()),
            sku: sku.map(String::from),
            admin_user_enabled: None,
            state: DesiredState::Present,
            tags: TagPolicy::default(),
        }
    }

    fn existing() -> Value {
        definition(None).normalize(&json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerRegistry/registries/acr",
            "name": "acr",
            "location": "eastus",
            "sku": {"name": "Standard", "tier": "Standard"},
            "properties": {"adminUserEnabled": false, "loginServer": "acr.azurecr.io"}
        }))
    }

    #[test]
    fn test_sku_case_is_ignored() {
        let plan = plan(&definition(Some("standard")), Some(&existing())).unwrap();
        assert_eq!(plan.action, Action::NoOp);
    }

    #[test]
    fn test_sku_upgrade_patches_without_location() {
        let def = definition(Some("Premium"));
        let current_raw = json!({"location": "eastus"});
        let plan = plan(&def, Some(&existing())).unwrap();
        assert_eq!(plan.action, Action::Update);
        let body = def.to_body(plan.target.as_ref().unwrap(), Some(&current_raw));
        assert_eq!(body["sku"]["name"], json!("Premium"));
        assert!(body["location"].is_null());
        assert_eq!(def.update_method(), UpdateMethod::Patch);
    }

    #[test]
    fn test_create_defaults_to_standard() {
        let target = plan(&definition(None), None).unwrap().target.unwrap();
        assert_eq!(target["sku"], json!("Standard"));
    }
}
