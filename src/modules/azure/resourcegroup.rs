//! Resource group module.
//!
//! ## ResourceGroupModule
//!
//! Creates, tags and deletes resource groups. A group cannot move between
//! regions, so a `location` that differs from the existing group fails the run.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `name` | Yes | Resource group name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |
//! | `append_tags` | No | Merge with existing tags (default: true) |
//! | `force_delete_nonempty` | No | Delete even if the group still holds resources (default: false) |
//!
//! ### Example
//!
//! ```yaml
//! - name: Create a resource group
//!   azure_rm_resourcegroup:
//!     name: myResourceGroup
//!     location: westus
//!     tags:
//!       testing: testing
//!       delete: never
//! ```

use super::{finish, tracked_state};
use crate::azure::{ArmClient, ArmClientExt, ResourceId};
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt, ParamSpec, ParamType,
};
use crate::reconcile::{Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

pub(super) const API_VERSION: &str = "2021-04-01";

/// Desired configuration of one resource group.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroupDefinition {
    pub name: String,
    pub location: Option<String>,
    pub state: DesiredState,
    pub tags: TagPolicy,
    pub force_delete_nonempty: bool,
}

impl ResourceGroupDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            state: DesiredState::from_str(
                &params
                    .get_string("state")?
                    .unwrap_or_else(|| "present".to_string()),
            )?,
            tags: TagPolicy::from_params(params)?,
            force_delete_nonempty: params.get_bool_or("force_delete_nonempty", false),
        })
    }
}

/// Result shape shared with `azure_rm_resourcegroup_info`.
pub(super) fn normalize_group(raw: &Value) -> Value {
    let mut state = tracked_state(raw);
    super::copy_field(&mut state, "provisioning_state", raw, "properties.provisioningState");
    finish(state)
}

#[async_trait]
impl ResourceDefinition for ResourceGroupDefinition {
    fn kind(&self) -> &'static str {
        "Resource group"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::resource_group(subscription_id, &self.name)
    }

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![FieldRule::immutable("location")
            .compare(Comparison::Location)
            .with_message(
                "Resource group '{name}' already exists in location '{current}' and cannot be moved.",
            )]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn normalize(&self, raw: &Value) -> Value {
        normalize_group(raw)
    }

    fn to_body(&self, state: &Value, _current: Option<&Value>) -> Value {
        json!({
            "location": state["location"],
            "tags": state["tags"],
        })
    }

    fn validate_create(&self) -> ModuleResult<()> {
        if self.location.is_none() {
            return Err(required_to_create("location", self.kind(), &self.name));
        }
        Ok(())
    }

    async fn before_delete(&self, client: &dyn ArmClient, id: &str) -> ModuleResult<()> {
        if self.force_delete_nonempty {
            return Ok(());
        }
        let resources = client
            .list(&format!("{}/resources", id), API_VERSION)
            .await
            .map_err(|e| {
                ModuleError::provider("list resources in", format!("resource group '{}'", self.name), e)
            })?;
        if !resources.is_empty() {
            return Err(ModuleError::ExecutionFailed(format!(
                "Resource group '{}' contains {} resource(s). Set force_delete_nonempty to delete it anyway.",
                self.name,
                resources.len()
            )));
        }
        Ok(())
    }
}

/// Module for managing resource groups
pub struct ResourceGroupModule;

#[async_trait]
impl Module for ResourceGroupModule {
    fn name(&self) -> &'static str {
        "azure_rm_resourcegroup"
    }

    fn description(&self) -> &'static str {
        "Manage Azure resource groups"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(common::state_param())
            .param(
                ParamSpec::new("force_delete_nonempty", ParamType::Bool)
                    .aliases(&["force"])
                    .default_value(json!(false))
                    .description("Remove the group even when it still contains resources"),
            )
            .params(common::tag_params())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = ResourceGroupDefinition::from_params(params)?;
        info!(
            "Reconciling resource group '{}' (state: {:?})",
            definition.name, definition.state
        );
        common::reconcile(&definition, params, context).await
    }
}
