//! Availability set module.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group name |
//! | `name` | Yes | Availability set name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `platform_update_domain_count` | No | Update domains (default at creation: 5) |
//! | `platform_fault_domain_count` | No | Fault domains (default at creation: 3) |
//! | `sku` | No | Classic or Aligned (default at creation: Classic) |
//! | `proximity_placement_group` | No | Resource ID of a proximity placement group |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |
//!
//! Only tags can change once the set exists.

use super::{finish, id_ref, tracked_state};
use crate::azure::ResourceId;
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    ParamSpec, ParamType,
};
use crate::reconcile::{Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySetDefinition {
    pub resource_group: String,
    pub name: String,
    pub location: Option<String>,
    pub update_domains: Option<u32>,
    pub fault_domains: Option<u32>,
    pub sku: Option<String>,
    pub proximity_placement_group: Option<String>,
    pub state: DesiredState,
    pub tags: TagPolicy,
}

impl AvailabilitySetDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            resource_group: params.get_string_required("resource_group")?,
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            update_domains: params.get_u32("platform_update_domain_count")?,
            fault_domains: params.get_u32("platform_fault_domain_count")?,
            sku: params.get_string("sku")?,
            proximity_placement_group: params.get_string("proximity_placement_group")?,
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
impl ResourceDefinition for AvailabilitySetDefinition {
    fn kind(&self) -> &'static str {
        "Availability set"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.Compute",
            "availabilitySets",
            &self.name,
        )
    }

    fn api_version(&self) -> &'static str {
        "2023-03-01"
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![
            FieldRule::immutable("location").compare(Comparison::Location),
            FieldRule::immutable("platform_update_domain_count"),
            FieldRule::immutable("platform_fault_domain_count"),
            FieldRule::immutable("sku").compare(Comparison::CaseInsensitive),
            FieldRule::immutable("proximity_placement_group").compare(Comparison::CaseInsensitive),
        ]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "platform_update_domain_count": self.update_domains,
            "platform_fault_domain_count": self.fault_domains,
            "sku": self.sku,
            "proximity_placement_group": self.proximity_placement_group,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn create_defaults(&self) -> Value {
        json!({
            "platform_update_domain_count": 5,
            "platform_fault_domain_count": 3,
            "sku": "Classic",
        })
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = tracked_state(raw);
        super::copy_field(&mut state, "platform_update_domain_count", raw, "properties.platformUpdateDomainCount");
        super::copy_field(&mut state, "platform_fault_domain_count", raw, "properties.platformFaultDomainCount");
        super::copy_field(&mut state, "sku", raw, "sku.name");
        super::copy_field(&mut state, "proximity_placement_group", raw, "properties.proximityPlacementGroup.id");
        finish(state)
    }

    fn to_body(&self, state: &Value, _current: Option<&Value>) -> Value {
        json!({
            "location": state["location"],
            "tags": state["tags"],
            "sku": { "name": state["sku"] },
            "properties": {
                "platformUpdateDomainCount": state["platform_update_domain_count"],
                "platformFaultDomainCount": state["platform_fault_domain_count"],
                "proximityPlacementGroup": id_ref(&state["proximity_placement_group"]),
            }
        })
    }

    fn validate_create(&self) -> ModuleResult<()> {
        if self.location.is_none() {
            return Err(required_to_create("location", self.kind(), &self.name));
        }
        Ok(())
    }
}

/// Module for managing availability sets
pub struct AvailabilitySetModule;

#[async_trait]
impl Module for AvailabilitySetModule {
    fn name(&self) -> &'static str {
        "azure_rm_availabilityset"
    }

    fn description(&self) -> &'static str {
        "Manage Azure availability sets"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(ParamSpec::new("platform_update_domain_count", ParamType::Int))
            .param(ParamSpec::new("platform_fault_domain_count", ParamType::Int))
            .param(ParamSpec::new("sku", ParamType::Str).choices(&["Classic", "Aligned"]))
            .param(ParamSpec::new("proximity_placement_group", ParamType::Str))
            .param(common::state_param())
            .params(common::tag_params())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = AvailabilitySetDefinition::from_params(params)?;
        info!(
            "Reconciling availability set '{}' in '{}'",
            definition.name, definition.resource_group
        );
        common::reconcile(&definition, params, context).await
    }
}
