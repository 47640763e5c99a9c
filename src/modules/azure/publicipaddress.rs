//! Public IP address module.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group name |
//! | `name` | Yes | Public IP name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `allocation_method` | No | Static or Dynamic (default at creation: Dynamic, Static for Standard SKU) |
//! | `sku` | No | Basic or Standard; cannot change |
//! | `version` | No | ipv4 or ipv6 (default at creation: ipv4); cannot change |
//! | `domain_name` | No | DNS label, alias `domain_name_label` |
//! | `idle_timeout` | No | TCP idle timeout in minutes |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |

use super::{finish, tracked_state};
use crate::azure::ResourceId;
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt, ParamSpec, ParamType,
};
use crate::reconcile::{Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct PublicIpAddressDefinition {
    pub resource_group: String,
    pub name: String,
    pub location: Option<String>,
    pub allocation_method: Option<String>,
    pub sku: Option<String>,
    pub version: Option<String>,
    pub domain_name: Option<String>,
    pub idle_timeout: Option<u32>,
    pub state: DesiredState,
    pub tags: TagPolicy,
}

impl PublicIpAddressDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        let definition = Self {
            resource_group: params.get_string_required("resource_group")?,
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            allocation_method: params.get_string("allocation_method")?,
            sku: params.get_string("sku")?,
            version: params.get_string("version")?.map(|v| v.to_lowercase()),
            domain_name: params.get_string("domain_name")?,
            idle_timeout: params.get_u32("idle_timeout")?,
            state: DesiredState::from_str(
                &params
                    .get_string("state")?
                    .unwrap_or_else(|| "present".to_string()),
            )?,
            tags: TagPolicy::from_params(params)?,
        };

        if definition.is_standard()
            && definition
                .allocation_method
                .as_deref()
                .is_some_and(|m| m.eq_ignore_ascii_case("dynamic"))
        {
            return Err(ModuleError::InvalidParameter(
                "Standard SKU public IP addresses require allocation_method Static".to_string(),
            ));
        }
        Ok(definition)
    }

    fn is_standard(&self) -> bool {
        self.sku
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("standard"))
    }
}

/// `IPv4` as ARM spells it, `ipv4` as the module does.
fn arm_version(version: &Value) -> Value {
    match version.as_str() {
        Some(v) if v.eq_ignore_ascii_case("ipv6") => json!("IPv6"),
        Some(_) => json!("IPv4"),
        None => Value::Null,
    }
}

#[async_trait]
impl ResourceDefinition for PublicIpAddressDefinition {
    fn kind(&self) -> &'static str {
        "Public IP address"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.Network",
            "publicIPAddresses",
            &self.name,
        )
    }

    fn api_version(&self) -> &'static str {
        "2023-05-01"
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![
            FieldRule::immutable("location").compare(Comparison::Location),
            FieldRule::immutable("sku").compare(Comparison::CaseInsensitive),
            FieldRule::immutable("version").compare(Comparison::CaseInsensitive),
            FieldRule::mutable("allocation_method").compare(Comparison::CaseInsensitive),
            FieldRule::mutable("domain_name"),
            FieldRule::mutable("idle_timeout"),
        ]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "allocation_method": self.allocation_method,
            "sku": self.sku,
            "version": self.version,
            "domain_name": self.domain_name,
            "idle_timeout": self.idle_timeout,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn create_defaults(&self) -> Value {
        let allocation = if self.is_standard() { "Static" } else { "Dynamic" };
        json!({ "allocation_method": allocation, "version": "ipv4" })
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = tracked_state(raw);
        super::copy_field(&mut state, "allocation_method", raw, "properties.publicIPAllocationMethod");
        super::copy_field(&mut state, "sku", raw, "sku.name");
        let version = crate::reconcile::lookup(raw, "properties.publicIPAddressVersion")
            .as_str()
            .map(|v| json!(v.to_lowercase()))
            .unwrap_or(Value::Null);
        state.insert("version".into(), version);
        super::copy_field(&mut state, "domain_name", raw, "properties.dnsSettings.domainNameLabel");
        super::copy_field(&mut state, "fqdn", raw, "properties.dnsSettings.fqdn");
        super::copy_field(&mut state, "idle_timeout", raw, "properties.idleTimeoutInMinutes");
        super::copy_field(&mut state, "ip_address", raw, "properties.ipAddress");
        super::copy_field(&mut state, "provisioning_state", raw, "properties.provisioningState");
        finish(state)
    }

    fn to_body(&self, state: &Value, _current: Option<&Value>) -> Value {
        let dns = if state["domain_name"].is_null() {
            Value::Null
        } else {
            json!({ "domainNameLabel": state["domain_name"] })
        };
        let sku = if state["sku"].is_null() {
            Value::Null
        } else {
            json!({ "name": state["sku"] })
        };
        json!({
            "location": state["location"],
            "tags": state["tags"],
            "sku": sku,
            "properties": {
                "publicIPAllocationMethod": state["allocation_method"],
                "publicIPAddressVersion": arm_version(&state["version"]),
                "dnsSettings": dns,
                "idleTimeoutInMinutes": state["idle_timeout"],
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

/// Module for managing public IP addresses
pub struct PublicIpAddressModule;

#[async_trait]
impl Module for PublicIpAddressModule {
    fn name(&self) -> &'static str {
        "azure_rm_publicipaddress"
    }

    fn description(&self) -> &'static str {
        "Manage Azure public IP addresses"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(
                ParamSpec::new("allocation_method", ParamType::Str)
                    .choices(&["Static", "Dynamic", "static", "dynamic"]),
            )
            .param(ParamSpec::new("sku", ParamType::Str).choices(&["Basic", "Standard", "basic", "standard"]))
            .param(ParamSpec::new("version", ParamType::Str).choices(&["ipv4", "ipv6", "IPv4", "IPv6"]))
            .param(ParamSpec::new("domain_name", ParamType::Str).aliases(&["domain_name_label"]))
            .param(ParamSpec::new("idle_timeout", ParamType::Int))
            .param(common::state_param())
            .params(common::tag_params())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = PublicIpAddressDefinition::from_params(params)?;
        info!(
            "Reconciling public IP address '{}' in '{}'",
            definition.name, definition.resource_group
        );
        common::reconcile(&definition, params, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{plan, prune_nulls, Action};

    fn definition() -> PublicIpAddressDefinition {
        PublicIpAddressDefinition {
            resource_group: "rg".into(),
            name: "pip".into(),
            location: Some("eastus".into()),
            allocation_method: None,
            sku: None,
            version: None,
            domain_name: None,
            idle_timeout: None,
            state: DesiredState::Present,
            tags: TagPolicy::default(),
        }
    }

    fn existing() -> Value {
        definition().normalize(&json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip",
            "name": "pip",
            "location": "eastus",
            "sku": {"name": "Basic"},
            "properties": {
                "publicIPAllocationMethod": "Dynamic",
                "publicIPAddressVersion": "IPv4",
                "idleTimeoutInMinutes": 4
            }
        }))
    }

    #[test]
    fn test_version_is_lowercased() {
        assert_eq!(existing()["version"], json!("ipv4"));
    }

    #[test]
    fn test_sku_cannot_change() {
        let mut def = definition();
        def.sku = Some("Standard".into());
        def.allocation_method = Some("Static".into());
        let err = plan(&def, Some(&existing())).unwrap_err();
        assert!(matches!(err, ModuleError::ImmutableField { ref field, .. } if field == "sku"));
    }

    #[test]
    fn test_allocation_method_updates() {
        let mut def = definition();
        def.allocation_method = Some("static".into());
        let plan = plan(&def, Some(&existing())).unwrap();
        assert_eq!(plan.action, Action::Update);
        let body = def.to_body(plan.target.as_ref().unwrap(), None);
        assert_eq!(body["properties"]["publicIPAllocationMethod"], json!("static"));
        assert_eq!(body["properties"]["publicIPAddressVersion"], json!("IPv4"));
    }

    #[test]
    fn test_standard_sku_defaults_to_static() {
        let mut def = definition();
        def.sku = Some("Standard".into());
        let target = plan(&def, None).unwrap().target.unwrap();
        assert_eq!(target["allocation_method"], json!("Static"));
    }

    #[test]
    fn test_body_omits_unset_sku() {
        let def = definition();
        let target = plan(&def, None).unwrap().target.unwrap();
        let body = prune_nulls(&def.to_body(&target, None));
        assert!(body.get("sku").is_none());
        assert!(body["properties"].get("dnsSettings").is_none());
    }

    #[test]
    fn test_standard_dynamic_is_rejected() {
        let mut params = ModuleParams::new();
        params.insert("resource_group".into(), json!("rg"));
        params.insert("name".into(), json!("pip"));
        params.insert("sku".into(), json!("Standard"));
        params.insert("allocation_method".into(), json!("Dynamic"));
        assert!(PublicIpAddressDefinition::from_params(&params).is_err());
    }
}
