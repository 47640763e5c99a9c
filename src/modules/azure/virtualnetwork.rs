//! Virtual network module.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group name |
//! | `name` | Yes | Virtual network name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `address_prefixes_cidr` | No* | Address spaces in CIDR form, alias `address_prefixes` (*required when creating) |
//! | `dns_servers` | No | Custom DNS servers |
//! | `purge_address_prefixes` | No | Remove prefixes not listed (default: false) |
//! | `purge_dns_servers` | No | Remove DNS servers not listed (default: false) |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |
//!
//! Without the purge flags the listed prefixes and servers are added to what the
//! network already has. Subnets are carried over untouched on every update.

use super::{finish, tracked_state};
use crate::azure::ResourceId;
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    ParamSpec, ParamType,
};
use crate::reconcile::{
    lookup, Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualNetworkDefinition {
    pub resource_group: String,
    pub name: String,
    pub location: Option<String>,
    pub address_prefixes: Option<Vec<String>>,
    pub dns_servers: Option<Vec<String>>,
    pub purge_address_prefixes: bool,
    pub purge_dns_servers: bool,
    pub state: DesiredState,
    pub tags: TagPolicy,
}

impl VirtualNetworkDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            resource_group: params.get_string_required("resource_group")?,
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            address_prefixes: params.get_vec_string("address_prefixes_cidr")?,
            dns_servers: params.get_vec_string("dns_servers")?,
            purge_address_prefixes: params.get_bool_or("purge_address_prefixes", false),
            purge_dns_servers: params.get_bool_or("purge_dns_servers", false),
            state: DesiredState::from_str(
                &params
                    .get_string("state")?
                    .unwrap_or_else(|| "present".to_string()),
            )?,
            tags: TagPolicy::from_params(params)?,
        })
    }
}

/// Existing entries first, then new ones, without duplicates.
fn union(current: &Value, desired: &[Value]) -> Value {
    let mut merged: Vec<Value> = current.as_array().cloned().unwrap_or_default();
    for item in desired {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    Value::Array(merged)
}

#[async_trait]
impl ResourceDefinition for VirtualNetworkDefinition {
    fn kind(&self) -> &'static str {
        "Virtual network"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.Network",
            "virtualNetworks",
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
            FieldRule::mutable("address_prefixes").compare(Comparison::UnorderedList),
            FieldRule::mutable("dns_servers").compare(Comparison::UnorderedList),
        ]
    }

    fn desired(&self) -> Value {
        let dns_servers = match (&self.dns_servers, self.purge_dns_servers) {
            (Some(servers), _) => json!(servers),
            (None, true) => json!([]),
            (None, false) => Value::Null,
        };
        json!({
            "name": self.name,
            "location": self.location,
            "address_prefixes": self.address_prefixes,
            "dns_servers": dns_servers,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn reconcile_desired(&self, mut desired: Value, current: &Value) -> Value {
        if !self.purge_address_prefixes {
            if let Some(prefixes) = desired["address_prefixes"].as_array().cloned() {
                desired["address_prefixes"] = union(&current["address_prefixes"], &prefixes);
            }
        }
        if !self.purge_dns_servers {
            if let Some(servers) = desired["dns_servers"].as_array().cloned() {
                desired["dns_servers"] = union(&current["dns_servers"], &servers);
            }
        }
        desired
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = tracked_state(raw);
        super::copy_field(&mut state, "address_prefixes", raw, "properties.addressSpace.addressPrefixes");
        super::copy_field(&mut state, "dns_servers", raw, "properties.dhcpOptions.dnsServers");
        super::copy_field(&mut state, "provisioning_state", raw, "properties.provisioningState");
        finish(state)
    }

    fn to_body(&self, state: &Value, current: Option<&Value>) -> Value {
        let subnets = current
            .map(|raw| lookup(raw, "properties.subnets").clone())
            .unwrap_or(Value::Null);
        json!({
            "location": state["location"],
            "tags": state["tags"],
            "properties": {
                "addressSpace": { "addressPrefixes": state["address_prefixes"] },
                "dhcpOptions": { "dnsServers": state["dns_servers"] },
                "subnets": subnets,
            }
        })
    }

    fn validate_create(&self) -> ModuleResult<()> {
        if self.location.is_none() {
            return Err(required_to_create("location", self.kind(), &self.name));
        }
        if self.address_prefixes.as_ref().map_or(true, Vec::is_empty) {
            return Err(required_to_create("address_prefixes_cidr", self.kind(), &self.name));
        }
        Ok(())
    }
}

/// Module for managing virtual networks
pub struct VirtualNetworkModule;

#[async_trait]
impl Module for VirtualNetworkModule {
    fn name(&self) -> &'static str {
        "azure_rm_virtualnetwork"
    }

    fn description(&self) -> &'static str {
        "Manage Azure virtual networks"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(
                ParamSpec::new("address_prefixes_cidr", ParamType::List)
                    .elements(ParamType::Str)
                    .aliases(&["address_prefixes"]),
            )
            .param(ParamSpec::new("dns_servers", ParamType::List).elements(ParamType::Str))
            .param(
                ParamSpec::new("purge_address_prefixes", ParamType::Bool)
                    .aliases(&["purge"])
                    .default_value(json!(false)),
            )
            .param(ParamSpec::new("purge_dns_servers", ParamType::Bool).default_value(json!(false)))
            .param(common::state_param())
            .params(common::tag_params())
            .params(common::auth_params())
            .required_if("purge_address_prefixes", json!(true), &["address_prefixes_cidr"])
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = VirtualNetworkDefinition::from_params(params)?;
        info!(
            "Reconciling virtual network '{}' in '{}'",
            definition.name, definition.resource_group
        );
        common::reconcile(&definition, params, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{plan, Action};

    fn definition() -> VirtualNetworkDefinition {
        VirtualNetworkDefinition {
            resource_group: "rg".into(),
            name: "vnet".into(),
            location: Some("eastus".into()),
            address_prefixes: None,
            dns_servers: None,
            purge_address_prefixes: false,
            purge_dns_servers: false,
            state: DesiredState::Present,
            tags: TagPolicy::default(),
        }
    }

    fn raw() -> Value {
        json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet",
            "name": "vnet",
            "location": "eastus",
            "properties": {
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16", "10.1.0.0/16"]},
                "dhcpOptions": {"dnsServers": ["10.0.0.4"]},
                "subnets": [{"name": "default", "properties": {"addressPrefix": "10.0.0.0/24"}}],
                "provisioningState": "Succeeded"
            }
        })
    }

    #[test]
    fn test_prefix_order_does_not_matter() {
        let mut def = definition();
        def.address_prefixes = Some(vec!["10.1.0.0/16".into(), "10.0.0.0/16".into()]);
        let current = def.normalize(&raw());
        assert_eq!(plan(&def, Some(&current)).unwrap().action, Action::NoOp);
    }

    #[test]
    fn test_subset_without_purge_is_noop() {
        let mut def = definition();
        def.address_prefixes = Some(vec!["10.0.0.0/16".into()]);
        let current = def.normalize(&raw());
        assert_eq!(plan(&def, Some(&current)).unwrap().action, Action::NoOp);
    }

    #[test]
    fn test_purge_removes_unlisted_prefixes() {
        let mut def = definition();
        def.address_prefixes = Some(vec!["10.0.0.0/16".into()]);
        def.purge_address_prefixes = true;
        let current = def.normalize(&raw());
        let plan = plan(&def, Some(&current)).unwrap();
        assert_eq!(plan.action, Action::Update);
        assert_eq!(plan.target.unwrap()["address_prefixes"], json!(["10.0.0.0/16"]));
    }

    #[test]
    fn test_new_prefix_is_added() {
        let mut def = definition();
        def.address_prefixes = Some(vec!["10.2.0.0/16".into()]);
        let current = def.normalize(&raw());
        let plan = plan(&def, Some(&current)).unwrap();
        assert_eq!(
            plan.target.unwrap()["address_prefixes"],
            json!(["10.0.0.0/16", "10.1.0.0/16", "10.2.0.0/16"])
        );
    }

    #[test]
    fn test_purge_dns_without_servers_clears_them() {
        let mut def = definition();
        def.purge_dns_servers = true;
        let current = def.normalize(&raw());
        let plan = plan(&def, Some(&current)).unwrap();
        assert_eq!(plan.delta.paths(), vec!["dns_servers"]);
    }

    #[test]
    fn test_body_keeps_subnets() {
        let def = definition();
        let current = raw();
        let state = def.normalize(&current);
        let body = def.to_body(&state, Some(&current));
        assert_eq!(body["properties"]["subnets"][0]["name"], json!("default"));
    }

    #[test]
    fn test_create_requires_prefixes() {
        assert!(definition().validate_create().is_err());
    }
}
