//! SQL server module.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `resource_group` | Yes | Resource group name |
//! | `name` | Yes | Server name |
//! | `location` | No* | Azure region (*required when creating) |
//! | `admin_username` | No* | Administrator login (*required when creating, cannot change) |
//! | `admin_password` | No* | Administrator password (*required when creating) |
//! | `version` | No | Server version (default at creation: 12.0) |
//! | `minimal_tls_version` | No | 1.0, 1.1 or 1.2 |
//! | `public_network_access` | No | Enabled or Disabled |
//! | `state` | No | present or absent (default: present) |
//! | `tags` | No | Resource tags |
//!
//! ARM never returns the administrator password, so it is sent with every write
//! but never compared.

use super::{finish, tracked_state};
use crate::azure::ResourceId;
use crate::modules::common::{self, required_to_create};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    ParamSpec, ParamType,
};
use crate::reconcile::{Comparison, DesiredState, FieldRule, ResourceDefinition, TagPolicy};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use tracing::info;

#[derive(Clone, PartialEq)]
pub struct SqlServerDefinition {
    pub resource_group: String,
    pub name: String,
    pub location: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub version: Option<String>,
    pub minimal_tls_version: Option<String>,
    pub public_network_access: Option<String>,
    pub state: DesiredState,
    pub tags: TagPolicy,
}

impl fmt::Debug for SqlServerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlServerDefinition")
            .field("resource_group", &self.resource_group)
            .field("name", &self.name)
            .field("location", &self.location)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "********"))
            .field("version", &self.version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SqlServerDefinition {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        Ok(Self {
            resource_group: params.get_string_required("resource_group")?,
            name: params.get_string_required("name")?,
            location: params.get_string("location")?,
            admin_username: params.get_string("admin_username")?,
            admin_password: params.get_string("admin_password")?,
            version: params.get_string("version")?,
            minimal_tls_version: params.get_string("minimal_tls_version")?,
            public_network_access: params.get_string("public_network_access")?,
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
impl ResourceDefinition for SqlServerDefinition {
    fn kind(&self) -> &'static str {
        "SQL server"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_id(&self, subscription_id: &str) -> ResourceId {
        ResourceId::new(
            subscription_id,
            &self.resource_group,
            "Microsoft.Sql",
            "servers",
            &self.name,
        )
    }

    fn api_version(&self) -> &'static str {
        "2021-11-01"
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn rules(&self) -> Vec<FieldRule> {
        vec![
            FieldRule::immutable("location").compare(Comparison::Location),
            FieldRule::immutable("admin_username")
                .with_message("SQL server '{name}' has administrator '{current}'; the administrator login cannot be changed to '{desired}'."),
            FieldRule::create_only("admin_password"),
            FieldRule::mutable("version"),
            FieldRule::mutable("minimal_tls_version"),
            FieldRule::mutable("public_network_access").compare(Comparison::CaseInsensitive),
        ]
    }

    fn desired(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "admin_username": self.admin_username,
            "admin_password": self.admin_password,
            "version": self.version,
            "minimal_tls_version": self.minimal_tls_version,
            "public_network_access": self.public_network_access,
        })
    }

    fn tags(&self) -> Option<&TagPolicy> {
        Some(&self.tags)
    }

    fn create_defaults(&self) -> Value {
        json!({ "version": "12.0" })
    }

    fn normalize(&self, raw: &Value) -> Value {
        let mut state = tracked_state(raw);
        super::copy_field(&mut state, "admin_username", raw, "properties.administratorLogin");
        super::copy_field(&mut state, "version", raw, "properties.version");
        super::copy_field(&mut state, "minimal_tls_version", raw, "properties.minimalTlsVersion");
        super::copy_field(&mut state, "public_network_access", raw, "properties.publicNetworkAccess");
        super::copy_field(
            &mut state,
            "fully_qualified_domain_name",
            raw,
            "properties.fullyQualifiedDomainName",
        );
        super::copy_field(&mut state, "server_state", raw, "properties.state");
        finish(state)
    }

    fn to_body(&self, state: &Value, _current: Option<&Value>) -> Value {
        json!({
            "location": state["location"],
            "tags": state["tags"],
            "properties": {
                "administratorLogin": state["admin_username"],
                "administratorLoginPassword": self.admin_password,
                "version": state["version"],
                "minimalTlsVersion": state["minimal_tls_version"],
                "publicNetworkAccess": state["public_network_access"],
            }
        })
    }

    fn validate_create(&self) -> ModuleResult<()> {
        if self.location.is_none() {
            return Err(required_to_create("location", self.kind(), &self.name));
        }
        if self.admin_username.is_none() {
            return Err(required_to_create("admin_username", self.kind(), &self.name));
        }
        if self.admin_password.is_none() {
            return Err(required_to_create("admin_password", self.kind(), &self.name));
        }
        Ok(())
    }
}

/// Module for managing Azure SQL logical servers
pub struct SqlServerModule;

#[async_trait]
impl Module for SqlServerModule {
    fn name(&self) -> &'static str {
        "azure_rm_sqlserver"
    }

    fn description(&self) -> &'static str {
        "Manage Azure SQL servers"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .param(ParamSpec::new("resource_group", ParamType::Str).required())
            .param(ParamSpec::new("name", ParamType::Str).required())
            .param(ParamSpec::new("location", ParamType::Str))
            .param(ParamSpec::new("admin_username", ParamType::Str))
            .param(ParamSpec::new("admin_password", ParamType::Str).no_log())
            .param(ParamSpec::new("version", ParamType::Str))
            .param(ParamSpec::new("minimal_tls_version", ParamType::Str).choices(&["1.0", "1.1", "1.2"]))
            .param(ParamSpec::new("public_network_access", ParamType::Str).choices(&["Enabled", "Disabled"]))
            .param(common::state_param())
            .params(common::tag_params())
            .params(common::auth_params())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let definition = SqlServerDefinition::from_params(params)?;
        info!(
            "Reconciling SQL server '{}' in '{}'",
            definition.name, definition.resource_group
        );
        common::reconcile(&definition, params, context).await
    }
}
