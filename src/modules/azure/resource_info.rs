//! Generic REST read module.
//!
//! Same addressing as `azure_rm_resource`, GET only. The `response` is always a
//! list: empty when nothing exists at the path, one element for a single
//! resource, and every `value` entry across all pages for a collection.

use super::resource::{address_params, ResourceAddress};
use crate::azure::{ArmClient, ArmClientExt, AzureResult};
use crate::modules::common;
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};
use async_trait::async_trait;
use serde_json::Value;

/// Read one resource or a collection.
pub(super) async fn read_all(
    client: &dyn ArmClient,
    path: &str,
    api_version: &str,
) -> AzureResult<Vec<Value>> {
    let first = match client.get_resource(path, api_version).await? {
        Some(body) => body,
        None => return Ok(Vec::new()),
    };

    if first.get("value").map_or(false, Value::is_array) {
        client.collect_pages(first).await
    } else {
        Ok(vec![first])
    }
}

/// Generic ARM REST read
pub struct ResourceInfoModule;

#[async_trait]
impl Module for ResourceInfoModule {
    fn name(&self) -> &'static str {
        "azure_rm_resource_info"
    }

    fn description(&self) -> &'static str {
        "Get any Azure resource or collection through the REST API"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .params(address_params())
            .params(common::auth_params())
            .mutually_exclusive(&["url", "provider"])
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let address = ResourceAddress::from_params(params)?;
        let api_version = params.get_string_required("api_version")?;

        let client = common::resolve_client(params, context).await?;
        let path = address.path(&client.subscription_id())?;

        let items = read_all(client.as_ref(), &path, &api_version)
            .await
            .map_err(|e| ModuleError::provider("read", &path, e))?;

        Ok(ModuleOutput::ok(format!("Found {} item(s) at {}", items.len(), path))
            .with_data("response", Value::Array(items)))
    }
}
