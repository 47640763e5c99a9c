//! Generic REST module.
//!
//! ## ResourceModule
//!
//! Sends an arbitrary request to any ARM path. The path comes either from a `url`
//! template or from its parts (`provider`, `resource_group`, `resource_type`,
//! `resource_name`, `subresource`).
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `url` | No* | Path or URL; `{{ subscription_id }}`, `{{ resource_group }}` etc. are expanded |
//! | `provider` | No* | Provider namespace, `Microsoft.` is prepended when missing |
//! | `resource_group` | No | Resource group name |
//! | `resource_type` | No | Resource type |
//! | `resource_name` | No | Resource name |
//! | `subresource` | No | List of `{namespace, type, name}` below the resource |
//! | `api_version` | Yes | API version |
//! | `method` | No | GET, PUT, POST, HEAD, PATCH, DELETE or MERGE (default: PUT) |
//! | `body` | No | Request body |
//! | `status_code` | No | Accepted status codes (default: [200, 201, 202]) |
//! | `idempotency` | No | GET first and skip the call when nothing would change (default: false) |
//! | `polling_timeout` | No | Seconds to wait for a long-running operation |
//! | `polling_interval` | No | Seconds between polls |
//! | `state` | No | present, or absent to send DELETE (default: present) |
//!
//! `url` and `provider` cannot be combined. MERGE reads the resource, deep-merges
//! `body` into it and PUTs the result.
//!
//! ### Example
//!
//! ```yaml
//! - name: Update scaleset info using azure_rm_resource
//!   azure_rm_resource:
//!     resource_group: myResourceGroup
//!     provider: compute
//!     resource_type: virtualmachinescalesets
//!     resource_name: myVmss
//!     api_version: "2017-12-01"
//!     body: { body }
//! ```

use crate::azure::{expand_template, ArmClient, ArmRequest, HttpMethod, PollSettings};
use crate::modules::common::{self, poll_settings};
use crate::modules::{
    ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt, ParamSpec, ParamType,
};
use crate::reconcile::{is_subset, overlay, DesiredState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// One child segment below the addressed resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Subresource {
    pub namespace: Option<String>,
    pub kind: String,
    pub name: Option<String>,
}

/// Where a generic request goes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceAddress {
    pub url: Option<String>,
    pub provider: Option<String>,
    pub resource_group: Option<String>,
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub subresources: Vec<Subresource>,
}

fn provider_namespace(provider: &str) -> String {
    if provider.contains('.') {
        provider.to_string()
    } else {
        format!("Microsoft.{}", provider)
    }
}

impl ResourceAddress {
    pub fn from_params(params: &ModuleParams) -> ModuleResult<Self> {
        let subresources = match params.get("subresource") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    let field = |key: &str| item.get(key).and_then(Value::as_str).map(String::from);
                    Ok(Subresource {
                        namespace: field("namespace"),
                        kind: field("type").ok_or_else(|| {
                            ModuleError::InvalidParameter(
                                "each subresource needs a type".to_string(),
                            )
                        })?,
                        name: field("name"),
                    })
                })
                .collect::<ModuleResult<Vec<_>>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            url: params.get_string("url")?,
            provider: params.get_string("provider")?,
            resource_group: params.get_string("resource_group")?,
            resource_type: params.get_string("resource_type")?,
            resource_name: params.get_string("resource_name")?,
            subresources,
        })
    }

    /// The request path for `subscription_id`.
    pub fn path(&self, subscription_id: &str) -> ModuleResult<String> {
        if let Some(url) = &self.url {
            let mut vars: HashMap<&str, String> = HashMap::new();
            vars.insert("subscription_id", subscription_id.to_string());
            let optional = [
                ("resource_group", &self.resource_group),
                ("provider", &self.provider),
                ("resource_type", &self.resource_type),
                ("resource_name", &self.resource_name),
            ];
            for (key, value) in optional {
                if let Some(value) = value {
                    vars.insert(key, value.clone());
                }
            }
            return expand_template(url, &vars)
                .map_err(|e| ModuleError::InvalidParameter(e.to_string()));
        }

        let mut path = format!("/subscriptions/{}", subscription_id);
        if let Some(rg) = &self.resource_group {
            path.push_str(&format!("/resourceGroups/{}", rg));
        }
        if let Some(provider) = &self.provider {
            path.push_str(&format!("/providers/{}", provider_namespace(provider)));
            if let Some(kind) = &self.resource_type {
                path.push_str(&format!("/{}", kind));
                if let Some(name) = &self.resource_name {
                    path.push_str(&format!("/{}", name));
                }
            }
        }
        for sub in &self.subresources {
            if let Some(ns) = &sub.namespace {
                path.push_str(&format!("/providers/{}", provider_namespace(ns)));
            }
            path.push_str(&format!("/{}", sub.kind));
            if let Some(name) = &sub.name {
                path.push_str(&format!("/{}", name));
            }
        }
        Ok(path)
    }
}

/// Addressing parameters shared with `azure_rm_resource_info`.
pub(super) fn address_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("url", ParamType::Str),
        ParamSpec::new("provider", ParamType::Str),
        ParamSpec::new("resource_group", ParamType::Str),
        ParamSpec::new("resource_type", ParamType::Str),
        ParamSpec::new("resource_name", ParamType::Str),
        ParamSpec::new("subresource", ParamType::List).elements(ParamType::Dict),
        ParamSpec::new("api_version", ParamType::Str).required(),
    ]
}

/// Requested verb, with MERGE as its own case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Http(HttpMethod),
    Merge,
}

impl Verb {
    fn from_str(s: &str) -> ModuleResult<Self> {
        if s.eq_ignore_ascii_case("merge") {
            return Ok(Verb::Merge);
        }
        HttpMethod::from_str(s)
            .map(Verb::Http)
            .map_err(|e| ModuleError::InvalidParameter(e.to_string()))
    }

    fn is_mutating(&self) -> bool {
        match self {
            Verb::Http(method) => method.is_mutating(),
            Verb::Merge => true,
        }
    }
}

/// Generic ARM REST call
pub struct ResourceModule;

impl ResourceModule {
    fn polling(params: &ModuleParams, context: &ModuleContext) -> ModuleResult<PollSettings> {
        let mut poll = poll_settings(&context.config);
        if let Some(secs) = params.get_u32("polling_interval")? {
            poll.interval = Duration::from_secs(u64::from(secs));
        }
        if let Some(secs) = params.get_u32("polling_timeout")? {
            poll.timeout = Duration::from_secs(u64::from(secs));
        }
        Ok(poll)
    }
}

/// Send a request and accept any status in `accepted`, even one ARM reports as an error.
///
/// A DELETE of something that is not there (404 or 204) is returned as `(status, Null)`
/// whatever `accepted` says.
async fn send_expecting(
    client: &dyn ArmClient,
    request: ArmRequest,
    accepted: &[u16],
) -> ModuleResult<(u16, Value)> {
    let method = request.method;
    let path = request.path.clone();
    match client.send(request).await {
        Ok(response) if method == HttpMethod::Delete && response.status == 204 => {
            Ok((204, Value::Null))
        }
        Ok(response) if accepted.contains(&response.status) => {
            Ok((response.status, response.into_body()))
        }
        Ok(response) => Err(ModuleError::ExecutionFailed(format!(
            "{} {} returned unexpected status {} (expected one of {:?})",
            method, path, response.status, accepted
        ))),
        Err(e) if method == HttpMethod::Delete && e.is_not_found() => Ok((404, Value::Null)),
        Err(e) => match e.status_code() {
            Some(status) if accepted.contains(&status) => Ok((status, Value::Null)),
            _ => Err(ModuleError::provider(method.to_string().to_lowercase(), path, e)),
        },
    }
}

fn is_already_gone(method: HttpMethod, status: u16) -> bool {
    method == HttpMethod::Delete && matches!(status, 204 | 404)
}

async fn read_existing(
    client: &dyn ArmClient,
    path: &str,
    api_version: &str,
) -> ModuleResult<Option<Value>> {
    match client.send(ArmRequest::get(path, api_version)).await {
        Ok(response) => Ok(Some(response.into_body())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(ModuleError::provider("read", path, e)),
    }
}

#[async_trait]
impl Module for ResourceModule {
    fn name(&self) -> &'static str {
        "azure_rm_resource"
    }

    fn description(&self) -> &'static str {
        "Create, update or delete any Azure resource through the REST API"
    }

    fn argument_spec(&self) -> ArgumentSpec {
        ArgumentSpec::new()
            .params(address_params())
            .param(
                ParamSpec::new("method", ParamType::Str)
                    .choices(&["GET", "PUT", "POST", "HEAD", "PATCH", "DELETE", "MERGE"])
                    .default_value(json!("PUT")),
            )
            .param(ParamSpec::new("body", ParamType::Raw))
            .param(
                ParamSpec::new("status_code", ParamType::List)
                    .elements(ParamType::Int)
                    .default_value(json!([200, 201, 202])),
            )
            .param(ParamSpec::new("idempotency", ParamType::Bool).default_value(json!(false)))
            .param(ParamSpec::new("polling_timeout", ParamType::Int))
            .param(ParamSpec::new("polling_interval", ParamType::Int))
            .param(common::state_param())
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
        let state = DesiredState::from_str(
            &params
                .get_string("state")?
                .unwrap_or_else(|| "present".to_string()),
        )?;
        let verb = match state {
            DesiredState::Absent => Verb::Http(HttpMethod::Delete),
            DesiredState::Present => {
                Verb::from_str(&params.get_string("method")?.unwrap_or_else(|| "PUT".into()))?
            }
        };
        let mut body = params.get("body").cloned().filter(|b| !b.is_null());
        let mut accepted: Vec<u16> = match params.get("status_code") {
            Some(Value::Array(codes)) => codes
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|c| u16::try_from(c).ok())
                .collect(),
            _ => vec![200, 201, 202],
        };
        if state == DesiredState::Absent && !accepted.contains(&204) {
            accepted.push(204);
        }
        let idempotency = params.get_bool_or("idempotency", false);
        let poll = Self::polling(params, context)?;

        let client = common::resolve_client(params, context).await?;
        let path = address.path(&client.subscription_id())?;

        let existing = if idempotency || verb == Verb::Merge {
            read_existing(client.as_ref(), &path, &api_version).await?
        } else {
            None
        };

        let method = match verb {
            Verb::Merge => {
                let merged = match (&existing, &body) {
                    (Some(current), Some(patch)) => overlay(current, patch),
                    (Some(current), None) => current.clone(),
                    (None, patch) => patch.clone().unwrap_or_else(|| json!({})),
                };
                body = Some(merged);
                HttpMethod::Put
            }
            Verb::Http(method) => method,
        };
        info!("{} {} (api-version {})", method, path, api_version);

        if idempotency {
            let unchanged = match (method, &existing) {
                (HttpMethod::Delete, None) => true,
                (HttpMethod::Delete, Some(_)) => false,
                (_, Some(current)) => body.as_ref().map_or(true, |b| is_subset(b, current)),
                (_, None) => false,
            };
            if unchanged || !verb.is_mutating() {
                debug!(path = %path, "Resource already matches, nothing sent");
                return Ok(ModuleOutput::ok(format!("{} is already in the requested state", path))
                    .with_data("response", existing.unwrap_or(Value::Null)));
            }
        }

        if context.check_mode && verb.is_mutating() {
            let predicted = match method {
                HttpMethod::Delete => Value::Null,
                _ => match (&existing, &body) {
                    (Some(current), Some(b)) => overlay(current, b),
                    (_, b) => b.clone().unwrap_or(Value::Null),
                },
            };
            return Ok(ModuleOutput::changed(format!("Would send {} {}", method, path))
                .with_data("response", predicted));
        }

        let mut request = ArmRequest::new(method, path.clone(), api_version).with_polling(poll);
        request.body = body;
        let (status, response) = send_expecting(client.as_ref(), request, &accepted).await?;

        if is_already_gone(method, status) {
            debug!(path = %path, status, "Nothing to delete");
            return Ok(ModuleOutput::ok(format!("{} is already absent", path))
                .with_data("response", Value::Null));
        }

        let response = match state {
            DesiredState::Absent => Value::Null,
            DesiredState::Present => response,
        };
        let output = if verb.is_mutating() {
            ModuleOutput::changed(format!("{} {} succeeded", method, path))
        } else {
            ModuleOutput::ok(format!("{} {} succeeded", method, path))
        };
        Ok(output.with_data("response", response))
    }
}
