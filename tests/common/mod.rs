//! Shared test utilities for the azcollection test suite.
//!
//! `FakeArm` is an in-memory Resource Manager: it stores resources by ID, answers
//! the verbs the modules use, and records every request so tests can assert on
//! exactly what was sent.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use azcollection::azure::{ArmClient, ArmRequest, ArmResponse, AzureError, AzureResult, HttpMethod};
use azcollection::config::Config;
use azcollection::modules::{ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry, ModuleResult};

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// One request as the fake saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

/// In-memory Resource Manager.
#[derive(Default)]
pub struct FakeArm {
    resources: Mutex<BTreeMap<String, Value>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<HttpMethod, (u16, String)>>,
    /// Number of GETs that still see a deleted resource
    lingering_reads: Mutex<u32>,
}

fn key(path: &str) -> String {
    let path = path
        .strip_prefix("https://management.azure.com")
        .unwrap_or(path);
    path.trim_end_matches('/').to_lowercase()
}

fn without_query(key: &str) -> &str {
    key.split('?').next().unwrap_or(key)
}

fn segment_count(key: &str) -> usize {
    key.split('/').filter(|s| !s.is_empty()).count()
}

fn not_found(path: &str) -> AzureError {
    AzureError::http(
        404,
        "ResourceNotFound",
        format!("The resource '{}' was not found.", path),
    )
}

impl FakeArm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a resource (or any GET response) at `path`.
    pub fn seed(&self, path: &str, value: Value) {
        self.resources
            .lock()
            .unwrap()
            .insert(key(path), value);
    }

    /// Store a resource with `id` and `name` filled in from its path.
    pub fn seed_resource(&self, path: &str, mut value: Value) {
        if let Value::Object(map) = &mut value {
            map.entry("id").or_insert_with(|| json!(path));
            let name = path.rsplit('/').next().unwrap_or_default();
            map.entry("name").or_insert_with(|| json!(name));
        }
        self.seed(path, value);
    }

    pub fn resource(&self, path: &str) -> Option<Value> {
        self.resources.lock().unwrap().get(&key(path)).cloned()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with(&self, method: HttpMethod) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.method.is_mutating()).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Answer every request with `method` with an error status.
    pub fn fail(&self, method: HttpMethod, status: u16, code: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method, (status, code.to_string()));
    }

    /// Keep returning deleted resources for `reads` more GETs.
    pub fn linger_after_delete(&self, reads: u32) {
        *self.lingering_reads.lock().unwrap() = reads;
    }

    fn lookup(&self, path: &str) -> Option<Value> {
        let resources = self.resources.lock().unwrap();
        let full = key(path);
        resources
            .get(&full)
            .or_else(|| resources.get(without_query(&full)))
            .cloned()
    }

    /// Collection GET: direct children, or every resource below a group for `.../resources`.
    fn collection(&self, path: &str) -> Value {
        let base = without_query(&key(path)).to_string();
        let resources = self.resources.lock().unwrap();
        let items: Vec<Value> = if let Some(group) = base.strip_suffix("/resources") {
            let prefix = format!("{}/providers/", group);
            resources
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix) && segment_count(k) == segment_count(group) + 4)
                .map(|(_, v)| v.clone())
                .collect()
        } else {
            let prefix = format!("{}/", base);
            resources
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix) && segment_count(k) == segment_count(&base) + 1)
                .map(|(_, v)| v.clone())
                .collect()
        };
        json!({ "value": items })
    }

    fn get(&self, path: &str) -> AzureResult<ArmResponse> {
        if let Some(value) = self.lookup(path) {
            return Ok(ArmResponse::new(200, Some(value)));
        }
        {
            let mut lingering = self.lingering_reads.lock().unwrap();
            if *lingering > 0 {
                *lingering -= 1;
                return Ok(ArmResponse::new(200, Some(json!({ "id": path }))));
            }
        }
        if segment_count(without_query(&key(path))) % 2 == 1 {
            return Ok(ArmResponse::new(200, Some(self.collection(path))));
        }
        Err(not_found(path))
    }

    fn put(&self, path: &str, body: Option<Value>) -> AzureResult<ArmResponse> {
        let existed = self.lookup(path).is_some();
        let mut stored = body.unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut stored {
            map.insert("id".into(), json!(path));
            let name = path.rsplit('/').next().unwrap_or_default();
            map.insert("name".into(), json!(name));
            let properties = map
                .entry("properties")
                .or_insert_with(|| json!({}));
            if let Value::Object(props) = properties {
                props.insert("provisioningState".into(), json!("Succeeded"));
            }
        }
        self.seed(path, stored.clone());
        Ok(ArmResponse::new(if existed { 200 } else { 201 }, Some(stored)))
    }

    fn patch(&self, path: &str, body: Option<Value>) -> AzureResult<ArmResponse> {
        let current = self.lookup(path).ok_or_else(|| not_found(path))?;
        let merged = azcollection::reconcile::overlay(&current, &body.unwrap_or(Value::Null));
        self.seed(path, merged.clone());
        Ok(ArmResponse::new(200, Some(merged)))
    }

    fn delete(&self, path: &str) -> AzureResult<ArmResponse> {
        match self.resources.lock().unwrap().remove(&key(path)) {
            Some(_) => Ok(ArmResponse::new(200, None)),
            None => Err(not_found(path)),
        }
    }
}

#[async_trait]
impl ArmClient for FakeArm {
    fn subscription_id(&self) -> String {
        SUBSCRIPTION.to_string()
    }

    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            body: request.body.clone(),
        });

        if let Some((status, code)) = self.failures.lock().unwrap().get(&request.method) {
            return Err(AzureError::http(*status, code.clone(), "injected failure"));
        }

        match request.method {
            HttpMethod::Get | HttpMethod::Head => self.get(&request.path),
            HttpMethod::Put => self.put(&request.path, request.body),
            HttpMethod::Patch => self.patch(&request.path, request.body),
            HttpMethod::Delete => self.delete(&request.path),
            HttpMethod::Post => Ok(ArmResponse::new(200, request.body)),
        }
    }
}

/// Resource group ID in the fake subscription.
pub fn group_id(name: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{}", SUBSCRIPTION, name)
}

/// Provider resource ID in the fake subscription.
pub fn resource_id(group: &str, namespace: &str, kind: &str, name: &str) -> String {
    format!("{}/providers/{}/{}/{}", group_id(group), namespace, kind, name)
}

/// Build module parameters from a JSON object literal.
pub fn params(value: Value) -> ModuleParams {
    serde_json::from_value(value).expect("params must be a JSON object")
}

/// Context that routes every call to `fake` and polls quickly.
pub fn context(fake: &Arc<FakeArm>) -> ModuleContext {
    let mut config = Config::default();
    config.polling.interval = std::time::Duration::from_millis(5);
    config.polling.timeout = std::time::Duration::from_millis(500);
    ModuleContext::new()
        .with_client(fake.clone())
        .with_config(Arc::new(config))
}

/// Run a built-in module by name.
pub async fn run(
    module: &str,
    args: Value,
    context: &ModuleContext,
) -> ModuleResult<ModuleOutput> {
    ModuleRegistry::with_builtins()
        .execute(module, &params(args), context)
        .await
}
