//! Module system for azcollection
//!
//! This module provides the core traits, types, and registry for the Azure modules.
//! A module validates its parameters against an [`ArgumentSpec`], talks to Resource
//! Manager through the [`ArmClient`] in its [`ModuleContext`], and reports a
//! [`ModuleOutput`].

pub mod azure;
pub mod common;
pub mod spec;

pub use spec::{ArgumentSpec, ParamSpec, ParamType};

use crate::azure::{ArmClient, AzureError};
use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// A field that cannot change after creation differs from the existing resource.
    #[error("{message}")]
    ImmutableField { field: String, message: String },

    /// Resource Manager or the credential source rejected a call.
    #[error("Failed to {action} {resource}: {source}")]
    Provider {
        action: String,
        resource: String,
        #[source]
        source: AzureError,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ModuleError {
    /// Wrap a client error with what was being attempted.
    pub fn provider(
        action: impl Into<String>,
        resource: impl Into<String>,
        source: AzureError,
    ) -> Self {
        Self::Provider {
            action: action.into(),
            resource: resource.into(),
            source,
        }
    }
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Status of a module execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Module executed successfully and made changes
    Changed,
    /// Module executed successfully but no changes were needed
    Ok,
    /// Module execution failed
    Failed,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Changed => write!(f, "changed"),
            ModuleStatus::Ok => write!(f, "ok"),
            ModuleStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Represents a difference between current and desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Rendering of the state before the run
    pub before: String,
    /// Rendering of the state after the run
    pub after: String,
    /// Unified diff of the two
    pub details: Option<String>,
}

impl Diff {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of a module execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Status of the execution
    pub status: ModuleStatus,
    /// Optional diff showing what changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Module-specific return values (`state`, `response`, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
    /// Validated arguments echoed back, secrets masked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<serde_json::Value>,
}

impl ModuleOutput {
    fn with_status(changed: bool, msg: String, status: ModuleStatus) -> Self {
        Self {
            changed,
            msg,
            status,
            diff: None,
            data: HashMap::new(),
            invocation: None,
        }
    }

    /// Create a new successful output with no changes
    pub fn ok(msg: impl Into<String>) -> Self {
        Self::with_status(false, msg.into(), ModuleStatus::Ok)
    }

    /// Create a new successful output with changes
    pub fn changed(msg: impl Into<String>) -> Self {
        Self::with_status(true, msg.into(), ModuleStatus::Changed)
    }

    /// Create a failed output
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::with_status(false, msg.into(), ModuleStatus::Failed)
    }

    /// Add a diff to the output
    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Add data to the output
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach the (masked) module arguments
    pub fn with_invocation(mut self, module_args: serde_json::Value) -> Self {
        self.invocation = Some(serde_json::json!({ "module_args": module_args }));
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == ModuleStatus::Failed
    }

    /// Flatten into the JSON object an Ansible controller expects on stdout.
    pub fn to_result_json(&self) -> serde_json::Value {
        let mut result = serde_json::Map::new();
        result.insert("changed".into(), self.changed.into());
        if self.is_failed() {
            result.insert("failed".into(), true.into());
        }
        if !self.msg.is_empty() {
            result.insert("msg".into(), self.msg.clone().into());
        }

        let sorted: BTreeMap<_, _> = self.data.iter().collect();
        for (key, value) in sorted {
            result.insert(key.clone(), value.clone());
        }

        if let Some(diff) = &self.diff {
            let mut rendered = serde_json::json!({
                "before": diff.before,
                "after": diff.after,
            });
            if let Some(details) = &diff.details {
                rendered["prepared"] = details.clone().into();
            }
            result.insert("diff".into(), rendered);
        }
        if let Some(invocation) = &self.invocation {
            result.insert("invocation".into(), invocation.clone());
        }
        serde_json::Value::Object(result)
    }
}

/// Parameters passed to a module
pub type ModuleParams = HashMap<String, serde_json::Value>;

/// Context for module execution
#[derive(Clone)]
pub struct ModuleContext {
    /// Whether to run in check mode (dry run)
    pub check_mode: bool,
    /// Whether to show diffs
    pub diff_mode: bool,
    /// Pre-built client; when absent one is resolved from the credential parameters
    pub client: Option<Arc<dyn ArmClient>>,
    /// Loaded configuration
    pub config: Arc<Config>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("check_mode", &self.check_mode)
            .field("diff_mode", &self.diff_mode)
            .field(
                "client",
                &self.client.as_ref().map(|c| c.subscription_id()),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self {
            check_mode: false,
            diff_mode: false,
            client: None,
            config: Arc::new(Config::default()),
        }
    }
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_diff_mode(mut self, diff_mode: bool) -> Self {
        self.diff_mode = diff_mode;
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ArmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.config = config;
        self
    }
}

/// Trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Declared parameters and constraints
    fn argument_spec(&self) -> ArgumentSpec;

    /// Execute the module with already validated parameters
    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput>;

    /// Check what would change without making changes (for check mode)
    async fn check(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let check_context = ModuleContext {
            check_mode: true,
            ..context.clone()
        };
        self.execute(params, &check_context).await
    }
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>>;
    fn get_u32(&self, key: &str) -> ModuleResult<Option<u32>>;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
    fn get_string_map(&self, key: &str) -> ModuleResult<Option<BTreeMap<String, String>>>;
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => Ok(Some(scalar_to_string(v))),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(serde_json::Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>> {
        match self.get(key) {
            Some(serde_json::Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                ModuleError::InvalidParameter(format!("{} must be an integer", key))
            }),
            Some(serde_json::Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| ModuleError::InvalidParameter(format!("{} must be an integer", key))),
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an integer",
                key
            ))),
        }
    }

    fn get_u32(&self, key: &str) -> ModuleResult<Option<u32>> {
        match self.get_i64(key)? {
            Some(n) => u32::try_from(n).map(Some).map_err(|_| {
                ModuleError::InvalidParameter(format!("{} must be a positive integer", key))
            }),
            None => Ok(None),
        }
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(serde_json::Value::Array(arr)) => Ok(Some(arr.iter().map(scalar_to_string).collect())),
            Some(serde_json::Value::String(s)) => {
                Ok(Some(s.split(',').map(|s| s.trim().to_string()).collect()))
            }
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an array",
                key
            ))),
        }
    }

    fn get_string_map(&self, key: &str) -> ModuleResult<Option<BTreeMap<String, String>>> {
        match self.get(key) {
            Some(serde_json::Value::Object(map)) => Ok(Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                    .collect(),
            )),
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a dictionary",
                key
            ))),
        }
    }
}

/// Registry for looking up modules by name
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Typed resource modules
        registry.register(Arc::new(azure::ResourceGroupModule));
        registry.register(Arc::new(azure::AvailabilitySetModule));
        registry.register(Arc::new(azure::VirtualNetworkModule));
        registry.register(Arc::new(azure::StorageShareModule));
        registry.register(Arc::new(azure::SqlServerModule));
        registry.register(Arc::new(azure::ContainerRegistryModule));
        registry.register(Arc::new(azure::PublicIpAddressModule));

        // Read-only modules
        registry.register(Arc::new(azure::ResourceGroupInfoModule));
        registry.register(Arc::new(azure::ResourceInfoModule));

        // Generic REST module
        registry.register(Arc::new(azure::ResourceModule));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Validate parameters and execute a module by name
    pub async fn execute(
        &self,
        name: &str,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        let spec = module.argument_spec();
        let validated = spec.validate(params)?;

        let output = if context.check_mode {
            module.check(&validated, context).await?
        } else {
            module.execute(&validated, context).await?
        };
        Ok(output.with_invocation(spec.mask(&validated)))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoModule;

    #[async_trait]
    impl Module for EchoModule {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo a message"
        }

        fn argument_spec(&self) -> ArgumentSpec {
            ArgumentSpec::new()
                .param(ParamSpec::new("msg", ParamType::Str).default_value(json!("Hello")))
                .param(ParamSpec::new("password", ParamType::Str).no_log())
        }

        async fn execute(
            &self,
            params: &ModuleParams,
            context: &ModuleContext,
        ) -> ModuleResult<ModuleOutput> {
            if context.check_mode {
                return Ok(ModuleOutput::ok("Would echo"));
            }
            Ok(ModuleOutput::changed(params.get_string_required("msg")?))
        }
    }

    #[test]
    fn test_module_registry() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule));

        assert!(registry.contains("echo"));
        assert!(!registry.contains("nonexistent"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ModuleRegistry::with_builtins();
        for name in [
            "azure_rm_resourcegroup",
            "azure_rm_resourcegroup_info",
            "azure_rm_availabilityset",
            "azure_rm_virtualnetwork",
            "azure_rm_storageshare",
            "azure_rm_sqlserver",
            "azure_rm_containerregistry",
            "azure_rm_publicipaddress",
            "azure_rm_resource",
            "azure_rm_resource_info",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_registry_execute_validates_and_masks() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule));

        let mut params = ModuleParams::new();
        params.insert("password".into(), json!("hunter2"));
        let output = registry
            .execute("echo", &params, &ModuleContext::new())
            .await
            .unwrap();

        assert_eq!(output.msg, "Hello");
        let result = output.to_result_json();
        assert_eq!(result["invocation"]["module_args"]["password"], json!("********"));
        assert_eq!(result["invocation"]["module_args"]["msg"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_parameter() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule));

        let mut params = ModuleParams::new();
        params.insert("colour".into(), json!("blue"));
        let err = registry
            .execute("echo", &params, &ModuleContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_registry_unknown_module() {
        let registry = ModuleRegistry::new();
        let err = registry
            .execute("nope", &ModuleParams::new(), &ModuleContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)));
    }

    #[test]
    fn test_result_json_shape() {
        let output = ModuleOutput::changed("Created")
            .with_data("state", json!({"name": "foo"}))
            .with_diff(Diff::new("{}", "{\"name\": \"foo\"}"));
        let result = output.to_result_json();

        assert_eq!(result["changed"], json!(true));
        assert!(result.get("failed").is_none());
        assert_eq!(result["state"]["name"], json!("foo"));
        assert_eq!(result["diff"]["before"], json!("{}"));

        let failed = ModuleOutput::failed("boom").to_result_json();
        assert_eq!(failed["failed"], json!(true));
        assert_eq!(failed["changed"], json!(false));
    }

    #[test]
    fn test_param_ext() {
        let mut params: ModuleParams = HashMap::new();
        params.insert("string".to_string(), json!("hello"));
        params.insert("bool_str".to_string(), json!("yes"));
        params.insert("number".to_string(), json!(42));
        params.insert("negative".to_string(), json!(-1));
        params.insert("array".to_string(), json!(["one", 2]));
        params.insert("tags".to_string(), json!({"env": "prod", "tier": 1}));
        params.insert("nothing".to_string(), serde_json::Value::Null);

        assert_eq!(params.get_string("string").unwrap(), Some("hello".to_string()));
        assert_eq!(params.get_string("nothing").unwrap(), None);
        assert_eq!(params.get_bool("bool_str").unwrap(), Some(true));
        assert_eq!(params.get_u32("number").unwrap(), Some(42));
        assert!(params.get_u32("negative").is_err());
        assert_eq!(
            params.get_vec_string("array").unwrap(),
            Some(vec!["one".to_string(), "2".to_string()])
        );
        let tags = params.get_string_map("tags").unwrap().unwrap();
        assert_eq!(tags.get("tier").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_provider_error_message() {
        let err = ModuleError::provider(
            "create",
            "resource group 'foo'",
            AzureError::http(403, "AuthorizationFailed", "denied"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to create resource group 'foo': 403 AuthorizationFailed: denied"
        );
    }
}
