//! Parameters and helpers shared by every Azure module.

use super::spec::{ParamSpec, ParamType};
use super::{ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::azure::{
    auth, ArmClient, AuthSettings, AuthSource, ClientSettings, PollSettings, RestClient,
};
use crate::config::Config;
use crate::reconcile::{Reconciler, ResourceDefinition};
use crate::retry::RetryPolicy;
use serde_json::json;
use std::sync::Arc;

/// Credential and cloud selection parameters.
pub fn auth_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("auth_source", ParamType::Str)
            .choices(&["auto", "env", "credential_file", "cli", "msi", "token"])
            .default_value(json!("auto"))
            .description("Where to look for credentials"),
        ParamSpec::new("profile", ParamType::Str)
            .description("Section of ~/.azure/credentials to use"),
        ParamSpec::new("subscription_id", ParamType::Str),
        ParamSpec::new("client_id", ParamType::Str),
        ParamSpec::new("secret", ParamType::Str).no_log(),
        ParamSpec::new("tenant", ParamType::Str),
        ParamSpec::new("cloud_environment", ParamType::Str)
            .description("AzureCloud, AzureChinaCloud or AzureUSGovernment"),
        ParamSpec::new("api_profile", ParamType::Str)
            .choices(&["latest"])
            .default_value(json!("latest")),
    ]
}

/// `tags` and `append_tags`.
pub fn tag_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("tags", ParamType::Dict).description("Resource tags"),
        ParamSpec::new("append_tags", ParamType::Bool)
            .default_value(json!(true))
            .description("Merge with existing tags instead of replacing them"),
    ]
}

/// `state: present|absent`.
pub fn state_param() -> ParamSpec {
    ParamSpec::new("state", ParamType::Str)
        .choices(&["present", "absent"])
        .default_value(json!("present"))
}

/// Build auth settings from validated parameters.
pub fn auth_settings(params: &ModuleParams) -> ModuleResult<AuthSettings> {
    let auth_source = match params.get_string("auth_source")? {
        Some(source) => AuthSource::from_str(&source)
            .map_err(|e| ModuleError::InvalidParameter(e.to_string()))?,
        None => AuthSource::Auto,
    };

    Ok(AuthSettings {
        auth_source,
        profile: params.get_string("profile")?,
        subscription_id: params.get_string("subscription_id")?,
        client_id: params.get_string("client_id")?,
        secret: params.get_string("secret")?,
        tenant: params.get_string("tenant")?,
        cloud_environment: params.get_string("cloud_environment")?,
    })
}

/// Client settings derived from configuration.
pub fn client_settings(config: &Config) -> ClientSettings {
    ClientSettings {
        timeout: config.http.timeout,
        retry: RetryPolicy::exponential(
            config.http.max_retries,
            config.http.initial_backoff,
            std::time::Duration::from_secs(60),
        ),
        polling: poll_settings(config),
    }
}

pub fn poll_settings(config: &Config) -> PollSettings {
    PollSettings {
        interval: config.polling.interval,
        timeout: config.polling.timeout,
    }
}

/// The client a module should use: the injected one, or a fresh authenticated one.
pub async fn resolve_client(
    params: &ModuleParams,
    context: &ModuleContext,
) -> ModuleResult<Arc<dyn ArmClient>> {
    if let Some(client) = &context.client {
        return Ok(client.clone());
    }

    let settings = auth_settings(params)?;
    let credentials = auth::resolve(&settings, &context.config.azure)
        .await
        .map_err(|e| ModuleError::provider("authenticate with", "Azure Resource Manager", e))?;
    let client = RestClient::new(credentials, client_settings(&context.config))
        .map_err(|e| ModuleError::provider("build a client for", "Azure Resource Manager", e))?;
    Ok(Arc::new(client))
}

/// Run one reconciliation cycle for a typed module and report under `state`.
pub async fn reconcile<D: ResourceDefinition>(
    definition: &D,
    params: &ModuleParams,
    context: &ModuleContext,
) -> ModuleResult<ModuleOutput> {
    let client = resolve_client(params, context).await?;
    let outcome = Reconciler::new(client.as_ref(), context)
        .run(definition)
        .await?;
    Ok(outcome.into_output("state"))
}

/// Error for a parameter that is optional except when the resource must be created.
pub fn required_to_create(param: &str, kind: &str, name: &str) -> ModuleError {
    ModuleError::MissingParameter(format!(
        "{} (needed to create {} '{}')",
        param,
        kind.to_lowercase(),
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ArgumentSpec;
    use serde_json::json;

    #[test]
    fn test_auth_settings_from_params() {
        let spec = ArgumentSpec::new().params(auth_params());
        let mut raw = ModuleParams::new();
        raw.insert("auth_source".into(), json!("cli"));
        raw.insert("subscription_id".into(), json!("sub-1"));
        let params = spec.validate(&raw).unwrap();

        let settings = auth_settings(&params).unwrap();
        assert_eq!(settings.auth_source, AuthSource::Cli);
        assert_eq!(settings.subscription_id.as_deref(), Some("sub-1"));
        assert!(settings.secret.is_none());
    }

    #[test]
    fn test_api_profile_only_latest() {
        let spec = ArgumentSpec::new().params(auth_params());
        let mut raw = ModuleParams::new();
        raw.insert("api_profile".into(), json!("2019-03-01-hybrid"));
        assert!(spec.validate(&raw).is_err());
    }

    #[test]
    fn test_client_settings_follow_config() {
        let mut config = Config::default();
        config.http.max_retries = 7;
        config.polling.interval = std::time::Duration::from_secs(3);
        let settings = client_settings(&config);
        assert_eq!(settings.retry.max_retries, 7);
        assert_eq!(settings.polling.interval, std::time::Duration::from_secs(3));
    }

    #[test]
    fn test_required_to_create_message() {
        let err = required_to_create("location", "Resource group", "foo");
        assert_eq!(
            err.to_string(),
            "Missing required parameter: location (needed to create resource group 'foo')"
        );
    }

    #[tokio::test]
    async fn test_resolve_client_prefers_injected() {
        struct Fixed;

        #[async_trait::async_trait]
        impl ArmClient for Fixed {
            fn subscription_id(&self) -> String {
                "injected".into()
            }

            async fn send(
                &self,
                _request: crate::azure::ArmRequest,
            ) -> crate::azure::AzureResult<crate::azure::ArmResponse> {
                Ok(crate::azure::ArmResponse::new(200, None))
            }
        }

        let context = ModuleContext::new().with_client(Arc::new(Fixed));
        let client = resolve_client(&ModuleParams::new(), &context).await.unwrap();
        assert_eq!(client.subscription_id(), "injected");
    }
}
