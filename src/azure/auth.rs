//! Credential resolution for Azure Resource Manager.
//!
//! A module never talks to Azure AD directly. It hands its common parameters
//! ([`AuthSettings`]) to [`resolve`], which picks a credential source, builds a
//! [`TokenCredential`] and settles the subscription the module operates on.
//!
//! Supported sources:
//!
//! | Source | Inputs |
//! |--------|--------|
//! | `env` | `AZURE_CLIENT_ID`, `AZURE_SECRET`/`AZURE_CLIENT_SECRET`, `AZURE_TENANT`/`AZURE_TENANT_ID`, `AZURE_SUBSCRIPTION_ID` |
//! | `credential_file` | `~/.azure/credentials`, section named by `profile` |
//! | `cli` | `az account get-access-token`, `az account show` |
//! | `msi` | instance metadata service |
//! | `token` | `AZURE_ACCESS_TOKEN` with `AZURE_SUBSCRIPTION_ID` |
//!
//! `auto` tries explicit parameters, then the environment, then the credentials
//! file, then the Azure CLI.

use super::error::{AzureError, AzureResult};
use crate::config::AzureConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Sovereign cloud selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudEnvironment {
    #[default]
    AzureCloud,
    AzureChinaCloud,
    AzureUSGovernment,
}

impl CloudEnvironment {
    pub fn from_str(s: &str) -> AzureResult<Self> {
        match s.to_lowercase().as_str() {
            "azurecloud" | "azure_cloud" | "public" => Ok(Self::AzureCloud),
            "azurechinacloud" | "azure_china_cloud" | "china" => Ok(Self::AzureChinaCloud),
            "azureusgovernment" | "azure_us_government" | "usgov" => Ok(Self::AzureUSGovernment),
            _ => Err(AzureError::Configuration(format!(
                "Unknown cloud environment '{}'. Valid values: AzureCloud, AzureChinaCloud, AzureUSGovernment",
                s
            ))),
        }
    }

    /// Resource Manager endpoint.
    pub fn management_endpoint(&self) -> &'static str {
        match self {
            Self::AzureCloud => "https://management.azure.com",
            Self::AzureChinaCloud => "https://management.chinacloudapi.cn",
            Self::AzureUSGovernment => "https://management.usgovcloudapi.net",
        }
    }

    /// Azure AD authority host.
    pub fn authority_host(&self) -> &'static str {
        match self {
            Self::AzureCloud => "https://login.microsoftonline.com",
            Self::AzureChinaCloud => "https://login.chinacloudapi.cn",
            Self::AzureUSGovernment => "https://login.microsoftonline.us",
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AzureCloud => write!(f, "AzureCloud"),
            Self::AzureChinaCloud => write!(f, "AzureChinaCloud"),
            Self::AzureUSGovernment => write!(f, "AzureUSGovernment"),
        }
    }
}

/// Where credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthSource {
    #[default]
    Auto,
    Env,
    CredentialFile,
    Cli,
    Msi,
    Token,
}

impl AuthSource {
    pub fn from_str(s: &str) -> AzureResult<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "env" => Ok(Self::Env),
            "credential_file" => Ok(Self::CredentialFile),
            "cli" => Ok(Self::Cli),
            "msi" => Ok(Self::Msi),
            "token" => Ok(Self::Token),
            _ => Err(AzureError::Configuration(format!(
                "Invalid auth_source '{}'. Valid values: auto, env, credential_file, cli, msi, token",
                s
            ))),
        }
    }
}

/// A bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<Instant>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            token: token.into(),
            expires_at: expires_in.map(|d| Instant::now() + d),
        }
    }

    /// Usable without refreshing.
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + REFRESH_MARGIN < at,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"********")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Anything that can hand out bearer tokens for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short name of the credential source, for logs.
    fn kind(&self) -> &'static str;

    async fn get_token(&self, scope: &str) -> AzureResult<AccessToken>;
}

// ============================================================================
// Service principal (client credentials grant)
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

fn parse_expires_in(value: Option<&serde_json::Value>) -> Option<Duration> {
    match value? {
        serde_json::Value::Number(n) => n.as_u64().map(Duration::from_secs),
        serde_json::Value::String(s) => s.parse().ok().map(Duration::from_secs),
        _ => None,
    }
}

/// OAuth2 client-credentials flow for a service principal.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority: String,
    tenant: String,
    client_id: String,
    secret: String,
    cache: Arc<RwLock<Option<AccessToken>>>,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        tenant: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority: authority.into().trim_end_matches('/').to_string(),
            tenant: tenant.into(),
            client_id: client_id.into(),
            secret: secret.into(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn fetch_token(&self, scope: &str) -> AzureResult<AccessToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant);
        debug!(tenant = %self.tenant, client_id = %self.client_id, "Requesting service principal token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.secret.as_str()),
            ("scope", scope),
        ];
        let response = self.http.post(&url).form(&form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("error_description")
                        .and_then(|d| d.as_str())
                        .map(String::from)
                })
                .unwrap_or(text);
            return Err(AzureError::Authentication(format!(
                "Token request for client '{}' failed with {}: {}",
                self.client_id, status, detail
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(AccessToken::new(
            body.access_token,
            parse_expires_in(body.expires_in.as_ref()),
        ))
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    fn kind(&self) -> &'static str {
        "service_principal"
    }

    async fn get_token(&self, scope: &str) -> AzureResult<AccessToken> {
        {
            let cached = self.cache.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.clone());
            }
        }

        let token = self.fetch_token(scope).await?;
        *self.cache.write().await = Some(token.clone());
        Ok(token)
    }
}

// ============================================================================
// Pre-issued token
// ============================================================================

/// A bearer token supplied by the caller.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn kind(&self) -> &'static str {
        "token"
    }

    async fn get_token(&self, _scope: &str) -> AzureResult<AccessToken> {
        Ok(AccessToken::new(self.token.clone(), None))
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
    #[serde(default)]
    subscription: Option<String>,
}

/// Tokens borrowed from a logged-in `az` session.
pub struct AzureCliCredential {
    cache: Arc<RwLock<Option<AccessToken>>>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn run_az(args: &[&str]) -> AzureResult<serde_json::Value> {
        let output = tokio::process::Command::new("az")
            .args(args)
            .args(["--output", "json"])
            .output()
            .await
            .map_err(|e| {
                AzureError::Authentication(format!("Failed to run the Azure CLI: {}", e))
            })?;

        if !output.status.success() {
            return Err(AzureError::Authentication(format!(
                "az {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Subscription of the active CLI account.
    pub async fn default_subscription() -> AzureResult<String> {
        let account = Self::run_az(&["account", "show"]).await?;
        account
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                AzureError::Authentication("az account show returned no subscription id".into())
            })
    }

    fn expiry(token: &CliToken) -> Option<Duration> {
        let expires_at = match token.expires_on_epoch {
            Some(epoch) => chrono::DateTime::from_timestamp(epoch, 0)?,
            None => {
                let raw = token.expires_on.as_deref()?;
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()?
                    .and_local_timezone(chrono::Local)
                    .single()?
                    .with_timezone(&chrono::Utc)
            }
        };
        (expires_at - chrono::Utc::now()).to_std().ok()
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn kind(&self) -> &'static str {
        "cli"
    }

    async fn get_token(&self, scope: &str) -> AzureResult<AccessToken> {
        if let Some(token) = self.cache.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }

        let resource = scope.trim_end_matches("/.default");
        let raw = Self::run_az(&["account", "get-access-token", "--resource", resource]).await?;
        let parsed: CliToken = serde_json::from_value(raw)?;
        if let Some(sub) = &parsed.subscription {
            debug!(subscription = %sub, "Azure CLI token acquired");
        }
        let token = AccessToken::new(parsed.access_token.clone(), Self::expiry(&parsed));
        *self.cache.write().await = Some(token.clone());
        Ok(token)
    }
}

// ============================================================================
// Managed identity
// ============================================================================

/// Managed identity through the instance metadata service.
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    cache: Arc<RwLock<Option<AccessToken>>>,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self::with_endpoint(http, IMDS_ENDPOINT, client_id)
    }

    pub fn with_endpoint(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id,
            cache: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn kind(&self) -> &'static str {
        "msi"
    }

    async fn get_token(&self, scope: &str) -> AzureResult<AccessToken> {
        if let Some(token) = self.cache.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }

        let resource = format!("{}/", scope.trim_end_matches("/.default"));
        let mut query = vec![("api-version", "2018-02-01"), ("resource", resource.as_str())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureError::Authentication(format!(
                "Managed identity token request failed with {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = AccessToken::new(
            body.access_token,
            parse_expires_in(body.expires_in.as_ref()),
        );
        *self.cache.write().await = Some(token.clone());
        Ok(token)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Authentication inputs a module receives as parameters.
#[derive(Clone, Default)]
pub struct AuthSettings {
    pub auth_source: AuthSource,
    pub profile: Option<String>,
    pub subscription_id: Option<String>,
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub tenant: Option<String>,
    pub cloud_environment: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("auth_source", &self.auth_source)
            .field("profile", &self.profile)
            .field("subscription_id", &self.subscription_id)
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "********"))
            .field("tenant", &self.tenant)
            .field("cloud_environment", &self.cloud_environment)
            .finish()
    }
}

/// Outcome of credential resolution.
pub struct ResolvedCredentials {
    pub credential: Arc<dyn TokenCredential>,
    pub subscription_id: String,
    pub cloud: CloudEnvironment,
    pub management_endpoint: String,
}

impl ResolvedCredentials {
    /// OAuth2 scope for Resource Manager.
    pub fn scope(&self) -> String {
        format!("{}/.default", self.management_endpoint.trim_end_matches('/'))
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("credential", &self.credential.kind())
            .field("subscription_id", &self.subscription_id)
            .field("cloud", &self.cloud)
            .field("management_endpoint", &self.management_endpoint)
            .finish()
    }
}

/// A service principal definition gathered from any source.
#[derive(Debug, Default)]
struct ServicePrincipal {
    subscription_id: Option<String>,
    client_id: Option<String>,
    secret: Option<String>,
    tenant: Option<String>,
    cloud_environment: Option<String>,
}

impl ServicePrincipal {
    fn is_complete(&self) -> bool {
        self.client_id.is_some() && self.secret.is_some() && self.tenant.is_some()
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok().filter(|v| !v.is_empty()))
}

fn principal_from_env() -> ServicePrincipal {
    ServicePrincipal {
        subscription_id: env_any(&["AZURE_SUBSCRIPTION_ID"]),
        client_id: env_any(&["AZURE_CLIENT_ID"]),
        secret: env_any(&["AZURE_SECRET", "AZURE_CLIENT_SECRET"]),
        tenant: env_any(&["AZURE_TENANT", "AZURE_TENANT_ID"]),
        cloud_environment: env_any(&["AZURE_CLOUD_ENVIRONMENT"]),
    }
}

fn default_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".azure").join("credentials"))
}

/// Read one profile section from an INI credentials file.
pub fn load_credentials_profile(
    path: &std::path::Path,
    profile: &str,
) -> AzureResult<HashMap<String, String>> {
    if !path.exists() {
        return Err(AzureError::Configuration(format!(
            "Credentials file {} not found",
            path.display()
        )));
    }

    let parsed = ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Ini))
        .build()
        .and_then(|c| c.try_deserialize::<HashMap<String, HashMap<String, String>>>())
        .map_err(|e| {
            AzureError::Configuration(format!(
                "Failed to parse credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

    parsed
        .into_iter()
        .find(|(section, _)| section.eq_ignore_ascii_case(profile))
        .map(|(_, values)| {
            values
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect()
        })
        .ok_or_else(|| {
            AzureError::Configuration(format!(
                "Profile '{}' not found in {}",
                profile,
                path.display()
            ))
        })
}

fn principal_from_file(path: &std::path::Path, profile: &str) -> AzureResult<ServicePrincipal> {
    let mut section = load_credentials_profile(path, profile)?;
    Ok(ServicePrincipal {
        subscription_id: section.remove("subscription_id"),
        client_id: section.remove("client_id"),
        secret: section.remove("secret"),
        tenant: section.remove("tenant"),
        cloud_environment: section.remove("cloud_environment"),
    })
}

/// Pick a credential source and build the credential for it.
pub async fn resolve(
    settings: &AuthSettings,
    config: &AzureConfig,
) -> AzureResult<ResolvedCredentials> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let explicit = ServicePrincipal {
        subscription_id: settings.subscription_id.clone(),
        client_id: settings.client_id.clone(),
        secret: settings.secret.clone(),
        tenant: settings.tenant.clone(),
        cloud_environment: settings.cloud_environment.clone(),
    };

    let profile = settings
        .profile
        .clone()
        .or_else(|| env_any(&["AZURE_PROFILE"]))
        .or_else(|| config.profile.clone())
        .unwrap_or_else(|| "default".to_string());
    let credentials_path = config
        .credentials_file
        .clone()
        .or_else(default_credentials_path);

    let source = match settings.auth_source {
        AuthSource::Auto if explicit.is_complete() => None,
        AuthSource::Auto if settings.profile.is_some() => Some(AuthSource::CredentialFile),
        AuthSource::Auto => {
            let env = principal_from_env();
            if env.is_complete() {
                Some(AuthSource::Env)
            } else if env_any(&["AZURE_ACCESS_TOKEN"]).is_some() {
                Some(AuthSource::Token)
            } else if credentials_path
                .as_deref()
                .map(|p| principal_from_file(p, &profile).is_ok())
                .unwrap_or(false)
            {
                Some(AuthSource::CredentialFile)
            } else {
                Some(AuthSource::Cli)
            }
        }
        other => Some(other),
    };

    // Explicit parameters always win over what a source provides.
    let (principal, cli) = match source {
        None => (explicit, false),
        Some(AuthSource::Env) => (overlay(explicit, principal_from_env()), false),
        Some(AuthSource::CredentialFile) => {
            let path = credentials_path.ok_or_else(|| {
                AzureError::Configuration("Cannot locate the home directory".into())
            })?;
            (overlay(explicit, principal_from_file(&path, &profile)?), false)
        }
        Some(AuthSource::Cli) => (explicit, true),
        Some(AuthSource::Msi) | Some(AuthSource::Token) | Some(AuthSource::Auto) => {
            (overlay(explicit, principal_from_env()), false)
        }
    };

    let cloud = match principal
        .cloud_environment
        .as_deref()
        .or(config.cloud_environment.as_deref())
    {
        Some(name) => CloudEnvironment::from_str(name)?,
        None => CloudEnvironment::default(),
    };
    let management_endpoint = config
        .management_endpoint
        .clone()
        .unwrap_or_else(|| cloud.management_endpoint().to_string());
    let authority = config
        .authority_host
        .clone()
        .unwrap_or_else(|| cloud.authority_host().to_string());

    let credential: Arc<dyn TokenCredential> = match source {
        Some(AuthSource::Cli) => Arc::new(AzureCliCredential::new()),
        Some(AuthSource::Msi) => Arc::new(ManagedIdentityCredential::new(
            http,
            principal.client_id.clone(),
        )),
        Some(AuthSource::Token) => {
            let token = env_any(&["AZURE_ACCESS_TOKEN"]).ok_or_else(|| {
                AzureError::Authentication("AZURE_ACCESS_TOKEN is not set".into())
            })?;
            Arc::new(StaticTokenCredential::new(token))
        }
        _ => {
            let (client_id, secret, tenant) = match (
                principal.client_id.clone(),
                principal.secret.clone(),
                principal.tenant.clone(),
            ) {
                (Some(c), Some(s), Some(t)) => (c, s, t),
                _ => {
                    return Err(AzureError::Authentication(
                        "Service principal credentials require client_id, secret and tenant"
                            .into(),
                    ))
                }
            };
            Arc::new(ClientSecretCredential::new(
                http, authority, tenant, client_id, secret,
            ))
        }
    };

    let subscription_id = match principal.subscription_id {
        Some(sub) => sub,
        None if cli => AzureCliCredential::default_subscription().await?,
        None => {
            return Err(AzureError::Authentication(
                "No subscription_id given and none found in the credential source".into(),
            ))
        }
    };

    info!(
        source = credential.kind(),
        subscription = %subscription_id,
        cloud = %cloud,
        "Resolved Azure credentials"
    );

    Ok(ResolvedCredentials {
        credential,
        subscription_id,
        cloud,
        management_endpoint,
    })
}

fn overlay(explicit: ServicePrincipal, source: ServicePrincipal) -> ServicePrincipal {
    ServicePrincipal {
        subscription_id: explicit.subscription_id.or(source.subscription_id),
        client_id: explicit.client_id.or(source.client_id),
        secret: explicit.secret.or(source.secret),
        tenant: explicit.tenant.or(source.tenant),
        cloud_environment: explicit.cloud_environment.or(source.cloud_environment),
    }
}
