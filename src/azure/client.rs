//! The ARM client seam and its reqwest implementation.
//!
//! Modules depend on [`ArmClient`] only. It has a single required operation,
//! [`ArmClient::send`]; the verb helpers in [`ArmClientExt`] layer
//! not-found-as-data semantics on top of it:
//!
//! - `get_resource` returns `Ok(None)` on 404
//! - `delete` returns `Ok(false)` on 404
//! - `list` follows `nextLink` pages
//!
//! [`RestClient`] is the production implementation. It authenticates every
//! request, retries transient failures and waits for long-running operations.

use super::auth::{ResolvedCredentials, TokenCredential};
use super::error::{AzureError, AzureResult};
use crate::retry::{wait_until, RetryDecision, RetryError, RetryPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP verbs ARM understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Put,
    Patch,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn from_str(s: &str) -> AzureResult<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            other => Err(AzureError::Configuration(format!(
                "Unsupported HTTP method '{}'",
                other
            ))),
        }
    }

    /// Whether the verb changes server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }

    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Post => reqwest::Method::POST,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// One request against Resource Manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmRequest {
    pub method: HttpMethod,
    /// Path below the management endpoint, or an absolute URL (`nextLink`, operation URLs)
    pub path: String,
    /// Empty when the path already carries its `api-version`
    pub api_version: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Wait for a long-running operation to reach a terminal state
    pub wait: bool,
    /// Overrides the client's polling cadence for this request
    pub poll: Option<PollSettings>,
}

impl ArmRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            api_version: api_version.into(),
            query: Vec::new(),
            body: None,
            wait: true,
            poll: None,
        }
    }

    pub fn get(path: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path, api_version)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn with_polling(mut self, poll: PollSettings) -> Self {
        self.poll = Some(poll);
        self
    }
}

/// Response from Resource Manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl ArmResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Body, or `null` when the response had none.
    pub fn into_body(self) -> Value {
        self.body.unwrap_or(Value::Null)
    }
}

/// Transport to Resource Manager.
#[async_trait]
pub trait ArmClient: Send + Sync {
    /// Subscription requests are scoped to.
    fn subscription_id(&self) -> String;

    /// Send a request. Non-2xx answers come back as [`AzureError::Http`].
    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse>;
}

/// Verb helpers over [`ArmClient::send`].
#[async_trait]
pub trait ArmClientExt: ArmClient {
    /// Fetch a resource, `None` when it does not exist.
    async fn get_resource(&self, path: &str, api_version: &str) -> AzureResult<Option<Value>> {
        match self.send(ArmRequest::get(path, api_version)).await {
            Ok(response) => Ok(Some(response.into_body())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Collect every `value` entry across `nextLink` pages.
    async fn list(&self, path: &str, api_version: &str) -> AzureResult<Vec<Value>> {
        let first = self.send(ArmRequest::get(path, api_version)).await?.into_body();
        self.collect_pages(first).await
    }

    /// Collect `value` entries from an already fetched page and every page after it.
    async fn collect_pages(&self, first: Value) -> AzureResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = first;

        loop {
            if let Some(values) = page.get("value").and_then(Value::as_array) {
                items.extend(values.iter().cloned());
            }
            let link = match page.get("nextLink").and_then(Value::as_str) {
                Some(link) if !link.is_empty() => link.to_string(),
                _ => break,
            };
            debug!(next_link = %link, "Following page");
            page = self.send(ArmRequest::get(link, "")).await?.into_body();
        }
        Ok(items)
    }

    async fn put(&self, path: &str, api_version: &str, body: Value) -> AzureResult<Value> {
        let request = ArmRequest::new(HttpMethod::Put, path, api_version).with_body(body);
        Ok(self.send(request).await?.into_body())
    }

    async fn patch(&self, path: &str, api_version: &str, body: Value) -> AzureResult<Value> {
        let request = ArmRequest::new(HttpMethod::Patch, path, api_version).with_body(body);
        Ok(self.send(request).await?.into_body())
    }

    async fn post(&self, path: &str, api_version: &str, body: Option<Value>) -> AzureResult<Value> {
        let mut request = ArmRequest::new(HttpMethod::Post, path, api_version);
        request.body = body;
        Ok(self.send(request).await?.into_body())
    }

    /// Delete a resource. `Ok(false)` when it was already gone.
    async fn delete(&self, path: &str, api_version: &str) -> AzureResult<bool> {
        match self
            .send(ArmRequest::new(HttpMethod::Delete, path, api_version))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<T: ArmClient + ?Sized> ArmClientExt for T {}

/// How often and for how long to poll an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Tunables for [`RestClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub polling: PollSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::exponential(4, Duration::from_secs(1), Duration::from_secs(60)),
            polling: PollSettings::default(),
        }
    }
}

/// reqwest-backed [`ArmClient`].
pub struct RestClient {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    endpoint: String,
    scope: String,
    subscription: String,
    settings: ClientSettings,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("endpoint", &self.endpoint)
            .field("subscription", &self.subscription)
            .field("credential", &self.credential.kind())
            .finish()
    }
}

impl RestClient {
    pub fn new(credentials: ResolvedCredentials, settings: ClientSettings) -> AzureResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("azcollection/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            scope: credentials.scope(),
            credential: credentials.credential,
            endpoint: credentials.management_endpoint.trim_end_matches('/').to_string(),
            subscription: credentials.subscription_id,
            settings,
        })
    }

    fn url_for(&self, request: &ArmRequest) -> AzureResult<url::Url> {
        let raw = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else {
            format!("{}/{}", self.endpoint, request.path.trim_start_matches('/'))
        };
        let mut url =
            url::Url::parse(&raw).map_err(|_| AzureError::InvalidResourceId(request.path.clone()))?;

        let has_version = url.query_pairs().any(|(k, _)| k == "api-version");
        {
            let mut pairs = url.query_pairs_mut();
            if !request.api_version.is_empty() && !has_version {
                pairs.append_pair("api-version", &request.api_version);
            }
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// One HTTP exchange, no retries.
    async fn send_once(
        &self,
        method: HttpMethod,
        url: &url::Url,
        body: Option<&Value>,
    ) -> AzureResult<ArmResponse> {
        let token = self.credential.get_token(&self.scope).await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(%method, %url, request_id = %request_id, "ARM request");

        let mut builder = self
            .http
            .request(method.as_reqwest(), url.clone())
            .bearer_auth(&token.token)
            .header("x-ms-client-request-id", &request_id);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };
        debug!(status, request_id = %request_id, "ARM response");

        if (200..300).contains(&status) {
            return Ok(ArmResponse {
                status,
                headers,
                body,
            });
        }

        let (code, message) = parse_error_body(status, body.as_ref());
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        Err(AzureError::Http {
            status,
            code,
            message,
            retry_after,
        })
    }

    async fn send_with_retry(
        &self,
        method: HttpMethod,
        url: &url::Url,
        body: Option<&Value>,
    ) -> AzureResult<ArmResponse> {
        self.settings
            .retry
            .execute(
                || self.send_once(method, url, body),
                |err: &AzureError, _| {
                    if err.is_retryable() {
                        RetryDecision::Retry {
                            not_before: err.retry_after(),
                        }
                    } else {
                        RetryDecision::GiveUp
                    }
                },
            )
            .await
            .map_err(|e| flatten_retry_error(e, "request"))
    }

    /// Follow `Azure-AsyncOperation` or `Location` until the operation settles.
    async fn wait_for_operation(
        &self,
        initial: &ArmResponse,
        poll: PollSettings,
    ) -> AzureResult<Option<ArmResponse>> {
        let interval = poll.interval;
        let deadline = poll.timeout;

        if let Some(op_url) = initial.header("azure-asyncoperation") {
            let url = url::Url::parse(op_url)
                .map_err(|_| AzureError::InvalidResourceId(op_url.to_string()))?;
            debug!(%url, "Polling async operation");

            let settled = wait_until(
                interval,
                deadline,
                || self.send_with_retry(HttpMethod::Get, &url, None),
                |r: &ArmResponse| operation_status(r).map(is_terminal).unwrap_or(false),
            )
            .await
            .map_err(|e| flatten_retry_error(e, "async operation"))?;

            let status = operation_status(&settled).unwrap_or("Succeeded").to_string();
            if !status.eq_ignore_ascii_case("succeeded") {
                let (_, message) = parse_error_body(settled.status, settled.body.as_ref());
                return Err(AzureError::OperationFailed { status, message });
            }
            return Ok(Some(settled));
        }

        if let Some(location) = initial.header("location") {
            let url = url::Url::parse(location)
                .map_err(|_| AzureError::InvalidResourceId(location.to_string()))?;
            debug!(%url, "Polling operation location");

            let settled = wait_until(
                interval,
                deadline,
                || self.send_with_retry(HttpMethod::Get, &url, None),
                |r: &ArmResponse| r.status != 202,
            )
            .await
            .map_err(|e| flatten_retry_error(e, "operation location"))?;
            return Ok(Some(settled));
        }

        Ok(None)
    }
}

#[async_trait]
impl ArmClient for RestClient {
    fn subscription_id(&self) -> String {
        self.subscription.clone()
    }

    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse> {
        let url = self.url_for(&request)?;
        let response = self
            .send_with_retry(request.method, &url, request.body.as_ref())
            .await?;

        let pending = matches!(response.status, 201 | 202);
        if !(request.wait && pending && request.method.is_mutating()) {
            return Ok(response);
        }

        let poll = request.poll.unwrap_or(self.settings.polling);
        let settled = self.wait_for_operation(&response, poll).await?;
        match request.method {
            HttpMethod::Put | HttpMethod::Patch => {
                if settled.is_none() && response.body.is_some() {
                    return Ok(response);
                }
                info!(%url, "Operation finished, reading final state");
                let mut final_url = url.clone();
                final_url.set_query(None);
                final_url
                    .query_pairs_mut()
                    .append_pair("api-version", &request.api_version);
                self.send_with_retry(HttpMethod::Get, &final_url, None).await
            }
            _ => Ok(settled.unwrap_or(response)),
        }
    }
}

fn operation_status(response: &ArmResponse) -> Option<&str> {
    response
        .body
        .as_ref()
        .and_then(|b| b.get("status"))
        .and_then(Value::as_str)
}

fn is_terminal(status: &str) -> bool {
    ["succeeded", "failed", "canceled", "cancelled"]
        .iter()
        .any(|s| status.eq_ignore_ascii_case(s))
}

/// Pull `code` and `message` out of an ARM error body.
fn parse_error_body(status: u16, body: Option<&Value>) -> (String, String) {
    let error = body.and_then(|b| b.get("error").or(Some(b)));
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Error")
                .replace(' ', "")
        });
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| body.and_then(Value::as_str).map(String::from))
        .unwrap_or_default();
    (code, message)
}

fn flatten_retry_error(err: RetryError<AzureError>, what: &str) -> AzureError {
    let summary = err.to_string();
    match err.into_inner() {
        Some(inner) => inner,
        None => AzureError::Timeout(format!("{}: {}", what, summary)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::from_str("patch").unwrap(), HttpMethod::Patch);
        assert!(HttpMethod::from_str("MERGE").is_err());
        assert!(HttpMethod::Delete.is_mutating());
        assert!(!HttpMethod::Head.is_mutating());
    }

    #[test]
    fn test_parse_error_body() {
        let body = json!({"error": {"code": "ResourceGroupNotFound", "message": "Resource group 'x' could not be found."}});
        let (code, message) = parse_error_body(404, Some(&body));
        assert_eq!(code, "ResourceGroupNotFound");
        assert_eq!(message, "Resource group 'x' could not be found.");

        let (code, message) = parse_error_body(503, None);
        assert_eq!(code, "ServiceUnavailable");
        assert_eq!(message, "");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal("Succeeded"));
        assert!(is_terminal("Canceled"));
        assert!(!is_terminal("InProgress"));
    }

    #[test]
    fn test_response_header_lookup() {
        let mut response = ArmResponse::new(202, None);
        response
            .headers
            .insert("azure-asyncoperation".into(), "https://x/op".into());
        assert_eq!(response.header("Azure-AsyncOperation"), Some("https://x/op"));
        assert_eq!(response.into_body(), Value::Null);
    }

    #[test]
    fn test_request_builder() {
        let request = ArmRequest::get("/subscriptions/s", "2021-04-01")
            .with_query("$filter", "tagName eq 'env'")
            .no_wait();
        assert!(!request.wait);
        assert_eq!(request.query.len(), 1);
    }
}
