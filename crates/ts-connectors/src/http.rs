//! HTTP client shared by the Graph and SharePoint connectors.
//!
//! Handles bearer / client-credentials authentication, retry with backoff,
//! `Retry-After` on throttling, and optional client-side rate limiting.

use crate::secure_string::SecureString;
use crate::traits::{AuthConfig, ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;
/// Upper bound for honouring a server supplied `Retry-After`.
const MAX_RETRY_AFTER_SECS: u64 = 120;

/// HTTP client with authentication, retry and rate limiting.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    oauth_token: Arc<RwLock<Option<OAuthToken>>>,
    rate_limiter: Option<Arc<RateLimiterType>>,
}

#[derive(Clone)]
struct OAuthToken {
    access_token: SecureString,
    expires_at: std::time::Instant,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &self.access_token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client-side rate limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub period: Duration,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            period: Duration::from_secs(60),
            burst_size: 50,
        }
    }
}

/// Error envelope returned by Graph and SharePoint REST.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl HttpClient {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, None)
    }

    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        // TLS verification can only be relaxed in debug builds.
        let verify_tls = if config.verify_tls {
            true
        } else if can_disable_tls_verification() {
            warn!(
                base_url = %config.base_url,
                connector_name = %config.name,
                "TLS certificate verification disabled"
            );
            false
        } else {
            warn!(
                base_url = %config.base_url,
                connector_name = %config.name,
                "Ignoring request to disable TLS verification in a release build"
            );
            true
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(header = %key, "Skipping invalid default header"),
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let rate_limiter = match rate_limit {
            Some(rl) => {
                let max = rl.max_requests.max(1);
                let quota = Quota::with_period(rl.period / max)
                    .ok_or_else(|| {
                        ConnectorError::ConfigError("Rate limit period must be non-zero".into())
                    })?
                    .allow_burst(NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN));
                Some(Arc::new(GovernorRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            oauth_token: Arc::new(RwLock::new(None)),
            rate_limiter,
        })
    }

    /// Resolves a path against the base URL. Absolute URLs (pagination
    /// links, other site collections) are returned unchanged.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn get(&self, path: &str) -> ConnectorResult<Response> {
        let request = self.client.get(self.build_url(path));
        self.execute_with_retry(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        let response = self.get(path).await?;
        parse_json_response(response).await
    }

    /// GET with extra per-request headers (e.g. `ConsistencyLevel`).
    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
    ) -> ConnectorResult<T> {
        let mut request = self.client.get(self.build_url(path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = self.execute_with_retry(request).await?;
        parse_json_response(response).await
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<Response> {
        let request = self.client.post(self.build_url(path)).json(body);
        self.execute_with_retry(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<R> {
        let response = self.post(path, body).await?;
        parse_json_response(response).await
    }

    /// POST without a body. SharePoint REST uses these for method-style calls.
    pub async fn post_empty(&self, path: &str) -> ConnectorResult<Response> {
        let request = self
            .client
            .post(self.build_url(path))
            .header(reqwest::header::CONTENT_LENGTH, "0");
        self.execute_with_retry(request).await
    }

    /// POST with extra headers, e.g. `X-HTTP-Method: MERGE`.
    pub async fn post_with_headers<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> ConnectorResult<Response> {
        let mut request = self.client.post(self.build_url(path)).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.execute_with_retry(request).await
    }

    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<Response> {
        let request = self.client.patch(self.build_url(path)).json(body);
        self.execute_with_retry(request).await
    }

    pub async fn delete(&self, path: &str) -> ConnectorResult<Response> {
        let request = self.client.delete(self.build_url(path));
        self.execute_with_retry(request).await
    }

    async fn execute_with_retry(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        request = self.add_auth(request).await?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(200);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(attempt, ?delay, "Retrying request");
                sleep(delay).await;
                delay = std::cmp::min(delay * 2 + rand_jitter(), Duration::from_secs(30));
            }

            let request_clone = request
                .try_clone()
                .ok_or_else(|| ConnectorError::Internal("Failed to clone request".to_string()))?;

            match request_clone.send().await {
                Ok(response) => {
                    let status = response.status();

                    let throttled = status == StatusCode::TOO_MANY_REQUESTS
                        || (status == StatusCode::SERVICE_UNAVAILABLE
                            && response.headers().contains_key("retry-after"));
                    if throttled {
                        let retry_after = retry_after_secs(&response);
                        if attempt < self.config.max_retries {
                            warn!(retry_after, %status, "Throttled, backing off");
                            sleep(Duration::from_secs(retry_after)).await;
                            continue;
                        }
                        return Err(ConnectorError::RateLimited(retry_after));
                    }

                    if status.is_server_error() && attempt < self.config.max_retries {
                        warn!(%status, "Server error, retrying");
                        last_error = Some(ConnectorError::RequestFailed(format!(
                            "Server error: {}",
                            status
                        )));
                        continue;
                    }

                    return error_for_status(response).await;
                }
                Err(e) => {
                    last_error = Some(classify_transport_error(&e));
                    if attempt >= self.config.max_retries {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectorError::Internal("Unknown error".to_string())))
    }

    async fn add_auth(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ConnectorResult<reqwest::RequestBuilder> {
        match &self.config.auth {
            AuthConfig::None => Ok(request),
            AuthConfig::BearerToken { token } => Ok(request.bearer_auth(token.expose_secret())),
            AuthConfig::OAuth2 {
                client_id,
                client_secret,
                token_url,
                scopes,
            } => {
                let token = self
                    .get_oauth_token(client_id, client_secret, token_url, scopes)
                    .await?;
                Ok(request.bearer_auth(token.expose_secret()))
            }
        }
    }

    /// Gets a cached client-credentials token or fetches a new one.
    async fn get_oauth_token(
        &self,
        client_id: &str,
        client_secret: &SecureString,
        token_url: &str,
        scopes: &[String],
    ) -> ConnectorResult<SecureString> {
        {
            let token = self.oauth_token.read().await;
            if let Some(t) = &*token {
                if t.expires_at > std::time::Instant::now() + Duration::from_secs(60) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        let mut slot = self.oauth_token.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(t) = &*slot {
            if t.expires_at > std::time::Instant::now() + Duration::from_secs(60) {
                return Ok(t.access_token.clone());
            }
        }

        info!(connector = %self.config.name, "Fetching new OAuth2 token");

        let scope = scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .client
            .post(token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::AuthenticationFailed(format!(
                "Token request failed ({}): {}",
                status,
                truncate(&body, 300)
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        let access_token = SecureString::new(token_response.access_token);
        *slot = Some(OAuthToken {
            access_token: access_token.clone(),
            expires_at: std::time::Instant::now() + Duration::from_secs(token_response.expires_in),
        });

        Ok(access_token)
    }
}

/// Parses a JSON response body, keeping a snippet of the body on failure.
pub(crate) async fn parse_json_response<T: DeserializeOwned>(
    response: Response,
) -> ConnectorResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            truncate(&text, 500)
        ))
    })
}

/// Maps a non-success status to a typed error; passes success through.
async fn error_for_status(response: Response) -> ConnectorResult<Response> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = api_error_detail(&body).unwrap_or_else(|| truncate(&body, 300));

    Err(match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed(detail),
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationDenied(detail),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(detail),
        StatusCode::CONFLICT => ConnectorError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited(DEFAULT_RETRY_AFTER_SECS),
        StatusCode::BAD_REQUEST => ConnectorError::InvalidRequest(detail),
        s if s.is_client_error() => {
            ConnectorError::RequestFailed(format!("Client error {}: {}", s, detail))
        }
        s => ConnectorError::RequestFailed(format!("Server error {}: {}", s, detail)),
    })
}

/// Extracts `code: message` from a Graph / SharePoint error envelope.
fn api_error_detail(body: &str) -> Option<String> {
    let envelope: ApiErrorEnvelope = serde_json::from_str(body).ok()?;
    // SharePoint verbose errors nest the text as {"lang": "...", "value": "..."}.
    let message = match envelope.error.message {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Object(map)) => map
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    match envelope.error.code {
        Some(code) if !message.is_empty() => Some(format!("{}: {}", code, message)),
        Some(code) => Some(code),
        None if !message.is_empty() => Some(message),
        None => None,
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        .min(MAX_RETRY_AFTER_SECS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Small jitter for exponential backoff.
fn rand_jitter() -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 100)
}

/// Whether TLS verification may be disabled. Always false in release builds.
#[inline]
pub fn can_disable_tls_verification() -> bool {
    cfg!(debug_assertions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;

    #[test]
    fn test_build_url_relative_and_absolute() {
        let client =
            HttpClient::new(test_connector_config("t", "https://graph.example.com/v1.0/")).unwrap();

        assert_eq!(
            client.build_url("/users/abc"),
            "https://graph.example.com/v1.0/users/abc"
        );
        assert_eq!(
            client.build_url("users/abc"),
            "https://graph.example.com/v1.0/users/abc"
        );
        assert_eq!(
            client.build_url("https://contoso.sharepoint.com/sites/a/_api/web"),
            "https://contoso.sharepoint.com/sites/a/_api/web"
        );
    }

    #[test]
    fn test_api_error_detail_graph_shape() {
        let body = r#"{"error":{"code":"Request_ResourceNotFound","message":"Resource 'x' does not exist"}}"#;
        assert_eq!(
            api_error_detail(body).unwrap(),
            "Request_ResourceNotFound: Resource 'x' does not exist"
        );
    }

    #[test]
    fn test_api_error_detail_sharepoint_shape() {
        let body = r#"{"error":{"code":"-2146232832, Microsoft.SharePoint.SPException","message":{"lang":"en-US","value":"User cannot be found."}}}"#;
        let detail = api_error_detail(body).unwrap();
        assert!(detail.ends_with("User cannot be found."));
    }

    #[test]
    fn test_api_error_detail_not_json() {
        assert!(api_error_detail("<html>oops</html>").is_none());
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 600);
        assert_eq!(config.period, Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limited_client_builds() {
        let client = HttpClient::with_rate_limit(
            test_connector_config("t", "https://graph.example.com"),
            Some(RateLimitConfig::default()),
        );
        assert!(client.is_ok());
    }
}
