//! Authenticating HTTP executor for the Foundation API.
//!
//! Every resource wrapper reaches the network through [`ApiClient::send`].
//! The client authenticates lazily, attaches the session token, and retries a
//! call exactly once after re-authenticating when the service answers 401.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::auth::{Credentials, TokenStore, AUTH_PATH};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub connect_timeout: Duration,
    /// Per-request timeout. `None` leaves long-held polls to the transport.
    pub request_timeout: Option<Duration>,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

/// A single call against the API, relative to the client's base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Appends a query parameter. Values are percent-encoded on send.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, ApiError> {
        let body = serde_json::to_string(body).map_err(ApiError::Encode)?;
        Ok(self.with_body(body))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Cloneable API client. Clones share one session token.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    tokens: Arc<TokenStore>,
    request_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ApiError> {
        Self::with_options(base_url, credentials, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        credentials: Credentials,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url.into())?;
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|err| ApiError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            tokens: Arc::new(TokenStore::new()),
            request_timeout: options.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Session token store shared by all clones of this client.
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Sends a request with authentication and the single 401 retry enabled.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<String, ApiError> {
        self.execute_with(method, path, body, true).await
    }

    pub async fn execute_with(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
        attempt_auth: bool,
    ) -> Result<String, ApiError> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send(&request, attempt_auth).await
    }

    /// Sends `request` and returns the raw response body.
    ///
    /// With `attempt_auth`, authenticates first when no token is held and,
    /// on a 401, re-authenticates once and repeats the call once. The repeat
    /// never re-authenticates again, so a second 401 reaches the caller.
    /// Without `attempt_auth` the request is sent exactly once.
    pub async fn send(&self, request: &ApiRequest, attempt_auth: bool) -> Result<String, ApiError> {
        if !attempt_auth {
            return self.send_attempt(request).await;
        }

        if !self.tokens.is_present() {
            self.authenticate().await?;
        }

        match self.send_attempt(request).await {
            Err(err) if err.is_unauthorized() => {
                debug!(
                    event = "request_unauthorized",
                    method = %request.method,
                    path = %request.path
                );
                self.authenticate().await?;
                self.send_attempt(request).await
            }
            result => result,
        }
    }

    /// Obtains a fresh session token, replacing any held one.
    ///
    /// The held token is cleared before the attempt, so a failure leaves the
    /// client without a token.
    pub async fn authenticate(&self) -> Result<(), ApiError> {
        self.tokens.clear();
        debug!(
            event = "authenticate",
            username = %self.credentials.username,
            agent_id = %self.credentials.agent_id
        );

        let request = ApiRequest::post(AUTH_PATH).with_json(&self.credentials.request_body())?;
        let body = match self.send_attempt(&request).await {
            Ok(body) => body,
            Err(ApiError::ServiceError { status, body }) => {
                return Err(ApiError::AuthenticationFailed {
                    reason: format!("token endpoint returned {status}: {body}"),
                });
            }
            Err(err) => return Err(err),
        };

        let token = parse_token_response(&body)?;
        self.tokens.replace(token);
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send_attempt(&self, request: &ApiRequest) -> Result<String, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.endpoint(&request.path))
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(authorization) = self.tokens.authorization_header() {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.body(body.clone());
        }

        debug!(
            event = "request_dispatch",
            method = %request.method,
            path = %request.path
        );
        let response = builder.send().await.map_err(ApiError::Unreachable)?;
        let status = response.status();
        let body = response.text().await.map_err(ApiError::Unreachable)?;

        if !status.is_success() {
            return Err(ApiError::ServiceError {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(body)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("service error {status}: {body}")]
    ServiceError { status: StatusCode, body: String },

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to parse response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Transport failures, throttling and server-side errors may succeed on a
    /// later attempt; everything else needs caller action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::ServiceError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ServiceError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn normalize_base_url(base_url: String) -> Result<String, ApiError> {
    let trimmed = base_url.trim().trim_end_matches('/').to_string();
    Url::parse(&trimmed).map_err(|err| ApiError::Config(format!("base url {trimmed:?}: {err}")))?;
    Ok(trimmed)
}

fn parse_token_response(body: &str) -> Result<SecretString, ApiError> {
    match serde_json::from_str::<String>(body) {
        Ok(token) if !token.is_empty() => Ok(SecretString::new(token)),
        Ok(_) => Err(ApiError::AuthenticationFailed {
            reason: "token endpoint returned an empty token".to_string(),
        }),
        Err(err) => Err(ApiError::AuthenticationFailed {
            reason: format!("unparseable token response: {err}"),
        }),
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default, alias = "Message")]
        message: Option<String>,
        #[serde(default, alias = "Error")]
        error: Option<String>,
        #[serde(default, alias = "Reason")]
        reason: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error).or(parsed.reason) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
