use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;
use crate::models::{ApiErrorTag, FailureCode, Provider};
use crate::rate_limiter::RateLimiter;

/// One outgoing provider call.
///
/// Headers and query values may carry credentials, so only `describe()` is
/// ever logged.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    /// Method and URL without query string or headers.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Raw HTTP outcome before classification.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Connection-level failure: timeout, refused connection, broken body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The network boundary. Swapped for a scripted transport in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport shared by all provider clients.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(format!("request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read body: {}", e)))?;

        Ok(TransportResponse { status, body })
    }
}

/// 429 and 5xx are worth another attempt; other statuses are final.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Retry behaviour shared by every provider client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    pub retryable: fn(u16) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            retryable: is_transient_status,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Terminal failure of one provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("{provider} returned status {status} after {attempts} attempt(s): {body}")]
    Status {
        provider: Provider,
        status: u16,
        attempts: u32,
        body: String,
    },
    #[error("{provider} request failed after {attempts} attempt(s): {message}")]
    Network {
        provider: Provider,
        attempts: u32,
        message: String,
    },
    #[error("failed to parse {provider} response: {message}")]
    Decode { provider: Provider, message: String },
}

impl ApiError {
    pub fn provider(&self) -> Provider {
        match self {
            ApiError::Status { provider, .. }
            | ApiError::Network { provider, .. }
            | ApiError::Decode { provider, .. } => *provider,
        }
    }

    /// Tag for the failed-row log. Every terminal failure has one.
    pub fn tag(&self) -> ApiErrorTag {
        let code = match self {
            ApiError::Status { status, .. } => FailureCode::Http(*status),
            ApiError::Network { .. } => FailureCode::Network,
            ApiError::Decode { .. } => FailureCode::Decode,
        };
        ApiErrorTag {
            provider: self.provider(),
            code,
        }
    }
}

/// Rate-limited, retrying client for one provider.
#[derive(Clone)]
pub struct ApiClient {
    provider: Provider,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        provider: Provider,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            transport,
            limiter,
            policy,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Performs the call, taking a rate-limit slot before every attempt.
    ///
    /// 2xx responses are parsed as JSON (an empty body yields `Value::Null`).
    /// Transient statuses and network errors are retried with exponential
    /// backoff; any other status fails at once.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let mut attempts: u32 = 0;

        loop {
            self.limiter.acquire().await;
            attempts += 1;

            let failure = match self.transport.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    if attempts > 1 {
                        tracing::info!(
                            "{}: {} succeeded after {} attempts",
                            self.provider,
                            request.describe(),
                            attempts
                        );
                    }
                    return parse_body(self.provider, &response.body);
                }
                Ok(response) => {
                    let error = ApiError::Status {
                        provider: self.provider,
                        status: response.status,
                        attempts,
                        body: truncate(&response.body, 200),
                    };
                    if !(self.policy.retryable)(response.status) {
                        tracing::warn!(
                            "{}: {} failed with non-retryable status {}",
                            self.provider,
                            request.describe(),
                            response.status
                        );
                        return Err(error);
                    }
                    error
                }
                Err(e) => ApiError::Network {
                    provider: self.provider,
                    attempts,
                    message: e.0,
                },
            };

            if attempts > self.policy.max_retries {
                tracing::error!(
                    "{}: {} giving up after {} attempts: {}",
                    self.provider,
                    request.describe(),
                    attempts,
                    failure
                );
                return Err(failure);
            }

            let delay = self.policy.delay_for(attempts);
            tracing::warn!(
                "{}: {} attempt {} failed ({}); retrying after {:?}",
                self.provider,
                request.describe(),
                attempts,
                failure,
                delay
            );
            sleep(delay).await;
        }
    }
}

fn parse_body(provider: Provider, body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| ApiError::Decode {
        provider,
        message: e.to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
