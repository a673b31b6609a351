//! Generic webhook provider.
//!
//! Sends a JSON envelope `{provider, destination, payload}` to a configured
//! URL and reads the receipt id from the response body.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{Provider, ProviderError};
use crate::error::{Result, RouterError};
use crate::message::{Destination, Payload, ProviderId};

/// Webhook provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint URL.
    pub url: String,
    /// HTTP method, `POST` or `PUT` (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub auth: Option<WebhookAuth>,
    /// JSON field of the response body holding the receipt id.
    #[serde(default = "default_receipt_field")]
    pub receipt_field: String,
    /// Client-side request timeout in seconds, at least 1. The router's
    /// per-attempt timeout normally fires first.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_receipt_field() -> String {
    "id".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: Vec::new(),
            auth: None,
            receipt_field: default_receipt_field(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Authentication applied to every webhook request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// HTTP basic auth.
    Basic { username: String, password: String },
    /// Arbitrary header carrying a key.
    Header { name: String, value: String },
}

/// Provider delivering through an HTTP endpoint.
pub struct WebhookProvider {
    id: ProviderId,
    config: WebhookConfig,
    headers: HeaderMap,
    client: Client,
}

impl WebhookProvider {
    pub fn new(id: ProviderId, config: WebhookConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(RouterError::invalid_provider(id.as_str(), "webhook url is empty"));
        }
        reqwest::Url::parse(&config.url).map_err(|e| {
            RouterError::invalid_provider(id.as_str(), format!("invalid webhook url: {e}"))
        })?;
        if !matches!(config.method.to_uppercase().as_str(), "POST" | "PUT") {
            return Err(RouterError::invalid_provider(
                id.as_str(),
                format!("unsupported method `{}`", config.method),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(RouterError::invalid_provider(
                id.as_str(),
                "timeout_secs must be greater than 0",
            ));
        }

        let headers = build_headers(&config).map_err(|e| RouterError::invalid_provider(id.as_str(), e))?;
        install_rustls_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                RouterError::invalid_provider(id.as_str(), format!("failed to build client: {e}"))
            })?;

        Ok(Self {
            id,
            config,
            headers,
            client,
        })
    }

    fn build_payload(&self, destination: &Destination, payload: &Payload) -> serde_json::Value {
        json!({
            "provider": self.id.as_str(),
            "destination": destination.as_str(),
            "payload": payload,
        })
    }
}

/// reqwest is built without a bundled crypto provider; install one per process.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(existing) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?existing, "rustls CryptoProvider already installed");
        }
    });
}

fn build_headers(config: &WebhookConfig) -> std::result::Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    for (name, value) in &config.headers {
        let name = name
            .parse::<HeaderName>()
            .map_err(|e| format!("invalid header name `{name}`: {e}"))?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|e| format!("invalid header value for `{name}`: {e}"))?;
        headers.insert(name, value);
    }

    match &config.auth {
        Some(WebhookAuth::Bearer { token }) => {
            let value = format!("Bearer {token}")
                .parse::<HeaderValue>()
                .map_err(|e| format!("invalid bearer token: {e}"))?;
            headers.insert(AUTHORIZATION, value);
        }
        Some(WebhookAuth::Header { name, value }) => {
            let name = name
                .parse::<HeaderName>()
                .map_err(|e| format!("invalid auth header name `{name}`: {e}"))?;
            let value = value
                .parse::<HeaderValue>()
                .map_err(|e| format!("invalid auth header value: {e}"))?;
            headers.insert(name, value);
        }
        // Applied on the request builder.
        Some(WebhookAuth::Basic { .. }) | None => {}
    }

    Ok(headers)
}

/// Map a non-success HTTP status onto the provider error vocabulary.
///
/// Client errors are permanent, except request timeouts and vendor-side
/// throttling which may succeed later.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let reason = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        ProviderError::rejected(reason)
    } else {
        ProviderError::transport(reason)
    }
}

/// Receipt for an accepted delivery. Vendors answering without a receipt
/// field (204, plain-text acks) get a locally generated id.
fn receipt_for(body: &str, field: &str) -> String {
    extract_receipt(body, field).unwrap_or_else(|| {
        debug!(field, "response carries no receipt, generating one");
        uuid::Uuid::new_v4().to_string()
    })
}

/// Pull the receipt id out of a response body, if it has one.
fn extract_receipt(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: &Payload,
    ) -> std::result::Result<String, ProviderError> {
        let body = self.build_payload(destination, payload);

        let mut request = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&self.config.url),
            _ => self.client.post(&self.config.url),
        };
        request = request.headers(self.headers.clone()).json(&body);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("webhook request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ProviderError::transport(format!("failed to read webhook response: {e}"))
        })?;

        if !status.is_success() {
            warn!(provider = %self.id, %status, "webhook delivery failed");
            return Err(classify_status(status, &text));
        }

        let receipt = receipt_for(&text, &self.config.receipt_field);
        debug!(provider = %self.id, receipt = %receipt, "webhook delivery accepted");
        Ok(receipt)
    }
}
