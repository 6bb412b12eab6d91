//! HTTP Adapter
//!
//! JSON-over-HTTP adapter for the wallet backend. The three operation
//! families differ only in their endpoint table.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::OperationAdapter;
use crate::lifecycle::error::TransportError;
use crate::lifecycle::types::{BackendResponse, IdempotencyKey, OperationId, OperationKind, Payload};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Source of the session token attached to outgoing requests.
///
/// The engine never stores credentials; it asks on every request.
pub trait CredentialProvider: Send + Sync {
    fn session_token(&self) -> Option<String>;
}

/// Reads the token from an environment variable at request time
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn session_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Option<String>);

impl CredentialProvider for StaticCredentials {
    fn session_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Endpoint paths for one operation family.
///
/// `status` contains `{id}`, replaced by the operation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    pub name: &'static str,
    pub submit: &'static str,
    pub status: &'static str,
}

impl EndpointSet {
    pub const INTERNAL_TRANSFER: EndpointSet = EndpointSet {
        name: "internal_transfer",
        submit: "/transfers/internal",
        status: "/transfers/internal/{id}/status",
    };

    pub const EXTERNAL_WITHDRAWAL: EndpointSet = EndpointSet {
        name: "external_withdrawal",
        submit: "/withdrawals/crypto",
        status: "/withdrawals/crypto/{id}/status",
    };

    pub const FIAT_WITHDRAWAL: EndpointSet = EndpointSet {
        name: "fiat_withdrawal",
        submit: "/withdrawals/fiat",
        status: "/withdrawals/fiat/{id}/status",
    };

    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::InternalTransfer => Self::INTERNAL_TRANSFER,
            OperationKind::ExternalWithdrawal => Self::EXTERNAL_WITHDRAWAL,
            OperationKind::FiatWithdrawal => Self::FIAT_WITHDRAWAL,
        }
    }

    fn status_path(&self, id: &OperationId) -> String {
        self.status.replace("{id}", id.as_str())
    }
}

pub struct HttpAdapter {
    client: reqwest::Client,
    base_url: String,
    endpoints: EndpointSet,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpAdapter {
    pub fn new(
        base_url: impl Into<String>,
        endpoints: EndpointSet,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(
            adapter = endpoints.name,
            base_url = %base_url,
            timeout_ms = timeout.as_millis() as u64,
            "Initializing HTTP adapter"
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            endpoints,
            credentials,
        })
    }

    /// Adapter for one of the three known operation families
    pub fn for_kind(
        kind: OperationKind,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::new(base_url, EndpointSet::for_kind(kind), credentials, timeout)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.session_token() {
            Some(token) => req.bearer_auth(token),
            None => {
                debug!(adapter = self.endpoints.name, "No session token available");
                req
            }
        }
    }

    /// Decode the envelope. Error envelopes on 4xx/5xx are still envelopes;
    /// only bodies that do not decode are transport failures.
    async fn decode(&self, resp: reqwest::Response) -> Result<BackendResponse, TransportError> {
        let status = resp.status();
        let body = resp.text().await?;

        match serde_json::from_str::<BackendResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(e) if status.is_success() => Err(TransportError::Decode(e.to_string())),
            Err(_) => match bare_error(&body) {
                Some(envelope) => {
                    debug!(
                        adapter = self.endpoints.name,
                        status = status.as_u16(),
                        "Error body without envelope, using its message"
                    );
                    Ok(envelope)
                }
                None => {
                    warn!(
                        adapter = self.endpoints.name,
                        status = status.as_u16(),
                        "Non-envelope error response"
                    );
                    Err(TransportError::Http {
                        status: status.as_u16(),
                        body: truncate(&body, 512),
                    })
                }
            },
        }
    }
}

/// A JSON error body carrying `message` and/or `error` (or `code`) without
/// the `success` envelope, read as a failed envelope.
fn bare_error(body: &str) -> Option<BackendResponse> {
    let Value::Object(map) = serde_json::from_str::<Value>(body).ok()? else {
        return None;
    };
    let text = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let message = text("message");
    let error = text("error").or_else(|| text("code"));
    if message.is_none() && error.is_none() {
        return None;
    }
    Some(BackendResponse {
        success: false,
        data: None,
        error,
        message,
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[async_trait]
impl OperationAdapter for HttpAdapter {
    fn name(&self) -> &'static str {
        self.endpoints.name
    }

    async fn submit(
        &self,
        payload: &Payload,
        idempotency_key: &IdempotencyKey,
    ) -> Result<BackendResponse, TransportError> {
        let url = format!("{}{}", self.base_url, self.endpoints.submit);
        debug!(adapter = self.endpoints.name, url = %url, key = %idempotency_key, "POST submit");

        let req = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key.as_str())
            .json(payload);
        let resp = self.authorized(req).send().await?;

        if resp.status() == StatusCode::NO_CONTENT {
            return Err(TransportError::NoResponse("empty submit response".to_string()));
        }
        self.decode(resp).await
    }

    async fn check_status(&self, id: &OperationId) -> Result<BackendResponse, TransportError> {
        let url = format!("{}{}", self.base_url, self.endpoints.status_path(id));
        debug!(adapter = self.endpoints.name, url = %url, "GET status");

        let resp = self.authorized(self.client.get(&url)).send().await?;
        self.decode(resp).await
    }
}
