//! Lifecycle Core Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::ClassifiedError;
use super::state::OperationStatus;

/// Caller-supplied operation payload. Opaque to everything but the validator.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Polling never runs faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Server-assigned operation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client-generated key identifying one logical submission attempt.
///
/// ULID-based: sortable and unique without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh key for a new attempt
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Wrap a key the caller already holds (e.g. restored from UI state)
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Money-movement families tracked by the engine. A label only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    InternalTransfer,
    ExternalWithdrawal,
    FiatWithdrawal,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::InternalTransfer => "internal_transfer",
            OperationKind::ExternalWithdrawal => "external_withdrawal",
            OperationKind::FiatWithdrawal => "fiat_withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "internal_transfer" | "internal" | "transfer" => Some(OperationKind::InternalTransfer),
            "external_withdrawal" | "crypto_withdrawal" | "external" => {
                Some(OperationKind::ExternalWithdrawal)
            }
            "fiat_withdrawal" | "fiat" | "bank_withdrawal" => Some(OperationKind::FiatWithdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a requested poll interval to [`MIN_POLL_INTERVAL`].
pub fn clamp_poll_interval(requested: Duration) -> Duration {
    if requested < MIN_POLL_INTERVAL {
        tracing::warn!(
            requested_ms = requested.as_millis() as u64,
            floor_ms = MIN_POLL_INTERVAL.as_millis() as u64,
            "Poll interval below floor, clamping"
        );
        MIN_POLL_INTERVAL
    } else {
        requested
    }
}

/// One tracked money-movement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Option<OperationId>,
    pub idempotency_key: IdempotencyKey,
    pub kind: OperationKind,
    pub payload: Payload,
    pub status: OperationStatus,
    pub last_error: Option<ClassifiedError>,
    /// Last status string the engine could not map
    pub last_raw_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Operation {
    /// New operation entering SUBMITTING.
    pub fn submitting(
        kind: OperationKind,
        payload: Payload,
        idempotency_key: IdempotencyKey,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: None,
            idempotency_key,
            kind,
            payload,
            status: OperationStatus::Submitting,
            last_error: None,
            last_raw_status: None,
            created_at: Utc::now(),
            last_polled_at: None,
            poll_interval: clamp_poll_interval(poll_interval),
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a forward transition. Returns false (and leaves the status
    /// untouched) when the move is not allowed.
    pub fn transition(&mut self, next: OperationStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Record a poll time; never moves backwards.
    pub fn mark_polled(&mut self, at: DateTime<Utc>) {
        self.last_polled_at = Some(match self.last_polled_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }
}

/// `data` section of a backend envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendData {
    #[serde(default, alias = "id", alias = "reference")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response envelope shared by submit and status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<BackendData>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl BackendResponse {
    pub fn ok(operation_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(BackendData {
                operation_id: Some(operation_id.into()),
                status: Some(status.into()),
            }),
            error: None,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.operation_id.as_deref())
    }

    pub fn status(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.status.as_deref())
    }

    /// Error fields as classifier input
    pub fn raw_error(&self) -> RawError {
        RawError {
            code: self.error.clone(),
            message: self.message.clone(),
        }
    }
}

/// Unclassified backend error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl RawError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
