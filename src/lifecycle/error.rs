//! Lifecycle Error Types
//!
//! Every failure surfaced to callers is a [`ClassifiedError`]. Raw backend
//! strings and transport failures are normalized before they leave the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    /// PIN or 2FA entered incorrectly
    AuthCredential,
    /// PIN or 2FA not configured on the account
    AuthSetupRequired,
    InsufficientBalance,
    LimitExceeded,
    Network,
    Duplicate,
    ServiceUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::AuthCredential => "AUTH_CREDENTIAL",
            ErrorKind::AuthSetupRequired => "AUTH_SETUP_REQUIRED",
            ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorKind::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Remediation the UI must offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RequiredAction {
    SetupTwoFactor,
    SetupPin,
    RetryPin,
    RetryTwoFactor,
    #[default]
    None,
}

impl RequiredAction {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, RequiredAction::None)
    }
}

/// A backend or local failure normalized into the taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {original_message}")]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub required_action: RequiredAction,
    /// Untouched backend text. Diagnostic only.
    pub original_message: String,
    /// Field-level messages for locally raised validation errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        required_action: RequiredAction,
        original_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            required_action,
            original_message: original_message.into(),
            details: Vec::new(),
        }
    }

    /// Local validation failure carrying every failed rule.
    pub fn validation(details: Vec<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            required_action: RequiredAction::None,
            original_message: details.join("; "),
            details,
        }
    }

    pub fn missing_id() -> Self {
        Self::validation(vec!["Operation id is required".to_string()])
    }

    /// Error code for API responses and logs
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Primary message for display. Never the raw backend text when an
    /// action is required.
    pub fn user_message(&self) -> String {
        match self.required_action {
            RequiredAction::SetupTwoFactor => {
                return "Set up two-factor authentication to continue.".to_string();
            }
            RequiredAction::SetupPin => {
                return "Create a transaction PIN to continue.".to_string();
            }
            RequiredAction::RetryPin => {
                return "The PIN you entered is incorrect. Please try again.".to_string();
            }
            RequiredAction::RetryTwoFactor => {
                return "The two-factor code is incorrect. Please try again.".to_string();
            }
            RequiredAction::None => {}
        }
        match self.kind {
            ErrorKind::Validation if !self.details.is_empty() => self.details.join("\n"),
            ErrorKind::Validation => "Please check the details and try again.".to_string(),
            ErrorKind::InsufficientBalance => "Insufficient balance for this transaction.".into(),
            ErrorKind::LimitExceeded => "This amount exceeds your transaction limit.".into(),
            ErrorKind::Network => "Network error. Check your connection and retry.".into(),
            ErrorKind::Duplicate => "A similar transaction is already being processed.".into(),
            ErrorKind::ServiceUnavailable => {
                "The service is temporarily unavailable. Please retry shortly.".into()
            }
            ErrorKind::AuthCredential | ErrorKind::AuthSetupRequired | ErrorKind::Unknown => {
                "Something went wrong. Please try again.".into()
            }
        }
    }
}

/// Failures where no usable response came back from the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no response from backend: {0}")]
    NoResponse(String),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Connect(_) => "CONNECT",
            TransportError::Timeout => "TIMEOUT",
            TransportError::Http { .. } => "HTTP",
            TransportError::Decode(_) => "DECODE",
            TransportError::NoResponse(_) => "NO_RESPONSE",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            TransportError::NoResponse(e.to_string())
        }
    }
}
