//! Error Classifier
//!
//! Maps free-text backend errors onto [`ErrorKind`] + [`RequiredAction`].
//!
//! Rules are evaluated top to bottom and the first match wins. Specific
//! phrases must sit above the generic ones that also match them ("password
//! pin is invalid" satisfies the catch-all "invalid" rule too), so the table
//! order is the contract.

use super::error::{ClassifiedError, ErrorKind, RequiredAction, TransportError};
use super::types::RawError;

/// One row of the classification table.
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
    pub kind: ErrorKind,
    pub action: RequiredAction,
}

fn mentions_two_factor(s: &str) -> bool {
    s.contains("two-factor")
        || s.contains("two factor")
        || s.contains("2fa")
        || s.contains("twofactor")
}

fn mentions_pin(s: &str) -> bool {
    s.contains("password pin") || s.contains("transaction pin")
}

fn not_configured(s: &str) -> bool {
    s.contains("not set up")
        || s.contains("not setup")
        || s.contains("not been set up")
        || s.contains("not enabled")
        || s.contains("not configured")
}

fn wrong(s: &str) -> bool {
    s.contains("invalid") || s.contains("incorrect")
}

/// Ordered classification table.
pub static RULES: &[Rule] = &[
    Rule {
        name: "two_factor_not_set_up",
        matches: |s| mentions_two_factor(s) && not_configured(s),
        kind: ErrorKind::AuthSetupRequired,
        action: RequiredAction::SetupTwoFactor,
    },
    Rule {
        name: "pin_not_set_up",
        matches: |s| mentions_pin(s) && not_configured(s),
        kind: ErrorKind::AuthSetupRequired,
        action: RequiredAction::SetupPin,
    },
    Rule {
        name: "pin_invalid",
        matches: |s| mentions_pin(s) && wrong(s),
        kind: ErrorKind::AuthCredential,
        action: RequiredAction::RetryPin,
    },
    Rule {
        name: "two_factor_invalid",
        matches: |s| mentions_two_factor(s) && wrong(s),
        kind: ErrorKind::AuthCredential,
        action: RequiredAction::RetryTwoFactor,
    },
    Rule {
        name: "insufficient_balance",
        matches: |s| s.contains("insufficient balance") || s.contains("insufficient funds"),
        kind: ErrorKind::InsufficientBalance,
        action: RequiredAction::None,
    },
    Rule {
        name: "limit_exceeded",
        matches: |s| s.contains("limit exceeded") || s.contains("daily limit"),
        kind: ErrorKind::LimitExceeded,
        action: RequiredAction::None,
    },
    Rule {
        name: "network",
        matches: |s| s.contains("network") || s.contains("connection"),
        kind: ErrorKind::Network,
        action: RequiredAction::None,
    },
    Rule {
        name: "duplicate",
        matches: |s| s.contains("duplicate") || s.contains("pending"),
        kind: ErrorKind::Duplicate,
        action: RequiredAction::None,
    },
    Rule {
        name: "validation",
        matches: |s| s.contains("validation") || s.contains("invalid"),
        kind: ErrorKind::Validation,
        action: RequiredAction::None,
    },
];

/// Classify a backend error. Never panics; empty input is `Unknown`.
pub fn classify(raw: &RawError) -> ClassifiedError {
    let original = raw
        .message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .or(raw.code.as_deref())
        .unwrap_or_default()
        .to_string();

    let haystack = [raw.message.as_deref(), raw.code.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if haystack.trim().is_empty() {
        return ClassifiedError::new(ErrorKind::Unknown, RequiredAction::None, original);
    }

    match RULES.iter().find(|rule| (rule.matches)(&haystack)) {
        Some(rule) => {
            tracing::debug!(rule = rule.name, kind = %rule.kind, "Error classified");
            ClassifiedError::new(rule.kind, rule.action, original)
        }
        None => ClassifiedError::new(ErrorKind::Unknown, RequiredAction::None, original),
    }
}

/// Classify a failure where the backend never produced a usable envelope.
///
/// Connection-level failures are `Network`; everything else that left us
/// without a response is `ServiceUnavailable`.
pub fn classify_transport(err: &TransportError) -> ClassifiedError {
    let kind = match err {
        TransportError::Connect(_) | TransportError::Timeout => ErrorKind::Network,
        TransportError::Http { status, .. } if *status < 500 => ErrorKind::Unknown,
        TransportError::Http { .. } | TransportError::NoResponse(_) => {
            ErrorKind::ServiceUnavailable
        }
        TransportError::Decode(_) => ErrorKind::Unknown,
    };
    ClassifiedError::new(kind, RequiredAction::None, err.to_string())
}
