//! Operation State Definitions
//!
//! ```text
//! UNSUBMITTED → SUBMITTING → PENDING → SUCCESSFUL
//!                   │           ↓
//!                   ├──────→ FAILED
//!                   └──────→ SUCCESSFUL (synchronous resolution)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-visible lifecycle state of an operation.
///
/// Terminal states: SUCCESSFUL, FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Built locally, nothing sent yet
    Unsubmitted,
    /// Initiating call in flight
    Submitting,
    /// Accepted by the backend, awaiting resolution
    Pending,
    /// Terminal: backend reports completion
    Successful,
    /// Terminal: backend reports failure, or the submission was rejected
    Failed,
}

impl OperationStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Successful | OperationStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Staying in the same non-terminal state is allowed (a poll tick that
    /// reports PENDING again).
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        match (self, next) {
            (Unsubmitted, Submitting) => true,
            (Submitting, Pending | Successful | Failed) => true,
            (Pending, Pending | Successful | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Unsubmitted => "UNSUBMITTED",
            OperationStatus::Submitting => "SUBMITTING",
            OperationStatus::Pending => "PENDING",
            OperationStatus::Successful => "SUCCESSFUL",
            OperationStatus::Failed => "FAILED",
        }
    }

    /// Short label for display surfaces.
    pub fn status_text(&self) -> &'static str {
        match self {
            OperationStatus::Unsubmitted => "Ready",
            OperationStatus::Submitting => "Submitting",
            OperationStatus::Pending => "Processing",
            OperationStatus::Successful => "Completed",
            OperationStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status string as reported by a backend, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Known(OperationStatus),
    /// Anything we do not recognize. The engine holds at PENDING.
    Unrecognized(String),
}

impl BackendStatus {
    /// Parse a backend status string (case-insensitive).
    ///
    /// Backends disagree on vocabulary, so several synonyms map to each state.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "PROCESSING" | "INITIATED" | "IN_PROGRESS" | "QUEUED" => {
                BackendStatus::Known(OperationStatus::Pending)
            }
            "SUCCESSFUL" | "SUCCESS" | "COMPLETED" | "COMPLETE" => {
                BackendStatus::Known(OperationStatus::Successful)
            }
            "FAILED" | "FAILURE" | "REJECTED" | "CANCELLED" | "REVERSED" => {
                BackendStatus::Known(OperationStatus::Failed)
            }
            _ => BackendStatus::Unrecognized(raw.to_string()),
        }
    }

    /// The state the engine should move to for this report.
    pub fn effective(&self) -> OperationStatus {
        match self {
            BackendStatus::Known(s) => *s,
            BackendStatus::Unrecognized(_) => OperationStatus::Pending,
        }
    }
}
