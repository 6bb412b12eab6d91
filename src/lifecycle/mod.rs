//! Operation Lifecycle Engine
//!
//! Drives wallet money-movement operations (internal transfers, crypto
//! withdrawals, fiat withdrawals) from validation through submission and
//! status polling to a terminal outcome, and turns backend failures into
//! actionable errors.
//!
//! # Architecture
//!
//! - **Validator**: pure payload checks, no network
//! - **Submitter**: one in-flight request per idempotency key
//! - **StatusPoller**: one timer per operation id, self-stopping on terminal
//! - **ActiveOperationRegistry**: shared in-memory index with periodic refresh
//! - **Classifier**: ordered rule table from raw backend errors to
//!   [`ErrorKind`] + [`RequiredAction`]
//!
//! Endpoint differences live entirely in [`adapters`].
//!
//! # State Machine
//!
//! ```text
//! UNSUBMITTED → SUBMITTING → PENDING ⟲ → SUCCESSFUL
//!                    │           ↓
//!                    ├──────→ FAILED
//!                    └──────→ SUCCESSFUL
//! ```
//!
//! # Invariants
//!
//! 1. **Forward Only**: a terminal status is never left
//! 2. **One Timer Per Id**: `start_polling` twice never doubles the rate
//! 3. **Stop Wins**: a response arriving after `stop_polling` is discarded
//! 4. **Same Attempt, Same Key**: retries of one attempt reuse its idempotency key

pub mod adapters;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod poller;
pub mod registry;
pub mod state;
pub mod submitter;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use adapters::{CredentialProvider, EnvCredentials, HttpAdapter, OperationAdapter, StaticCredentials};
pub use classifier::{classify, classify_transport};
pub use engine::{EngineConfig, EngineState, OperationEngine};
pub use error::{ClassifiedError, ErrorKind, RequiredAction, TransportError};
pub use poller::{PollHandle, StatusPoller};
pub use registry::ActiveOperationRegistry;
pub use state::{BackendStatus, OperationStatus};
pub use types::{
    BackendResponse, IdempotencyKey, Operation, OperationId, OperationKind, Payload, RawError,
};
pub use validation::{AmountBounds, ValidationRules, Validator};
