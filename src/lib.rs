//! op_lifecycle - Wallet Operation Lifecycle Engine
//!
//! Client-side tracking for money-movement operations against an
//! asynchronous wallet backend.
//!
//! # Modules
//!
//! - [`lifecycle`] - Validation, submission, polling, error classification
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod lifecycle;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use lifecycle::{
    ActiveOperationRegistry, ClassifiedError, EngineConfig, EngineState, ErrorKind,
    IdempotencyKey, Operation, OperationEngine, OperationId, OperationKind, OperationStatus,
    Payload, RequiredAction,
};
