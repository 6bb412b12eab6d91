//! Backend Adapters
//!
//! One adapter per backend endpoint family. The engine is written once
//! against [`OperationAdapter`] and never sees endpoint paths or payload
//! encodings.

pub mod http;

pub use http::{CredentialProvider, EndpointSet, EnvCredentials, HttpAdapter, StaticCredentials};

use async_trait::async_trait;

use super::error::TransportError;
use super::types::{BackendResponse, IdempotencyKey, OperationId, Payload};

/// Capability interface for one operation family.
///
/// `submit` MUST forward the idempotency key so the backend can deduplicate
/// resends of the same attempt.
#[async_trait]
pub trait OperationAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Initiate the operation
    async fn submit(
        &self,
        payload: &Payload,
        idempotency_key: &IdempotencyKey,
    ) -> Result<BackendResponse, TransportError>;

    /// Query current status of a submitted operation
    async fn check_status(&self, id: &OperationId) -> Result<BackendResponse, TransportError>;
}

/// Scripted in-memory adapter for tests and local runs
#[cfg(any(test, feature = "mock-backend"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tokio::sync::Semaphore;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub struct MockAdapter {
        name: &'static str,
        submit_count: AtomicUsize,
        status_count: AtomicUsize,
        /// Keys seen by submit, in call order
        submitted_keys: Mutex<Vec<IdempotencyKey>>,
        /// Scripted submit responses; falls back to `default_submit`
        submit_script: Mutex<VecDeque<Result<BackendResponse, TransportError>>>,
        default_submit: Mutex<Result<BackendResponse, TransportError>>,
        /// Scripted status responses; falls back to `default_status`
        status_script: Mutex<VecDeque<Result<BackendResponse, TransportError>>>,
        default_status: Mutex<Result<BackendResponse, TransportError>>,
        /// When set, each check_status waits for one permit
        status_gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl MockAdapter {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                submit_count: AtomicUsize::new(0),
                status_count: AtomicUsize::new(0),
                submitted_keys: Mutex::new(Vec::new()),
                submit_script: Mutex::new(VecDeque::new()),
                default_submit: Mutex::new(Ok(BackendResponse::ok("op-1", "PENDING"))),
                status_script: Mutex::new(VecDeque::new()),
                default_status: Mutex::new(Ok(BackendResponse::ok("op-1", "PENDING"))),
                status_gate: Mutex::new(None),
            }
        }

        pub fn set_submit_response(&self, resp: Result<BackendResponse, TransportError>) {
            *lock(&self.default_submit) = resp;
        }

        pub fn push_submit_response(&self, resp: Result<BackendResponse, TransportError>) {
            lock(&self.submit_script).push_back(resp);
        }

        pub fn set_status_response(&self, resp: Result<BackendResponse, TransportError>) {
            *lock(&self.default_status) = resp;
        }

        pub fn push_status_response(&self, resp: Result<BackendResponse, TransportError>) {
            lock(&self.status_script).push_back(resp);
        }

        /// Block status checks until permits are added to the returned gate.
        pub fn gate_status(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *lock(&self.status_gate) = Some(gate.clone());
            gate
        }

        pub fn submit_count(&self) -> usize {
            self.submit_count.load(Ordering::SeqCst)
        }

        pub fn status_count(&self) -> usize {
            self.status_count.load(Ordering::SeqCst)
        }

        pub fn submitted_keys(&self) -> Vec<IdempotencyKey> {
            lock(&self.submitted_keys).clone()
        }
    }

    #[async_trait]
    impl OperationAdapter for MockAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn submit(
            &self,
            _payload: &Payload,
            idempotency_key: &IdempotencyKey,
        ) -> Result<BackendResponse, TransportError> {
            self.submit_count.fetch_add(1, Ordering::SeqCst);
            lock(&self.submitted_keys).push(idempotency_key.clone());
            // Yield so concurrent callers can interleave
            tokio::task::yield_now().await;

            let scripted = lock(&self.submit_script).pop_front();
            scripted.unwrap_or_else(|| lock(&self.default_submit).clone())
        }

        async fn check_status(&self, _id: &OperationId) -> Result<BackendResponse, TransportError> {
            self.status_count.fetch_add(1, Ordering::SeqCst);

            let gate = lock(&self.status_gate).clone();
            if let Some(gate) = gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }

            let scripted = lock(&self.status_script).pop_front();
            scripted.unwrap_or_else(|| lock(&self.default_status).clone())
        }
    }

}

#[cfg(any(test, feature = "mock-backend"))]
pub use mock::MockAdapter;
