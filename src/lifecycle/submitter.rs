//! Operation Submitter
//!
//! Sends the initiating request for one operation family.
//!
//! # Idempotency
//!
//! Each idempotency key owns an async slot. Concurrent submits with the same
//! key queue on that slot, so only one request per key is ever in flight.
//! Once a key has produced an accepted operation, later submits with that
//! key return the recorded operation without touching the network. A key
//! whose request failed stays open; retrying it resends with the same key
//! and relies on the backend to deduplicate.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::adapters::OperationAdapter;
use super::classifier::{classify, classify_transport};
use super::error::{ClassifiedError, ErrorKind, RequiredAction};
use super::registry::ActiveOperationRegistry;
use super::state::{BackendStatus, OperationStatus};
use super::types::{BackendResponse, IdempotencyKey, Operation, OperationId, OperationKind, Payload};
use super::validation::Validator;

type AttemptSlot = Arc<AsyncMutex<Option<Operation>>>;

pub struct Submitter {
    kind: OperationKind,
    validator: Validator,
    adapter: Arc<dyn OperationAdapter>,
    registry: Arc<ActiveOperationRegistry>,
    poll_interval: Duration,
    attempts: DashMap<IdempotencyKey, AttemptSlot>,
}

impl Submitter {
    pub fn new(
        kind: OperationKind,
        validator: Validator,
        adapter: Arc<dyn OperationAdapter>,
        registry: Arc<ActiveOperationRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kind,
            validator,
            adapter,
            registry,
            poll_interval,
            attempts: DashMap::new(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn validate(&self, payload: &Payload) -> Vec<String> {
        self.validator.validate(payload)
    }

    pub fn adapter(&self) -> &Arc<dyn OperationAdapter> {
        &self.adapter
    }

    /// Validate, send, and register.
    pub async fn submit(
        &self,
        payload: Payload,
        idempotency_key: IdempotencyKey,
    ) -> Result<Operation, ClassifiedError> {
        let errors = self.validator.validate(&payload);
        if !errors.is_empty() {
            debug!(kind = %self.kind, errors = ?errors, "Submission rejected by validation");
            return Err(ClassifiedError::validation(errors));
        }

        let slot = self
            .attempts
            .entry(idempotency_key.clone())
            .or_default()
            .clone();
        let mut accepted = slot.lock().await;

        if let Some(existing) = accepted.as_ref() {
            info!(
                kind = %self.kind,
                key = %idempotency_key,
                op_id = ?existing.id,
                "Resend of an accepted attempt, returning recorded operation"
            );
            let latest = existing
                .id
                .as_ref()
                .and_then(|id| self.registry.get(id))
                .unwrap_or_else(|| existing.clone());
            return Ok(latest);
        }

        let mut op = Operation::submitting(
            self.kind,
            payload,
            idempotency_key.clone(),
            self.poll_interval,
        );

        let result = self.adapter.submit(&op.payload, &idempotency_key).await;
        let response = match result {
            Ok(resp) => resp,
            Err(transport) => {
                let err = classify_transport(&transport);
                warn!(
                    adapter = self.adapter.name(),
                    key = %idempotency_key,
                    error = %transport,
                    kind = %err.kind,
                    "Submission transport failure"
                );
                return Err(err);
            }
        };

        if !response.success {
            let err = classify(&response.raw_error());
            info!(
                adapter = self.adapter.name(),
                key = %idempotency_key,
                kind = %err.kind,
                action = ?err.required_action,
                "Submission rejected by backend"
            );
            return Err(err);
        }

        seed_from_response(&mut op, &response)?;

        info!(
            adapter = self.adapter.name(),
            op_id = ?op.id,
            status = %op.status,
            key = %idempotency_key,
            "Operation submitted"
        );

        self.registry.upsert(op.clone());
        *accepted = Some(op.clone());
        Ok(op)
    }

    /// Release the slot for a key whose attempt is finished.
    pub fn forget(&self, idempotency_key: &IdempotencyKey) {
        self.attempts.remove(idempotency_key);
    }

    pub fn tracked_attempts(&self) -> usize {
        self.attempts.len()
    }
}

/// Move a SUBMITTING operation to the state reported by a successful
/// submit envelope.
fn seed_from_response(op: &mut Operation, response: &BackendResponse) -> Result<(), ClassifiedError> {
    let Some(id) = response.operation_id().filter(|id| !id.is_empty()) else {
        warn!(key = %op.idempotency_key, "Submit succeeded without an operation id");
        return Err(ClassifiedError::new(
            ErrorKind::Unknown,
            RequiredAction::None,
            response
                .message
                .clone()
                .unwrap_or_else(|| "Backend accepted the request without an operation id".into()),
        ));
    };
    op.id = Some(OperationId::new(id));

    // No status means the backend accepted it for asynchronous processing
    let reported = response
        .status()
        .map(BackendStatus::parse)
        .unwrap_or(BackendStatus::Known(OperationStatus::Pending));
    if let BackendStatus::Unrecognized(raw) = &reported {
        warn!(op_id = id, raw_status = %raw, "Unrecognized status on submit, holding at PENDING");
        op.last_raw_status = Some(raw.clone());
    }

    let next = reported.effective();
    op.transition(next);
    if next == OperationStatus::Failed {
        op.last_error = Some(failure_reason(response));
    }
    Ok(())
}

/// Error recorded on an operation the backend reports as FAILED.
pub(crate) fn failure_reason(response: &BackendResponse) -> ClassifiedError {
    let raw = response.raw_error();
    if raw.message.is_none() && raw.code.is_none() {
        ClassifiedError::new(ErrorKind::Unknown, RequiredAction::None, "Operation failed")
    } else {
        classify(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::adapters::MockAdapter;
    use crate::lifecycle::error::TransportError;
    use crate::lifecycle::validation::{AmountBounds, ValidationRules};
    use serde_json::json;

    fn harness() -> (Submitter, Arc<MockAdapter>, Arc<ActiveOperationRegistry>) {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let registry = Arc::new(ActiveOperationRegistry::new());
        let submitter = Submitter::new(
            OperationKind::InternalTransfer,
            Validator::new(ValidationRules::for_kind(
                OperationKind::InternalTransfer,
                AmountBounds::default(),
            )),
            adapter.clone(),
            registry.clone(),
            Duration::from_secs(10),
        );
        (submitter, adapter, registry)
    }

    fn valid_payload() -> Payload {
        json!({ "amount": 100, "recipient": "user_9", "pin": "123456" })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_validation_failure_makes_no_call() {
        let (submitter, adapter, registry) = harness();
        let payload = json!({ "amount": -5, "pin": "123456" })
            .as_object()
            .cloned()
            .unwrap();

        let err = submitter
            .submit(payload, IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.details, vec!["Amount must be a positive number".to_string()]);
        assert_eq!(adapter.submit_count(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_success_registers_pending() {
        let (submitter, adapter, registry) = harness();
        let key = IdempotencyKey::generate();

        let op = submitter.submit(valid_payload(), key.clone()).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.id, Some(OperationId::from("op-1")));
        assert_eq!(adapter.submitted_keys(), vec![key]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_synchronous_success_skips_pending() {
        let (submitter, adapter, registry) = harness();
        adapter.set_submit_response(Ok(BackendResponse::ok("op-7", "SUCCESSFUL")));

        let op = submitter
            .submit(valid_payload(), IdempotencyKey::generate())
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Successful);
        assert!(registry.get(&OperationId::from("op-7")).is_some());
    }

    #[tokio::test]
    async fn test_backend_rejection_is_classified_and_not_registered() {
        let (submitter, adapter, registry) = harness();
        adapter.set_submit_response(Ok(BackendResponse::failure("Password PIN is invalid")));

        let err = submitter
            .submit(valid_payload(), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthCredential);
        assert_eq!(err.required_action, RequiredAction::RetryPin);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_service_unavailable() {
        let (submitter, adapter, _registry) = harness();
        adapter.set_submit_response(Err(TransportError::NoResponse("reset".into())));

        let err = submitter
            .submit(valid_payload(), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_same_key_resend_returns_recorded_operation() {
        let (submitter, adapter, registry) = harness();
        adapter.push_submit_response(Ok(BackendResponse::ok("op-1", "PENDING")));
        adapter.push_submit_response(Ok(BackendResponse::ok("op-2", "PENDING")));
        let key = IdempotencyKey::generate();

        let first = submitter.submit(valid_payload(), key.clone()).await.unwrap();
        let second = submitter.submit(valid_payload(), key).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(adapter.submit_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_single_request() {
        let (submitter, adapter, registry) = harness();
        let key = IdempotencyKey::generate();

        let (a, b) = tokio::join!(
            submitter.submit(valid_payload(), key.clone()),
            submitter.submit(valid_payload(), key.clone()),
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(adapter.submit_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_can_be_resent_with_same_key() {
        let (submitter, adapter, _registry) = harness();
        adapter.push_submit_response(Err(TransportError::Timeout));
        let key = IdempotencyKey::generate();

        assert!(submitter.submit(valid_payload(), key.clone()).await.is_err());
        let op = submitter.submit(valid_payload(), key.clone()).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(adapter.submitted_keys(), vec![key.clone(), key]);
    }

    #[tokio::test]
    async fn test_missing_operation_id() {
        let (submitter, adapter, registry) = harness();
        adapter.set_submit_response(Ok(BackendResponse {
            success: true,
            ..Default::default()
        }));

        let err = submitter
            .submit(valid_payload(), IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_submit_status_holds_pending() {
        let (submitter, adapter, _registry) = harness();
        adapter.set_submit_response(Ok(BackendResponse::ok("op-3", "AWAITING_REVIEW")));

        let op = submitter
            .submit(valid_payload(), IdempotencyKey::generate())
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.last_raw_status.as_deref(), Some("AWAITING_REVIEW"));
    }
}
