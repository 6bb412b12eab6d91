//! Operation Lifecycle Engine
//!
//! The public contract UI surfaces use: `validate`, `submit`,
//! `refresh_status`, `start_polling` / `stop_polling`, `reset`.
//!
//! One engine instance per owning surface. It owns every operation it
//! submitted (or adopted through `refresh_status`) and is the only thing
//! allowed to poll them. Dropping the engine cancels its pollers.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapters::{CredentialProvider, HttpAdapter, OperationAdapter};
use super::classifier::{classify, classify_transport};
use super::error::{ClassifiedError, ErrorKind, RequiredAction, TransportError};
use super::poller::{PollHandle, PollerConfig, StatusPoller, StatusTarget, TickResult};
use super::registry::ActiveOperationRegistry;
use super::state::{BackendStatus, OperationStatus};
use super::submitter::{Submitter, failure_reason};
use super::types::{
    BackendResponse, IdempotencyKey, Operation, OperationId, OperationKind, Payload,
};
use super::validation::{ValidationRules, Validator};
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Default interval for `start_polling` without an explicit one
    pub poll_interval: Duration,
    /// Passed through to the poller; `None` polls until terminal or stopped
    pub max_failure_streak: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_failure_streak: None,
        }
    }
}

/// What a UI surface renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub loading: bool,
    pub error: Option<ClassifiedError>,
    pub operation: Option<Operation>,
    pub status_text: String,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            loading: false,
            error: None,
            operation: None,
            status_text: OperationStatus::Unsubmitted.status_text().to_string(),
        }
    }
}

/// The logical attempt the next `submit` belongs to
struct Attempt {
    key: IdempotencyKey,
    payload: Payload,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state behind the engine; also the poller's status target.
struct EngineCore {
    submitter: Submitter,
    registry: Arc<ActiveOperationRegistry>,
    owned: DashMap<OperationId, Operation>,
    /// Serializes status checks per id
    check_locks: DashMap<OperationId, Arc<AsyncMutex<()>>>,
    attempt: Mutex<Option<Attempt>>,
    /// Operation the observable state follows; cleared by `reset`
    current: Mutex<Option<OperationId>>,
    state_tx: watch::Sender<EngineState>,
    poll_interval: Duration,
}

impl EngineCore {
    /// Key for this payload: reused while the same payload is retried,
    /// regenerated when the payload changes.
    fn attempt_key_for(&self, payload: &Payload) -> IdempotencyKey {
        let mut attempt = lock(&self.attempt);
        match attempt.as_ref() {
            Some(current) if current.payload == *payload => current.key.clone(),
            _ => {
                let key = IdempotencyKey::generate();
                debug!(key = %key, "New submission attempt");
                let replaced = attempt.replace(Attempt {
                    key: key.clone(),
                    payload: payload.clone(),
                });
                drop(attempt);
                if let Some(previous) = replaced {
                    self.submitter.forget(&previous.key);
                }
                key
            }
        }
    }

    fn current_key(&self) -> Option<IdempotencyKey> {
        lock(&self.attempt).as_ref().map(|a| a.key.clone())
    }

    /// Close the attempt for `key`; the next submit gets a fresh key.
    fn finish_attempt(&self, key: &IdempotencyKey) {
        let mut attempt = lock(&self.attempt);
        if attempt.as_ref().is_some_and(|a| a.key == *key) {
            *attempt = None;
        }
        drop(attempt);
        self.submitter.forget(key);
    }

    fn clear_attempt(&self) {
        if let Some(previous) = lock(&self.attempt).take() {
            self.submitter.forget(&previous.key);
        }
    }

    fn current_id(&self) -> Option<OperationId> {
        lock(&self.current).clone()
    }

    fn set_current(&self, id: Option<OperationId>) {
        *lock(&self.current) = id;
    }

    /// Push an updated operation into the observable state if it is the
    /// current one. Updates for anything else are kept out of the state.
    fn publish(&self, op: &Operation) {
        let is_current = match (lock(&self.current).as_ref(), op.id.as_ref()) {
            (Some(current), Some(id)) => current == id,
            _ => false,
        };
        if !is_current {
            return;
        }
        self.state_tx.send_if_modified(|state| {
            state.loading = false;
            state.status_text = op.status.status_text().to_string();
            state.error = if op.status == OperationStatus::Failed {
                op.last_error.clone()
            } else {
                None
            };
            state.operation = Some(op.clone());
            true
        });
    }

    /// Start tracking an operation submitted elsewhere (e.g. before a
    /// restart) so it can be refreshed and polled.
    ///
    /// An id already in the shared registry belongs to another engine and
    /// is refused.
    fn adopt(&self, id: &OperationId) -> Result<(), ClassifiedError> {
        if self.owned.contains_key(id) {
            return Ok(());
        }
        if self.registry.get(id).is_some() {
            warn!(op_id = %id, "Refusing to adopt an operation owned elsewhere");
            return Err(ClassifiedError::validation(vec![format!(
                "Operation {id} is tracked by another owner"
            )]));
        }
        self.owned.entry(id.clone()).or_insert_with(|| {
            info!(op_id = %id, "Adopting operation for status tracking");
            let mut op = Operation::submitting(
                self.submitter.kind(),
                Payload::new(),
                IdempotencyKey::generate(),
                self.poll_interval,
            );
            op.id = Some(id.clone());
            op.transition(OperationStatus::Pending);
            op
        });
        Ok(())
    }

    /// Drop every terminal operation this engine owns from `owned` and the
    /// registry. Returns how many were released.
    fn release_terminal(&self) -> usize {
        let terminal: Vec<OperationId> = self
            .owned
            .iter()
            .filter(|e| e.value().is_terminal())
            .map(|e| e.key().clone())
            .collect();
        for id in &terminal {
            self.owned.remove_if(id, |_, op| op.is_terminal());
            self.check_locks.remove(id);
            self.registry.acknowledge(id);
        }
        terminal.len()
    }

    /// Apply one status response to the owned operation.
    fn apply(
        &self,
        id: &OperationId,
        result: Result<BackendResponse, TransportError>,
    ) -> TickResult {
        let response = match result {
            Ok(resp) if resp.success => resp,
            Ok(resp) => {
                let err = classify(&resp.raw_error());
                return TickResult::Failed(err);
            }
            Err(transport) => return TickResult::Failed(classify_transport(&transport)),
        };

        let reported = response
            .status()
            .map(BackendStatus::parse)
            .unwrap_or(BackendStatus::Known(OperationStatus::Pending));

        let Some(mut entry) = self.owned.get_mut(id) else {
            return TickResult::Failed(not_owned(id));
        };
        let op = entry.value_mut();
        op.mark_polled(chrono::Utc::now());

        if let BackendStatus::Unrecognized(raw) = &reported {
            warn!(op_id = %id, raw_status = %raw, "Unrecognized status, holding at PENDING");
            op.last_raw_status = Some(raw.clone());
        }

        let previous = op.status;
        let next = reported.effective();
        if !op.transition(next) {
            debug!(op_id = %id, from = %previous, to = %next, "Ignoring non-forward status");
        } else if next != previous {
            info!(op_id = %id, from = %previous, to = %next, "Operation status changed");
            if next == OperationStatus::Failed {
                op.last_error = Some(failure_reason(&response));
            }
        }
        let updated = op.clone();
        drop(entry);

        self.registry.upsert(updated.clone());
        self.publish(&updated);
        if updated.is_terminal() {
            self.finish_attempt(&updated.idempotency_key);
        }
        TickResult::Applied(updated)
    }
}

#[async_trait]
impl StatusTarget for EngineCore {
    async fn check(&self, id: &OperationId, cancel: &CancellationToken) -> TickResult {
        let serial = self.check_locks.entry(id.clone()).or_default().clone();
        let _guard = serial.lock().await;

        let Some(current) = self.owned.get(id).map(|e| e.value().clone()) else {
            return TickResult::Failed(not_owned(id));
        };
        if current.is_terminal() {
            return TickResult::Applied(current);
        }

        let result = self.submitter.adapter().check_status(id).await;
        if cancel.is_cancelled() {
            debug!(op_id = %id, "Discarding status response after stop");
            return TickResult::Discarded;
        }
        self.apply(id, result)
    }
}

fn not_owned(id: &OperationId) -> ClassifiedError {
    ClassifiedError::validation(vec![format!(
        "Operation {id} is not tracked by this engine"
    )])
}

pub struct OperationEngine {
    core: Arc<EngineCore>,
    poller: StatusPoller,
    config: EngineConfig,
}

impl OperationEngine {
    pub fn new(
        kind: OperationKind,
        validator: Validator,
        adapter: Arc<dyn OperationAdapter>,
        registry: Arc<ActiveOperationRegistry>,
        config: EngineConfig,
    ) -> Self {
        let submitter = Submitter::new(
            kind,
            validator,
            adapter,
            registry.clone(),
            config.poll_interval,
        );
        let (state_tx, _) = watch::channel(EngineState::default());
        let core = Arc::new(EngineCore {
            submitter,
            registry,
            owned: DashMap::new(),
            check_locks: DashMap::new(),
            attempt: Mutex::new(None),
            current: Mutex::new(None),
            state_tx,
            poll_interval: config.poll_interval,
        });
        let poller = StatusPoller::new(
            core.clone(),
            PollerConfig {
                max_failure_streak: config.max_failure_streak,
            },
        );
        Self {
            core,
            poller,
            config,
        }
    }

    /// Engine for one operation kind against the configured HTTP backend.
    pub fn for_backend(
        kind: OperationKind,
        config: &AppConfig,
        registry: Arc<ActiveOperationRegistry>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let adapter = HttpAdapter::for_kind(
            kind,
            config.backend.base_url.clone(),
            credentials,
            Duration::from_millis(config.backend.timeout_ms),
        )?;
        let rules = ValidationRules::for_kind(kind, config.limits.for_kind(kind));
        Ok(Self::new(
            kind,
            Validator::new(rules),
            Arc::new(adapter),
            registry,
            config.engine.engine_config(),
        ))
    }

    pub fn kind(&self) -> OperationKind {
        self.core.submitter.kind()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ActiveOperationRegistry> {
        &self.core.registry
    }

    /// Pure payload check; empty means valid.
    pub fn validate(&self, payload: &Payload) -> Vec<String> {
        self.core.submitter.validate(payload)
    }

    /// Submit `payload` under the current attempt's idempotency key.
    ///
    /// Retrying the same payload reuses the key; a different payload, a
    /// terminal outcome, or `reset` starts a new attempt.
    pub async fn submit(&self, payload: Payload) -> Result<Operation, ClassifiedError> {
        let key = self.core.attempt_key_for(&payload);
        self.submit_with_key(payload, key).await
    }

    /// Submit under a caller-managed idempotency key.
    pub async fn submit_with_key(
        &self,
        payload: Payload,
        idempotency_key: IdempotencyKey,
    ) -> Result<Operation, ClassifiedError> {
        let errors = self.validate(&payload);
        if !errors.is_empty() {
            let err = ClassifiedError::validation(errors);
            self.core.state_tx.send_modify(|state| {
                state.loading = false;
                state.error = Some(err.clone());
            });
            return Err(err);
        }

        let provisional = Operation::submitting(
            self.kind(),
            payload.clone(),
            idempotency_key.clone(),
            self.config.poll_interval,
        );
        self.core.set_current(None);
        self.core.state_tx.send_replace(EngineState {
            loading: true,
            error: None,
            status_text: provisional.status.status_text().to_string(),
            operation: Some(provisional.clone()),
        });

        match self
            .core
            .submitter
            .submit(payload, idempotency_key.clone())
            .await
        {
            Ok(op) => {
                // A resend may return an operation we already track with newer state
                let op = match op.id.clone() {
                    Some(id) => self
                        .core
                        .owned
                        .entry(id)
                        .or_insert_with(|| op.clone())
                        .value()
                        .clone(),
                    None => op,
                };
                if op.is_terminal() {
                    self.core.finish_attempt(&idempotency_key);
                }
                self.core.set_current(op.id.clone());
                self.core.state_tx.send_replace(EngineState {
                    loading: false,
                    error: if op.status == OperationStatus::Failed {
                        op.last_error.clone()
                    } else {
                        None
                    },
                    status_text: op.status.status_text().to_string(),
                    operation: Some(op.clone()),
                });
                Ok(op)
            }
            Err(err) => {
                let mut failed = provisional;
                failed.transition(OperationStatus::Failed);
                failed.last_error = Some(err.clone());
                self.core.state_tx.send_replace(EngineState {
                    loading: false,
                    error: Some(err.clone()),
                    status_text: failed.status.status_text().to_string(),
                    operation: Some(failed),
                });
                Err(err)
            }
        }
    }

    /// One on-demand status check, no timer.
    ///
    /// `None` checks the current operation. An id this engine has never
    /// seen is adopted, which is how callers resume tracking after a
    /// restart; it becomes current when nothing else is.
    pub async fn refresh_status(
        &self,
        id: Option<&OperationId>,
    ) -> Result<Operation, ClassifiedError> {
        let id = match id {
            Some(id) => id.clone(),
            None => self
                .core
                .current_id()
                .ok_or_else(ClassifiedError::missing_id)?,
        };
        if id.as_str().trim().is_empty() {
            return Err(ClassifiedError::missing_id());
        }

        self.core.adopt(&id)?;
        if self.core.current_id().is_none() {
            self.core.set_current(Some(id.clone()));
        }
        match self.core.check(&id, &CancellationToken::new()).await {
            TickResult::Applied(op) => {
                self.core.publish(&op);
                Ok(op)
            }
            TickResult::Failed(err) => Err(err),
            TickResult::Discarded => Err(ClassifiedError::new(
                ErrorKind::Unknown,
                RequiredAction::None,
                "Status check was cancelled",
            )),
        }
    }

    /// Poll an owned operation until it is terminal or stopped.
    ///
    /// `interval` defaults to the operation's own interval. Terminal
    /// operations get an already-cancelled handle. Fails once the engine
    /// has been disposed.
    pub fn start_polling(
        &self,
        id: &OperationId,
        interval: Option<Duration>,
    ) -> Result<PollHandle, ClassifiedError> {
        if self.poller.is_disposed() {
            return Err(ClassifiedError::new(
                ErrorKind::Unknown,
                RequiredAction::None,
                "Engine has been disposed",
            ));
        }
        let Some(op) = self.core.owned.get(id).map(|e| e.value().clone()) else {
            return Err(not_owned(id));
        };
        if op.is_terminal() {
            debug!(op_id = %id, status = %op.status, "Operation terminal, not polling");
            return Ok(PollHandle::inert(id.clone()));
        }
        Ok(self
            .poller
            .start_polling(id, interval.unwrap_or(op.poll_interval)))
    }

    pub fn stop_polling(&self, id: &OperationId) -> bool {
        self.poller.stop_polling(id)
    }

    pub fn is_polling(&self, id: &OperationId) -> bool {
        self.poller.is_polling(id)
    }

    /// Latest known state of an owned operation
    pub fn operation(&self, id: &OperationId) -> Option<Operation> {
        self.core.owned.get(id).map(|e| e.value().clone())
    }

    /// Operations this engine currently owns, terminal ones included
    pub fn tracked_operations(&self) -> usize {
        self.core.owned.len()
    }

    /// Idempotency keys with an open submission slot
    pub fn tracked_attempts(&self) -> usize {
        self.core.submitter.tracked_attempts()
    }

    /// Idempotency key the next `submit` of the same payload would reuse
    pub fn current_key(&self) -> Option<IdempotencyKey> {
        self.core.current_key()
    }

    pub fn state(&self) -> EngineState {
        self.core.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.core.state_tx.subscribe()
    }

    /// Return to a re-submittable state.
    ///
    /// Every terminal operation this engine owns is acknowledged and
    /// dropped from the registry. Pending ones keep their pollers but no
    /// longer drive the observable state.
    pub fn reset(&self) {
        self.core.set_current(None);
        let released = self.core.release_terminal();
        self.core.clear_attempt();
        self.core.state_tx.send_replace(EngineState::default());
        debug!(kind = %self.kind(), released, "Engine reset");
    }

    /// Cancel every poll this engine owns. The engine cannot poll again
    /// afterwards.
    pub fn dispose(&self) {
        self.poller.dispose();
    }
}
