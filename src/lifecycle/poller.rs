//! Status Poller
//!
//! One background task per operation id. Each task ticks on a fixed
//! interval, asks its [`StatusTarget`] for a serialized status check, and
//! exits on its own once the operation is terminal.
//!
//! # Cancellation
//!
//! Every task runs under a child of the poller's root token. Stopping one id
//! cancels its child; disposing (or dropping) the poller cancels the root
//! and with it every outstanding task. A check already awaiting the network
//! when its token is cancelled completes, and its result is discarded.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ClassifiedError;
use super::types::{Operation, OperationId, clamp_poll_interval};

/// Outcome of one status check
#[derive(Debug, Clone)]
pub enum TickResult {
    /// Response applied; carries the updated operation
    Applied(Operation),
    /// Polling was stopped while the request was in flight
    Discarded,
    /// The check itself failed (transport, backend error envelope)
    Failed(ClassifiedError),
}

/// Whatever owns operation state and knows how to check it.
///
/// Implementations must serialize checks per id and must drop the response
/// without applying it if `cancel` fires while the request is in flight.
#[async_trait]
pub trait StatusTarget: Send + Sync + 'static {
    async fn check(&self, id: &OperationId, cancel: &CancellationToken) -> TickResult;
}

/// Handle to a running poll. The only thing it can do is stop it.
#[derive(Debug, Clone)]
pub struct PollHandle {
    id: OperationId,
    token: CancellationToken,
}

impl PollHandle {
    /// A handle for a poll that will never run (e.g. terminal operation)
    pub(crate) fn inert(id: OperationId) -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { id, token }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PollerConfig {
    /// Consecutive failed checks before a task gives up. `None` = never.
    pub max_failure_streak: Option<u32>,
}

struct PollEntry {
    token: CancellationToken,
    generation: u64,
}

pub struct StatusPoller {
    target: Arc<dyn StatusTarget>,
    tasks: Arc<DashMap<OperationId, PollEntry>>,
    root: CancellationToken,
    next_generation: AtomicU64,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(target: Arc<dyn StatusTarget>, config: PollerConfig) -> Self {
        Self {
            target,
            tasks: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
            config,
        }
    }

    /// Start polling `id` every `interval` (clamped to the floor).
    ///
    /// Idempotent: if a poll for `id` is already running, returns a handle
    /// to that poll and leaves its interval unchanged.
    pub fn start_polling(&self, id: &OperationId, interval: Duration) -> PollHandle {
        let interval = clamp_poll_interval(interval);

        let (token, generation) = match self.tasks.entry(id.clone()) {
            Entry::Occupied(entry) if !entry.get().token.is_cancelled() => {
                debug!(op_id = %id, "Poll already active, ignoring start");
                return PollHandle {
                    id: id.clone(),
                    token: entry.get().token.clone(),
                };
            }
            // A cancelled entry whose task has not exited yet is replaced
            Entry::Occupied(mut entry) => {
                let fresh = self.fresh_entry();
                let handle = (fresh.token.clone(), fresh.generation);
                entry.insert(fresh);
                handle
            }
            Entry::Vacant(entry) => {
                let fresh = self.fresh_entry();
                let handle = (fresh.token.clone(), fresh.generation);
                entry.insert(fresh);
                handle
            }
        };

        info!(
            op_id = %id,
            interval_ms = interval.as_millis() as u64,
            "Polling started"
        );

        tokio::spawn(run_poll(
            self.target.clone(),
            self.tasks.clone(),
            id.clone(),
            interval,
            token.clone(),
            generation,
            self.config.max_failure_streak,
        ));

        PollHandle {
            id: id.clone(),
            token,
        }
    }

    /// Stop polling `id`. Takes effect before the next tick.
    pub fn stop_polling(&self, id: &OperationId) -> bool {
        match self.tasks.remove(id) {
            Some((_, entry)) => {
                entry.token.cancel();
                info!(op_id = %id, "Polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, id: &OperationId) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|e| !e.token.is_cancelled())
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| !e.value().token.is_cancelled())
            .count()
    }

    /// True once `dispose` has run; no further polls can start.
    pub fn is_disposed(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every poll owned by this instance.
    pub fn dispose(&self) {
        if !self.root.is_cancelled() {
            debug!(active = self.tasks.len(), "Disposing status poller");
        }
        self.root.cancel();
        self.tasks.clear();
    }

    fn fresh_entry(&self) -> PollEntry {
        PollEntry {
            token: self.root.child_token(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_poll(
    target: Arc<dyn StatusTarget>,
    tasks: Arc<DashMap<OperationId, PollEntry>>,
    id: OperationId,
    interval: Duration,
    token: CancellationToken,
    generation: u64,
    max_failure_streak: Option<u32>,
) {
    // First check one full interval after start
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match target.check(&id, &token).await {
            TickResult::Applied(op) => {
                failures = 0;
                if op.is_terminal() {
                    info!(op_id = %id, status = %op.status, "Terminal status reached, polling finished");
                    break;
                }
                debug!(op_id = %id, status = %op.status, "Poll tick");
            }
            TickResult::Discarded => {
                debug!(op_id = %id, "Poll stopped during in-flight check, result discarded");
                break;
            }
            TickResult::Failed(err) => {
                failures += 1;
                warn!(
                    op_id = %id,
                    error = %err,
                    streak = failures,
                    "Status check failed, will retry"
                );
                if let Some(max) = max_failure_streak
                    && failures >= max
                {
                    warn!(op_id = %id, streak = failures, "Failure streak limit reached, polling abandoned");
                    break;
                }
            }
        }
    }

    token.cancel();
    tasks.remove_if(&id, |_, entry| entry.generation == generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::error::{ErrorKind, RequiredAction};
    use crate::lifecycle::state::OperationStatus;
    use crate::lifecycle::types::{IdempotencyKey, OperationKind, Payload};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Counts checks and replays a script of outcomes
    struct ScriptedTarget {
        checks: AtomicUsize,
        script: Mutex<Vec<Result<OperationStatus, ()>>>,
    }

    impl ScriptedTarget {
        fn new(mut script: Vec<Result<OperationStatus, ()>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                checks: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusTarget for ScriptedTarget {
        async fn check(&self, id: &OperationId, _cancel: &CancellationToken) -> TickResult {
            self.checks.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(OperationStatus::Pending));
            match next {
                Ok(status) => {
                    let mut op = Operation::submitting(
                        OperationKind::InternalTransfer,
                        Payload::new(),
                        IdempotencyKey::generate(),
                        Duration::from_secs(10),
                    );
                    op.id = Some(id.clone());
                    op.status = status;
                    TickResult::Applied(op)
                }
                Err(()) => TickResult::Failed(ClassifiedError::new(
                    ErrorKind::Network,
                    RequiredAction::None,
                    "offline",
                )),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_single_timer() {
        let target = ScriptedTarget::new(vec![]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let id = OperationId::from("op-1");

        poller.start_polling(&id, Duration::from_secs(10));
        poller.start_polling(&id, Duration::from_secs(3));
        assert_eq!(poller.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(50_500)).await;
        assert_eq!(target.checks(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_itself_on_terminal() {
        let target = ScriptedTarget::new(vec![
            Ok(OperationStatus::Pending),
            Ok(OperationStatus::Successful),
        ]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let id = OperationId::from("op-1");

        poller.start_polling(&id, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(target.checks(), 2);
        assert!(!poller.is_polling(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_do_not_stop_polling() {
        let target = ScriptedTarget::new(vec![Err(()), Err(()), Err(())]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let id = OperationId::from("op-1");

        poller.start_polling(&id, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(20_100)).await;

        assert_eq!(target.checks(), 4);
        assert!(poller.is_polling(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_streak_limit() {
        let target = ScriptedTarget::new(vec![Err(()), Err(()), Err(()), Err(())]);
        let poller = StatusPoller::new(
            target.clone(),
            PollerConfig {
                max_failure_streak: Some(2),
            },
        );
        let id = OperationId::from("op-1");

        poller.start_polling(&id, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(target.checks(), 2);
        assert!(!poller.is_polling(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let target = ScriptedTarget::new(vec![]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let id = OperationId::from("op-1");

        let handle = poller.start_polling(&id, Duration::from_secs(10));
        assert!(poller.stop_polling(&id));
        assert!(handle.is_cancelled());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.checks(), 0);
        assert!(!poller.stop_polling(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_cancel_allows_restart() {
        let target = ScriptedTarget::new(vec![]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let id = OperationId::from("op-1");

        let handle = poller.start_polling(&id, Duration::from_secs(10));
        handle.cancel();
        assert!(!poller.is_polling(&id));

        let again = poller.start_polling(&id, Duration::from_secs(10));
        assert!(!again.is_cancelled());
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(target.checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_all() {
        let target = ScriptedTarget::new(vec![]);
        let poller = StatusPoller::new(target.clone(), PollerConfig::default());
        let a = poller.start_polling(&OperationId::from("a"), Duration::from_secs(10));
        let b = poller.start_polling(&OperationId::from("b"), Duration::from_secs(10));

        drop(poller);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.checks(), 0);
    }
}
