//! Active Operation Registry
//!
//! In-memory index of operations that UI surfaces share within a session.
//! A background task republishes the non-terminal subset on a fixed
//! interval so observers do not need their own pollers.
//!
//! Not a persistence layer: nothing survives the registry being dropped.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{Operation, OperationId};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct ActiveOperationRegistry {
    /// operation id -> latest known state
    entries: DashMap<OperationId, Operation>,
    /// Last refreshed list of non-terminal operations
    active_tx: watch::Sender<Vec<Operation>>,
    /// Cancels the background refresh task
    shutdown: CancellationToken,
}

impl ActiveOperationRegistry {
    pub fn new() -> Self {
        let (active_tx, _) = watch::channel(Vec::new());
        Self {
            entries: DashMap::new(),
            active_tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a registry and start its refresh loop.
    ///
    /// The loop holds only a weak reference; dropping the last `Arc`
    /// (or calling [`dispose`](Self::dispose)) ends it.
    pub fn spawn(refresh_interval: Duration) -> Arc<Self> {
        let registry = Arc::new(Self::new());
        let weak = Arc::downgrade(&registry);
        let token = registry.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + refresh_interval,
                refresh_interval,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = weak.upgrade() else { break };
                        registry.refresh();
                    }
                }
            }
            debug!("Registry refresh loop stopped");
        });

        info!(
            refresh_interval_secs = refresh_interval.as_secs(),
            "Active operation registry started"
        );
        registry
    }

    /// Every tracked operation, including terminal ones not yet acknowledged.
    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.entries.iter().map(|e| e.value().clone()).collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ops
    }

    /// Non-terminal operations only
    pub fn active(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_terminal())
            .map(|e| e.value().clone())
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ops
    }

    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace by operation id. Operations without an id are
    /// ignored; they were never accepted by the backend.
    ///
    /// Written by the submitter and poller only.
    pub fn upsert(&self, op: Operation) {
        let Some(id) = op.id.clone() else {
            debug!(key = %op.idempotency_key, "Skipping registry upsert for unsubmitted operation");
            return;
        };
        debug!(op_id = %id, status = %op.status, "Registry upsert");
        self.entries.insert(id, op);
    }

    pub fn remove(&self, id: &OperationId) -> Option<Operation> {
        self.entries.remove(id).map(|(_, op)| op)
    }

    /// Drop a terminal entry once its owner has seen the outcome.
    /// Non-terminal entries are left alone.
    pub fn acknowledge(&self, id: &OperationId) -> bool {
        self.entries
            .remove_if(id, |_, op| op.is_terminal())
            .is_some()
    }

    /// Republish the non-terminal list from memory.
    pub fn refresh(&self) -> usize {
        let active = self.active();
        let count = active.len();
        self.active_tx.send_replace(active);
        debug!(active = count, total = self.entries.len(), "Registry refreshed");
        count
    }

    /// Observe refreshed snapshots
    pub fn subscribe(&self) -> watch::Receiver<Vec<Operation>> {
        self.active_tx.subscribe()
    }

    /// Stop the refresh loop and forget everything.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.entries.clear();
        self.active_tx.send_replace(Vec::new());
    }
}

impl Default for ActiveOperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveOperationRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
