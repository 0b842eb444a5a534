//! Background reconciliation of announced advertisements.
//!
//! Every announced advertisement sits in the [`PendingSet`] until the remote
//! index reports it as included. The [`Reconciler`] polls the index on a
//! timer and prunes confirmed ids. A failed query leaves the id pending, so
//! the next tick retries it.

use crate::index::IndexClient;
use crate::state::{StateError, StateStore};
use adchain_merkle::Cid;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Ids announced but not yet confirmed by the remote index.
///
/// The set lock is only held for in-memory operations. Persisting takes a
/// separate lock around snapshot-then-write so concurrent writers cannot
/// store an older snapshot over a newer one.
#[derive(Debug, Default)]
pub struct PendingSet {
    ids: Mutex<BTreeSet<Cid>>,
    persist_lock: Mutex<()>,
}

impl PendingSet {
    pub fn new(initial: BTreeSet<Cid>) -> Self {
        Self {
            ids: Mutex::new(initial),
            persist_lock: Mutex::new(()),
        }
    }

    /// Returns false if the id was already pending.
    pub fn insert(&self, cid: Cid) -> bool {
        self.ids.lock().insert(cid)
    }

    pub fn remove(&self, cid: &Cid) -> bool {
        self.ids.lock().remove(cid)
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.ids.lock().contains(cid)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Copy of the current ids. The lock is released before returning.
    pub fn snapshot(&self) -> BTreeSet<Cid> {
        self.ids.lock().clone()
    }

    /// Write the whole set, including when it is empty.
    pub fn persist(&self, state: &StateStore) -> Result<(), StateError> {
        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot();
        state.store_pending(&snapshot)
    }
}

/// Polls the remote index for pending advertisements.
pub struct Reconciler {
    pending: Arc<PendingSet>,
    state: StateStore,
    index: Arc<dyn IndexClient>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        pending: Arc<PendingSet>,
        state: StateStore,
        index: Arc<dyn IndexClient>,
        interval: Duration,
    ) -> Self {
        Self {
            pending,
            state,
            index,
            interval,
        }
    }

    /// Query each id once and drop the confirmed ones from the pending set.
    ///
    /// Failures are logged and skipped. Stops early once `cancel` fires.
    /// Returns the number of confirmed ids.
    pub async fn check_batch(&self, ids: &BTreeSet<Cid>, cancel: &CancellationToken) -> usize {
        let mut confirmed = 0;
        for cid in ids {
            if cancel.is_cancelled() {
                debug!("reconciliation batch interrupted by shutdown");
                break;
            }

            match self.index.inclusion(cid).await {
                Err(e) => {
                    warn!(cid = %cid, error = %e, "failed to check inclusion status");
                }
                Ok(inclusion) if inclusion.in_pando => {
                    if self.pending.remove(cid) {
                        confirmed += 1;
                        debug!(cid = %cid, "advertisement confirmed by index");
                    }
                }
                Ok(_) => {
                    debug!(cid = %cid, "advertisement not yet included");
                }
            }
        }
        confirmed
    }

    /// One timer tick: skip if nothing is pending, otherwise check a snapshot
    /// and persist the set once.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<usize, StateError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let snapshot = self.pending.snapshot();
        let confirmed = self.check_batch(&snapshot, cancel).await;
        self.pending.persist(&self.state)?;

        if confirmed > 0 {
            info!(
                confirmed,
                remaining = self.pending.len(),
                "pruned confirmed advertisements"
            );
        }
        Ok(confirmed)
    }

    /// Run ticks until `cancel` fires. The first tick happens one interval
    /// after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "reconciliation loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("reconciliation loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&cancel).await {
                        error!(error = %e, "failed to persist pending set");
                    }
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
