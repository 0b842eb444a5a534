//! The publish engine.
//!
//! Ties the advertisement chain, persistent state, announcement transport
//! and reconciliation loop together. Publishing stores a new advertisement
//! linked to the previous latest, moves the latest pointer, appends to the
//! push history, announces the new root and records it as pending.
//!
//! An announce failure is reported to the caller but the advertisement,
//! the latest pointer and the history entry are not rolled back. The node
//! stays readable locally even though `publish` returned an error.

use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, Result, ShutdownError};
use crate::index::IndexClient;
use crate::reconcile::{PendingSet, Reconciler};
use crate::state::{Datastore, StateStore};
use crate::transport::{Announcer, GossipNetwork};
use adchain_merkle::{
    Advertisement, AdvertisementBuilder, ChainSyncer, Cid, DagError, DagStore, Payload,
    RemoteDag, Selector, SharedDagStore, SyncError,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

/// Publishes advertisements and tracks their confirmation.
///
/// The engine is the single writer of the latest pointer and the push
/// history, which is why publishing takes `&mut self`. The pending set is
/// shared with the background reconciliation task.
pub struct Engine<S: DagStore + 'static> {
    config: EngineConfig,
    dag: SharedDagStore<S>,
    state: StateStore,
    announcer: Announcer,
    latest: Option<Cid>,
    history: Vec<Cid>,
    pending: Arc<PendingSet>,
    index: Arc<dyn IndexClient>,
    upstream: Option<Arc<dyn RemoteDag>>,
    cancel: CancellationToken,
    reconciler: Option<JoinHandle<()>>,
    _cancel_on_drop: DropGuard,
}

impl<S: DagStore + 'static> Engine<S> {
    /// Validate the configuration and load persisted state.
    ///
    /// `upstream` is the peer used for explicit syncs and cache-miss fetches.
    pub fn new(
        config: EngineConfig,
        datastore: Arc<dyn Datastore>,
        dag: SharedDagStore<S>,
        index: Arc<dyn IndexClient>,
        upstream: Option<Arc<dyn RemoteDag>>,
    ) -> Result<Self> {
        config.validate()?;

        let state = StateStore::new(datastore);
        let latest = state.load_latest()?;
        let history = state.load_history()?;
        let pending = Arc::new(PendingSet::new(state.load_pending()?));
        info!(
            latest = ?latest,
            history = history.len(),
            pending = pending.len(),
            "loaded engine state"
        );

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        Ok(Self {
            config,
            dag,
            state,
            announcer: Announcer::Disabled,
            latest,
            history,
            pending,
            index,
            upstream,
            cancel,
            reconciler: None,
            _cancel_on_drop,
        })
    }

    /// Build the announcer, expose the prior latest root and start the
    /// reconciliation loop.
    pub fn start(&mut self, gossip: Option<Arc<dyn GossipNetwork>>) -> Result<()> {
        if self.reconciler.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        self.announcer = Announcer::from_config(&self.config, gossip, self.dag.clone())
            .map_err(|e| {
                error!(error = %e, kind = %self.config.publisher_kind, "failed to create publisher");
                e
            })?;

        if let Some(latest) = self.latest {
            self.announcer.set_root(latest);
        }

        let reconciler = Arc::new(Reconciler::new(
            self.pending.clone(),
            self.state.clone(),
            self.index.clone(),
            self.config.check_interval(),
        ));
        self.reconciler = Some(reconciler.spawn(self.cancel.child_token()));
        Ok(())
    }

    /// Store a new advertisement and announce it.
    ///
    /// Returns an error if the announce fails, in which case the
    /// advertisement is still stored and recorded as latest.
    pub async fn publish(&mut self, payload: Payload) -> Result<Cid> {
        let cid = self.publish_local(payload).map_err(|e| {
            error!(error = %e, "failed to store advertisement locally");
            e
        })?;

        if !self.announcer.is_enabled() {
            return Ok(cid);
        }

        info!(cid = %cid, "announcing advertisement");
        if let Err(e) = self.announcer.update_root(cid).await {
            error!(cid = %cid, error = %e, "failed to announce advertisement");
            return Err(e.into());
        }

        self.pending.insert(cid);
        self.pending.persist(&self.state).map_err(|e| {
            error!(cid = %cid, error = %e, "failed to persist pending set");
            e
        })?;
        Ok(cid)
    }

    /// Publish a raw byte payload.
    pub async fn publish_bytes(&mut self, data: impl Into<Vec<u8>>) -> Result<Cid> {
        self.publish(Payload::bytes(data)).await
    }

    /// Store a new advertisement and update the latest pointer and push
    /// history without announcing it.
    pub fn publish_local(&mut self, payload: Payload) -> Result<Cid> {
        let ad = AdvertisementBuilder::new()
            .with_previous(self.latest)
            .with_provider(self.config.provider_id.clone())
            .with_payload(payload)
            .build();

        let cid = self.dag.write().put(ad)?;
        info!(cid = %cid, "stored advertisement in local DAG store");

        // Both records move in memory before either is written, so a failed
        // write still leaves latest and history describing the same chain.
        self.latest = Some(cid);
        self.history.push(cid);

        self.state.store_latest(&cid).map_err(|e| {
            error!(cid = %cid, error = %e, "failed to update latest pointer");
            e
        })?;
        self.state.store_history(&self.history).map_err(|e| {
            error!(cid = %cid, error = %e, "failed to update push history");
            e
        })?;

        info!(cid = %cid, "updated latest pointer and push history");
        Ok(cid)
    }

    /// Re-announce the current latest advertisement. Nothing is added to the
    /// pending set.
    pub async fn publish_latest(&self) -> Result<Cid> {
        let latest = self.latest.ok_or(EngineError::NoLatest)?;
        info!(cid = %latest, "re-announcing latest advertisement");
        self.announcer.update_root(latest).await?;
        Ok(latest)
    }

    /// Pull a run of advertisements from the upstream, starting at `cid`.
    ///
    /// A `depth` of 0 with an empty `end_cid` walks to the start of the
    /// chain. `end_cid`, when given, is not fetched.
    pub async fn sync(&self, cid: &str, depth: usize, end_cid: &str) -> Result<Vec<Cid>> {
        let start: Cid = cid.parse()?;
        let stop = if end_cid.trim().is_empty() {
            None
        } else {
            Some(end_cid.parse::<Cid>()?)
        };
        self.sync_from(start, &Selector::new(depth, stop)).await
    }

    /// [`Engine::sync`] bounded by a deadline.
    ///
    /// On expiry the walk is dropped at its next suspension point; nodes
    /// stored before that stay in the local store.
    pub async fn sync_with_deadline(
        &self,
        cid: &str,
        depth: usize,
        end_cid: &str,
        deadline: Duration,
    ) -> Result<Vec<Cid>> {
        tokio::time::timeout(deadline, self.sync(cid, depth, end_cid))
            .await
            .map_err(|_| EngineError::SyncFailed(SyncError::Timeout))?
    }

    /// Ask the index for a provider's head and sync from it.
    pub async fn sync_with_provider(
        &self,
        provider: &str,
        depth: usize,
        end_cid: &str,
    ) -> Result<Vec<Cid>> {
        let head = self.index.provider_head(provider).await?;
        info!(provider, head = %head, "syncing from provider head");
        self.sync(&head.to_string(), depth, end_cid).await
    }

    async fn sync_from(&self, start: Cid, selector: &Selector) -> Result<Vec<Cid>> {
        let upstream = self
            .upstream
            .clone()
            .ok_or(ConfigError::Missing("upstream peer"))?;
        let syncer = ChainSyncer::new(self.dag.clone(), upstream);
        syncer.sync(start, selector).await.map_err(|e| match e {
            SyncError::Mismatch {
                requested,
                received,
            } => EngineError::SyncMismatch(format!("expected {}, got {}", requested, received)),
            e => EngineError::SyncFailed(e),
        })
    }

    /// Parse `cid` and read its payload, locally or from the upstream.
    pub async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let cid: Cid = cid.parse()?;
        self.cat_cid(&cid).await
    }

    /// Read an advertisement's payload. A local miss falls back to fetching
    /// exactly that node from the upstream.
    pub async fn cat_cid(&self, cid: &Cid) -> Result<Vec<u8>> {
        let local = self.dag.read().get(cid).cloned();
        let ad = match local {
            Some(ad) => ad,
            None => {
                info!(cid = %cid, "not found locally, fetching from upstream");
                tokio::time::timeout(self.config.cat_timeout(), self.cat_remote(cid))
                    .await
                    .map_err(|_| EngineError::SyncFailed(SyncError::Timeout))?
                    .map_err(|e| {
                        warn!(cid = %cid, error = %e, "failed to fetch advertisement from upstream");
                        e
                    })?
            }
        };

        ad.payload
            .decode()
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    async fn cat_remote(&self, cid: &Cid) -> Result<Advertisement> {
        let synced = self.sync_from(*cid, &Selector::new(1, None)).await?;
        if synced.len() != 1 {
            return Err(EngineError::SyncMismatch(format!(
                "expected exactly one node, got {}",
                synced.len()
            )));
        }
        if synced[0] != *cid {
            return Err(EngineError::SyncMismatch(format!(
                "expected {}, got {}",
                cid, synced[0]
            )));
        }
        self.dag
            .read()
            .get(cid)
            .cloned()
            .ok_or(EngineError::Storage(DagError::NotFound(*cid)))
    }

    /// Close the announcer and stop the reconciliation loop.
    ///
    /// Every step runs even if an earlier one failed; all errors are returned
    /// together.
    pub async fn shutdown(&mut self) -> std::result::Result<(), ShutdownError> {
        let mut errors = Vec::new();

        if let Err(e) = self.announcer.close().await {
            error!(error = %e, "error closing publisher");
            errors.push(EngineError::Transport(e));
        }

        self.cancel.cancel();
        if let Some(handle) = self.reconciler.take() {
            if let Err(e) = handle.await {
                errors.push(EngineError::Task(e.to_string()));
            }
        }
        info!("engine shut down");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError(errors))
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn latest(&self) -> Option<Cid> {
        self.latest
    }

    /// Every locally published cid, oldest first.
    pub fn push_history(&self) -> &[Cid] {
        &self.history
    }

    /// Snapshot of the ids awaiting confirmation.
    pub fn pending(&self) -> BTreeSet<Cid> {
        self.pending.snapshot()
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    pub fn dag(&self) -> &SharedDagStore<S> {
        &self.dag
    }

    /// Whether the reconciliation loop is running.
    pub fn is_running(&self) -> bool {
        self.reconciler
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}
