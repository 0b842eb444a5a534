//! Bounded chain synchronization against a remote peer.
//!
//! The ChainSyncer pulls a linear run of advertisements by:
//! 1. Fetching the start node from the peer
//! 2. Verifying and storing it locally
//! 3. Following its previous-link until the selector stops the walk

use crate::advertisement::Advertisement;
use crate::cid::Cid;
use crate::store::{DagError, DagStore, SharedDagStore};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Depth used when the caller asks for an unbounded walk.
pub const UNBOUNDED_DEPTH: usize = 999_999;

/// Errors that can occur during synchronization.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("failed to fetch node {}: {reason}", .cid.short())]
    FetchFailed { cid: Cid, reason: String },

    #[error("verification failed: {}", .0.short())]
    VerificationFailed(Cid),

    /// The peer answered with a valid node other than the one requested.
    #[error("requested {} but peer returned {}", .requested.short(), .received.short())]
    Mismatch { requested: Cid, received: Cid },

    #[error("node not found on peer: {}", .0.short())]
    NotFound(Cid),

    #[error("store error: {0}")]
    Store(#[from] DagError),

    #[error("sync timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A source of advertisements bound to one upstream peer.
#[async_trait]
pub trait RemoteDag: Send + Sync {
    /// Fetch a single advertisement by cid.
    async fn fetch(&self, cid: &Cid) -> Result<Advertisement, SyncError>;
}

/// Serves advertisements out of a shared in-process store.
pub struct MemoryRemoteDag<S: DagStore> {
    store: SharedDagStore<S>,
}

impl<S: DagStore> MemoryRemoteDag<S> {
    pub fn new(store: SharedDagStore<S>) -> Self {
        MemoryRemoteDag { store }
    }
}

#[async_trait]
impl<S: DagStore + 'static> RemoteDag for MemoryRemoteDag<S> {
    async fn fetch(&self, cid: &Cid) -> Result<Advertisement, SyncError> {
        self.store
            .read()
            .get(cid)
            .cloned()
            .ok_or(SyncError::NotFound(*cid))
    }
}

/// How far a walk may recurse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecursionLimit {
    /// No depth bound; the walk relies on the stop id or the chain start.
    None,

    /// Visit at most this many nodes.
    Depth(usize),
}

impl RecursionLimit {
    fn allows(&self, visited: usize) -> bool {
        match self {
            RecursionLimit::None => true,
            RecursionLimit::Depth(max) => visited < *max,
        }
    }
}

/// Traversal bounds for a chain sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub limit: RecursionLimit,

    /// Exclusive lower bound of the walk.
    pub stop_at: Option<Cid>,
}

impl Selector {
    /// Build a selector from a depth and optional stop id. A depth of zero
    /// with no stop id is capped at [`UNBOUNDED_DEPTH`].
    pub fn new(depth: usize, stop_at: Option<Cid>) -> Self {
        let limit = match (depth, stop_at) {
            (0, None) => RecursionLimit::Depth(UNBOUNDED_DEPTH),
            (0, Some(_)) => RecursionLimit::None,
            (d, _) => RecursionLimit::Depth(d),
        };
        Selector { limit, stop_at }
    }
}

/// Chain synchronizer writing into a shared local store.
pub struct ChainSyncer<S: DagStore> {
    store: SharedDagStore<S>,
    remote: Arc<dyn RemoteDag>,
}

impl<S: DagStore> ChainSyncer<S> {
    pub fn new(store: SharedDagStore<S>, remote: Arc<dyn RemoteDag>) -> Self {
        ChainSyncer { store, remote }
    }

    pub fn store(&self) -> &SharedDagStore<S> {
        &self.store
    }

    /// Walk the remote chain from `start` and store every visited node.
    ///
    /// Returns the cids of the stored nodes in visitation order. The first
    /// error aborts the walk and no list is returned; nodes already stored
    /// stay in the local store.
    pub async fn sync(&self, start: Cid, selector: &Selector) -> Result<Vec<Cid>, SyncError> {
        let mut synced = Vec::new();
        let mut cursor = Some(start);

        while let Some(cid) = cursor {
            if selector.stop_at == Some(cid) {
                break;
            }
            if !selector.limit.allows(synced.len()) {
                break;
            }

            let ad = self.remote.fetch(&cid).await?;
            if !ad.verify() {
                return Err(SyncError::VerificationFailed(ad.cid));
            }
            if ad.cid != cid {
                return Err(SyncError::Mismatch {
                    requested: cid,
                    received: ad.cid,
                });
            }
            let previous = ad.previous;
            let stored = self.store.write().put(ad)?;
            debug!(cid = %stored, "synced advertisement");

            synced.push(stored);
            cursor = previous;
        }

        Ok(synced)
    }
}
