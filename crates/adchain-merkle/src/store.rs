//! DAG storage trait and implementations.
//!
//! The DagStore provides content-addressed storage for advertisements.
//! Nodes are verified on insert; previous-links are not required to be
//! present, since a bounded sync may fetch only the head of a remote chain.

use crate::advertisement::Advertisement;
use crate::cid::Cid;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during DAG operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("node not found: {}", .0.short())]
    NotFound(Cid),

    #[error("verification failed for: {}", .0.short())]
    VerificationFailed(Cid),
}

/// Trait for content-addressed advertisement storage.
pub trait DagStore: Send + Sync {
    /// Get an advertisement by its cid.
    fn get(&self, cid: &Cid) -> Option<&Advertisement>;

    /// Store an advertisement, returning its cid.
    ///
    /// The cid is verified before storage. Storing an existing node is a no-op.
    fn put(&mut self, ad: Advertisement) -> Result<Cid, DagError>;

    fn contains(&self, cid: &Cid) -> bool;

    /// Get the total number of nodes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk previous-links from `from`, newest first, visiting at most
    /// `limit` locally present nodes.
    fn chain(&self, from: &Cid, limit: usize) -> Vec<Cid> {
        let mut out = Vec::new();
        let mut cursor = Some(*from);
        while let Some(cid) = cursor {
            if out.len() >= limit {
                break;
            }
            match self.get(&cid) {
                Some(ad) => {
                    out.push(cid);
                    cursor = ad.previous;
                }
                None => break,
            }
        }
        out
    }
}

/// A DAG store shared between the engine, publishers and syncers.
pub type SharedDagStore<S> = Arc<RwLock<S>>;

/// Wrap a store for sharing.
pub fn shared<S: DagStore>(store: S) -> SharedDagStore<S> {
    Arc::new(RwLock::new(store))
}

/// In-memory implementation of DagStore.
#[derive(Clone, Debug, Default)]
pub struct MemoryDagStore {
    nodes: HashMap<Cid, Advertisement>,
}

impl MemoryDagStore {
    pub fn new() -> Self {
        MemoryDagStore {
            nodes: HashMap::new(),
        }
    }

    /// Insert without verification. Only useful for simulating a peer that
    /// serves corrupted data.
    #[doc(hidden)]
    pub fn insert_raw(&mut self, cid: Cid, ad: Advertisement) {
        self.nodes.insert(cid, ad);
    }
}

impl DagStore for MemoryDagStore {
    fn get(&self, cid: &Cid) -> Option<&Advertisement> {
        self.nodes.get(cid)
    }

    fn put(&mut self, ad: Advertisement) -> Result<Cid, DagError> {
        if !ad.verify() {
            return Err(DagError::VerificationFailed(ad.cid));
        }

        let cid = ad.cid;
        self.nodes.entry(cid).or_insert(ad);
        Ok(cid)
    }

    fn contains(&self, cid: &Cid) -> bool {
        self.nodes.contains_key(cid)
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}
