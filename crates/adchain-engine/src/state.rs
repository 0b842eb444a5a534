//! Persistent engine state.
//!
//! Three records live under a private key namespace: the latest
//! advertisement pointer, the full push history and the pending
//! confirmation set. Absent records load as empty defaults.

use adchain_merkle::Cid;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Key of the latest advertisement pointer (raw cid bytes).
pub const LATEST_KEY: &str = "sync/meta/latest";
/// Key of the push history (JSON list of cids, oldest first).
pub const HISTORY_KEY: &str = "sync/meta/list";
/// Key of the pending confirmation set (JSON list of cids).
pub const PENDING_KEY: &str = "sync/meta/check";

/// Errors returned by state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read {key}: {source}")]
    Read { key: String, source: io::Error },

    #[error("failed to write {key}: {source}")]
    Write { key: String, source: io::Error },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to decode {key}: {reason}")]
    Decode { key: &'static str, reason: String },
}

/// Minimal key/value contract the engine persists through.
pub trait Datastore: Send + Sync {
    /// Read a value. `Ok(None)` when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StateError>;
}

/// In-memory datastore. Clones share the same data, so a test can drop an
/// engine and build a new one over the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatastore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One file per key under a root directory.
#[derive(Clone, Debug)]
pub struct FileDatastore {
    root: PathBuf,
}

impl FileDatastore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl Datastore for FileDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            key: key.to_string(),
            source,
        };
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)
    }
}

/// Typed access to the three engine records.
#[derive(Clone)]
pub struct StateStore {
    ds: Arc<dyn Datastore>,
}

impl StateStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self { ds }
    }

    pub fn load_latest(&self) -> Result<Option<Cid>, StateError> {
        match self.ds.get(LATEST_KEY)? {
            None => Ok(None),
            Some(bytes) => Cid::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| StateError::Decode {
                    key: LATEST_KEY,
                    reason: e.to_string(),
                }),
        }
    }

    pub fn store_latest(&self, cid: &Cid) -> Result<(), StateError> {
        self.ds.put(LATEST_KEY, cid.as_bytes())
    }

    pub fn load_history(&self) -> Result<Vec<Cid>, StateError> {
        self.load_json(HISTORY_KEY)
    }

    pub fn store_history(&self, history: &[Cid]) -> Result<(), StateError> {
        self.store_json(HISTORY_KEY, history)
    }

    pub fn load_pending(&self) -> Result<BTreeSet<Cid>, StateError> {
        self.load_json(PENDING_KEY)
    }

    pub fn store_pending(&self, pending: &BTreeSet<Cid>) -> Result<(), StateError> {
        self.store_json(PENDING_KEY, pending)
    }

    fn load_json<T>(&self, key: &'static str) -> Result<T, StateError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.ds.get(key)? {
            None => Ok(T::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StateError::Decode {
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn store_json<T: serde::Serialize + ?Sized>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StateError> {
        let bytes =
            serde_json::to_vec(value).map_err(|source| StateError::Encode { key, source })?;
        self.ds.put(key, &bytes)
    }
}
