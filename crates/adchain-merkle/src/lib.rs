//! # adchain-merkle
//!
//! Content-addressed advertisement chain for a publishing node.
//!
//! This crate provides:
//! - SHA-256 content identifiers for advertisement nodes
//! - Advertisements linked into a singly-linked, append-only chain
//! - DagStore for verified, content-addressed storage
//! - ChainSyncer for depth- and stop-bounded pulls from a remote peer
//!
//! ## Example
//!
//! ```rust
//! use adchain_merkle::{AdvertisementBuilder, DagStore, MemoryDagStore, Payload};
//!
//! let mut store = MemoryDagStore::new();
//!
//! let first = AdvertisementBuilder::new()
//!     .with_provider("peer-1")
//!     .with_payload(Payload::bytes(b"hello".to_vec()))
//!     .build();
//! let first_cid = store.put(first).unwrap();
//!
//! let second = AdvertisementBuilder::new()
//!     .with_previous(Some(first_cid))
//!     .with_provider("peer-1")
//!     .with_payload(Payload::bytes(b"world".to_vec()))
//!     .build();
//! let second_cid = store.put(second).unwrap();
//!
//! assert_eq!(store.chain(&second_cid, usize::MAX), vec![second_cid, first_cid]);
//! ```

mod advertisement;
mod cid;
mod store;
mod syncer;

pub use advertisement::{Advertisement, AdvertisementBuilder, Payload};
pub use cid::{Cid, CidHasher, CidParseError, CID_LEN};
pub use store::{shared, DagError, DagStore, MemoryDagStore, SharedDagStore};
pub use syncer::{
    ChainSyncer, MemoryRemoteDag, RecursionLimit, RemoteDag, Selector, SyncError, UNBOUNDED_DEPTH,
};
