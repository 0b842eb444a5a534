//! # adchain-engine
//!
//! Publish, announce and confirm lifecycle for a node's advertisement chain.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use adchain_engine::{Engine, EngineConfigBuilder, HttpIndexClient, MemoryDatastore};
//! use adchain_merkle::{shared, MemoryDagStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfigBuilder::new()
//!     .provider_id("peer-1")
//!     .index_url("http://127.0.0.1:9000")
//!     .build();
//! let index = Arc::new(HttpIndexClient::from_config(&config)?);
//!
//! let mut engine = Engine::new(
//!     config,
//!     Arc::new(MemoryDatastore::new()),
//!     shared(MemoryDagStore::new()),
//!     index,
//!     None,
//! )?;
//! engine.start(None)?;
//!
//! let cid = engine.publish_bytes(b"hello".to_vec()).await?;
//! assert_eq!(engine.cat_cid(&cid).await?, b"hello".to_vec());
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`state`] - Persisted latest pointer, push history and pending set
//! - [`transport`] - Announcement transports (disabled, gossip, HTTP pull)
//! - [`remote`] - Fetching advertisements from a peer's HTTP publisher
//! - [`index`] - Remote index client
//! - [`reconcile`] - Background confirmation loop
//! - [`engine`] - The publish engine tying it all together
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod transport;

pub use config::{ConfigError, EngineConfig, EngineConfigBuilder, PublisherKind};
pub use engine::Engine;
pub use error::{EngineError, Result, ShutdownError};
pub use index::{HttpIndexClient, IndexClient, IndexError, MetaInclusion};
pub use reconcile::{PendingSet, Reconciler};
pub use remote::HttpRemoteDag;
pub use state::{Datastore, FileDatastore, MemoryDatastore, StateError, StateStore};
pub use transport::{
    Announcement, Announcer, GossipAnnouncer, GossipNetwork, HttpAnnouncer, MemoryGossip,
    TransportError,
};
