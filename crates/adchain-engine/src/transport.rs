//! Announcement transports.
//!
//! An [`Announcer`] makes the latest advertisement root known to the network.
//! The variant is fixed when the engine starts:
//! - `Disabled`: announcing is a no-op
//! - `Gossip`: the root is broadcast on a topic to any number of subscribers
//! - `HttpPull`: the root is served over HTTP for peers to fetch

use crate::config::{ConfigError, EngineConfig, PublisherKind};
use crate::error::{EngineError, Result};
use adchain_merkle::{Cid, DagStore, SharedDagStore};
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gossip publish failed: {0}")]
    Gossip(String),

    #[error("failed to bind http publisher on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    #[error("http publisher stopped with error: {0}")]
    Server(String),

    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publisher is closed")]
    Closed,
}

/// Message broadcast on the gossip topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub root: Cid,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

/// Topic-based broadcast network the gossip publisher writes to.
#[async_trait]
pub trait GossipNetwork: Send + Sync {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> std::result::Result<(), TransportError>;

    async fn close(&self) -> std::result::Result<(), TransportError> {
        Ok(())
    }
}

/// In-process gossip network for tests and single-host deployments.
pub struct MemoryGossip {
    tx: broadcast::Sender<(String, Vec<u8>)>,
    closed: AtomicBool,
}

impl MemoryGossip {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to every `(topic, message)` published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryGossip {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl GossipNetwork for MemoryGossip {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> std::result::Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // No subscribers is not an error.
        let _ = self.tx.send((topic.to_string(), data));
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Broadcasts the latest root on a gossip topic.
pub struct GossipAnnouncer {
    network: Arc<dyn GossipNetwork>,
    topic: String,
    provider: String,
    extra: Option<String>,
    root: RwLock<Option<Cid>>,
}

impl GossipAnnouncer {
    pub fn new(
        network: Arc<dyn GossipNetwork>,
        topic: impl Into<String>,
        provider: impl Into<String>,
        extra: Option<String>,
    ) -> Self {
        Self {
            network,
            topic: topic.into(),
            provider: provider.into(),
            extra,
            root: RwLock::new(None),
        }
    }

    fn set_root(&self, cid: Cid) {
        *self.root.write() = Some(cid);
    }

    async fn update_root(&self, cid: Cid) -> std::result::Result<(), TransportError> {
        self.set_root(cid);
        let announcement = Announcement {
            root: cid,
            provider: self.provider.clone(),
            extra: self.extra.clone(),
        };
        let data = serde_json::to_vec(&announcement)?;
        self.network.publish(&self.topic, data).await
    }
}

#[derive(Serialize, Deserialize)]
pub struct HeadResponse {
    pub root: Cid,
    pub provider: String,
}

struct HttpState<S: DagStore> {
    root: Arc<RwLock<Option<Cid>>>,
    store: SharedDagStore<S>,
    provider: String,
}

async fn serve_head<S: DagStore + 'static>(State(state): State<Arc<HttpState<S>>>) -> Response {
    let root = *state.root.read();
    match root {
        Some(root) => Json(HeadResponse {
            root,
            provider: state.provider.clone(),
        })
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn serve_ad<S: DagStore + 'static>(
    State(state): State<Arc<HttpState<S>>>,
    Path(cid): Path<String>,
) -> Response {
    let cid = match cid.parse::<Cid>() {
        Ok(cid) => cid,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let ad = state.store.read().get(&cid).cloned();
    match ad {
        Some(ad) => Json(ad).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serves the latest root and the advertisements behind it over HTTP.
///
/// `GET /head` returns the current root (204 before the first one) and
/// `GET /ad/{cid}` returns a stored advertisement.
pub struct HttpAnnouncer {
    root: Arc<RwLock<Option<Cid>>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<std::result::Result<(), axum::Error>>>,
}

impl HttpAnnouncer {
    /// Bind the listener and spawn the server. Must run inside a tokio runtime.
    pub fn bind<S: DagStore + 'static>(
        addr: SocketAddr,
        store: SharedDagStore<S>,
        provider: impl Into<String>,
    ) -> std::result::Result<Self, TransportError> {
        let root = Arc::new(RwLock::new(None));
        let state = Arc::new(HttpState {
            root: root.clone(),
            store,
            provider: provider.into(),
        });
        let app = Router::new()
            .route("/head", get(serve_head::<S>))
            .route("/ad/:cid", get(serve_ad::<S>))
            .with_state(state);

        let server = axum::Server::try_bind(&addr)
            .map_err(|e| TransportError::Bind {
                addr,
                reason: e.to_string(),
            })?
            .serve(app.into_make_service());
        let local_addr = server.local_addr();

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            server
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(axum::Error::new)
        });
        info!(addr = %local_addr, "HTTP publisher listening");

        Ok(Self {
            root,
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    /// The address the server actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn set_root(&self, cid: Cid) {
        *self.root.write() = Some(cid);
    }

    async fn close(&mut self) -> std::result::Result<(), TransportError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(TransportError::Server(e.to_string())),
                Err(e) => Err(TransportError::Server(e.to_string())),
            },
            None => Ok(()),
        }
    }
}

/// The announcement transport selected for this node.
pub enum Announcer {
    Disabled,
    Gossip(GossipAnnouncer),
    HttpPull(HttpAnnouncer),
}

impl Announcer {
    /// Build the transport the configuration asks for.
    ///
    /// Configuration mistakes (missing gossip network, missing listen
    /// address) are reported here rather than on the first announce.
    pub fn from_config<S: DagStore + 'static>(
        config: &EngineConfig,
        gossip: Option<Arc<dyn GossipNetwork>>,
        store: SharedDagStore<S>,
    ) -> Result<Self> {
        match config.publisher_kind {
            PublisherKind::Disabled => {
                info!("Remote announcements are disabled; advertisements are only stored locally");
                Ok(Announcer::Disabled)
            }
            PublisherKind::Gossip => {
                let network = gossip.ok_or(ConfigError::Missing("gossip network"))?;
                if config.topic.is_empty() {
                    return Err(ConfigError::Missing("topic").into());
                }
                Ok(Announcer::Gossip(GossipAnnouncer::new(
                    network,
                    config.topic.clone(),
                    config.provider_id.clone(),
                    config.extra_gossip_data.clone(),
                )))
            }
            PublisherKind::Http => {
                let addr = config
                    .http_listen_addr
                    .ok_or(ConfigError::Missing("http_listen_addr"))?;
                let announcer = HttpAnnouncer::bind(addr, store, config.provider_id.clone())
                    .map_err(EngineError::Transport)?;
                Ok(Announcer::HttpPull(announcer))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Announcer::Disabled)
    }

    pub fn kind(&self) -> PublisherKind {
        match self {
            Announcer::Disabled => PublisherKind::Disabled,
            Announcer::Gossip(_) => PublisherKind::Gossip,
            Announcer::HttpPull(_) => PublisherKind::Http,
        }
    }

    /// The root currently exposed, if any.
    pub fn root(&self) -> Option<Cid> {
        match self {
            Announcer::Disabled => None,
            Announcer::Gossip(g) => *g.root.read(),
            Announcer::HttpPull(h) => *h.root.read(),
        }
    }

    /// Initialize the exposed root without announcing it.
    pub fn set_root(&self, cid: Cid) {
        match self {
            Announcer::Disabled => {}
            Announcer::Gossip(g) => g.set_root(cid),
            Announcer::HttpPull(h) => h.set_root(cid),
        }
    }

    /// Expose and announce a new root. Re-announcing the current root is
    /// allowed.
    pub async fn update_root(&self, cid: Cid) -> std::result::Result<(), TransportError> {
        match self {
            Announcer::Disabled => Ok(()),
            Announcer::Gossip(g) => g.update_root(cid).await,
            Announcer::HttpPull(h) => {
                h.set_root(cid);
                debug!(cid = %cid, "HTTP publisher root updated");
                Ok(())
            }
        }
    }

    pub async fn close(&mut self) -> std::result::Result<(), TransportError> {
        match self {
            Announcer::Disabled => Ok(()),
            Announcer::Gossip(g) => g.network.close().await,
            Announcer::HttpPull(h) => h.close().await,
        }
    }
}
