//! Integration tests for the publish / announce / confirm lifecycle.
//!
//! Tests cover:
//! - Chain integrity and idempotence of published advertisements
//! - Pending set and push history bookkeeping across transports
//! - Announce failures that leave local state in place
//! - Restart from persisted state
//! - Cache-miss fetches and bounded syncs against an upstream
//! - Background reconciliation and shutdown

use adchain_engine::state::{LATEST_KEY, PENDING_KEY};
use adchain_engine::{
    Datastore, Engine, EngineConfig, EngineConfigBuilder, EngineError, GossipNetwork,
    IndexClient, IndexError, MemoryDatastore, MemoryGossip, MetaInclusion, PublisherKind,
    StateError, StateStore, TransportError,
};
use adchain_merkle::{
    shared, Advertisement, AdvertisementBuilder, Cid, DagStore, MemoryDagStore,
    MemoryRemoteDag, Payload, RemoteDag, SharedDagStore, SyncError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct TestIndex {
    included: Mutex<HashSet<Cid>>,
    heads: Mutex<Vec<(String, Cid)>>,
}

impl TestIndex {
    fn include_all(&self, cids: impl IntoIterator<Item = Cid>) {
        self.included.lock().extend(cids);
    }
}

#[async_trait]
impl IndexClient for TestIndex {
    async fn provider_head(&self, provider: &str) -> Result<Cid, IndexError> {
        self.heads
            .lock()
            .iter()
            .find(|(p, _)| p == provider)
            .map(|(_, cid)| *cid)
            .ok_or(IndexError::MissingData {
                code: 404,
                message: "unknown provider".into(),
            })
    }

    async fn inclusion(&self, cid: &Cid) -> Result<MetaInclusion, IndexError> {
        Ok(MetaInclusion {
            in_pando: self.included.lock().contains(cid),
            ..Default::default()
        })
    }
}

/// Gossip network that is always down.
struct BrokenGossip;

#[async_trait]
impl GossipNetwork for BrokenGossip {
    async fn publish(&self, _topic: &str, _data: Vec<u8>) -> Result<(), TransportError> {
        Err(TransportError::Gossip("no route to peers".into()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        Err(TransportError::Gossip("close failed".into()))
    }
}

/// Memory datastore whose writes to selected keys fail.
#[derive(Default)]
struct FlakyDatastore {
    inner: MemoryDatastore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyDatastore {
    fn fail_writes_to(&self, key: &'static str) {
        self.failing.lock().insert(key);
    }
}

impl Datastore for FlakyDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StateError> {
        if self.failing.lock().contains(key) {
            return Err(StateError::Write {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put(key, value)
    }
}

/// Upstream that stalls on one cid.
struct StallingRemote {
    inner: MemoryRemoteDag<MemoryDagStore>,
    stall_on: Cid,
}

#[async_trait]
impl RemoteDag for StallingRemote {
    async fn fetch(&self, cid: &Cid) -> Result<Advertisement, SyncError> {
        if *cid == self.stall_on {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.fetch(cid).await
    }
}

fn config(kind: PublisherKind) -> EngineConfig {
    EngineConfigBuilder::new()
        .provider_id("provider-1")
        .publisher_kind(kind)
        .check_interval(3_600_000)
        .cat_timeout(2_000)
        .build()
}

struct Harness {
    engine: Engine<MemoryDagStore>,
    ds: MemoryDatastore,
    index: Arc<TestIndex>,
}

fn harness(
    config: EngineConfig,
    ds: MemoryDatastore,
    upstream: Option<Arc<dyn RemoteDag>>,
) -> Harness {
    let index = Arc::new(TestIndex::default());
    let engine = Engine::new(
        config,
        Arc::new(ds.clone()),
        shared(MemoryDagStore::new()),
        index.clone(),
        upstream,
    )
    .unwrap();
    Harness { engine, ds, index }
}

fn gossip_harness() -> (Harness, Arc<MemoryGossip>) {
    let network = Arc::new(MemoryGossip::default());
    let mut h = harness(config(PublisherKind::Gossip), MemoryDatastore::new(), None);
    h.engine.start(Some(network.clone())).unwrap();
    (h, network)
}

fn remote_chain(n: usize) -> (SharedDagStore<MemoryDagStore>, Vec<Cid>) {
    let store = shared(MemoryDagStore::new());
    let mut previous = None;
    let mut cids = Vec::new();
    for i in 0..n {
        let ad = AdvertisementBuilder::new()
            .with_previous(previous)
            .with_provider("upstream")
            .with_payload(Payload::bytes(format!("remote_{}", i).into_bytes()))
            .build();
        let cid = store.write().put(ad).unwrap();
        previous = Some(cid);
        cids.push(cid);
    }
    (store, cids)
}

#[tokio::test]
async fn test_chain_integrity() {
    let (mut h, _network) = gossip_harness();

    let mut published = Vec::new();
    for i in 0..5u8 {
        let before = h.engine.latest();
        let cid = h.engine.publish_bytes(vec![i]).await.unwrap();

        let ad = h.engine.dag().read().get(&cid).cloned().unwrap();
        assert_eq!(ad.previous, before);
        assert_eq!(ad.previous, published.last().copied());
        published.push(cid);
    }

    assert_eq!(h.engine.latest(), published.last().copied());
    assert_eq!(h.engine.push_history(), published.as_slice());
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identical_content_is_idempotent() {
    let mut a = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);
    let mut b = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);

    let first_a = a.engine.publish_bytes(b"same".to_vec()).await.unwrap();
    let first_b = b.engine.publish_bytes(b"same".to_vec()).await.unwrap();
    assert_eq!(first_a, first_b);

    let second_a = a.engine.publish(Payload::structured(serde_json::json!({"k": 1}))).await.unwrap();
    let second_b = b.engine.publish(Payload::structured(serde_json::json!({"k": 1}))).await.unwrap();
    assert_eq!(second_a, second_b);
}

#[tokio::test]
async fn test_announced_ids_become_pending() {
    let (mut h, network) = gossip_harness();
    let mut rx = network.subscribe();

    let cid = h.engine.publish_bytes(b"meta".to_vec()).await.unwrap();

    let (_, data) = rx.recv().await.unwrap();
    let announcement: adchain_engine::Announcement = serde_json::from_slice(&data).unwrap();
    assert_eq!(announcement.root, cid);
    assert!(h.engine.pending().contains(&cid));
    for id in h.engine.pending() {
        assert!(h.engine.push_history().contains(&id));
    }
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_transport_only_stores_locally() {
    let mut h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);
    h.engine.start(None).unwrap();

    let cid = h.engine.publish_bytes(b"quiet".to_vec()).await.unwrap();

    assert!(h.engine.pending().is_empty());
    assert_eq!(h.engine.push_history(), &[cid]);
    assert_eq!(h.engine.cat_cid(&cid).await.unwrap(), b"quiet".to_vec());
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_announce_failure_keeps_local_state() {
    let mut h = harness(config(PublisherKind::Gossip), MemoryDatastore::new(), None);
    h.engine.start(Some(Arc::new(BrokenGossip))).unwrap();

    let result = h.engine.publish_bytes(b"stranded".to_vec()).await;
    assert!(matches!(result, Err(EngineError::Transport(_))));

    let latest = h.engine.latest().unwrap();
    assert_eq!(h.engine.push_history(), &[latest]);
    assert!(h.engine.pending().is_empty());
    assert_eq!(h.engine.cat_cid(&latest).await.unwrap(), b"stranded".to_vec());

    let shutdown = h.engine.shutdown().await.unwrap_err();
    assert_eq!(shutdown.0.len(), 1);
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_publish_latest() {
    let (mut h, network) = gossip_harness();
    assert!(matches!(
        h.engine.publish_latest().await,
        Err(EngineError::NoLatest)
    ));

    let cid = h.engine.publish_bytes(b"one".to_vec()).await.unwrap();
    let pending_before = h.engine.pending();
    let mut rx = network.subscribe();

    assert_eq!(h.engine.publish_latest().await.unwrap(), cid);
    let (_, data) = rx.recv().await.unwrap();
    let announcement: adchain_engine::Announcement = serde_json::from_slice(&data).unwrap();
    assert_eq!(announcement.root, cid);
    assert_eq!(h.engine.pending(), pending_before);
    assert_eq!(h.engine.push_history(), &[cid]);
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_restores_state() {
    let ds = MemoryDatastore::new();
    let network = Arc::new(MemoryGossip::default());
    let mut first = harness(config(PublisherKind::Gossip), ds.clone(), None);
    first.engine.start(Some(network.clone())).unwrap();
    for i in 0..3u8 {
        first.engine.publish_bytes(vec![i]).await.unwrap();
    }
    let latest = first.engine.latest();
    let history = first.engine.push_history().to_vec();
    let pending = first.engine.pending();
    drop(first);

    let mut second = harness(config(PublisherKind::Gossip), ds, None);
    assert_eq!(second.engine.latest(), latest);
    assert_eq!(second.engine.push_history(), history.as_slice());
    assert_eq!(second.engine.pending(), pending);

    second.engine.start(Some(network)).unwrap();
    assert_eq!(second.engine.announcer().root(), latest);
    second.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cat_falls_back_to_upstream() {
    let (remote, cids) = remote_chain(3);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let data = h.engine.cat_cid(&cids[1]).await.unwrap();

    assert_eq!(data, b"remote_1".to_vec());
    let local = h.engine.dag().read();
    assert!(local.contains(&cids[1]));
    assert_eq!(local.len(), 1);
}

#[tokio::test]
async fn test_cat_rejects_mismatched_upstream_node() {
    let (remote, cids) = remote_chain(2);
    let other = remote.read().get(&cids[0]).cloned().unwrap();
    remote.write().insert_raw(cids[1], other);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let result = h.engine.cat_cid(&cids[1]).await;

    assert!(matches!(result, Err(EngineError::SyncMismatch(_))));
}

#[tokio::test]
async fn test_cat_rejects_malformed_cid() {
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);
    assert!(matches!(
        h.engine.cat("not-a-cid").await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_sync_depth_bound() {
    let (remote, cids) = remote_chain(5);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let synced = h.engine.sync(&cids[4].to_string(), 2, "").await.unwrap();

    assert_eq!(synced, vec![cids[4], cids[3]]);
}

#[tokio::test]
async fn test_sync_with_end_cid_and_deadline() {
    let (remote, cids) = remote_chain(5);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let synced = h
        .engine
        .sync_with_deadline(
            &cids[4].to_string(),
            0,
            &cids[2].to_string(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(synced, vec![cids[4], cids[3]]);
    assert!(matches!(
        h.engine.sync("bogus", 0, "").await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_sync_with_provider_uses_index_head() {
    let (remote, cids) = remote_chain(4);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));
    h.index.heads.lock().push(("upstream".to_string(), cids[3]));

    let synced = h.engine.sync_with_provider("upstream", 0, "").await.unwrap();
    assert_eq!(synced.len(), 4);

    let unknown = h.engine.sync_with_provider("stranger", 0, "").await;
    assert!(matches!(unknown, Err(EngineError::Index(_))));
}

#[tokio::test]
async fn test_sync_without_upstream_is_config_error() {
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);
    let cid = adchain_merkle::CidHasher::hash(b"x");
    assert!(matches!(
        h.engine.sync(&cid.to_string(), 1, "").await,
        Err(EngineError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_background_loop_confirms_pending() {
    let network = Arc::new(MemoryGossip::default());
    let cfg = EngineConfigBuilder::new()
        .provider_id("provider-1")
        .publisher_kind(PublisherKind::Gossip)
        .check_interval(20)
        .build();
    let mut h = harness(cfg, MemoryDatastore::new(), None);
    h.engine.start(Some(network)).unwrap();

    let a = h.engine.publish_bytes(b"a".to_vec()).await.unwrap();
    let b = h.engine.publish_bytes(b"b".to_vec()).await.unwrap();
    assert_eq!(h.engine.pending().len(), 2);

    h.index.include_all([a, b]);
    for _ in 0..200 {
        if h.engine.pending().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.engine.pending().is_empty());
    assert_eq!(h.engine.push_history(), &[a, b]);

    h.engine.shutdown().await.unwrap();
    let reopened = harness(config(PublisherKind::Disabled), h.ds.clone(), None);
    assert!(reopened.engine.pending().is_empty());
}

#[tokio::test]
async fn test_double_start_rejected() {
    let mut h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), None);
    h.engine.start(None).unwrap();
    assert!(h.engine.is_running());
    assert!(matches!(h.engine.start(None), Err(EngineError::AlreadyStarted)));
    h.engine.shutdown().await.unwrap();
    assert!(!h.engine.is_running());
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let cfg = EngineConfigBuilder::new()
        .provider_id("p")
        .publisher_kind(PublisherKind::Http)
        .build();
    let result = Engine::new(
        cfg,
        Arc::new(MemoryDatastore::new()),
        shared(MemoryDagStore::new()),
        Arc::new(TestIndex::default()),
        None,
    );
    assert!(matches!(result, Err(EngineError::Configuration(_))));
}

fn flaky_engine(ds: Arc<FlakyDatastore>) -> Engine<MemoryDagStore> {
    Engine::new(
        config(PublisherKind::Gossip),
        ds,
        shared(MemoryDagStore::new()),
        Arc::new(TestIndex::default()),
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn test_latest_write_failure_surfaces_without_announcing() {
    let ds = Arc::new(FlakyDatastore::default());
    let network = Arc::new(MemoryGossip::default());
    let mut rx = network.subscribe();
    let mut engine = flaky_engine(ds.clone());
    engine.start(Some(network)).unwrap();
    ds.fail_writes_to(LATEST_KEY);

    let result = engine.publish_bytes(b"unsaved".to_vec()).await;

    assert!(matches!(result, Err(EngineError::State(StateError::Write { .. }))));
    let latest = engine.latest().unwrap();
    assert_eq!(engine.push_history(), &[latest]);
    assert!(engine.dag().read().contains(&latest));
    assert!(engine.pending().is_empty());
    assert!(rx.try_recv().is_err());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pending_write_failure_keeps_announced_id() {
    let ds = Arc::new(FlakyDatastore::default());
    let mut engine = flaky_engine(ds.clone());
    engine.start(Some(Arc::new(MemoryGossip::default()))).unwrap();
    ds.fail_writes_to(PENDING_KEY);

    let result = engine.publish_bytes(b"announced".to_vec()).await;

    assert!(matches!(result, Err(EngineError::State(_))));
    let latest = engine.latest().unwrap();
    assert!(engine.pending().contains(&latest));

    let stored = StateStore::new(Arc::new(ds.inner.clone()));
    assert_eq!(stored.load_latest().unwrap(), Some(latest));
    assert_eq!(stored.load_history().unwrap(), vec![latest]);
    assert!(stored.load_pending().unwrap().is_empty());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sync_deadline_expiry_keeps_fetched_nodes() {
    let (remote, cids) = remote_chain(5);
    let upstream: Arc<dyn RemoteDag> = Arc::new(StallingRemote {
        inner: MemoryRemoteDag::new(remote),
        stall_on: cids[2],
    });
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let result = h
        .engine
        .sync_with_deadline(&cids[4].to_string(), 0, "", Duration::from_millis(200))
        .await;

    assert!(matches!(result, Err(EngineError::SyncFailed(SyncError::Timeout))));
    let local = h.engine.dag().read();
    assert!(local.contains(&cids[4]));
    assert!(local.contains(&cids[3]));
    assert!(!local.contains(&cids[2]));
}

#[tokio::test]
async fn test_sync_rejects_substituted_node() {
    let (remote, cids) = remote_chain(3);
    let other = remote.read().get(&cids[0]).cloned().unwrap();
    remote.write().insert_raw(cids[2], other);
    let upstream: Arc<dyn RemoteDag> = Arc::new(MemoryRemoteDag::new(remote));
    let h = harness(config(PublisherKind::Disabled), MemoryDatastore::new(), Some(upstream));

    let result = h.engine.sync(&cids[2].to_string(), 0, "").await;

    assert!(matches!(result, Err(EngineError::SyncMismatch(_))));
    assert!(h.engine.dag().read().is_empty());
}
