use crate::config::KvService;
use crate::core::{Body, Error, Messenger, Payload, PeerId, Result, Service};
use crate::testkit::{
  FailureConfig, FailureConfigMap, FailureMode, LogLevel, MemKv,
};
use crate::trace;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const LOG_LEVEL: LogLevel = LogLevel::Trace;

/// The id [`SimNetwork::call`] sends requests from.
pub const CLIENT: &str = "c1";

struct NetInner {
  peers: Vec<PeerId>,
  endpoints: RwLock<HashMap<PeerId, Arc<dyn Service>>>,
  kvs: HashMap<PeerId, Arc<MemKv>>,
  fail_map: RwLock<FailureConfigMap>,
  mode: RwLock<FailureMode>,
  cut: RwLock<HashSet<(PeerId, PeerId)>>,
}
impl NetInner {
  fn is_member(&self, peer: &str) -> bool {
    self.peers.iter().any(|p| p == peer)
  }

  /// Faults only apply between members. Clients and store services are
  /// always reachable.
  fn faults(&self, src: &str, dest: &str) -> Option<(FailureConfig, FailureMode)> {
    if self.is_member(src) && self.is_member(dest) {
      Some((*self.fail_map.read().get(dest), *self.mode.read()))
    } else {
      None
    }
  }

  fn is_cut(&self, src: &str, dest: &str) -> bool {
    self.cut.read().contains(&(src.to_string(), dest.to_string()))
  }

  fn endpoint(&self, dest: &str) -> Result<Arc<dyn Service>> {
    self
      .endpoints
      .read()
      .get(dest)
      .cloned()
      .ok_or_else(|| Error::from_code(1, format!("no such node: {}", dest)))
  }

  /// Carries `payload` to `dest` and its reply back. Never resolves when a
  /// leg is lost, leaving the caller's timeout to fire.
  async fn exchange(
    &self,
    src: &str,
    dest: &str,
    payload: Payload,
  ) -> Result<Payload> {
    let faults = self.faults(src, dest);
    if self.is_cut(src, dest) {
      trace!(LOG_LEVEL, src, format!("partitioned from {}", dest));
      return pending().await;
    }
    if let Some((cfg, mode)) = faults {
      if mode.requests() {
        lose_or_delay(src, dest, &cfg).await;
      }
    }
    let service = self.endpoint(dest)?;
    let from = src.to_string();
    let handled = tokio::spawn(async move { service.recv(&from, payload).await });
    // The handler runs to completion even if this exchange is abandoned.
    let result = match handled.await {
      Ok(result) => result,
      Err(e) => Err(Error::from_code(13, e.to_string())),
    };
    if self.is_cut(dest, src) {
      return pending().await;
    }
    if let Some((cfg, mode)) = faults {
      if mode.responses() {
        lose_or_delay(dest, src, &cfg).await;
      }
    }
    // Errors travel as `error{code, text}` on a real wire.
    result.map_err(|e| Error::from_code(e.code().into(), e.to_string()))
  }
}

async fn lose_or_delay(src: &str, dest: &str, cfg: &FailureConfig) {
  if cfg.drops() {
    trace!(LOG_LEVEL, src, format!("lost message to {}", dest));
    return pending().await;
  }
  if let Some(delay) = cfg.sample_delay() {
    sleep(delay).await;
  }
}

/// An in-process cluster. Members are named `n0`, `n1`, ..., and the store
/// services `seq-kv` and `lin-kv` are always present, backed by [`MemKv`].
#[derive(Clone)]
pub struct SimNetwork {
  inner: Arc<NetInner>,
}
impl SimNetwork {
  pub fn new(nodes: usize) -> SimNetwork {
    let peers = (0..nodes).map(|i| format!("n{}", i)).collect::<Vec<_>>();
    let mut endpoints: HashMap<PeerId, Arc<dyn Service>> = HashMap::new();
    let mut kvs = HashMap::new();
    for service in [KvService::SeqKv, KvService::LinKv] {
      let kv = Arc::new(MemKv::new());
      endpoints.insert(service.node_id().to_string(), kv.clone());
      kvs.insert(service.node_id().to_string(), kv);
    }
    SimNetwork {
      inner: Arc::new(NetInner {
        peers: peers,
        endpoints: RwLock::new(endpoints),
        kvs: kvs,
        fail_map: RwLock::new(FailureConfigMap::default()),
        mode: RwLock::new(FailureMode::None),
        cut: RwLock::new(HashSet::new()),
      }),
    }
  }

  pub fn with_failures(self, fail_map: FailureConfigMap, mode: FailureMode) -> Self {
    self.set_failures(fail_map, mode);
    self
  }

  pub fn set_failures(&self, fail_map: FailureConfigMap, mode: FailureMode) {
    *self.inner.fail_map.write() = fail_map;
    *self.inner.mode.write() = mode;
  }

  pub fn peers(&self) -> &[PeerId] {
    &self.inner.peers
  }

  pub fn kv(&self, service: KvService) -> Arc<MemKv> {
    // Both services are inserted by `new`.
    self.inner.kvs[service.node_id()].clone()
  }

  pub fn messenger(&self, id: &str) -> SimMessenger {
    SimMessenger {
      id: id.to_string(),
      net: self.inner.clone(),
    }
  }

  /// Builds a service for every member and attaches it to the network.
  pub fn spawn<S, F>(&self, mut factory: F) -> Vec<Arc<S>>
  where
    S: Service,
    F: FnMut(Arc<dyn Messenger>) -> S,
  {
    self
      .inner
      .peers
      .iter()
      .map(|id| {
        let messenger: Arc<dyn Messenger> = Arc::new(self.messenger(id));
        let service = Arc::new(factory(messenger));
        let endpoint: Arc<dyn Service> = service.clone();
        self.inner.endpoints.write().insert(id.clone(), endpoint);
        service
      })
      .collect()
  }

  /// A client request. Clients are never subject to faults.
  pub async fn call(&self, dest: &str, payload: Payload) -> Result<Payload> {
    self.inner.exchange(CLIENT, dest, payload).await
  }

  /// Cuts every link between `side` and the rest of the members.
  pub fn partition(&self, side: &[&str]) {
    let mut cut = self.inner.cut.write();
    for a in self.inner.peers.iter().filter(|p| side.contains(&p.as_str())) {
      for b in self.inner.peers.iter().filter(|p| !side.contains(&p.as_str())) {
        cut.insert((a.clone(), b.clone()));
        cut.insert((b.clone(), a.clone()));
      }
    }
  }

  pub fn heal(&self) {
    self.inner.cut.write().clear();
  }
}

/// A member's view of a [`SimNetwork`].
pub struct SimMessenger {
  id: PeerId,
  net: Arc<NetInner>,
}
#[async_trait]
impl Messenger for SimMessenger {
  fn id(&self) -> &str {
    &self.id
  }

  fn peers(&self) -> &[PeerId] {
    &self.net.peers
  }

  async fn deliver(&self, dest: &str, body: Body) -> Result<()> {
    let net = self.net.clone();
    let src = self.id.clone();
    let dest = dest.to_string();
    tokio::spawn(async move {
      let _ = net.exchange(&src, &dest, body.payload).await;
    });
    Ok(())
  }

  async fn rpc(
    &self,
    dest: &str,
    payload: Payload,
    limit: Duration,
  ) -> Result<Payload> {
    match timeout(limit, self.net.exchange(&self.id, dest, payload)).await {
      Ok(result) => result,
      Err(_) => Err(Error::Timeout(dest.to_string())),
    }
  }
}

/// Polls `cond` until it holds or `limit` passes. Returns the last outcome.
pub async fn wait_until<F: FnMut() -> bool>(limit: Duration, mut cond: F) -> bool {
  let deadline = Instant::now() + limit;
  loop {
    if cond() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    sleep(Duration::from_millis(20)).await;
  }
}
