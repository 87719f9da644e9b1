use crate::cluster::{Courier, Dissemination, SeenSet, Topology};
use crate::config::{NodeConfig, TopologySource};
use crate::core::{Messenger, Payload, PeerId, Result, Service};
use crate::workloads::LOG_LEVEL;
use crate::{debug, info};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Batches of integers travel as `multi_broadcast`, acknowledged by
/// `broadcast_ok`.
pub struct BroadcastCourier;
impl Courier<i64> for BroadcastCourier {
  fn package(&self, batch: Vec<i64>) -> Payload {
    Payload::MultiBroadcast { message: batch }
  }

  fn acknowledged(&self, reply: &Payload) -> bool {
    matches!(reply, Payload::BroadcastOk)
  }
}

/// Gossips integers to every member of the cluster.
///
/// A value is accepted at most once. Each newly accepted value is handed to
/// the dissemination engine for every neighbor except the one it came from.
pub struct Broadcast {
  messenger: Arc<dyn Messenger>,
  source: TopologySource,
  neighbors: OnceCell<Vec<PeerId>>,
  seen: SeenSet<i64>,
  engine: Dissemination<i64>,
}
impl Broadcast {
  pub fn new(messenger: Arc<dyn Messenger>, config: &NodeConfig) -> Broadcast {
    let neighbors = OnceCell::new();
    if config.topology == TopologySource::Tree {
      let tree = Topology::spanning_tree(messenger.peers(), config.fanout);
      let _ = neighbors.set(tree.neighbors(messenger.id()));
    }
    let engine = Dissemination::new(
      messenger.clone(),
      BroadcastCourier,
      config.dissemination.clone(),
    );
    Broadcast {
      messenger: messenger,
      source: config.topology,
      neighbors: neighbors,
      seen: SeenSet::new(),
      engine: engine,
    }
  }

  /// Every value accepted so far, ascending.
  pub fn messages(&self) -> Vec<i64> {
    self.seen.snapshot()
  }

  /// Empty until the neighbors are known.
  pub fn neighbors(&self) -> Vec<PeerId> {
    self.neighbors.get().cloned().unwrap_or_default()
  }

  /// Whether every accepted value has been acknowledged by every neighbor.
  pub fn is_quiet(&self) -> bool {
    self.engine.is_idle()
  }

  fn accept(&self, src: &str, values: Vec<i64>) {
    let fresh = self.seen.observe_all(values);
    if fresh.is_empty() {
      return;
    }
    // Before a provided topology arrives, values are only recorded. They are
    // forwarded in bulk once the neighbors are known.
    if let Some(neighbors) = self.neighbors.get() {
      self.engine.enqueue_except(neighbors, &fresh, src);
    }
  }

  fn adopt(&self, topology: BTreeMap<PeerId, Vec<PeerId>>) {
    if self.source != TopologySource::Provided {
      return;
    }
    let id = self.messenger.id();
    let row = topology.get(id).cloned().unwrap_or_default();
    let neighbors = Topology::from_row(id, &row).neighbors(id);
    match self.neighbors.set(neighbors) {
      Ok(()) => {
        info!(
          LOG_LEVEL,
          id,
          format!("neighbors: {:?}", self.neighbors())
        );
        let backlog = self.seen.snapshot();
        self.engine.enqueue_except(&self.neighbors(), &backlog, id);
      }
      Err(_) => debug!(LOG_LEVEL, id, "topology already fixed; ignored"),
    }
  }
}
#[async_trait]
impl Service for Broadcast {
  async fn recv(&self, src: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Broadcast { message } => {
        self.accept(src, vec![message]);
        Ok(Payload::BroadcastOk)
      }
      Payload::MultiBroadcast { message } => {
        self.accept(src, message);
        Ok(Payload::BroadcastOk)
      }
      Payload::Read { .. } => Ok(Payload::ReadOk {
        messages: Some(self.messages()),
        value: None,
      }),
      Payload::Topology { topology } => {
        self.adopt(topology);
        Ok(Payload::TopologyOk)
      }
      other => Err(other.unsupported()),
    }
  }
}
