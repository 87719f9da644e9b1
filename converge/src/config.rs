use crate::cluster::FANOUT;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures a [`Dissemination`](crate::cluster::Dissemination) engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisseminationConfig {
  /// The number of worker tasks draining outboxes. Each worker holds at most
  /// one neighbor at a time.
  ///
  /// default: `10`
  pub workers: usize,
  /// The window a worker waits, measured from the start of a delivery
  /// attempt, before it looks at the outcome. Bounds the resend rate toward
  /// an unreachable neighbor.
  ///
  /// default: `250 milliseconds`
  pub backoff: Duration,
  /// How long a delivery RPC may go unanswered before the batch is put back.
  ///
  /// default: `1 second`
  pub rpc_timeout: Duration,
}
impl Default for DisseminationConfig {
  #[inline]
  fn default() -> Self {
    DisseminationConfig {
      workers: 10,
      backoff: Duration::from_millis(250),
      rpc_timeout: Duration::from_millis(1000),
    }
  }
}

/// Where a broadcast node takes its neighbors from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum TopologySource {
  /// Derive the bounded-fanout spanning tree from the `init` peer list and
  /// ignore `topology` messages.
  Tree,
  /// Adopt this node's row of the first `topology` message.
  Provided,
}

/// How the grow-only counter stores its total.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum CounterStrategy {
  /// One shared durable cell, updated by a compare-and-swap retry loop.
  DurableCas,
  /// One durable cell per node, summed on read across all peers.
  Shards,
}

/// The durable key/value service a workload persists to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum KvService {
  SeqKv,
  LinKv,
}
impl KvService {
  pub fn node_id(&self) -> &'static str {
    match self {
      KvService::SeqKv => "seq-kv",
      KvService::LinKv => "lin-kv",
    }
  }
}

/// What a `w` micro-operation assigns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum WriteSemantics {
  /// `values[key] = values[value]`: the value slot names the source key.
  Copy,
  /// `values[key] = value`.
  Literal,
}

/// Configures every workload a node may run. Options irrelevant to the
/// chosen workload are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
  pub dissemination: DisseminationConfig,
  /// The maximum number of neighbors of a node in the spanning tree.
  ///
  /// default: `5`
  pub fanout: usize,
  /// default: `TopologySource::Tree`
  pub topology: TopologySource,
  /// default: `CounterStrategy::Shards`
  pub counter: CounterStrategy,
  /// The durable service used by the counter and the log. `None` picks
  /// `seq-kv` for the counter and `lin-kv` for the log.
  ///
  /// default: `None`
  pub kv: Option<KvService>,
  /// Timeout of durable store requests and of `local` queries to peers.
  ///
  /// default: `1 second`
  pub request_timeout: Duration,
  /// default: `WriteSemantics::Copy`
  pub write_semantics: WriteSemantics,
}
impl Default for NodeConfig {
  #[inline]
  fn default() -> Self {
    NodeConfig {
      dissemination: DisseminationConfig::default(),
      fanout: FANOUT,
      topology: TopologySource::Tree,
      counter: CounterStrategy::Shards,
      kv: None,
      request_timeout: Duration::from_millis(1000),
      write_semantics: WriteSemantics::Copy,
    }
  }
}
