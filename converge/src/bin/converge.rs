use clap::{Parser, ValueEnum};
use converge::config::{
  CounterStrategy, DisseminationConfig, KvService, NodeConfig, TopologySource,
  WriteSemantics,
};
use converge::core::{Node, Result};
use converge::info;
use converge::testkit::{init_logging, LogLevel};
use converge::workloads::{
  Broadcast, Counter, ReplicatedLog, TxnStore, UniqueIds,
};
use std::time::Duration;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Workload {
  Generate,
  Broadcast,
  Counter,
  Log,
  Txn,
}

/// Runs one cluster member, speaking JSON lines over stdin and stdout.
#[derive(Debug, Parser)]
#[command(name = "converge", version)]
struct Args {
  #[arg(value_enum, env = "CONVERGE_WORKLOAD")]
  workload: Workload,
  /// Dissemination worker tasks.
  #[arg(long, env = "CONVERGE_WORKERS", default_value_t = 10)]
  workers: usize,
  /// Minimum time between two delivery attempts to one neighbor.
  #[arg(long, env = "CONVERGE_BACKOFF_MS", default_value_t = 250)]
  backoff_ms: u64,
  /// Timeout of every request this node makes.
  #[arg(long, env = "CONVERGE_RPC_TIMEOUT_MS", default_value_t = 1000)]
  rpc_timeout_ms: u64,
  /// Maximum neighbors per node in the broadcast tree.
  #[arg(long, env = "CONVERGE_FANOUT", default_value_t = converge::cluster::FANOUT)]
  fanout: usize,
  #[arg(long, value_enum, env = "CONVERGE_TOPOLOGY", default_value = "tree")]
  topology: TopologySource,
  #[arg(long, value_enum, env = "CONVERGE_COUNTER", default_value = "shards")]
  counter: CounterStrategy,
  /// Durable store service. Defaults to seq-kv for the counter and lin-kv
  /// for the log.
  #[arg(long, value_enum, env = "CONVERGE_KV")]
  kv: Option<KvService>,
  #[arg(
    long,
    value_enum,
    env = "CONVERGE_WRITE_SEMANTICS",
    default_value = "copy"
  )]
  write_semantics: WriteSemantics,
}
impl Args {
  fn config(&self) -> NodeConfig {
    let timeout = Duration::from_millis(self.rpc_timeout_ms);
    NodeConfig {
      dissemination: DisseminationConfig {
        workers: self.workers,
        backoff: Duration::from_millis(self.backoff_ms),
        rpc_timeout: timeout,
      },
      fanout: self.fanout,
      topology: self.topology,
      counter: self.counter,
      kv: self.kv,
      request_timeout: timeout,
      write_semantics: self.write_semantics,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  init_logging();
  let args = Args::parse();
  let config = args.config();
  info!(LogLevel::Info, "converge", format!("starting: {:?}", args));
  match args.workload {
    Workload::Generate => Node::run(UniqueIds::new).await,
    Workload::Broadcast => Node::run(|m| Broadcast::new(m, &config)).await,
    Workload::Counter => Node::run(|m| Counter::new(m, &config)).await,
    Workload::Log => Node::run(|m| ReplicatedLog::new(m, &config)).await,
    Workload::Txn => Node::run(|m| TxnStore::new(m, &config)).await,
  }
}
