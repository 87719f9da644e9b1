use crate::config::{CounterStrategy, KvService, NodeConfig};
use crate::core::{Error, Messenger, Payload, Result, Service};
use crate::storage::{read_or, DurableStore, KvClient};
use crate::workloads::LOG_LEVEL;
use crate::{debug, warn};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const COUNTER_KEY: &str = "counter";

/// A grow-only counter shared by the cluster.
///
/// With [`CounterStrategy::DurableCas`] the total lives in one durable cell
/// and every `add` is a compare-and-swap loop on it. With
/// [`CounterStrategy::Shards`] each node owns the cell named after itself,
/// only ever updates that one, and a `read` sums its own cell with the
/// partial sums peers report through `local`.
pub struct Counter {
  messenger: Arc<dyn Messenger>,
  store: Arc<dyn DurableStore>,
  strategy: CounterStrategy,
  timeout: Duration,
  /// The last value this node wrote to its own shard.
  cache: Mutex<i64>,
}
impl Counter {
  pub fn new(messenger: Arc<dyn Messenger>, config: &NodeConfig) -> Counter {
    let service = config.kv.unwrap_or(KvService::SeqKv);
    let store = KvClient::new(messenger.clone(), service, config.request_timeout);
    Counter::with_store(messenger, Arc::new(store), config)
  }

  pub fn with_store(
    messenger: Arc<dyn Messenger>,
    store: Arc<dyn DurableStore>,
    config: &NodeConfig,
  ) -> Counter {
    Counter {
      messenger: messenger,
      store: store,
      strategy: config.counter,
      timeout: config.request_timeout,
      cache: Mutex::new(0),
    }
  }

  fn cell(&self) -> &str {
    match self.strategy {
      CounterStrategy::DurableCas => COUNTER_KEY,
      CounterStrategy::Shards => self.messenger.id(),
    }
  }

  /// Retries until the compare-and-swap lands. Only conflicts are retried.
  pub async fn add(&self, delta: i64) -> Result<()> {
    let key = self.cell();
    loop {
      let old = read_or(self.store.as_ref(), key, 0i64).await?;
      let new = old.checked_add(delta).ok_or_else(|| {
        Error::Malformed(format!("adding {} to {} overflows", delta, old))
      })?;
      match self
        .store
        .compare_and_swap(key, json!(old), json!(new), true)
        .await
      {
        Ok(()) => {
          if self.strategy == CounterStrategy::Shards {
            let mut cache = self.cache.lock();
            *cache = (*cache).max(new);
          }
          return Ok(());
        }
        Err(e) if e.is_conflict() => {
          debug!(LOG_LEVEL, self.messenger.id(), format!("retrying add: {}", e));
        }
        Err(e) => return Err(e),
      }
    }
  }

  pub async fn read(&self) -> Result<i64> {
    match self.strategy {
      CounterStrategy::DurableCas => {
        read_or(self.store.as_ref(), COUNTER_KEY, 0i64).await
      }
      CounterStrategy::Shards => {
        let own = self.own_shard().await;
        Ok(own.saturating_add(self.peer_shards().await))
      }
    }
  }

  /// The partial sum this node reports to peers.
  pub fn local(&self) -> i64 {
    *self.cache.lock()
  }

  async fn own_shard(&self) -> i64 {
    let id = self.messenger.id();
    match read_or(self.store.as_ref(), id, 0i64).await {
      Ok(value) => {
        let mut cache = self.cache.lock();
        *cache = (*cache).max(value);
        *cache
      }
      Err(e) => {
        warn!(LOG_LEVEL, id, format!("own shard unreadable: {}", e));
        self.local()
      }
    }
  }

  /// Queries every peer concurrently. A peer that cannot answer counts as
  /// zero. The sum saturates.
  async fn peer_shards(&self) -> i64 {
    let mut queries = JoinSet::new();
    for peer in self.messenger.others() {
      let messenger = self.messenger.clone();
      let timeout = self.timeout;
      queries.spawn(async move {
        let reply = messenger.rpc(&peer, Payload::Local, timeout).await;
        (peer, reply)
      });
    }
    let mut sum = 0;
    while let Some(joined) = queries.join_next().await {
      match joined {
        Ok((_, Ok(Payload::LocalOk { value }))) => {
          sum = i64::saturating_add(sum, value)
        }
        Ok((peer, Ok(other))) => debug!(
          LOG_LEVEL,
          self.messenger.id(),
          format!("{} answered local with {}", peer, other.kind())
        ),
        Ok((peer, Err(e))) => debug!(
          LOG_LEVEL,
          self.messenger.id(),
          format!("{} counted as zero: {}", peer, e)
        ),
        Err(e) => debug!(LOG_LEVEL, self.messenger.id(), format!("{}", e)),
      }
    }
    sum
  }
}
#[async_trait]
impl Service for Counter {
  async fn recv(&self, _: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Add { delta } if delta < 0 => Err(Error::Malformed(format!(
        "counter only grows, got delta {}",
        delta
      ))),
      Payload::Add { delta } => {
        self.add(delta).await?;
        Ok(Payload::AddOk)
      }
      Payload::Read { .. } => Ok(Payload::ReadOk {
        messages: None,
        value: Some(json!(self.read().await?)),
      }),
      Payload::Local => Ok(Payload::LocalOk {
        value: self.local(),
      }),
      other => Err(other.unsupported()),
    }
  }
}
