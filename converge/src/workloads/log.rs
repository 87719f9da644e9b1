use crate::cluster::SeenSet;
use crate::config::{KvService, NodeConfig};
use crate::core::{Messenger, Payload, Result, Service, Topic};
use crate::storage::{read_or, DurableStore, KvClient};
use crate::workloads::LOG_LEVEL;
use crate::{debug, warn};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn log_key(topic: &str) -> String {
  format!("log-{}", topic)
}

/// Append-only logs, one per topic, kept as a JSON list in a durable cell.
///
/// Appends are compare-and-swap loops on the whole list, so the offset of an
/// entry is its index in the list, assigned exactly once. Every node keeps a
/// cache of the lists it has read. The cache only grows, one
/// `(topic, offset)` observation at a time, which makes it immune to stale
/// reads.
pub struct ReplicatedLog {
  messenger: Arc<dyn Messenger>,
  store: Arc<dyn DurableStore>,
  seen: SeenSet<(Topic, u64)>,
  topics: Mutex<HashMap<Topic, Vec<i64>>>,
  committed: Mutex<BTreeMap<Topic, u64>>,
}
impl ReplicatedLog {
  pub fn new(messenger: Arc<dyn Messenger>, config: &NodeConfig) -> Self {
    let service = config.kv.unwrap_or(KvService::LinKv);
    let store = KvClient::new(messenger.clone(), service, config.request_timeout);
    ReplicatedLog::with_store(messenger, Arc::new(store))
  }

  pub fn with_store(
    messenger: Arc<dyn Messenger>,
    store: Arc<dyn DurableStore>,
  ) -> Self {
    ReplicatedLog {
      messenger: messenger,
      store: store,
      seen: SeenSet::new(),
      topics: Mutex::new(HashMap::new()),
      committed: Mutex::new(BTreeMap::new()),
    }
  }

  /// Appends `msg` to `topic` and returns its offset.
  pub async fn send(&self, topic: &str, msg: i64) -> Result<u64> {
    let key = log_key(topic);
    loop {
      let current = read_or(self.store.as_ref(), &key, Vec::<i64>::new()).await?;
      let mut next = current.clone();
      next.push(msg);
      match self
        .store
        .compare_and_swap(&key, json!(current), json!(next), true)
        .await
      {
        Ok(()) => {
          self.absorb(topic, &next);
          return Ok(next.len() as u64 - 1);
        }
        Err(e) if e.is_conflict() => {
          self.absorb(topic, &current);
          debug!(LOG_LEVEL, self.messenger.id(), format!("retrying send: {}", e));
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Every entry of each topic at or after the requested offset. Topics
  /// without such entries are left out.
  pub async fn poll(
    &self,
    offsets: BTreeMap<Topic, u64>,
  ) -> BTreeMap<Topic, Vec<(u64, i64)>> {
    let mut msgs = BTreeMap::new();
    for (topic, from) in offsets {
      self.resync(&topic).await;
      let entries = self.entries(&topic, from);
      if !entries.is_empty() {
        msgs.insert(topic, entries);
      }
    }
    msgs
  }

  pub fn commit_offsets(&self, offsets: BTreeMap<Topic, u64>) {
    self.committed.lock().extend(offsets);
  }

  /// The committed offsets of those `keys` that have one.
  pub fn committed_offsets(&self, keys: &[Topic]) -> BTreeMap<Topic, u64> {
    let committed = self.committed.lock();
    keys
      .iter()
      .filter_map(|k| committed.get(k).map(|o| (k.clone(), *o)))
      .collect()
  }

  /// The cached entries of `topic` from offset `from` on.
  pub fn entries(&self, topic: &str, from: u64) -> Vec<(u64, i64)> {
    self
      .topics
      .lock()
      .get(topic)
      .map(|entries| {
        (from..)
          .zip(entries.iter().skip(from as usize).copied())
          .collect()
      })
      .unwrap_or_default()
  }

  async fn resync(&self, topic: &str) {
    let key = log_key(topic);
    match read_or(self.store.as_ref(), &key, Vec::<i64>::new()).await {
      Ok(entries) => self.absorb(topic, &entries),
      Err(e) => warn!(
        LOG_LEVEL,
        self.messenger.id(),
        format!("serving cached {}: {}", topic, e)
      ),
    }
  }

  /// Caches the entries of a durable list not seen before. Lists only ever
  /// grow at the end, so any list read is an extension of a prefix already
  /// cached.
  fn absorb(&self, topic: &str, entries: &[i64]) {
    let mut topics = self.topics.lock();
    let cached = topics.entry(topic.to_string()).or_default();
    for (offset, value) in entries.iter().enumerate() {
      if self.seen.observe((topic.to_string(), offset as u64)) {
        cached.push(*value);
      }
    }
  }
}
#[async_trait]
impl Service for ReplicatedLog {
  async fn recv(&self, _: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Send { key, msg } => Ok(Payload::SendOk {
        offset: self.send(&key, msg).await?,
      }),
      Payload::Poll { offsets } => Ok(Payload::PollOk {
        msgs: self.poll(offsets).await,
      }),
      Payload::CommitOffsets { offsets } => {
        self.commit_offsets(offsets);
        Ok(Payload::CommitOffsetsOk)
      }
      Payload::ListCommittedOffsets { keys } => {
        Ok(Payload::ListCommittedOffsetsOk {
          offsets: self.committed_offsets(&keys),
        })
      }
      other => Err(other.unsupported()),
    }
  }
}

#[cfg(test)]
use crate::testkit::SimNetwork;

#[test]
fn test_absorb_ignores_stale_reads() {
  let net = SimNetwork::new(1);
  let messenger: Arc<dyn Messenger> = Arc::new(net.messenger("n0"));
  let log = ReplicatedLog::new(messenger, &NodeConfig::default());
  log.absorb("a", &[10, 11, 12]);
  log.absorb("a", &[10]);
  log.absorb("a", &[10, 11, 12, 13]);
  assert_eq!(log.entries("a", 0), vec![(0, 10), (1, 11), (2, 12), (3, 13)]);
  assert_eq!(log.entries("a", 2), vec![(2, 12), (3, 13)]);
  assert!(log.entries("a", 9).is_empty());
  assert!(log.entries("b", 0).is_empty());
}

#[test]
fn test_committed_offsets_only_lists_commits() {
  let net = SimNetwork::new(1);
  let messenger: Arc<dyn Messenger> = Arc::new(net.messenger("n0"));
  let log = ReplicatedLog::new(messenger, &NodeConfig::default());
  log.commit_offsets(maplit::btreemap! {"a".to_string() => 3});
  log.commit_offsets(maplit::btreemap! {"a".to_string() => 1, "b".to_string() => 0});
  let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
  assert_eq!(
    log.committed_offsets(&keys),
    maplit::btreemap! {"a".to_string() => 1, "b".to_string() => 0}
  );
}
