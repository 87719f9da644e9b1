use crate::cluster::LOG_LEVEL;
use crate::config::DisseminationConfig;
use crate::core::{Messenger, Payload, PeerId};
use crate::{debug, trace};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};

/// Turns a drained outbox into a request, and recognizes its
/// acknowledgement.
pub trait Courier<V>: Send + Sync + 'static {
  fn package(&self, batch: Vec<V>) -> Payload;
  fn acknowledged(&self, reply: &Payload) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
  Idle,
  Queued,
  Busy,
}

struct Outbox<V> {
  pending: BTreeSet<V>,
  slot: Slot,
}
impl<V: Ord> Default for Outbox<V> {
  fn default() -> Self {
    Outbox {
      pending: BTreeSet::new(),
      slot: Slot::Idle,
    }
  }
}

struct Inner<V> {
  messenger: Arc<dyn Messenger>,
  courier: Box<dyn Courier<V>>,
  config: DisseminationConfig,
  outboxes: Mutex<HashMap<PeerId, Outbox<V>>>,
  queue: UnboundedSender<PeerId>,
  delivered: AtomicU64,
  retries: AtomicU64,
}

/// Delivers values to neighbors at least once, retrying until acknowledged.
///
/// Each neighbor has an outbox of pending values. A neighbor with a
/// non-empty outbox is either on the work queue (once) or held by a worker,
/// so no two workers ever talk to the same neighbor at the same time. A
/// failed batch is put back into the outbox and the neighbor goes to the end
/// of the queue.
pub struct Dissemination<V> {
  inner: Arc<Inner<V>>,
}
impl<V> Dissemination<V>
where
  V: Ord + Clone + Send + Sync + 'static,
{
  /// Spawns the worker pool onto the current tokio runtime.
  pub fn new<C: Courier<V>>(
    messenger: Arc<dyn Messenger>,
    courier: C,
    config: DisseminationConfig,
  ) -> Dissemination<V> {
    let (tx, rx) = unbounded_channel();
    let workers = config.workers.max(1);
    let inner = Arc::new(Inner {
      messenger: messenger,
      courier: Box::new(courier),
      config: config,
      outboxes: Mutex::new(HashMap::new()),
      queue: tx,
      delivered: AtomicU64::new(0),
      retries: AtomicU64::new(0),
    });
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for worker in 0..workers {
      tokio::spawn(work(inner.clone(), rx.clone(), worker));
    }
    Dissemination { inner: inner }
  }

  /// Adds `value` to `neighbor`'s outbox. Never blocks on the network.
  pub fn enqueue(&self, neighbor: &str, value: V) {
    self.inner.put(neighbor, std::iter::once(value));
  }

  /// Enqueues every value for every target except `except`, the peer the
  /// values came from.
  pub fn enqueue_except<'a, I>(&self, targets: I, values: &[V], except: &str)
  where
    I: IntoIterator<Item = &'a PeerId>,
  {
    if values.is_empty() {
      return;
    }
    for target in targets.into_iter().filter(|t| *t != except) {
      self.inner.put(target, values.iter().cloned());
    }
  }

  /// The values waiting for `neighbor`, excluding a batch in flight.
  pub fn pending(&self, neighbor: &str) -> Vec<V> {
    self
      .inner
      .outboxes
      .lock()
      .get(neighbor)
      .map(|o| o.pending.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Whether every enqueued value has been acknowledged.
  pub fn is_idle(&self) -> bool {
    self
      .inner
      .outboxes
      .lock()
      .values()
      .all(|o| o.pending.is_empty() && o.slot == Slot::Idle)
  }

  /// The number of acknowledged batches.
  pub fn delivered(&self) -> u64 {
    self.inner.delivered.load(Ordering::Relaxed)
  }

  /// The number of batches put back after a failed attempt.
  pub fn retries(&self) -> u64 {
    self.inner.retries.load(Ordering::Relaxed)
  }
}
impl<V> Inner<V>
where
  V: Ord + Clone + Send + Sync + 'static,
{
  fn put<I: IntoIterator<Item = V>>(&self, neighbor: &str, values: I) {
    let mut outboxes = self.outboxes.lock();
    let outbox = outboxes.entry(neighbor.to_string()).or_default();
    outbox.pending.extend(values);
    if outbox.slot == Slot::Idle && !outbox.pending.is_empty() {
      outbox.slot = Slot::Queued;
      self.schedule(neighbor);
    }
  }

  fn schedule(&self, neighbor: &str) {
    // The receiver lives as long as the workers, which hold `self`.
    let _ = self.queue.send(neighbor.to_string());
  }

  fn take(&self, neighbor: &str) -> Vec<V> {
    let mut outboxes = self.outboxes.lock();
    let outbox = outboxes.entry(neighbor.to_string()).or_default();
    outbox.slot = Slot::Busy;
    std::mem::take(&mut outbox.pending).into_iter().collect()
  }

  fn finish(&self, neighbor: &str, failed: Vec<V>) {
    let mut outboxes = self.outboxes.lock();
    let outbox = outboxes.entry(neighbor.to_string()).or_default();
    outbox.pending.extend(failed);
    if outbox.pending.is_empty() {
      outbox.slot = Slot::Idle;
    } else {
      outbox.slot = Slot::Queued;
      self.schedule(neighbor);
    }
  }

  async fn attempt(&self, neighbor: &str, worker: usize) {
    let batch = self.take(neighbor);
    if batch.is_empty() {
      self.finish(neighbor, batch);
      return;
    }
    let start = Instant::now();
    let request = self.courier.package(batch.clone());
    let outcome = self
      .messenger
      .rpc(neighbor, request, self.config.rpc_timeout)
      .await;
    sleep_until(start + self.config.backoff).await;
    let id = self.messenger.id();
    match outcome {
      Ok(reply) if self.courier.acknowledged(&reply) => {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        trace!(
          LOG_LEVEL,
          id,
          format!("worker {} delivered {} to {}", worker, batch.len(), neighbor)
        );
        self.finish(neighbor, Vec::new());
      }
      Ok(reply) => {
        self.retries.fetch_add(1, Ordering::Relaxed);
        debug!(
          LOG_LEVEL,
          id,
          format!("{} answered {}; requeueing", neighbor, reply.kind())
        );
        self.finish(neighbor, batch);
      }
      Err(e) => {
        self.retries.fetch_add(1, Ordering::Relaxed);
        debug!(
          LOG_LEVEL,
          id,
          format!("delivery to {} failed: {}; requeueing", neighbor, e)
        );
        self.finish(neighbor, batch);
      }
    }
  }
}

async fn work<V>(
  inner: Arc<Inner<V>>,
  queue: Arc<tokio::sync::Mutex<UnboundedReceiver<PeerId>>>,
  worker: usize,
) where
  V: Ord + Clone + Send + Sync + 'static,
{
  loop {
    let neighbor = match queue.lock().await.recv().await {
      Some(neighbor) => neighbor,
      None => break,
    };
    inner.attempt(&neighbor, worker).await;
  }
}

#[cfg(test)]
use crate::core::{Body, Error, Result};
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
struct Flaky {
  failures: AtomicU64,
  batches: Mutex<Vec<(PeerId, Vec<i64>)>>,
}
#[cfg(test)]
#[async_trait]
impl Messenger for Flaky {
  fn id(&self) -> &str {
    "n0"
  }

  fn peers(&self) -> &[PeerId] {
    &[]
  }

  async fn deliver(&self, _: &str, _: Body) -> Result<()> {
    Ok(())
  }

  async fn rpc(&self, dest: &str, payload: Payload, _: Duration) -> Result<Payload> {
    let batch = match payload {
      Payload::MultiBroadcast { message } => message,
      other => return Err(other.unsupported()),
    };
    // Each failure kind in turn: a timeout, a reply that is not an
    // acknowledgement, then an `error` reply.
    let left = self.failures.load(Ordering::SeqCst);
    if left > 0 {
      self.failures.fetch_sub(1, Ordering::SeqCst);
      return match left % 3 {
        0 => Err(Error::Timeout(dest.to_string())),
        2 => Ok(Payload::TopologyOk),
        _ => Payload::Error {
          code: 11,
          text: "busy".to_string(),
        }
        .into_result(),
      };
    }
    self.batches.lock().push((dest.to_string(), batch));
    Ok(Payload::BroadcastOk)
  }
}

#[cfg(test)]
struct Numbers;
#[cfg(test)]
impl Courier<i64> for Numbers {
  fn package(&self, batch: Vec<i64>) -> Payload {
    Payload::MultiBroadcast { message: batch }
  }

  fn acknowledged(&self, reply: &Payload) -> bool {
    matches!(reply, Payload::BroadcastOk)
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_batches_are_retried() {
  let flaky = Arc::new(Flaky {
    failures: AtomicU64::new(6),
    batches: Mutex::new(Vec::new()),
  });
  let config = DisseminationConfig {
    workers: 3,
    backoff: Duration::from_millis(10),
    rpc_timeout: Duration::from_millis(50),
  };
  let engine = Dissemination::new(flaky.clone(), Numbers, config);
  engine.enqueue("n1", 1);
  engine.enqueue("n1", 2);
  engine.enqueue_except(&["n1".to_string(), "n2".to_string()], &[3], "n2");
  let deadline = Instant::now() + Duration::from_secs(5);
  while !engine.is_idle() && Instant::now() < deadline {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(engine.is_idle());
  assert_eq!(engine.retries(), 6);
  assert_eq!(engine.delivered(), flaky.batches.lock().len() as u64);
  let mut sent = flaky
    .batches
    .lock()
    .iter()
    .inspect(|(dest, _)| assert_eq!(dest, "n1"))
    .flat_map(|(_, batch)| batch.clone())
    .collect::<Vec<_>>();
  sent.sort();
  sent.dedup();
  assert_eq!(sent, vec![1, 2, 3]);
  assert!(engine.pending("n1").is_empty());
  assert!(engine.pending("n2").is_empty());
}
