use crate::core::{Messenger, Payload, Result, Service};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out ids unique across the cluster without talking to anyone: the
/// node id, a per-node sequence number and a random suffix.
pub struct UniqueIds {
  messenger: Arc<dyn Messenger>,
  next: AtomicU64,
}
impl UniqueIds {
  pub fn new(messenger: Arc<dyn Messenger>) -> UniqueIds {
    UniqueIds {
      messenger: messenger,
      next: AtomicU64::new(0),
    }
  }

  pub fn generate(&self) -> String {
    let seq = self.next.fetch_add(1, Ordering::Relaxed);
    format!(
      "{}-{}-{:08x}",
      self.messenger.id(),
      seq,
      rand::random::<u32>()
    )
  }
}
#[async_trait]
impl Service for UniqueIds {
  async fn recv(&self, _: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Generate => Ok(Payload::GenerateOk {
        id: self.generate(),
      }),
      other => Err(other.unsupported()),
    }
  }
}
