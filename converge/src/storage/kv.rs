use crate::config::KvService;
use crate::core::{Error, Messenger, Payload, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A key/value store shared by the whole cluster and surviving any single
/// node.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
  /// Fails with [`Error::KeyNotFound`] if `key` was never written.
  async fn read(&self, key: &str) -> Result<Value>;

  async fn write(&self, key: &str, value: Value) -> Result<()>;

  /// Replaces `from` by `to`. Fails with [`Error::Conflict`] if the stored
  /// value differs from `from`, and with [`Error::KeyNotFound`] if the key is
  /// absent and `create` is false.
  async fn compare_and_swap(
    &self,
    key: &str,
    from: Value,
    to: Value,
    create: bool,
  ) -> Result<()>;
}

/// Reads `key` and decodes it, treating an absent key as `default`.
pub async fn read_or<T, S>(store: &S, key: &str, default: T) -> Result<T>
where
  T: DeserializeOwned,
  S: DurableStore + ?Sized,
{
  match store.read(key).await {
    Ok(value) => Ok(serde_json::from_value(value)?),
    Err(Error::KeyNotFound(_)) => Ok(default),
    Err(e) => Err(e),
  }
}

/// Speaks the `read`/`write`/`cas` protocol of a store service.
pub struct KvClient {
  messenger: Arc<dyn Messenger>,
  service: KvService,
  timeout: Duration,
}
impl KvClient {
  pub fn new(
    messenger: Arc<dyn Messenger>,
    service: KvService,
    timeout: Duration,
  ) -> KvClient {
    KvClient {
      messenger: messenger,
      service: service,
      timeout: timeout,
    }
  }

  async fn call(&self, payload: Payload) -> Result<Payload> {
    self
      .messenger
      .rpc(self.service.node_id(), payload, self.timeout)
      .await
  }
}
#[async_trait]
impl DurableStore for KvClient {
  async fn read(&self, key: &str) -> Result<Value> {
    let request = Payload::Read {
      key: Some(key.to_string()),
    };
    match self.call(request).await? {
      Payload::ReadOk {
        value: Some(value), ..
      } => Ok(value),
      other => Err(Error::UnexpectedReply(other.kind().to_string())),
    }
  }

  async fn write(&self, key: &str, value: Value) -> Result<()> {
    let request = Payload::Write {
      key: key.to_string(),
      value: value,
    };
    match self.call(request).await? {
      Payload::WriteOk => Ok(()),
      other => Err(Error::UnexpectedReply(other.kind().to_string())),
    }
  }

  async fn compare_and_swap(
    &self,
    key: &str,
    from: Value,
    to: Value,
    create: bool,
  ) -> Result<()> {
    let request = Payload::Cas {
      key: key.to_string(),
      from: from,
      to: to,
      create_if_not_exists: create,
    };
    match self.call(request).await? {
      Payload::CasOk => Ok(()),
      other => Err(Error::UnexpectedReply(other.kind().to_string())),
    }
  }
}
