use crate::core::{Payload, Result};
use async_trait::async_trait;

/// A workload's request handler. The runtime calls `recv` on its own task for
/// every inbound request and turns the outcome into the reply: `Ok` payloads
/// are sent as they are, errors as `error{code, text}`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
  async fn recv(&self, src: &str, payload: Payload) -> Result<Payload>;
}
