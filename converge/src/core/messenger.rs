use crate::core::{Body, Message, Payload, PeerId, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Everything a protocol engine may ask of the messaging substrate.
///
/// Implemented by [`Node`](crate::core::Node) for real processes talking over
/// stdio and by [`SimNetwork`](crate::testkit::SimNetwork) for in-process
/// clusters.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
  /// This node's id. Fixed by `init`.
  fn id(&self) -> &str;

  /// Every member of the cluster, this node included, in `init` order.
  fn peers(&self) -> &[PeerId];

  /// Hands a fully built body to the transport.
  async fn deliver(&self, dest: &str, body: Body) -> Result<()>;

  /// Sends `payload` and waits up to `timeout` for the matching reply. An
  /// `error` reply comes back as `Err`.
  async fn rpc(
    &self,
    dest: &str,
    payload: Payload,
    timeout: Duration,
  ) -> Result<Payload>;

  /// Fire and forget.
  async fn send(&self, dest: &str, payload: Payload) -> Result<()> {
    self.deliver(dest, Body::new(payload)).await
  }

  async fn reply(&self, request: &Message, payload: Payload) -> Result<()> {
    let body = Body {
      msg_id: None,
      in_reply_to: request.body.msg_id,
      payload: payload,
    };
    self.deliver(&request.src, body).await
  }

  /// Every peer but this node.
  fn others(&self) -> Vec<PeerId> {
    self
      .peers()
      .iter()
      .filter(|p| p.as_str() != self.id())
      .cloned()
      .collect()
  }
}
