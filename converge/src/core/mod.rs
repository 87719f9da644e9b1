//! The messaging substrate: message schema, the [`Messenger`] facade engines
//! talk through, the [`Service`] trait workloads implement, and [`Node`], the
//! stdio runtime tying them together.
//!
//! ### Messages
//! Every message is an envelope `{src, dest, body}`. The body carries a
//! `type` tag, an optional `msg_id` and an optional `in_reply_to`; the rest of
//! its fields belong to the [`Payload`] variant named by the tag. Bodies are
//! decoded into [`Payload`] once, at the boundary, so handlers never inspect
//! raw JSON. A body that fails to decode is answered with error 12
//! (malformed-request) whenever the sender asked for a reply.
//!
//! ### Errors
//! [`Error`] is the one error type of the crate. Each variant maps to an
//! [`ErrorCode`] of the wire protocol, and `error` replies are decoded back
//! into the same variants, so a CAS conflict reported by a remote store is the
//! same [`Error::Conflict`] a local store would raise.
//!
//! ```ignore
//! Node::run(|messenger| Broadcast::new(messenger, &NodeConfig::default()))
//!   .await?;
//! ```

use crate::testkit::LogLevel;

mod error;
mod message;
mod messenger;
mod node;
mod service;

pub const LOG_LEVEL: LogLevel = LogLevel::Info;

#[rustfmt::skip]
pub use {
  error::Error,
  error::ErrorCode,
  error::Result,
  message::Body,
  message::Message,
  message::MicroOp,
  message::OpKind,
  message::Payload,
  message::PeerId,
  message::Topic,
  messenger::Messenger,
  node::Node,
  service::Service,
};
