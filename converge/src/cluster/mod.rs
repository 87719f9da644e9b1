//! Gossip among the members of a cluster.
//!
//! Every member learns the full peer list at `init`. Values a member accepts
//! are pushed to its neighbors, who accept and push them on, until every
//! member has them. Nothing about a delivery is assumed: messages may be
//! dropped, delayed or cut off by a partition, and a member keeps retrying a
//! neighbor until that neighbor acknowledges.
//!
//! ### Topology
//! Broadcasting to all peers costs a quadratic number of messages per value.
//! Instead, members arrange themselves in a spanning tree whose nodes have at
//! most [`FANOUT`] neighbors (a [`Topology`]). The tree is computed
//! independently by every member from the sorted peer list, so all members
//! agree on it without coordination. A value travels at most the diameter of
//! the tree, which grows logarithmically with the cluster.
//!
//! ### Dissemination
//! A [`Dissemination`] engine keeps one outbox per neighbor and a fixed pool
//! of workers. Enqueuing a value puts it in the neighbor's outbox and
//! schedules the neighbor on a shared work queue, at most once at a time. A
//! worker drains the whole outbox into a single batched request, so values
//! that pile up while a neighbor is unreachable are sent together once it
//! returns. What a batch looks like on the wire, and what counts as its
//! acknowledgement, is up to a [`Courier`].
//!
//! ### Deduplication
//! Gossip arrives more than once: from several neighbors, and again after
//! every retry whose acknowledgement was lost. A [`SeenSet`] records which
//! values were accepted, and only newly seen values are passed on, so
//! forwarding stops once every member has a value.

use crate::testkit::LogLevel;
mod dissemination;
mod seen;
mod topology;

pub const FANOUT: usize = 5;
pub const LOG_LEVEL: LogLevel = LogLevel::Debug;

#[rustfmt::skip]
pub use {
  dissemination::Courier,
  dissemination::Dissemination,
  seen::SeenSet,
  topology::Topology,
};
