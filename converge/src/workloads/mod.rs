//! The request handlers a node can run, one [`Service`](crate::core::Service)
//! per workload.
//!
//! | workload    | requests                                              |
//! |-------------|-------------------------------------------------------|
//! | `generate`  | `generate`                                            |
//! | `broadcast` | `broadcast`, `multi_broadcast`, `read`, `topology`    |
//! | `counter`   | `add`, `read`, `local`                                |
//! | `log`       | `send`, `poll`, `commit_offsets`, `list_committed_offsets` |
//! | `txn`       | `txn`                                                 |
//!
//! Requests a workload does not know are answered with error 10
//! (not-supported).

use crate::testkit::LogLevel;
mod broadcast;
mod counter;
mod log;
mod txn;
mod unique_id;

pub const LOG_LEVEL: LogLevel = LogLevel::Info;

#[rustfmt::skip]
pub use {
  broadcast::Broadcast,
  broadcast::BroadcastCourier,
  counter::Counter,
  log::ReplicatedLog,
  txn::TxnCourier,
  txn::TxnStore,
  txn::WriteSet,
  unique_id::UniqueIds,
};
