//! Durable, shared key/value storage provided by the cluster's store
//! services (`seq-kv`, `lin-kv`). Stores are reached over the same
//! messaging substrate as peers, and every operation is an RPC that may time
//! out.

mod kv;

#[rustfmt::skip]
pub use {
  kv::read_or,
  kv::DurableStore,
  kv::KvClient,
};
