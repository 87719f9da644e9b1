//! Tools for running clusters inside one process: a simulated network with
//! injectable message loss, delay and partitions, an in-memory store service,
//! and the crate's logging setup.

mod failure_config;
mod kv_service;
mod logging;
mod network;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  failure_config::FailureMode,
  kv_service::MemKv,
  logging::init_logging,
  logging::LogLevel,
  network::wait_until,
  network::SimMessenger,
  network::SimNetwork,
};
