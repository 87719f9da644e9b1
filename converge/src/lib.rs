//! Node engines for a simulated distributed-systems workbench. Each node is a
//! process exchanging newline-delimited JSON with a harness over stdio, and
//! runs one workload: unique ids, gossip broadcast, a grow-only counter, a
//! replicated log or a transactional key/value store.
//!
//! [`core`] holds the protocol and the node runtime, [`cluster`] the
//! dissemination machinery shared by the gossiping workloads, [`storage`] the
//! client of the harness's durable key/value services, and [`workloads`] the
//! request handlers themselves.

pub mod cluster;
pub mod config;
pub mod core;
pub mod storage;
pub mod testkit;
pub mod workloads;
