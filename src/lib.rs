#![forbid(unsafe_code)]

//! `consul-relay` — leader-elected health event forwarder.
//!
//! Elects a single leader among redundant instances via a Consul
//! session-backed lock and, while leader, forwards health-check state
//! changes to an event sink using blocking queries for low-latency
//! change detection without busy-waiting.

pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod sink;
pub mod store;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
