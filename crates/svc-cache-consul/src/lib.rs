//! Service Cache Consul Client
//!
//! This crate provides the client for querying a Consul agent's
//! service catalog over its HTTP API.

pub mod client;
pub mod error;

pub use client::{AgentService, ConsulClient, ConsulClientConfig};
pub use error::ConsulError;
