//! Upstream connections to the origin and to edge servers.

pub mod client;
pub mod pool;

pub use client::UpstreamClient;
