//! Meridian core.
//!
//! Domain models and the server pool behind the Meridian edge load balancer:
//! heartbeat intake, staleness sweeps and least-loaded redirect selection.

pub mod domain;
pub mod error;
pub mod load_balancer;

pub use domain::heartbeat::{CustomProperties, Heartbeat, VHostListing};
pub use domain::server::{
    CandidateServer, RedirectDecision, ServerDescriptor, ServerStatus, VHostAddress,
};
pub use domain::vhost::{ConfigCache, SharedConfigCache, VHostProperties};
pub use error::{HeartbeatError, MissingProperty};
pub use load_balancer::pool::{PoolConfig, ServerPool, SharedServerPool};
pub use load_balancer::ranking::{RankKey, RankingPolicy};
pub use load_balancer::selector::PoolReport;
