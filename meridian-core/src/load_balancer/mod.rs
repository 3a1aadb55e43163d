//! The server pool and the operations that read and mutate it.
//!
//! [`pool::ServerPool`] owns the state; the heartbeat and sweep operations live
//! in `monitor`, redirect selection in `selector`.

mod monitor;
pub mod pool;
pub mod ranking;
pub mod selector;
