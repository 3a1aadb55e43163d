//! Background liveness tasks.

pub mod sweeper;
