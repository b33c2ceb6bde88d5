//! Tripwire Common - Configuration and statistics types for the Tripwire sensor

pub mod config;
pub mod stats;

pub use config::*;
pub use stats::*;
