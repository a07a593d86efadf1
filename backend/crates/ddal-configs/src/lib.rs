//! ddal-configs
//!
//! Configuration types and loader for the DDAL routing core.

pub mod config;

pub use config::*;
pub use config::defaults;
