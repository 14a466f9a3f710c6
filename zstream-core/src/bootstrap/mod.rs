//! Bootstrap module for initializing the control-plane
//!
//! This module handles:
//! - Configuration loading
//! - Core service construction (registry, resolver, upstream clients)

pub mod config;
pub mod services;

pub use config::load_config;
pub use services::{init_services, CoreServices};
