pub mod bootstrap;
pub mod config;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod matching;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod twitch;
pub mod zevent;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{NewStream, TrackedStream};
pub use registry::StreamRegistry;
