// zstream API library
//
// HTTP control surface over the stream registry and the OBS reconciler

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
