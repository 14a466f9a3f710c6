// HTTP API module
//
// Routes for the stream registry, OBS diagnostics, ZEvent data and health

pub mod error;
pub mod health;
pub mod legacy;
pub mod obs;
pub mod streams;
pub mod zevent;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use zstream_core::bootstrap::CoreServices;
use zstream_core::liveness::LivenessMonitor;
use zstream_core::resolver::MediaUrlResolver;
use zstream_core::twitch::TwitchClient;
use zstream_core::zevent::ZEventClient;
use zstream_core::StreamRegistry;
use zstream_obs::{ConnectionSupervisor, SceneReconciler};

pub use error::{AppError, AppResult};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub resolver: Arc<dyn MediaUrlResolver>,
    pub twitch: Arc<TwitchClient>,
    pub zevent: Arc<ZEventClient>,
    pub liveness: Arc<LivenessMonitor>,
    pub reconciler: Arc<SceneReconciler>,
    /// Quality used when a request does not name one
    pub default_quality: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: &CoreServices, reconciler: Arc<SceneReconciler>, default_quality: impl Into<String>) -> Self {
        Self {
            registry: services.registry.clone(),
            resolver: services.resolver.clone(),
            twitch: services.twitch.clone(),
            zevent: services.zevent.clone(),
            liveness: services.liveness.clone(),
            reconciler,
            default_quality: default_quality.into(),
            started_at: Instant::now(),
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        self.reconciler.supervisor()
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Health check endpoint (for monitoring probes)
        .merge(health::create_health_router())
        // One-shot resolution kept for quick manual testing
        .merge(legacy::create_legacy_router())
        .merge(streams::create_streams_router())
        .merge(zevent::create_zevent_router())
        .merge(obs::create_obs_router());

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
