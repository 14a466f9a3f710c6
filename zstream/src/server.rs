//! Server lifecycle management
//!
//! Owns the long-running pieces of the control-plane:
//! - HTTP API server
//! - OBS connection supervisor (drives the scene reconciler)
//! - Twitch liveness poller

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use zstream_api::{create_router, AppState};
use zstream_core::{bootstrap::CoreServices, Config};
use zstream_obs::{ConnectionSupervisor, ReconcilerSettings, SceneReconciler, SupervisorSettings, WsConnector};

/// How long background tasks get to wind down after the HTTP server stops
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ZStreamServer {
    config: Config,
    services: CoreServices,
    supervisor: Arc<ConnectionSupervisor>,
    reconciler: Arc<SceneReconciler>,
}

impl ZStreamServer {
    pub fn new(config: Config, services: CoreServices) -> Self {
        let connector = WsConnector::new(
            config.obs.url.clone(),
            config.obs.password.clone(),
            Duration::from_secs(config.obs.request_timeout_secs),
        );
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(connector),
            SupervisorSettings::from(&config.obs),
        ));
        let reconciler = Arc::new(SceneReconciler::new(
            supervisor.clone(),
            services.registry.clone(),
            ReconcilerSettings::from(&config.obs),
        ));

        Self {
            config,
            services,
            supervisor,
            reconciler,
        }
    }

    /// Start every component and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let obs_handle = self.supervisor.start(self.reconciler.clone());
        if obs_handle.is_some() {
            info!(url = %self.config.obs.url, "OBS supervisor started");
        }
        let liveness_handle = self.services.liveness.start();

        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
        if !http_handle.is_finished() {
            if let Err(e) = http_handle.await {
                warn!("HTTP server task failed: {}", e);
            }
        }

        self.shutdown(obs_handle, liveness_handle).await;
        Ok(())
    }

    async fn shutdown(&self, obs_handle: Option<JoinHandle<()>>, liveness_handle: JoinHandle<()>) {
        info!("Shutting down zstream...");

        self.supervisor.shutdown();
        self.services.liveness.shutdown();

        if let Some(handle) = obs_handle {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("OBS supervisor did not stop in time");
            }
        }
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, liveness_handle).await.is_err() {
            warn!("Liveness poller did not stop in time");
        }

        info!("zstream shut down complete");
    }

    /// Bind the listener up front so address errors fail startup
    async fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let state = AppState::new(
            &self.services,
            self.reconciler.clone(),
            self.config.resolver.default_quality.clone(),
        );
        let router = create_router(state);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });
        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
