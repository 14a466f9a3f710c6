//! OBS connection supervision
//!
//! A single task owns the connection: it connects, runs the session hook,
//! waits for the session to drop, then reconnects on a fixed interval.
//! Consecutive connect failures are counted; once the count reaches the
//! configured maximum the task parks until `reconnect()` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zstream_core::config::ObsConfig;

use crate::client::{ObsClient, ObsConnector, SessionHook};
use crate::error::{ObsError, ObsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub enabled: bool,
    pub reconnect_interval: Duration,
    pub max_attempts: u32,
}

impl From<&ObsConfig> for SupervisorSettings {
    fn from(config: &ObsConfig) -> Self {
        Self {
            enabled: config.enabled,
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Point-in-time view for status endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub enabled: bool,
    pub url: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// Gave up after too many failures; waiting for `reconnect()`
    pub parked: bool,
}

struct Session {
    state: ConnectionState,
    client: Option<Arc<dyn ObsClient>>,
    attempts: u32,
    parked: bool,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn ObsConnector>,
    settings: SupervisorSettings,
    session: RwLock<Session>,
    wake: Notify,
    started: AtomicBool,
    cancel_token: CancellationToken,
}

impl ConnectionSupervisor {
    #[must_use]
    pub fn new(connector: Arc<dyn ObsConnector>, settings: SupervisorSettings) -> Self {
        Self {
            connector,
            settings,
            session: RwLock::new(Session {
                state: ConnectionState::Disconnected,
                client: None,
                attempts: 0,
                parked: false,
            }),
            wake: Notify::new(),
            started: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Active session, or `NotConnected`. Nothing is queued for later.
    pub fn client(&self) -> ObsResult<Arc<dyn ObsClient>> {
        let session = self.session.read();
        match (&session.state, &session.client) {
            (ConnectionState::Connected, Some(client)) => Ok(client.clone()),
            _ => Err(ObsError::NotConnected),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.read().state == ConnectionState::Connected
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        let session = self.session.read();
        SupervisorStatus {
            enabled: self.settings.enabled,
            url: self.connector.endpoint(),
            state: session.state,
            connected: session.state == ConnectionState::Connected,
            reconnect_attempts: session.attempts,
            max_reconnect_attempts: self.settings.max_attempts,
            parked: session.parked,
        }
    }

    /// Reset the failure counter and resume a parked supervisor.
    /// Returns `false` when supervision is disabled.
    pub fn reconnect(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let mut session = self.session.write();
        session.attempts = 0;
        if session.parked {
            session.parked = false;
            info!("Manual OBS reconnect requested");
            self.wake.notify_one();
        }
        true
    }

    /// Spawn the supervision loop. `None` when disabled or already running.
    pub fn start(self: &Arc<Self>, hook: Arc<dyn SessionHook>) -> Option<JoinHandle<()>> {
        if !self.settings.enabled {
            info!("OBS integration disabled");
            return None;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("OBS supervisor already running");
            return None;
        }
        let supervisor = Arc::clone(self);
        Some(tokio::spawn(async move { supervisor.run(hook).await }))
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    async fn run(&self, hook: Arc<dyn SessionHook>) {
        let url = self.connector.endpoint();
        loop {
            self.set_state(ConnectionState::Connecting, None);

            let connected = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(connection) => {
                    {
                        let mut session = self.session.write();
                        session.state = ConnectionState::Connected;
                        session.client = Some(connection.client.clone());
                        session.attempts = 0;
                    }
                    info!(url = %url, "Connected to OBS");

                    hook.on_connected(connection.client.clone()).await;

                    tokio::select! {
                        () = self.cancel_token.cancelled() => {
                            self.set_state(ConnectionState::Disconnected, None);
                            break;
                        }
                        () = connection.closed.cancelled() => {
                            warn!(url = %url, "OBS connection closed");
                        }
                    }
                    self.set_state(ConnectionState::Disconnected, None);
                }
                Err(e) => {
                    // parked is decided under the same lock reconnect() takes
                    let (attempts, parked) = {
                        let mut session = self.session.write();
                        session.state = ConnectionState::Disconnected;
                        session.client = None;
                        session.attempts += 1;
                        session.parked = session.attempts >= self.settings.max_attempts;
                        (session.attempts, session.parked)
                    };

                    if parked {
                        error!(
                            url = %url,
                            attempts,
                            error = %e,
                            "OBS unreachable, max reconnect attempts reached; waiting for manual reconnect"
                        );
                        tokio::select! {
                            () = self.cancel_token.cancelled() => break,
                            () = self.wake.notified() => continue,
                        }
                    }
                    warn!(
                        url = %url,
                        attempt = attempts,
                        max = self.settings.max_attempts,
                        error = %e,
                        "OBS connection failed, retrying"
                    );
                }
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.settings.reconnect_interval) => {}
            }
        }
        info!("OBS supervisor stopped");
    }

    fn set_state(&self, state: ConnectionState, client: Option<Arc<dyn ObsClient>>) {
        let mut session = self.session.write();
        session.state = state;
        session.client = client;
    }

    /// Supervisor already holding a live session, for reconciler tests
    #[cfg(test)]
    pub(crate) fn connected_with(client: Arc<dyn ObsClient>) -> Self {
        let supervisor = Self::new(
            Arc::new(crate::test_helpers::FakeConnector::failing()),
            SupervisorSettings {
                enabled: true,
                reconnect_interval: Duration::from_millis(1),
                max_attempts: 1,
            },
        );
        supervisor.set_state(ConnectionState::Connected, Some(client));
        supervisor
    }
}
