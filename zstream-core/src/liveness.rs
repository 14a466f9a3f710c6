//! Liveness monitoring for tracked channels
//!
//! Periodically asks the status source which tracked channels are live and
//! keeps an online map, logging only when a channel flips. Each tick also
//! refreshes the advisory ZEvent participant flags in the registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::StreamRegistry;
use crate::zevent::ZEventClient;
use crate::Result;

/// Answers "which of these channels are live right now"
#[async_trait]
pub trait LiveStatusSource: Send + Sync {
    /// Lowercased logins of the live channels among `logins`
    async fn live_channels(&self, logins: &[String]) -> Result<HashSet<String>>;

    /// `false` when the source lacks credentials and polling is pointless
    fn is_available(&self) -> bool {
        true
    }
}

pub struct LivenessMonitor {
    registry: Arc<StreamRegistry>,
    source: Arc<dyn LiveStatusSource>,
    zevent: Option<Arc<ZEventClient>>,
    poll_interval: Duration,
    /// lowercase login -> online
    status: RwLock<HashMap<String, bool>>,
    cancel_token: CancellationToken,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(
        registry: Arc<StreamRegistry>,
        source: Arc<dyn LiveStatusSource>,
        zevent: Option<Arc<ZEventClient>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            zevent,
            poll_interval,
            status: RwLock::new(HashMap::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Start the polling loop; the first poll runs immediately.
    ///
    /// Use `shutdown()` to stop it.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Liveness monitor shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = monitor.poll_once().await {
                            warn!(error = %e, "Liveness poll failed");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Run one poll. Returns how many channels changed state.
    pub async fn poll_once(&self) -> Result<usize> {
        if let Some(zevent) = &self.zevent {
            let participants = zevent.participants().await;
            if !participants.is_empty() {
                let changed = self.registry.apply_zevent_participants(&participants).await?;
                if changed > 0 {
                    info!(changed, "ZEvent participant flags updated");
                }
            }
        }

        let logins: Vec<String> = self
            .registry
            .list()
            .await
            .iter()
            .filter_map(|s| s.channel_login())
            .map(|login| login.to_lowercase())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if logins.is_empty() || !self.source.is_available() {
            debug!("Liveness poll skipped");
            return Ok(0);
        }

        let live = self.source.live_channels(&logins).await?;

        let mut status = self.status.write().await;
        status.retain(|login, _| logins.contains(login));
        let mut changed = 0;
        for login in &logins {
            let online = live.contains(login);
            if status.insert(login.clone(), online) != Some(online) {
                info!(channel = %login, online, "Live status changed");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Last known state of a channel; `None` until it has been polled
    pub async fn is_live(&self, login: &str) -> Option<bool> {
        self.status.read().await.get(&login.to_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{new_stream, FakeLiveSource};

    async fn registry_with(dir: &tempfile::TempDir, logins: &[&str]) -> Arc<StreamRegistry> {
        let registry = Arc::new(StreamRegistry::open(dir.path().join("streams.json"), None).await);
        for login in logins {
            let mut stream = new_stream(login);
            stream.twitch_url = format!("https://twitch.tv/{login}");
            registry.add(stream).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_only_changes_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&dir, &["Alice", "bob"]).await;
        let source = Arc::new(FakeLiveSource::new(&["alice"]));
        let monitor = LivenessMonitor::new(registry, source.clone(), None, Duration::from_secs(120));

        assert_eq!(monitor.poll_once().await.unwrap(), 2);
        assert_eq!(monitor.is_live("ALICE").await, Some(true));
        assert_eq!(monitor.is_live("bob").await, Some(false));

        assert_eq!(monitor.poll_once().await.unwrap(), 0);

        source.set_live(&["bob"]);
        assert_eq!(monitor.poll_once().await.unwrap(), 2);
        assert_eq!(monitor.is_live("alice").await, Some(false));
        assert_eq!(monitor.is_live("bob").await, Some(true));
    }

    #[tokio::test]
    async fn test_unavailable_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&dir, &["alice"]).await;
        let source = Arc::new(FakeLiveSource::unavailable());
        let monitor = LivenessMonitor::new(registry, source.clone(), None, Duration::from_secs(120));

        assert_eq!(monitor.poll_once().await.unwrap(), 0);
        assert_eq!(source.calls(), 0);
        assert_eq!(monitor.is_live("alice").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&dir, &["alice"]).await;
        let source = Arc::new(FakeLiveSource::new(&[]));
        let monitor = Arc::new(LivenessMonitor::new(registry, source.clone(), None, Duration::from_secs(120)));

        let handle = monitor.start();
        tokio::time::sleep(Duration::from_secs(250)).await;
        monitor.shutdown();
        handle.await.unwrap();

        // immediate tick plus two interval ticks
        assert_eq!(source.calls(), 3);
    }
}
