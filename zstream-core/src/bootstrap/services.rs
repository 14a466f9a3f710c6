//! Core service construction

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::liveness::LivenessMonitor;
use crate::registry::StreamRegistry;
use crate::resolver::{MediaUrlResolver, StreamlinkResolver};
use crate::twitch::TwitchClient;
use crate::zevent::ZEventClient;
use crate::Config;

/// Services shared by the HTTP layer and the OBS reconciler
#[derive(Clone)]
pub struct CoreServices {
    pub registry: Arc<StreamRegistry>,
    pub resolver: Arc<dyn MediaUrlResolver>,
    pub twitch: Arc<TwitchClient>,
    pub zevent: Arc<ZEventClient>,
    pub liveness: Arc<LivenessMonitor>,
}

pub async fn init_services(config: &Config) -> CoreServices {
    let registry = Arc::new(
        StreamRegistry::open(
            &config.storage.streams_file,
            Some(Path::new(&config.storage.legacy_hw_decoding_file)),
        )
        .await,
    );

    let resolver: Arc<dyn MediaUrlResolver> = Arc::new(StreamlinkResolver::new(&config.resolver));
    let twitch = Arc::new(TwitchClient::new(&config.twitch));
    let zevent = Arc::new(ZEventClient::new(&config.zevent));

    if twitch.is_configured() {
        info!("Twitch API configured, live status polling enabled");
    } else {
        info!("Twitch API not configured, live status unavailable");
    }

    let liveness = Arc::new(LivenessMonitor::new(
        registry.clone(),
        twitch.clone(),
        Some(zevent.clone()),
        Duration::from_secs(config.twitch.poll_interval_secs),
    ));

    CoreServices {
        registry,
        resolver,
        twitch,
        zevent,
        liveness,
    }
}
