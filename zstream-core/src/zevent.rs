//! ZEvent participant data
//!
//! The public ZEvent API lists every participating channel with its live
//! state, viewers and donations. Responses are cached for the configured TTL;
//! when a refresh fails the previous snapshot keeps being served.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ZEventConfig;
use crate::{Error, Result};

static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(15))
        .build()
        .expect("Failed to build ZEvent shared HTTP client")
});

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Amount {
    #[serde(default)]
    pub number: f64,
    #[serde(default)]
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub twitch: String,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub viewers_amount: Option<Amount>,
    #[serde(default)]
    pub donation_amount: Option<Amount>,
}

impl Participant {
    fn viewers(&self) -> f64 {
        self.viewers_amount.as_ref().map_or(0.0, |a| a.number)
    }

    fn donations(&self) -> f64 {
        self.donation_amount.as_ref().map_or(0.0, |a| a.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopStreamer {
    pub name: String,
    pub viewers: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZEventStats {
    pub streamers_online: usize,
    pub total_streamers: usize,
    /// Thousands-separated, e.g. "1,234,567"
    pub total_viewers: String,
    pub total_donations: f64,
    pub top_streamer: TopStreamer,
}

/// One fetch of the ZEvent API
#[derive(Debug)]
pub struct ZEventSnapshot {
    pub raw: Value,
    pub participants: Vec<Participant>,
}

impl ZEventSnapshot {
    pub fn parse(raw: Value) -> Result<Self> {
        let Some(live) = raw.get("live").and_then(Value::as_array) else {
            return Err(Error::upstream("zevent", "Invalid ZEvent data format"));
        };
        let participants = live
            .iter()
            .filter_map(|entry| serde_json::from_value::<Participant>(entry.clone()).ok())
            .collect();
        Ok(Self { raw, participants })
    }

    /// Lowercased Twitch logins of every participant
    #[must_use]
    pub fn logins(&self) -> HashSet<String> {
        self.participants.iter().map(|p| p.twitch.to_lowercase()).collect()
    }
}

pub struct ZEventClient {
    client: Client,
    api_url: String,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<ZEventSnapshot>)>>,
}

impl ZEventClient {
    #[must_use]
    pub fn new(config: &ZEventConfig) -> Self {
        Self {
            client: SHARED_CLIENT.clone(),
            api_url: config.api_url.clone(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(None),
        }
    }

    /// Fresh-enough snapshot, refetching when the cache expired
    pub async fn snapshot(&self) -> Result<Arc<ZEventSnapshot>> {
        let stale = {
            let cache = self.cache.lock();
            match cache.as_ref() {
                Some((fetched_at, snapshot)) if fetched_at.elapsed() < self.ttl => {
                    return Ok(snapshot.clone());
                }
                Some((_, snapshot)) => Some(snapshot.clone()),
                None => None,
            }
        };

        match self.fetch().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.cache.lock() = Some((Instant::now(), snapshot.clone()));
                Ok(snapshot)
            }
            Err(e) => match stale {
                Some(snapshot) => {
                    warn!(error = %e, "ZEvent refresh failed, serving cached data");
                    Ok(snapshot)
                }
                None => Err(e),
            },
        }
    }

    /// Participant logins; empty when the API is unreachable
    pub async fn participants(&self) -> HashSet<String> {
        match self.snapshot().await {
            Ok(snapshot) => snapshot.logins(),
            Err(e) => {
                warn!(error = %e, "ZEvent participants unavailable");
                HashSet::new()
            }
        }
    }

    pub async fn stats(&self) -> Result<ZEventStats> {
        Ok(compute_stats(&self.snapshot().await?.participants))
    }

    async fn fetch(&self) -> Result<ZEventSnapshot> {
        debug!(url = %self.api_url, "Fetching ZEvent participants");
        let resp = self.client.get(&self.api_url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::upstream("zevent", format!("HTTP {}", resp.status())));
        }
        let snapshot = ZEventSnapshot::parse(resp.json().await?)?;
        info!(count = snapshot.participants.len(), "ZEvent participants loaded");
        Ok(snapshot)
    }
}

/// Aggregate figures over the online participants. The top streamer is the
/// one with the most viewers, ties going to the larger donation total.
#[must_use]
pub fn compute_stats(participants: &[Participant]) -> ZEventStats {
    let online: Vec<&Participant> = participants.iter().filter(|p| p.online).collect();
    let total_viewers: f64 = online.iter().map(|p| p.viewers()).sum();
    let total_donations: f64 = participants.iter().map(Participant::donations).sum();

    let top = online.iter().copied().reduce(|best, current| {
        let more_viewers = current.viewers() > best.viewers();
        let tie_more_donations =
            current.viewers() == best.viewers() && current.donations() > best.donations();
        if more_viewers || tie_more_donations {
            current
        } else {
            best
        }
    });

    let top_streamer = top.map_or_else(
        || TopStreamer {
            name: "N/A".to_string(),
            viewers: "0".to_string(),
        },
        |p| TopStreamer {
            name: p.display.clone().unwrap_or_else(|| "N/A".to_string()),
            viewers: p
                .viewers_amount
                .as_ref()
                .and_then(|a| a.formatted.clone())
                .unwrap_or_else(|| "0".to_string()),
        },
    );

    ZEventStats {
        streamers_online: online.len(),
        total_streamers: participants.len(),
        total_viewers: format_thousands(total_viewers.round() as u64),
        total_donations,
        top_streamer,
    }
}

fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
