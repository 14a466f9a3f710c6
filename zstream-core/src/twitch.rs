//! Twitch Helix client
//!
//! App access tokens come from the client-credentials flow and are cached
//! until shortly before expiry. A 401 from Helix drops the cached token and
//! the request is retried once with a fresh one.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::TwitchConfig;
use crate::liveness::LiveStatusSource;
use crate::{Error, Result};

/// Helix accepts at most this many `user_login` parameters per request
const HELIX_BATCH: usize = 100;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Shared HTTP client for Twitch requests (connection pooling)
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(4)
        .build()
        .expect("Failed to build Twitch shared HTTP client")
});

/// What the control-plane shows about a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub online: bool,
    pub title: Option<String>,
    pub viewer_count: Option<u64>,
    pub profile_image_url: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct HelixStream {
    user_login: String,
    title: String,
    viewer_count: u64,
}

#[derive(Deserialize)]
struct HelixUser {
    profile_image_url: String,
}

pub struct TwitchClient {
    client: Client,
    config: TwitchConfig,
    token: RwLock<Option<CachedToken>>,
}

impl TwitchClient {
    #[must_use]
    pub fn new(config: &TwitchConfig) -> Self {
        Self {
            client: SHARED_CLIENT.clone(),
            config: config.clone(),
            token: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Cached app access token, fetching a new one when missing or expiring
    pub async fn app_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // another caller may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        if !self.is_configured() {
            return Err(Error::NotConfigured("Twitch client id/secret".to_string()));
        }

        let url = format!("{}/oauth2/token", self.config.auth_base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::upstream("twitch", format!("token request failed: {}", resp.status())));
        }
        let token: TokenResponse = resp.json().await?;
        info!(expires_in = token.expires_in, "Twitch app token obtained");

        let value = token.access_token.clone();
        *slot = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    pub async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn helix<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path);

        for retry in [false, true] {
            let token = self.app_token().await?;
            let resp = self
                .client
                .get(&url)
                .query(query)
                .header("Client-ID", &self.config.client_id)
                .bearer_auth(token)
                .send()
                .await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !retry {
                debug!("Twitch token rejected, refreshing");
                self.invalidate_token().await;
                continue;
            }
            if !resp.status().is_success() {
                return Err(Error::upstream("twitch", format!("GET {path} failed: {}", resp.status())));
            }
            return Ok(resp.json().await?);
        }

        Err(Error::upstream("twitch", format!("GET {path} unauthorized after token refresh")))
    }

    /// Online state, title, viewers and avatar of one channel
    pub async fn channel_status(&self, login: &str) -> Result<ChannelStatus> {
        let streams: HelixPage<HelixStream> = self.helix("streams", &[("user_login", login)]).await?;
        let users: HelixPage<HelixUser> = self.helix("users", &[("login", login)]).await?;

        let live = streams.data.into_iter().next();
        Ok(ChannelStatus {
            online: live.is_some(),
            title: live.as_ref().map(|s| s.title.clone()),
            viewer_count: live.as_ref().map(|s| s.viewer_count),
            profile_image_url: users.data.into_iter().next().map(|u| u.profile_image_url),
        })
    }
}

#[async_trait]
impl LiveStatusSource for TwitchClient {
    async fn live_channels(&self, logins: &[String]) -> Result<HashSet<String>> {
        let mut live = HashSet::new();
        for batch in logins.chunks(HELIX_BATCH) {
            let query: Vec<(&str, &str)> = batch.iter().map(|l| ("user_login", l.as_str())).collect();
            let page: HelixPage<HelixStream> = self.helix("streams", &query).await?;
            live.extend(page.data.into_iter().map(|s| s.user_login.to_lowercase()));
        }
        Ok(live)
    }

    fn is_available(&self) -> bool {
        self.is_configured()
    }
}
