//! Media URL resolution through streamlink
//!
//! Turns a Twitch channel into a playable media URL. Qualities that Twitch
//! publishes under frame-rate suffixed names (`720p60`) are reached through a
//! fixed fallback list, tried in order until one resolves.

use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ResolverConfig;

// Compile-time constant patterns; Regex::new cannot fail on them.
static RE_CHANNEL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.)?twitch\.tv/@?([a-zA-Z0-9_]+)").expect("invalid channel URL regex")
});
static RE_CHANNEL_LOGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?([a-zA-Z0-9_]+)$").expect("invalid channel login regex"));

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid streamer name or url: {0}")]
    InvalidChannel(String),

    #[error("no url returned by streamlink for qualities: {}", .tried.join(", "))]
    Exhausted { tried: Vec<String> },

    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("streamlink timed out after {0:?}")]
    Timeout(Duration),

    #[error("streamlink failed: {0}")]
    Failed(String),
}

/// Resolves a channel to a media URL
#[async_trait]
pub trait MediaUrlResolver: Send + Sync {
    /// Resolve exactly `quality`. `Ok(None)` when the tool answered but
    /// produced no URL.
    async fn resolve_exact(&self, login: &str, quality: &str) -> Result<Option<String>, ResolveError>;

    /// Qualities currently offered by the channel
    async fn available_qualities(&self, login: &str) -> Result<Vec<String>, ResolveError>;

    /// Tool version, used by health checks
    async fn version(&self) -> Result<String, ResolveError>;

    /// Resolve `quality`, walking its fallback list. The error names every
    /// quality that was tried.
    async fn resolve(&self, login: &str, quality: &str) -> Result<String, ResolveError> {
        let candidates = quality_candidates(quality);
        for candidate in &candidates {
            match self.resolve_exact(login, candidate).await {
                Ok(Some(url)) => {
                    debug!(channel = %login, quality = %candidate, "Media URL resolved");
                    return Ok(url);
                }
                Ok(None) => debug!(channel = %login, quality = %candidate, "No URL for quality"),
                Err(e) => debug!(channel = %login, quality = %candidate, error = %e, "Quality attempt failed"),
            }
        }
        Err(ResolveError::Exhausted { tried: candidates })
    }
}

/// Qualities to try, in order, for a requested quality
#[must_use]
pub fn quality_candidates(quality: &str) -> Vec<String> {
    match quality {
        "720p" => vec!["720p".into(), "720p50".into(), "720p60".into()],
        "1080p" => vec!["1080p".into(), "1080p50".into(), "1080p60".into()],
        other => vec![other.to_string()],
    }
}

/// Twitch login from a channel URL or a bare (optionally `@`-prefixed) login
#[must_use]
pub fn extract_channel_login(input: &str) -> Option<String> {
    let input = input.trim();
    RE_CHANNEL_URL
        .captures(input)
        .or_else(|| RE_CHANNEL_LOGIN.captures(input))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[must_use]
pub fn channel_url(login: &str) -> String {
    format!("https://twitch.tv/{login}")
}

/// Parse the `Available streams:` line of streamlink's channel listing
#[must_use]
pub fn parse_available_qualities(output: &str) -> Vec<String> {
    let Some(list) = output
        .lines()
        .find_map(|line| line.split_once("Available streams:").map(|(_, rest)| rest))
    else {
        return Vec::new();
    };

    let mut qualities: Vec<String> = Vec::new();
    for entry in list.split(',') {
        // "1080p60 (best)" -> "1080p60"
        if let Some(name) = entry.split_whitespace().next() {
            if !qualities.iter().any(|q| q == name) {
                qualities.push(name.to_string());
            }
        }
    }
    qualities
}

/// URL printed by `streamlink --stream-url`. A failed run prints its error
/// message on stdout, so only a successful exit counts.
fn stream_url_from(success: bool, stdout: &str) -> Option<String> {
    let stdout = stdout.trim();
    (success && !stdout.is_empty()).then(|| stdout.to_string())
}

/// [`MediaUrlResolver`] backed by the streamlink command line tool
pub struct StreamlinkResolver {
    binary: String,
    url_timeout: Duration,
    qualities_timeout: Duration,
    probe_timeout: Duration,
}

impl StreamlinkResolver {
    #[must_use]
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            url_timeout: Duration::from_secs(config.url_timeout_secs),
            qualities_timeout: Duration::from_secs(config.qualities_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, ResolveError> {
        let child = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(ResolveError::Spawn {
                binary: self.binary.clone(),
                source,
            }),
            Err(_) => Err(ResolveError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl MediaUrlResolver for StreamlinkResolver {
    async fn resolve_exact(&self, login: &str, quality: &str) -> Result<Option<String>, ResolveError> {
        let url = channel_url(login);
        let output = self
            .run(&["--stream-url", url.as_str(), quality], self.url_timeout)
            .await?;
        Ok(stream_url_from(output.status.success(), &String::from_utf8_lossy(&output.stdout)))
    }

    async fn available_qualities(&self, login: &str) -> Result<Vec<String>, ResolveError> {
        let url = channel_url(login);
        let output = self.run(&[url.as_str()], self.qualities_timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let qualities = parse_available_qualities(&stdout);
        if qualities.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(ResolveError::Failed(detail.to_string()));
        }
        Ok(qualities)
    }

    async fn version(&self) -> Result<String, ResolveError> {
        let output = self.run(&["--version"], self.probe_timeout).await?;
        if !output.status.success() {
            return Err(ResolveError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
