//! In-memory fakes for core traits

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::liveness::LiveStatusSource;
use crate::models::NewStream;
use crate::resolver::{MediaUrlResolver, ResolveError};
use crate::Result;

pub fn new_stream(name: &str) -> NewStream {
    NewStream {
        name: name.to_string(),
        twitch_url: format!("https://www.twitch.tv/{name}"),
        quality: "best".to_string(),
        m3u8_url: format!("https://cdn.example/{name}.m3u8"),
        hardware_decoding: false,
        is_z_event_streamer: false,
    }
}

/// Resolver answering only for the qualities it was given
#[derive(Default)]
pub struct FakeResolver {
    urls: HashMap<String, String>,
    attempts: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn with_url(quality: &str, url: &str) -> Self {
        Self {
            urls: HashMap::from([(quality.to_string(), url.to_string())]),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl MediaUrlResolver for FakeResolver {
    async fn resolve_exact(&self, _login: &str, quality: &str) -> std::result::Result<Option<String>, ResolveError> {
        self.attempts.lock().push(quality.to_string());
        Ok(self.urls.get(quality).cloned())
    }

    async fn available_qualities(&self, _login: &str) -> std::result::Result<Vec<String>, ResolveError> {
        Ok(self.urls.keys().cloned().collect())
    }

    async fn version(&self) -> std::result::Result<String, ResolveError> {
        Ok("streamlink 0.0.0-fake".to_string())
    }
}

/// Status source with a settable live set
pub struct FakeLiveSource {
    live: Mutex<HashSet<String>>,
    available: bool,
    calls: Mutex<usize>,
}

impl FakeLiveSource {
    pub fn new(live: &[&str]) -> Self {
        Self {
            live: Mutex::new(live.iter().map(|s| (*s).to_string()).collect()),
            available: true,
            calls: Mutex::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(&[])
        }
    }

    pub fn set_live(&self, live: &[&str]) {
        *self.live.lock() = live.iter().map(|s| (*s).to_string()).collect();
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl LiveStatusSource for FakeLiveSource {
    async fn live_channels(&self, logins: &[String]) -> Result<HashSet<String>> {
        *self.calls.lock() += 1;
        let live = self.live.lock();
        Ok(logins.iter().filter(|l| live.contains(*l)).cloned().collect())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
