use serde::{Deserialize, Serialize};

use crate::resolver::extract_channel_login;

/// A stream tracked by the control-plane, persisted in the registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedStream {
    /// Dense "1".."n", reassigned on every persist
    pub id: String,
    pub name: String,
    pub twitch_url: String,
    pub quality: String,
    /// Last resolved media URL
    #[serde(alias = "httpUrl")]
    pub m3u8_url: String,
    #[serde(default)]
    pub is_z_event_streamer: bool,
    /// `None` only for snapshots written before the preference existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_decoding: Option<bool>,
}

impl TrackedStream {
    /// Twitch login derived from the channel URL
    #[must_use]
    pub fn channel_login(&self) -> Option<String> {
        extract_channel_login(&self.twitch_url)
    }

    #[must_use]
    pub fn hardware_decoding(&self) -> bool {
        self.hardware_decoding.unwrap_or(false)
    }
}

/// Input for [`crate::StreamRegistry::add`]
#[derive(Debug, Clone)]
pub struct NewStream {
    pub name: String,
    pub twitch_url: String,
    pub quality: String,
    pub m3u8_url: String,
    pub hardware_decoding: bool,
    pub is_z_event_streamer: bool,
}
