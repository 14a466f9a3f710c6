//! obs-websocket v5 message shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message opcodes
pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

pub const RPC_VERSION: u32 = 1;

/// `EventSubscription::Scenes`
pub const EVENT_SUBSCRIPTION_SCENES: u32 = 1 << 2;

/// Close code sent by OBS when the authentication string is wrong
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<'a> {
    pub request_type: &'a str,
    pub request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsVersion {
    pub obs_version: String,
    pub obs_web_socket_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_name: String,
    #[serde(default)]
    pub scene_index: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneList {
    #[serde(default)]
    pub current_program_scene_name: Option<String>,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub scene_item_id: i64,
    pub source_name: String,
    #[serde(default)]
    pub input_kind: Option<String>,
    #[serde(default)]
    pub scene_item_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub base_width: u32,
    pub base_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInputStatus {
    pub media_state: String,
    #[serde(default)]
    pub media_duration: Option<i64>,
    #[serde(default)]
    pub media_cursor: Option<i64>,
}

/// Scene collections as OBS reports them. Names are kept raw: some tools
/// leave collections OBS lists with a blank name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneCollections {
    pub current: String,
    pub names: Vec<String>,
}

impl SceneCollections {
    /// Accepts both plain-string entries and `{sceneCollectionName}` objects
    #[must_use]
    pub fn from_response(data: &Value) -> Self {
        let current = data
            .get("currentSceneCollectionName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let names = data
            .get("sceneCollections")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        entry
                            .as_str()
                            .or_else(|| entry.get("sceneCollectionName").and_then(Value::as_str))
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { current, names }
    }

    /// Names that are not blank
    pub fn usable(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str).filter(|n| !n.trim().is_empty())
    }

    #[must_use]
    pub fn all_blank(&self) -> bool {
        !self.names.is_empty() && self.usable().next().is_none()
    }
}
