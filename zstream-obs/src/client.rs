//! Seams between the reconciler and the OBS transport

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ObsResult;
use crate::layout::SceneItemTransform;
use crate::protocol::{MediaInputStatus, ObsVersion, SceneCollections, SceneItem, SceneList, VideoSettings};

/// The OBS requests the reconciler relies on. Every call is a fresh read or
/// write against OBS; nothing is cached behind this trait.
#[async_trait]
pub trait ObsClient: Send + Sync {
    async fn version(&self) -> ObsResult<ObsVersion>;

    async fn scene_list(&self) -> ObsResult<SceneList>;
    async fn set_current_program_scene(&self, scene: &str) -> ObsResult<()>;
    async fn create_scene(&self, scene: &str) -> ObsResult<()>;
    async fn remove_scene(&self, scene: &str) -> ObsResult<()>;

    /// Create an input inside `scene`, returning its scene item id
    async fn create_input(&self, scene: &str, input: &str, kind: &str, settings: Value) -> ObsResult<i64>;
    /// Remove an input along with every scene item showing it
    async fn remove_input(&self, input: &str) -> ObsResult<()>;
    async fn input_settings(&self, input: &str) -> ObsResult<Value>;
    /// Merge `settings` over the current input settings
    async fn set_input_settings(&self, input: &str, settings: Value) -> ObsResult<()>;
    async fn set_input_audio_monitor_type(&self, input: &str, monitor_type: &str) -> ObsResult<()>;
    async fn media_input_status(&self, input: &str) -> ObsResult<MediaInputStatus>;

    async fn scene_item_list(&self, scene: &str) -> ObsResult<Vec<SceneItem>>;
    async fn remove_scene_item(&self, scene: &str, item_id: i64) -> ObsResult<()>;
    async fn scene_item_enabled(&self, scene: &str, item_id: i64) -> ObsResult<bool>;
    async fn set_scene_item_enabled(&self, scene: &str, item_id: i64, enabled: bool) -> ObsResult<()>;
    async fn set_scene_item_transform(&self, scene: &str, item_id: i64, transform: &SceneItemTransform)
        -> ObsResult<()>;

    async fn video_settings(&self) -> ObsResult<VideoSettings>;

    async fn scene_collection_list(&self) -> ObsResult<SceneCollections>;
    async fn set_current_scene_collection(&self, name: &str) -> ObsResult<()>;
    async fn create_scene_collection(&self, name: &str) -> ObsResult<()>;
}

/// An authenticated session. `closed` fires when the peer goes away.
pub struct ObsConnection {
    pub client: Arc<dyn ObsClient>,
    pub closed: CancellationToken,
}

/// Opens sessions for the connection supervisor
#[async_trait]
pub trait ObsConnector: Send + Sync {
    async fn connect(&self) -> ObsResult<ObsConnection>;

    /// Where the connector points, for status reporting
    fn endpoint(&self) -> String;
}

/// Runs once after every successful connect, before the supervisor starts
/// waiting for the session to close
#[async_trait]
pub trait SessionHook: Send + Sync {
    async fn on_connected(&self, client: Arc<dyn ObsClient>);
}
