//! Scene reconciliation
//!
//! Every operation re-reads the OBS scene graph, resolves the objects it
//! needs through [`crate::naming`] and then issues an ordered sequence of
//! requests. Operations are idempotent and report a plain success flag:
//! failures are logged here and never escape to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use zstream_core::config::ObsConfig;
use zstream_core::StreamRegistry;

use crate::client::{ObsClient, SessionHook};
use crate::error::{ObsError, ObsResult};
use crate::layout::{chat_layout, media_layout, Canvas, ChatLayout};
use crate::naming::{resolve_scene, resolve_source, scene_name, source_name, SourceKind, CHAT_INPUT_KIND, MEDIA_INPUT_KIND};
use crate::protocol::{SceneItem, SceneList};
use crate::supervisor::{ConnectionSupervisor, SupervisorStatus};

const MONITOR_AND_OUTPUT: &str = "OBS_MONITORING_TYPE_MONITOR_AND_OUTPUT";
const CHAT_OVERLAY_CSS: &str = include_str!("../assets/chat_overlay.css");

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub collection_name: String,
    pub input_settle: Duration,
    pub scene_switch_settle: Duration,
    pub materialize_delay: Duration,
    pub media_probe_delay: Duration,
}

impl From<&ObsConfig> for ReconcilerSettings {
    fn from(config: &ObsConfig) -> Self {
        Self {
            collection_name: config.collection_name.clone(),
            input_settle: Duration::from_millis(config.input_settle_ms),
            scene_switch_settle: Duration::from_millis(config.scene_switch_settle_ms),
            materialize_delay: Duration::from_millis(config.materialize_delay_ms),
            media_probe_delay: Duration::from_millis(config.media_probe_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsStatus {
    #[serde(flatten)]
    pub connection: SupervisorStatus,
    pub obs_version: Option<String>,
    pub websocket_version: Option<String>,
    pub current_scene: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDiagnosis {
    pub streamer: String,
    pub expected_scene: String,
    pub scenes: Vec<String>,
    pub current_scene: Option<String>,
    pub resolved_scene: Option<String>,
    pub items: Vec<SceneItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDiagnosis {
    pub target: String,
    pub current: String,
    pub raw_names: Vec<String>,
    pub usable_names: Vec<String>,
    /// OBS lists collections but none of them has a usable name
    pub all_blank: bool,
    pub target_present: bool,
}

pub struct SceneReconciler {
    supervisor: Arc<ConnectionSupervisor>,
    registry: Arc<StreamRegistry>,
    settings: ReconcilerSettings,
}

/// Collapse an operation result into the flag callers see
fn report(op: &str, stream: &str, result: ObsResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(ObsError::NotConnected) => {
            warn!(stream = %stream, "Cannot {}: not connected to OBS", op);
            false
        }
        Err(e) => {
            error!(stream = %stream, error = %e, "Failed to {}", op);
            false
        }
    }
}

fn media_settings(url: &str, hw_decode: bool) -> Value {
    json!({
        "input": url,
        "is_local_file": false,
        "hw_decode": hw_decode,
        "clear_on_media_end": false,
        "restart_on_activate": false,
        "close_when_inactive": false,
        "speed_percent": 100,
        "color_range": 0,
        "linear_alpha": false,
        "input_format": "",
        "buffering_mb": 16,
        "reconnect_delay_sec": 2,
        "network_caching_ms": 5000,
        "advanced": true,
    })
}

fn chat_settings(login: &str, layout: ChatLayout) -> Value {
    json!({
        "url": format!("https://www.twitch.tv/embed/{login}/chat?parent=localhost"),
        "width": layout.width,
        "height": layout.height,
        "css": CHAT_OVERLAY_CSS,
        "shutdown": false,
        "restart_when_active": false,
    })
}

/// Why `scene` may not be removed from `list`, if anything
fn removal_refusal_in(list: &SceneList, scene: &str) -> Option<String> {
    if list.scenes.len() <= 1 {
        return Some(format!("cannot delete scene {scene}: it is the only scene in OBS"));
    }
    let active = list.current_program_scene_name.as_deref() == Some(scene);
    if active && !list.scenes.iter().any(|s| s.scene_name != scene) {
        return Some(format!("cannot delete scene {scene}: it is active and no other scene exists"));
    }
    None
}

/// Chat overlay among `items`; never the item that serves as the media source
fn chat_item<'a>(items: &'a [SceneItem], name: &str) -> Option<&'a SceneItem> {
    let media_id = resolve_source(items, name, SourceKind::Media).map(|m| m.scene_item_id);
    resolve_source(items, name, SourceKind::Chat).filter(|chat| Some(chat.scene_item_id) != media_id)
}

async fn canvas(client: &Arc<dyn ObsClient>) -> ObsResult<Canvas> {
    let video = client.video_settings().await?;
    Ok(Canvas {
        width: video.base_width,
        height: video.base_height,
    })
}

impl SceneReconciler {
    #[must_use]
    pub fn new(supervisor: Arc<ConnectionSupervisor>, registry: Arc<StreamRegistry>, settings: ReconcilerSettings) -> Self {
        Self {
            supervisor,
            registry,
            settings,
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Make sure `name` has a scene holding its media source
    pub async fn ensure_scene_for_stream(&self, name: &str, url: &str, hw_preferred: bool) -> bool {
        report("ensure scene", name, self.try_ensure_scene(name, url, hw_preferred).await)
    }

    pub async fn delete_scene_for_stream(&self, name: &str) -> bool {
        report("delete scene", name, self.try_delete_scene(name).await)
    }

    /// Reason the scene of `name` could not be deleted right now. `None`
    /// when deletion would go ahead, including when there is no scene.
    pub async fn removal_refusal(&self, name: &str) -> ObsResult<Option<String>> {
        let client = self.supervisor.client()?;
        let list = client.scene_list().await?;
        Ok(resolve_scene(&list.scenes, name).and_then(|scene| removal_refusal_in(&list, &scene.scene_name)))
    }

    pub async fn update_media_url(&self, name: &str, url: &str) -> bool {
        report("update media source", name, self.try_update_media_url(name, url).await)
    }

    /// Apply the hardware decoding flag and remember it for the stream
    pub async fn set_hardware_decode(&self, name: &str, enabled: bool) -> bool {
        report("toggle hardware decoding", name, self.try_set_hardware_decode(name, enabled).await)
    }

    pub async fn set_chat_visible(&self, name: &str, channel_login: &str, enabled: bool) -> bool {
        report(
            "toggle chat overlay",
            name,
            self.try_set_chat_visible(name, channel_login, enabled).await,
        )
    }

    /// Reapply the stored preference to whatever media source the stream has
    pub async fn apply_hw_decoding_preference(&self, name: &str) -> bool {
        match self.try_apply_hw_preference(name).await {
            Ok(()) => true,
            Err(e) => {
                debug!(stream = %name, error = %e, "Could not apply hardware decoding preference");
                false
            }
        }
    }

    pub async fn hardware_decoding_status(&self, name: &str) -> bool {
        let status = async {
            let client = self.supervisor.client()?;
            let input = self.media_input(&client, name).await?;
            let settings = client.input_settings(&input).await?;
            Ok::<_, ObsError>(settings.get("hw_decode").and_then(Value::as_bool).unwrap_or(false))
        };
        status.await.unwrap_or_else(|e| {
            debug!(stream = %name, error = %e, "Hardware decoding status unavailable");
            false
        })
    }

    pub async fn chat_enabled(&self, name: &str) -> bool {
        let status = async {
            let client = self.supervisor.client()?;
            let scene = self.scene_for(&client, name).await?;
            let items = client.scene_item_list(&scene).await?;
            match chat_item(&items, name) {
                Some(chat) => client.scene_item_enabled(&scene, chat.scene_item_id).await,
                None => Ok(false),
            }
        };
        status.await.unwrap_or_else(|e| {
            debug!(stream = %name, error = %e, "Chat status unavailable");
            false
        })
    }

    /// Put the media source back to a full-canvas fit
    pub async fn fix_media_bounds(&self, name: &str) -> bool {
        report("update media source bounds", name, self.try_fix_media_bounds(name).await)
    }

    pub async fn diagnose_scenes(&self, name: &str) -> ObsResult<SceneDiagnosis> {
        let client = self.supervisor.client()?;
        let list = client.scene_list().await?;
        let resolved = resolve_scene(&list.scenes, name).map(|s| s.scene_name.clone());
        let items = match &resolved {
            Some(scene) => client.scene_item_list(scene).await?,
            None => Vec::new(),
        };
        info!(
            stream = %name,
            scenes = list.scenes.len(),
            resolved = resolved.as_deref().unwrap_or("(none)"),
            items = items.len(),
            "Scene diagnosis"
        );
        Ok(SceneDiagnosis {
            streamer: name.to_string(),
            expected_scene: scene_name(name),
            scenes: list.scenes.into_iter().map(|s| s.scene_name).collect(),
            current_scene: list.current_program_scene_name,
            resolved_scene: resolved,
            items,
        })
    }

    /// Read-only look at the scene collections OBS reports
    pub async fn diagnose_collections(&self) -> ObsResult<CollectionDiagnosis> {
        let client = self.supervisor.client()?;
        let collections = client.scene_collection_list().await?;
        let usable_names: Vec<String> = collections.usable().map(str::to_string).collect();
        let target = self.settings.collection_name.clone();
        Ok(CollectionDiagnosis {
            target_present: usable_names.contains(&target),
            all_blank: collections.all_blank(),
            target,
            current: collections.current,
            raw_names: collections.names,
            usable_names,
        })
    }

    /// Switch to (or create) the dedicated scene collection
    pub async fn ensure_collection(&self) -> bool {
        let collection = self.settings.collection_name.clone();
        report("ensure scene collection", &collection, self.try_ensure_collection().await)
    }

    /// Ensure a scene for every tracked stream with a resolved URL. Returns
    /// how many streams ended up with a scene.
    pub async fn materialize_existing_scenes(&self) -> usize {
        let pending: Vec<_> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|s| !s.m3u8_url.is_empty())
            .collect();
        if pending.is_empty() {
            return 0;
        }

        info!(count = pending.len(), "Materializing scenes for tracked streams");
        let mut ready = 0;
        for (i, stream) in pending.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.materialize_delay).await;
            }
            if !self.supervisor.is_connected() {
                warn!("OBS went away while materializing scenes");
                break;
            }
            if self
                .ensure_scene_for_stream(&stream.name, &stream.m3u8_url, stream.hardware_decoding())
                .await
            {
                ready += 1;
            }
        }
        info!(ready, total = pending.len(), "Scenes materialized");
        ready
    }

    /// Connection snapshot, plus OBS details when a session is up
    pub async fn status(&self) -> ObsStatus {
        let mut status = ObsStatus {
            connection: self.supervisor.status(),
            obs_version: None,
            websocket_version: None,
            current_scene: None,
        };
        let Ok(client) = self.supervisor.client() else {
            return status;
        };
        match client.version().await {
            Ok(version) => {
                status.obs_version = Some(version.obs_version);
                status.websocket_version = Some(version.obs_web_socket_version);
            }
            Err(e) => debug!(error = %e, "GetVersion failed"),
        }
        match client.scene_list().await {
            Ok(list) => status.current_scene = list.current_program_scene_name,
            Err(e) => debug!(error = %e, "GetSceneList failed"),
        }
        status
    }

    async fn try_ensure_scene(&self, name: &str, url: &str, hw_preferred: bool) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let list = client.scene_list().await?;

        if let Some(scene) = resolve_scene(&list.scenes, name) {
            let scene = scene.scene_name.clone();
            let items = client.scene_item_list(&scene).await?;
            if resolve_source(&items, name, SourceKind::Media).is_none() {
                let chat_active = chat_item(&items, name).is_some();
                warn!(stream = %name, scene = %scene, "Media source missing, recreating it");
                let hw = self.hw_preference(name, hw_preferred).await;
                self.create_media_source(&client, &scene, name, url, hw, chat_active)
                    .await?;
            } else {
                debug!(stream = %name, scene = %scene, "Scene already exists");
            }
            self.apply_hw_decoding_preference(name).await;
            return Ok(());
        }

        let scene = scene_name(name);
        let hw = self.hw_preference(name, hw_preferred).await;
        info!(stream = %name, scene = %scene, hw_decode = hw, "Creating scene");
        client.create_scene(&scene).await?;
        self.create_media_source(&client, &scene, name, url, hw, false).await?;
        info!(stream = %name, scene = %scene, "Scene created");
        Ok(())
    }

    /// Stored preference when there is one; otherwise `fallback`, recorded
    /// for next time
    async fn hw_preference(&self, name: &str, fallback: bool) -> bool {
        if let Some(stored) = self.registry.hardware_decoding(name).await {
            return stored;
        }
        if let Err(e) = self.registry.set_hardware_decoding(name, fallback).await {
            warn!(stream = %name, error = %e, "Could not store hardware decoding preference");
        }
        fallback
    }

    async fn create_media_source(
        &self,
        client: &Arc<dyn ObsClient>,
        scene: &str,
        name: &str,
        url: &str,
        hw_decode: bool,
        chat_active: bool,
    ) -> ObsResult<()> {
        let input = source_name(name, SourceKind::Media);
        let item_id = client
            .create_input(scene, &input, MEDIA_INPUT_KIND, media_settings(url, hw_decode))
            .await?;
        tokio::time::sleep(self.settings.input_settle).await;

        // placement problems leave a usable, if misplaced, source
        if let Err(e) = self.place_media(client, scene, item_id, chat_active).await {
            warn!(stream = %name, source = %input, error = %e, "Could not place media source");
        }
        if let Err(e) = client.set_input_audio_monitor_type(&input, MONITOR_AND_OUTPUT).await {
            debug!(source = %input, error = %e, "Could not enable audio monitoring");
        }
        self.spawn_media_probe(Arc::clone(client), input);
        Ok(())
    }

    async fn place_media(&self, client: &Arc<dyn ObsClient>, scene: &str, item_id: i64, chat_active: bool) -> ObsResult<()> {
        let canvas = canvas(client).await?;
        client
            .set_scene_item_transform(scene, item_id, &media_layout(canvas, chat_active).transform())
            .await?;
        client.set_scene_item_enabled(scene, item_id, true).await
    }

    fn spawn_media_probe(&self, client: Arc<dyn ObsClient>, input: String) {
        let delay = self.settings.media_probe_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match client.media_input_status(&input).await {
                Ok(status) => debug!(source = %input, state = %status.media_state, "Media source status"),
                Err(e) => debug!(source = %input, error = %e, "Media source status unavailable"),
            }
        });
    }

    async fn try_delete_scene(&self, name: &str) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let list = client.scene_list().await?;
        let Some(scene) = resolve_scene(&list.scenes, name) else {
            debug!(stream = %name, "No scene to delete");
            return Ok(());
        };
        let scene = scene.scene_name.clone();

        if let Some(reason) = removal_refusal_in(&list, &scene) {
            return Err(ObsError::Refused(reason));
        }

        if list.current_program_scene_name.as_deref() == Some(scene.as_str()) {
            if let Some(other) = list.scenes.iter().find(|s| s.scene_name != scene) {
                info!(from = %scene, to = %other.scene_name, "Switching program scene before deletion");
                client.set_current_program_scene(&other.scene_name).await?;
                tokio::time::sleep(self.settings.scene_switch_settle).await;
            }
        }

        client.remove_scene(&scene).await?;
        info!(stream = %name, scene = %scene, "Scene deleted");
        Ok(())
    }

    async fn try_update_media_url(&self, name: &str, url: &str) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let input = self.media_input(&client, name).await?;
        let hw = self.registry.hardware_decoding(name).await.unwrap_or(false);
        client
            .set_input_settings(
                &input,
                json!({ "input": url, "hw_decode": hw, "restart_on_activate": false }),
            )
            .await?;
        info!(stream = %name, source = %input, hw_decode = hw, "Media source URL updated");
        Ok(())
    }

    async fn try_set_hardware_decode(&self, name: &str, enabled: bool) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let input = self.media_input(&client, name).await?;
        client.set_input_settings(&input, json!({ "hw_decode": enabled })).await?;
        info!(stream = %name, source = %input, enabled, "Hardware decoding updated");

        match self.registry.set_hardware_decoding(name, enabled).await {
            Ok(true) => {}
            Ok(false) => debug!(stream = %name, "Untracked stream, preference not stored"),
            Err(e) => warn!(stream = %name, error = %e, "Could not store hardware decoding preference"),
        }
        Ok(())
    }

    async fn try_apply_hw_preference(&self, name: &str) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let hw = self.registry.hardware_decoding(name).await.unwrap_or(false);
        let input = self.media_input(&client, name).await?;
        client
            .set_input_settings(&input, json!({ "hw_decode": hw, "restart_on_activate": false }))
            .await?;
        debug!(stream = %name, source = %input, hw_decode = hw, "Hardware decoding preference applied");
        Ok(())
    }

    async fn try_set_chat_visible(&self, name: &str, channel_login: &str, enabled: bool) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let scene = self.scene_for(&client, name).await?;
        let canvas = canvas(&client).await?;
        let items = client.scene_item_list(&scene).await?;

        if let Some(stale) = chat_item(&items, name) {
            self.remove_chat(&client, &scene, stale).await?;
        }

        if enabled {
            let layout = chat_layout(canvas);
            let chat = source_name(name, SourceKind::Chat);
            let item_id = client
                .create_input(&scene, &chat, CHAT_INPUT_KIND, chat_settings(channel_login, layout))
                .await?;
            client.set_scene_item_transform(&scene, item_id, &layout.transform()).await?;
            client.set_scene_item_enabled(&scene, item_id, true).await?;
        }

        match resolve_source(&items, name, SourceKind::Media) {
            Some(media) => {
                client
                    .set_scene_item_transform(&scene, media.scene_item_id, &media_layout(canvas, enabled).transform())
                    .await?;
            }
            None => warn!(stream = %name, scene = %scene, "No media source to resize"),
        }

        info!(stream = %name, enabled, "Chat overlay updated");
        Ok(())
    }

    async fn remove_chat(&self, client: &Arc<dyn ObsClient>, scene: &str, chat: &SceneItem) -> ObsResult<()> {
        match client.remove_input(&chat.source_name).await {
            Ok(()) => Ok(()),
            // a source that is not an input of its own still has a scene item
            Err(ObsError::Request { .. }) => client.remove_scene_item(scene, chat.scene_item_id).await,
            Err(e) => Err(e),
        }
    }

    async fn try_fix_media_bounds(&self, name: &str) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let scene = self.scene_for(&client, name).await?;
        let items = client.scene_item_list(&scene).await?;
        let media = resolve_source(&items, name, SourceKind::Media)
            .ok_or_else(|| ObsError::NotFound(format!("media source for {name} in {scene}")))?;
        let canvas = canvas(&client).await?;
        client
            .set_scene_item_transform(&scene, media.scene_item_id, &media_layout(canvas, false).transform())
            .await?;
        info!(stream = %name, source = %media.source_name, width = canvas.width, height = canvas.height, "Media bounds reset");
        Ok(())
    }

    async fn try_ensure_collection(&self) -> ObsResult<()> {
        let client = self.supervisor.client()?;
        let target = self.settings.collection_name.as_str();
        let collections = client.scene_collection_list().await?;
        debug!(current = %collections.current, names = ?collections.names, "Scene collections");

        if collections.current == target {
            info!(collection = %target, "Already using scene collection");
            return Ok(());
        }

        if collections.usable().any(|n| n == target) {
            info!(collection = %target, "Switching scene collection");
            client.set_current_scene_collection(target).await?;
            tokio::time::sleep(self.settings.scene_switch_settle).await;
            return Ok(());
        }

        if collections.all_blank() {
            warn!("OBS reports only unnamed scene collections, staying in the current one");
            return self.ensure_marker_scene(&client).await;
        }

        match client.create_scene_collection(target).await {
            Ok(()) => {
                tokio::time::sleep(self.settings.scene_switch_settle).await;
                info!(collection = %target, "Scene collection created");
                Ok(())
            }
            Err(e) => {
                warn!(collection = %target, error = %e, "Could not create scene collection, using a marker scene");
                self.ensure_marker_scene(&client).await
            }
        }
    }

    /// Scene marking the current collection as the managed one
    async fn ensure_marker_scene(&self, client: &Arc<dyn ObsClient>) -> ObsResult<()> {
        let marker = format!("{}_Session_Active", self.settings.collection_name);
        let list = client.scene_list().await?;
        if list.scenes.iter().any(|s| s.scene_name == marker) {
            debug!(scene = %marker, "Session marker already present");
            return Ok(());
        }
        client.create_scene(&marker).await?;
        warn!(scene = %marker, "Created session marker scene in the current collection");
        Ok(())
    }

    async fn scene_for(&self, client: &Arc<dyn ObsClient>, name: &str) -> ObsResult<String> {
        let list = client.scene_list().await?;
        resolve_scene(&list.scenes, name)
            .map(|s| s.scene_name.clone())
            .ok_or_else(|| ObsError::NotFound(format!("scene for {name}")))
    }

    /// Name of the media input actually showing `name`. Falls back to the
    /// canonical input name when no scene can be matched.
    async fn media_input(&self, client: &Arc<dyn ObsClient>, name: &str) -> ObsResult<String> {
        let list = client.scene_list().await?;
        if let Some(scene) = resolve_scene(&list.scenes, name) {
            let items = client.scene_item_list(&scene.scene_name).await?;
            if let Some(media) = resolve_source(&items, name, SourceKind::Media) {
                return Ok(media.source_name.clone());
            }
        }

        let canonical = source_name(name, SourceKind::Media);
        match client.input_settings(&canonical).await {
            Ok(_) => Ok(canonical),
            Err(ObsError::Request { .. }) => Err(ObsError::NotFound(format!("media source for {name}"))),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionHook for SceneReconciler {
    async fn on_connected(&self, client: Arc<dyn ObsClient>) {
        match client.version().await {
            Ok(v) => info!(obs = %v.obs_version, websocket = %v.obs_web_socket_version, "OBS session ready"),
            Err(e) => warn!(error = %e, "Could not read OBS version"),
        }
        match client.scene_list().await {
            Ok(list) => info!(
                scene = list.current_program_scene_name.as_deref().unwrap_or("(none)"),
                scenes = list.scenes.len(),
                "Current OBS scene"
            ),
            Err(e) => warn!(error = %e, "Could not read OBS scene list"),
        }

        self.ensure_collection().await;
        self.materialize_existing_scenes().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BoundsType;
    use crate::test_helpers::{FakeConnector, FakeObs};
    use crate::supervisor::SupervisorSettings;
    use tempfile::TempDir;
    use zstream_core::NewStream;

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            collection_name: "ZEvent".to_string(),
            input_settle: Duration::ZERO,
            scene_switch_settle: Duration::ZERO,
            materialize_delay: Duration::ZERO,
            media_probe_delay: Duration::ZERO,
        }
    }

    fn stream(name: &str, hw: bool) -> NewStream {
        NewStream {
            name: name.to_string(),
            twitch_url: format!("https://www.twitch.tv/{name}"),
            quality: "best".to_string(),
            m3u8_url: format!("https://cdn.example/{name}.m3u8"),
            hardware_decoding: hw,
            is_z_event_streamer: false,
        }
    }

    async fn setup(obs: FakeObs, streams: Vec<NewStream>) -> (TempDir, Arc<FakeObs>, Arc<StreamRegistry>, SceneReconciler) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StreamRegistry::open(dir.path().join("streams.json"), None).await);
        for s in streams {
            registry.add(s).await.unwrap();
        }
        let obs = Arc::new(obs);
        let supervisor = Arc::new(ConnectionSupervisor::connected_with(obs.clone()));
        let reconciler = SceneReconciler::new(supervisor, registry.clone(), settings());
        (dir, obs, registry, reconciler)
    }

    #[tokio::test]
    async fn test_ensure_scene_is_idempotent() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![stream("alice", true)]).await;

        assert!(reconciler.ensure_scene_for_stream("alice", "https://cdn/a.m3u8", false).await);
        assert!(reconciler.ensure_scene_for_stream("alice", "https://cdn/a.m3u8", false).await);

        assert_eq!(obs.scene_names(), vec!["Scene", "Stream_alice"]);
        assert_eq!(obs.input_names(), vec!["Media_alice"]);
        assert_eq!(obs.count("CreateScene"), 1);
        assert_eq!(obs.count("CreateInput"), 1);

        let input = obs.input("Media_alice").unwrap();
        assert_eq!(input.kind, MEDIA_INPUT_KIND);
        // stored preference wins over the argument
        assert_eq!(input.settings["hw_decode"], true);
        assert_eq!(input.settings["input"], "https://cdn/a.m3u8");
        assert_eq!(input.settings["network_caching_ms"], 5000);
        assert_eq!(input.monitor_type.as_deref(), Some(MONITOR_AND_OUTPUT));

        let items = obs.items("Stream_alice");
        assert_eq!(items.len(), 1);
        assert!(items[0].enabled);
        let transform = items[0].transform.as_ref().unwrap();
        assert_eq!(transform.bounds_type, BoundsType::ScaleInner);
        assert_eq!(transform.bounds_width, Some(1920.0));
    }

    #[tokio::test]
    async fn test_ensure_scene_repairs_missing_media_source() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![stream("alice", false)]).await;
        assert!(reconciler.ensure_scene_for_stream("alice", "u1", false).await);

        obs.remove_input("Media_alice").await.unwrap();
        assert!(obs.items("Stream_alice").is_empty());

        assert!(reconciler.ensure_scene_for_stream("alice", "u2", false).await);
        assert_eq!(obs.count("CreateScene"), 1);
        assert_eq!(obs.items("Stream_alice").len(), 1);
        assert_eq!(obs.input("Media_alice").unwrap().settings["input"], "u2");
    }

    #[tokio::test]
    async fn test_untracked_stream_uses_argument() {
        let (_dir, obs, registry, reconciler) = setup(FakeObs::new(), vec![]).await;
        assert!(reconciler.ensure_scene_for_stream("bob", "u", true).await);
        assert_eq!(obs.input("Media_bob").unwrap().settings["hw_decode"], true);
        assert_eq!(registry.hardware_decoding("bob").await, None);
    }

    #[tokio::test]
    async fn test_scene_creation_failure_reports_false() {
        let obs = FakeObs::new();
        obs.fail("CreateScene");
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;
        assert!(!reconciler.ensure_scene_for_stream("alice", "u", false).await);
        assert_eq!(obs.count("CreateInput"), 0);
    }

    #[tokio::test]
    async fn test_placement_failure_is_not_fatal() {
        let obs = FakeObs::new();
        obs.fail("SetSceneItemTransform");
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;
        assert!(reconciler.ensure_scene_for_stream("alice", "u", false).await);
        assert_eq!(obs.input_names(), vec!["Media_alice"]);
    }

    #[tokio::test]
    async fn test_delete_refused_for_lone_active_scene() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::with_scenes(&["Stream_alice"]), vec![]).await;

        let reason = reconciler.removal_refusal("alice").await.unwrap();
        assert!(reason.unwrap().contains("only scene"));
        assert!(!reconciler.delete_scene_for_stream("alice").await);
        assert_eq!(obs.scene_names(), vec!["Stream_alice"]);
        assert_eq!(obs.count("RemoveScene"), 0);
    }

    #[tokio::test]
    async fn test_delete_switches_away_from_active_scene() {
        let (_dir, obs, _registry, reconciler) =
            setup(FakeObs::with_scenes(&["Stream_alice", "Main"]), vec![]).await;

        assert_eq!(reconciler.removal_refusal("alice").await.unwrap(), None);
        assert!(reconciler.delete_scene_for_stream("alice").await);
        assert_eq!(obs.scene_names(), vec!["Main"]);
        assert_eq!(obs.current_scene().as_deref(), Some("Main"));

        let calls = obs.calls();
        let switch = calls.iter().position(|c| c == "SetCurrentProgramScene").unwrap();
        let remove = calls.iter().position(|c| c == "RemoveScene").unwrap();
        assert!(switch < remove);
    }

    #[tokio::test]
    async fn test_delete_missing_scene_is_success() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![]).await;
        assert!(reconciler.delete_scene_for_stream("ghost").await);
        assert_eq!(obs.count("RemoveScene"), 0);
    }

    #[tokio::test]
    async fn test_chat_overlay_layout() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![stream("alice", false)]).await;
        assert!(reconciler.ensure_scene_for_stream("alice", "u", false).await);

        assert!(reconciler.set_chat_visible("alice", "alice", true).await);
        assert!(reconciler.chat_enabled("alice").await);

        let chat = obs.input("Chat_alice").unwrap();
        assert_eq!(chat.kind, CHAT_INPUT_KIND);
        assert_eq!(chat.settings["width"], 345);
        assert_eq!(chat.settings["height"], 1080);
        assert!(chat.settings["url"].as_str().unwrap().contains("/embed/alice/chat"));

        let items = obs.items("Stream_alice");
        let chat_item = items.iter().find(|i| i.source == "Chat_alice").unwrap();
        assert_eq!(chat_item.transform.as_ref().unwrap().position_x, 1575.0);
        let media_item = items.iter().find(|i| i.source == "Media_alice").unwrap();
        let media = media_item.transform.as_ref().unwrap();
        assert!((media.scale_x - 0.8203125).abs() < 1e-9);
        assert_eq!(media.bounds_type, BoundsType::None);

        // enabling twice replaces the overlay instead of stacking another
        assert!(reconciler.set_chat_visible("alice", "alice", true).await);
        assert_eq!(obs.items("Stream_alice").len(), 2);

        assert!(reconciler.set_chat_visible("alice", "alice", false).await);
        assert!(!reconciler.chat_enabled("alice").await);
        assert!(obs.input("Chat_alice").is_none());
        let items = obs.items("Stream_alice");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].transform.as_ref().unwrap().bounds_type, BoundsType::ScaleInner);
    }

    #[tokio::test]
    async fn test_chat_toggle_keeps_media_of_chat_named_streamer() {
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![stream("chatnoir", false)]).await;
        assert!(reconciler.ensure_scene_for_stream("chatnoir", "u", false).await);
        assert!(!reconciler.chat_enabled("chatnoir").await);

        assert!(reconciler.set_chat_visible("chatnoir", "chatnoir", true).await);
        assert_eq!(obs.input_names(), vec!["Chat_chatnoir", "Media_chatnoir"]);
        assert_eq!(obs.items("Stream_chatnoir").len(), 2);
        assert!(reconciler.chat_enabled("chatnoir").await);

        assert!(reconciler.set_chat_visible("chatnoir", "chatnoir", false).await);
        assert_eq!(obs.input_names(), vec!["Media_chatnoir"]);
        assert!(!reconciler.chat_enabled("chatnoir").await);
    }

    #[tokio::test]
    async fn test_media_updates_follow_renamed_sources() {
        let obs = FakeObs::new();
        obs.add_manual_scene("alice stream", "alice feed", MEDIA_INPUT_KIND, json!({ "input": "old" }));
        let (_dir, obs, registry, reconciler) = setup(obs, vec![stream("alice", true)]).await;

        assert!(reconciler.update_media_url("alice", "new").await);
        let settings = obs.input("alice feed").unwrap().settings;
        assert_eq!(settings["input"], "new");
        assert_eq!(settings["hw_decode"], true);
        assert_eq!(settings["restart_on_activate"], false);

        assert!(reconciler.set_hardware_decode("alice", false).await);
        assert!(!reconciler.hardware_decoding_status("alice").await);
        assert_eq!(registry.hardware_decoding("alice").await, Some(false));

        assert!(reconciler.fix_media_bounds("alice").await);
        assert!(!reconciler.update_media_url("ghost", "x").await);
    }

    #[tokio::test]
    async fn test_not_connected_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StreamRegistry::open(dir.path().join("streams.json"), None).await);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(FakeConnector::failing()),
            SupervisorSettings {
                enabled: true,
                reconnect_interval: Duration::from_secs(5),
                max_attempts: 3,
            },
        ));
        let reconciler = SceneReconciler::new(supervisor, registry, settings());

        assert!(!reconciler.ensure_scene_for_stream("alice", "u", false).await);
        assert!(!reconciler.delete_scene_for_stream("alice").await);
        assert!(!reconciler.set_chat_visible("alice", "alice", true).await);
        assert!(matches!(reconciler.removal_refusal("alice").await, Err(ObsError::NotConnected)));

        let status = reconciler.status().await;
        assert!(!status.connection.connected);
        assert!(status.obs_version.is_none());
    }

    #[tokio::test]
    async fn test_collection_switch_and_create() {
        let obs = FakeObs::new();
        obs.set_collections("Main", &["Main", "ZEvent"]);
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;
        assert!(reconciler.ensure_collection().await);
        assert_eq!(obs.collections().current, "ZEvent");
        assert_eq!(obs.count("CreateSceneCollection"), 0);

        assert!(reconciler.ensure_collection().await);
        assert_eq!(obs.count("SetCurrentSceneCollection"), 1);

        let obs = FakeObs::new();
        obs.set_collections("Main", &["Main"]);
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;
        assert!(reconciler.ensure_collection().await);
        assert_eq!(obs.collections().current, "ZEvent");
    }

    #[tokio::test]
    async fn test_blank_collection_names_use_marker_scene() {
        let obs = FakeObs::new();
        obs.set_collections("", &["", "  "]);
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;

        assert!(reconciler.ensure_collection().await);
        assert!(reconciler.ensure_collection().await);
        assert_eq!(obs.scene_names(), vec!["Scene", "ZEvent_Session_Active"]);
        assert_eq!(obs.count("CreateSceneCollection"), 0);

        let diagnosis = reconciler.diagnose_collections().await.unwrap();
        assert!(diagnosis.all_blank);
        assert!(!diagnosis.target_present);
        assert!(diagnosis.usable_names.is_empty());
    }

    #[tokio::test]
    async fn test_collection_creation_failure_falls_back_to_marker() {
        let obs = FakeObs::new();
        obs.fail("CreateSceneCollection");
        let (_dir, obs, _registry, reconciler) = setup(obs, vec![]).await;
        assert!(reconciler.ensure_collection().await);
        assert!(obs.scene_names().contains(&"ZEvent_Session_Active".to_string()));
    }

    #[tokio::test]
    async fn test_session_hook_materializes_tracked_streams() {
        let mut pending = stream("bob", false);
        pending.m3u8_url.clear();
        let (_dir, obs, _registry, reconciler) = setup(FakeObs::new(), vec![stream("alice", false), pending]).await;

        reconciler.on_connected(obs.clone()).await;

        assert_eq!(obs.collections().current, "ZEvent");
        assert_eq!(obs.scene_names(), vec!["Scene", "Stream_alice"]);

        let diagnosis = reconciler.diagnose_scenes("alice").await.unwrap();
        assert_eq!(diagnosis.resolved_scene.as_deref(), Some("Stream_alice"));
        assert_eq!(diagnosis.items.len(), 1);
        let missing = reconciler.diagnose_scenes("bob").await.unwrap();
        assert!(missing.resolved_scene.is_none());
    }
}
