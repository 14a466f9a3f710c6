//! In-memory OBS for reconciler and supervisor tests

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::client::{ObsClient, ObsConnection, ObsConnector, SessionHook};
use crate::error::{ObsError, ObsResult};
use crate::layout::SceneItemTransform;
use crate::protocol::{MediaInputStatus, ObsVersion, Scene, SceneCollections, SceneItem, SceneList, VideoSettings};

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: i64,
    pub source: String,
    pub enabled: bool,
    pub transform: Option<SceneItemTransform>,
}

#[derive(Debug, Clone)]
pub struct FakeInput {
    pub kind: String,
    pub settings: Value,
    pub monitor_type: Option<String>,
}

#[derive(Default)]
struct Graph {
    scenes: Vec<(String, Vec<FakeItem>)>,
    inputs: BTreeMap<String, FakeInput>,
    current: Option<String>,
    next_item_id: i64,
    collections: SceneCollections,
}

/// A scene graph that behaves like OBS for the requests the reconciler makes
pub struct FakeObs {
    graph: Mutex<Graph>,
    canvas: VideoSettings,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeObs {
    pub fn new() -> Self {
        Self::with_scenes(&["Scene"])
    }

    /// First scene becomes the program scene
    pub fn with_scenes(names: &[&str]) -> Self {
        let graph = Graph {
            scenes: names.iter().map(|n| ((*n).to_string(), Vec::new())).collect(),
            current: names.first().map(|n| (*n).to_string()),
            next_item_id: 1,
            collections: SceneCollections {
                current: "Untitled".to_string(),
                names: vec!["Untitled".to_string()],
            },
            ..Graph::default()
        };
        Self {
            graph: Mutex::new(graph),
            canvas: VideoSettings {
                base_width: 1920,
                base_height: 1080,
            },
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_collections(&self, current: &str, names: &[&str]) {
        self.graph.lock().collections = SceneCollections {
            current: current.to_string(),
            names: names.iter().map(|n| (*n).to_string()).collect(),
        };
    }

    /// Make every call to `request` fail from now on
    pub fn fail(&self, request: &'static str) {
        self.failing.lock().insert(request);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, request: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == request).count()
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.graph.lock().scenes.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn current_scene(&self) -> Option<String> {
        self.graph.lock().current.clone()
    }

    pub fn items(&self, scene: &str) -> Vec<FakeItem> {
        self.graph
            .lock()
            .scenes
            .iter()
            .find(|(n, _)| n == scene)
            .map(|(_, items)| items.clone())
            .unwrap_or_default()
    }

    pub fn input(&self, name: &str) -> Option<FakeInput> {
        self.graph.lock().inputs.get(name).cloned()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.graph.lock().inputs.keys().cloned().collect()
    }

    pub fn collections(&self) -> SceneCollections {
        self.graph.lock().collections.clone()
    }

    /// Add a scene holding an existing input, as if built by hand in OBS
    pub fn add_manual_scene(&self, scene: &str, input: &str, kind: &str, settings: Value) {
        let mut graph = self.graph.lock();
        let id = graph.next_item_id;
        graph.next_item_id += 1;
        graph.inputs.insert(
            input.to_string(),
            FakeInput {
                kind: kind.to_string(),
                settings,
                monitor_type: None,
            },
        );
        graph.scenes.push((
            scene.to_string(),
            vec![FakeItem {
                id,
                source: input.to_string(),
                enabled: true,
                transform: None,
            }],
        ));
    }

    fn record(&self, request: &'static str) -> ObsResult<()> {
        self.calls.lock().push(request.to_string());
        if self.failing.lock().contains(request) {
            return Err(ObsError::Request {
                request: request.to_string(),
                code: 600,
                comment: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn missing(what: &str) -> ObsError {
    ObsError::Request {
        request: what.to_string(),
        code: 600,
        comment: "resource not found".to_string(),
    }
}

fn scene_items<'a>(graph: &'a mut Graph, scene: &str) -> ObsResult<&'a mut Vec<FakeItem>> {
    graph
        .scenes
        .iter_mut()
        .find(|(n, _)| n == scene)
        .map(|(_, items)| items)
        .ok_or_else(|| missing(scene))
}

fn item_mut<'a>(graph: &'a mut Graph, scene: &str, id: i64) -> ObsResult<&'a mut FakeItem> {
    scene_items(graph, scene)?
        .iter_mut()
        .find(|i| i.id == id)
        .ok_or_else(|| missing(&format!("{scene}#{id}")))
}

#[async_trait]
impl ObsClient for FakeObs {
    async fn version(&self) -> ObsResult<ObsVersion> {
        self.record("GetVersion")?;
        Ok(ObsVersion {
            obs_version: "30.0.0".to_string(),
            obs_web_socket_version: "5.3.0".to_string(),
        })
    }

    async fn scene_list(&self) -> ObsResult<SceneList> {
        self.record("GetSceneList")?;
        let graph = self.graph.lock();
        Ok(SceneList {
            current_program_scene_name: graph.current.clone(),
            scenes: graph
                .scenes
                .iter()
                .enumerate()
                .map(|(i, (name, _))| Scene {
                    scene_name: name.clone(),
                    scene_index: i as i64,
                })
                .collect(),
        })
    }

    async fn set_current_program_scene(&self, scene: &str) -> ObsResult<()> {
        self.record("SetCurrentProgramScene")?;
        let mut graph = self.graph.lock();
        if !graph.scenes.iter().any(|(n, _)| n == scene) {
            return Err(missing(scene));
        }
        graph.current = Some(scene.to_string());
        Ok(())
    }

    async fn create_scene(&self, scene: &str) -> ObsResult<()> {
        self.record("CreateScene")?;
        let mut graph = self.graph.lock();
        if graph.scenes.iter().any(|(n, _)| n == scene) {
            return Err(ObsError::Request {
                request: "CreateScene".to_string(),
                code: 601,
                comment: "scene already exists".to_string(),
            });
        }
        graph.scenes.push((scene.to_string(), Vec::new()));
        Ok(())
    }

    async fn remove_scene(&self, scene: &str) -> ObsResult<()> {
        self.record("RemoveScene")?;
        let mut graph = self.graph.lock();
        let before = graph.scenes.len();
        graph.scenes.retain(|(n, _)| n != scene);
        if graph.scenes.len() == before {
            return Err(missing(scene));
        }
        if graph.current.as_deref() == Some(scene) {
            graph.current = graph.scenes.first().map(|(n, _)| n.clone());
        }
        Ok(())
    }

    async fn create_input(&self, scene: &str, input: &str, kind: &str, settings: Value) -> ObsResult<i64> {
        self.record("CreateInput")?;
        let mut graph = self.graph.lock();
        if graph.inputs.contains_key(input) {
            return Err(ObsError::Request {
                request: "CreateInput".to_string(),
                code: 601,
                comment: "input already exists".to_string(),
            });
        }
        let id = graph.next_item_id;
        scene_items(&mut graph, scene)?.push(FakeItem {
            id,
            source: input.to_string(),
            enabled: true,
            transform: None,
        });
        graph.next_item_id += 1;
        graph.inputs.insert(
            input.to_string(),
            FakeInput {
                kind: kind.to_string(),
                settings,
                monitor_type: None,
            },
        );
        Ok(id)
    }

    async fn remove_input(&self, input: &str) -> ObsResult<()> {
        self.record("RemoveInput")?;
        let mut graph = self.graph.lock();
        if graph.inputs.remove(input).is_none() {
            return Err(missing(input));
        }
        for (_, items) in &mut graph.scenes {
            items.retain(|i| i.source != input);
        }
        Ok(())
    }

    async fn input_settings(&self, input: &str) -> ObsResult<Value> {
        self.record("GetInputSettings")?;
        self.graph
            .lock()
            .inputs
            .get(input)
            .map(|i| i.settings.clone())
            .ok_or_else(|| missing(input))
    }

    async fn set_input_settings(&self, input: &str, settings: Value) -> ObsResult<()> {
        self.record("SetInputSettings")?;
        let mut graph = self.graph.lock();
        let current = graph.inputs.get_mut(input).ok_or_else(|| missing(input))?;
        let mut merged = current.settings.as_object().cloned().unwrap_or_else(Map::new);
        if let Some(overlay) = settings.as_object() {
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
        }
        current.settings = Value::Object(merged);
        Ok(())
    }

    async fn set_input_audio_monitor_type(&self, input: &str, monitor_type: &str) -> ObsResult<()> {
        self.record("SetInputAudioMonitorType")?;
        let mut graph = self.graph.lock();
        let current = graph.inputs.get_mut(input).ok_or_else(|| missing(input))?;
        current.monitor_type = Some(monitor_type.to_string());
        Ok(())
    }

    async fn media_input_status(&self, input: &str) -> ObsResult<MediaInputStatus> {
        self.record("GetMediaInputStatus")?;
        if !self.graph.lock().inputs.contains_key(input) {
            return Err(missing(input));
        }
        Ok(MediaInputStatus {
            media_state: "OBS_MEDIA_STATE_PLAYING".to_string(),
            media_duration: None,
            media_cursor: None,
        })
    }

    async fn scene_item_list(&self, scene: &str) -> ObsResult<Vec<SceneItem>> {
        self.record("GetSceneItemList")?;
        let mut graph = self.graph.lock();
        let items = scene_items(&mut graph, scene)?.clone();
        Ok(items
            .into_iter()
            .map(|i| SceneItem {
                input_kind: graph.inputs.get(&i.source).map(|input| input.kind.clone()),
                scene_item_id: i.id,
                source_name: i.source,
                scene_item_enabled: i.enabled,
            })
            .collect())
    }

    async fn remove_scene_item(&self, scene: &str, item_id: i64) -> ObsResult<()> {
        self.record("RemoveSceneItem")?;
        let mut graph = self.graph.lock();
        let items = scene_items(&mut graph, scene)?;
        let before = items.len();
        items.retain(|i| i.id != item_id);
        if items.len() == before {
            return Err(missing(&format!("{scene}#{item_id}")));
        }
        Ok(())
    }

    async fn scene_item_enabled(&self, scene: &str, item_id: i64) -> ObsResult<bool> {
        self.record("GetSceneItemEnabled")?;
        let mut graph = self.graph.lock();
        Ok(item_mut(&mut graph, scene, item_id)?.enabled)
    }

    async fn set_scene_item_enabled(&self, scene: &str, item_id: i64, enabled: bool) -> ObsResult<()> {
        self.record("SetSceneItemEnabled")?;
        let mut graph = self.graph.lock();
        item_mut(&mut graph, scene, item_id)?.enabled = enabled;
        Ok(())
    }

    async fn set_scene_item_transform(
        &self,
        scene: &str,
        item_id: i64,
        transform: &SceneItemTransform,
    ) -> ObsResult<()> {
        self.record("SetSceneItemTransform")?;
        let mut graph = self.graph.lock();
        item_mut(&mut graph, scene, item_id)?.transform = Some(transform.clone());
        Ok(())
    }

    async fn video_settings(&self) -> ObsResult<VideoSettings> {
        self.record("GetVideoSettings")?;
        Ok(self.canvas)
    }

    async fn scene_collection_list(&self) -> ObsResult<SceneCollections> {
        self.record("GetSceneCollectionList")?;
        Ok(self.graph.lock().collections.clone())
    }

    async fn set_current_scene_collection(&self, name: &str) -> ObsResult<()> {
        self.record("SetCurrentSceneCollection")?;
        let mut graph = self.graph.lock();
        if !graph.collections.names.iter().any(|n| n == name) {
            return Err(missing(name));
        }
        graph.collections.current = name.to_string();
        Ok(())
    }

    async fn create_scene_collection(&self, name: &str) -> ObsResult<()> {
        self.record("CreateSceneCollection")?;
        let mut graph = self.graph.lock();
        graph.collections.names.push(name.to_string());
        graph.collections.current = name.to_string();
        Ok(())
    }
}

/// Connector that fails until given a client to hand out
pub struct FakeConnector {
    client: Mutex<Option<Arc<FakeObs>>>,
    current: Mutex<Option<CancellationToken>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn failing() -> Self {
        Self {
            client: Mutex::new(None),
            current: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn succeed_with(&self, client: Arc<FakeObs>) {
        *self.client.lock() = Some(client);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Drop the live session as if OBS went away
    pub fn close_current(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl ObsConnector for FakeConnector {
    async fn connect(&self) -> ObsResult<ObsConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| ObsError::Transport("connection refused".to_string()))?;
        let closed = CancellationToken::new();
        *self.current.lock() = Some(closed.clone());
        Ok(ObsConnection { client, closed })
    }

    fn endpoint(&self) -> String {
        "ws://fake:4455".to_string()
    }
}

#[derive(Default)]
pub struct RecordingHook {
    calls: AtomicUsize,
}

impl RecordingHook {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHook for RecordingHook {
    async fn on_connected(&self, _client: Arc<dyn ObsClient>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
