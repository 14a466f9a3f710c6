//! obs-websocket v5 transport
//!
//! Handshake (Hello, Identify, Identified) happens inline in `connect`.
//! Afterwards a writer task drains an outgoing queue and a reader task routes
//! each `RequestResponse` to the caller waiting on its request id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ObsClient, ObsConnection, ObsConnector};
use crate::error::{ObsError, ObsResult};
use crate::layout::SceneItemTransform;
use crate::protocol::{
    op, Envelope, Event, Hello, Identified, Identify, MediaInputStatus, ObsVersion, Request, RequestResponse,
    SceneCollections, SceneItem, SceneList, VideoSettings, CLOSE_AUTHENTICATION_FAILED, EVENT_SUBSCRIPTION_SCENES,
    RPC_VERSION,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<DashMap<String, oneshot::Sender<RequestResponse>>>;

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
#[must_use]
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

pub struct WsConnector {
    url: String,
    password: Option<String>,
    request_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, password: Option<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            password: password.filter(|p| !p.is_empty()),
            request_timeout,
        }
    }

    async fn handshake(&self, socket: &mut Socket) -> ObsResult<()> {
        let hello: Hello = self.expect_op(socket, op::HELLO).await?;
        debug!(
            websocket_version = %hello.obs_web_socket_version,
            rpc_version = hello.rpc_version,
            "Received Hello"
        );

        let authentication = match (&hello.authentication, &self.password) {
            (Some(auth), Some(password)) => Some(auth_response(password, &auth.salt, &auth.challenge)),
            (Some(_), None) => return Err(ObsError::Auth("OBS requires a password".to_string())),
            (None, _) => None,
        };

        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: EVENT_SUBSCRIPTION_SCENES,
        };
        send_op(socket, op::IDENTIFY, &identify).await?;

        let identified: Identified = self.expect_op(socket, op::IDENTIFIED).await?;
        debug!(rpc_version = identified.negotiated_rpc_version, "Identified");
        Ok(())
    }

    async fn expect_op<T: DeserializeOwned>(&self, socket: &mut Socket, expected: u8) -> ObsResult<T> {
        loop {
            let message = tokio::time::timeout(self.request_timeout, socket.next())
                .await
                .map_err(|_| ObsError::Timeout(format!("handshake op {expected}")))?;
            match message {
                Some(Ok(Message::Text(text))) => {
                    let envelope: Envelope =
                        serde_json::from_str(&text).map_err(|e| ObsError::Protocol(e.to_string()))?;
                    if envelope.op == expected {
                        return serde_json::from_value(envelope.d).map_err(|e| ObsError::Protocol(e.to_string()));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(match frame {
                        Some(f) if u16::from(f.code) == CLOSE_AUTHENTICATION_FAILED => {
                            ObsError::Auth(f.reason.as_str().to_string())
                        }
                        Some(f) => ObsError::Transport(format!(
                            "closed during handshake: {} {}",
                            u16::from(f.code),
                            f.reason.as_str()
                        )),
                        None => ObsError::Transport("closed during handshake".to_string()),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ObsError::Transport(e.to_string())),
                None => return Err(ObsError::Transport("connection ended during handshake".to_string())),
            }
        }
    }
}

#[async_trait]
impl ObsConnector for WsConnector {
    async fn connect(&self) -> ObsResult<ObsConnection> {
        let (mut socket, _) = tokio::time::timeout(self.request_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ObsError::Timeout(format!("connect to {}", self.url)))?
            .map_err(|e| ObsError::Transport(e.to_string()))?;

        self.handshake(&mut socket).await?;
        info!(url = %self.url, "OBS session identified");

        let (sink, stream) = socket.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(sink, outgoing_rx, closed.clone()));
        tokio::spawn(read_loop(stream, pending.clone(), closed.clone()));

        let client = WsObsClient {
            outgoing: outgoing_tx,
            pending,
            closed: closed.clone(),
            request_timeout: self.request_timeout,
        };
        Ok(ObsConnection {
            client: Arc::new(client),
            closed,
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

async fn send_op<T: serde::Serialize>(socket: &mut Socket, opcode: u8, data: &T) -> ObsResult<()> {
    let text = json!({ "op": opcode, "d": data }).to_string();
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| ObsError::Transport(e.to_string()))
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<Socket, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            message = outgoing.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "OBS write failed");
                    break;
                }
            }
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}

async fn read_loop(mut stream: futures::stream::SplitStream<Socket>, pending: Pending, closed: CancellationToken) {
    loop {
        let message = tokio::select! {
            () = closed.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => dispatch(&text, &pending),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "OBS closed the session");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "OBS read failed");
                break;
            }
            None => break,
        }
    }
    closed.cancel();
    // dropping the senders wakes every waiter with a closed-channel error
    pending.clear();
}

fn dispatch(text: &str, pending: &Pending) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Unparseable OBS message");
            return;
        }
    };
    match envelope.op {
        op::REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(envelope.d) {
            Ok(response) => {
                if let Some((_, waiter)) = pending.remove(&response.request_id) {
                    let _ = waiter.send(response);
                }
            }
            Err(e) => warn!(error = %e, "Malformed RequestResponse"),
        },
        op::EVENT => {
            if let Ok(event) = serde_json::from_value::<Event>(envelope.d) {
                if event.event_type == "CurrentProgramSceneChanged" {
                    let scene = event
                        .event_data
                        .as_ref()
                        .and_then(|d| d.get("sceneName"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    debug!(scene, "Program scene changed");
                }
            }
        }
        other => debug!(op = other, "Ignoring OBS message"),
    }
}

pub struct WsObsClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl WsObsClient {
    async fn call(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        if self.closed.is_cancelled() {
            return Err(ObsError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let request = Request {
            request_type,
            request_id: &request_id,
            request_data: data,
        };
        let text = json!({ "op": op::REQUEST, "d": request }).to_string();
        if self.outgoing.send(Message::Text(text.into())).is_err() {
            self.pending.remove(&request_id);
            return Err(ObsError::NotConnected);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ObsError::Transport(format!("{request_type}: connection closed"))),
            Err(_) => {
                self.pending.remove(&request_id);
                return Err(ObsError::Timeout(request_type.to_string()));
            }
        };

        if !response.request_status.result {
            return Err(ObsError::Request {
                request: response.request_type,
                code: response.request_status.code,
                comment: response.request_status.comment.unwrap_or_default(),
            });
        }
        Ok(response.response_data.unwrap_or(Value::Null))
    }

    async fn call_typed<T: DeserializeOwned>(&self, request_type: &str, data: Option<Value>) -> ObsResult<T> {
        let value = self.call(request_type, data).await?;
        serde_json::from_value(value).map_err(|e| ObsError::Protocol(format!("{request_type}: {e}")))
    }
}

fn field<T: DeserializeOwned>(data: Value, name: &str) -> ObsResult<T> {
    let value = data
        .get(name)
        .cloned()
        .ok_or_else(|| ObsError::Protocol(format!("missing {name}")))?;
    serde_json::from_value(value).map_err(|e| ObsError::Protocol(format!("{name}: {e}")))
}

#[async_trait]
impl ObsClient for WsObsClient {
    async fn version(&self) -> ObsResult<ObsVersion> {
        self.call_typed("GetVersion", None).await
    }

    async fn scene_list(&self) -> ObsResult<SceneList> {
        self.call_typed("GetSceneList", None).await
    }

    async fn set_current_program_scene(&self, scene: &str) -> ObsResult<()> {
        self.call("SetCurrentProgramScene", Some(json!({ "sceneName": scene })))
            .await
            .map(drop)
    }

    async fn create_scene(&self, scene: &str) -> ObsResult<()> {
        self.call("CreateScene", Some(json!({ "sceneName": scene }))).await.map(drop)
    }

    async fn remove_scene(&self, scene: &str) -> ObsResult<()> {
        self.call("RemoveScene", Some(json!({ "sceneName": scene }))).await.map(drop)
    }

    async fn create_input(&self, scene: &str, input: &str, kind: &str, settings: Value) -> ObsResult<i64> {
        let data = self
            .call(
                "CreateInput",
                Some(json!({
                    "sceneName": scene,
                    "inputName": input,
                    "inputKind": kind,
                    "inputSettings": settings,
                    "sceneItemEnabled": true,
                })),
            )
            .await?;
        field(data, "sceneItemId")
    }

    async fn remove_input(&self, input: &str) -> ObsResult<()> {
        self.call("RemoveInput", Some(json!({ "inputName": input }))).await.map(drop)
    }

    async fn input_settings(&self, input: &str) -> ObsResult<Value> {
        let data = self.call("GetInputSettings", Some(json!({ "inputName": input }))).await?;
        field(data, "inputSettings")
    }

    async fn set_input_settings(&self, input: &str, settings: Value) -> ObsResult<()> {
        self.call(
            "SetInputSettings",
            Some(json!({ "inputName": input, "inputSettings": settings, "overlay": true })),
        )
        .await
        .map(drop)
    }

    async fn set_input_audio_monitor_type(&self, input: &str, monitor_type: &str) -> ObsResult<()> {
        self.call(
            "SetInputAudioMonitorType",
            Some(json!({ "inputName": input, "monitorType": monitor_type })),
        )
        .await
        .map(drop)
    }

    async fn media_input_status(&self, input: &str) -> ObsResult<MediaInputStatus> {
        self.call_typed("GetMediaInputStatus", Some(json!({ "inputName": input })))
            .await
    }

    async fn scene_item_list(&self, scene: &str) -> ObsResult<Vec<SceneItem>> {
        let data = self.call("GetSceneItemList", Some(json!({ "sceneName": scene }))).await?;
        field(data, "sceneItems")
    }

    async fn remove_scene_item(&self, scene: &str, item_id: i64) -> ObsResult<()> {
        self.call(
            "RemoveSceneItem",
            Some(json!({ "sceneName": scene, "sceneItemId": item_id })),
        )
        .await
        .map(drop)
    }

    async fn scene_item_enabled(&self, scene: &str, item_id: i64) -> ObsResult<bool> {
        let data = self
            .call(
                "GetSceneItemEnabled",
                Some(json!({ "sceneName": scene, "sceneItemId": item_id })),
            )
            .await?;
        field(data, "sceneItemEnabled")
    }

    async fn set_scene_item_enabled(&self, scene: &str, item_id: i64, enabled: bool) -> ObsResult<()> {
        self.call(
            "SetSceneItemEnabled",
            Some(json!({ "sceneName": scene, "sceneItemId": item_id, "sceneItemEnabled": enabled })),
        )
        .await
        .map(drop)
    }

    async fn set_scene_item_transform(
        &self,
        scene: &str,
        item_id: i64,
        transform: &SceneItemTransform,
    ) -> ObsResult<()> {
        self.call(
            "SetSceneItemTransform",
            Some(json!({ "sceneName": scene, "sceneItemId": item_id, "sceneItemTransform": transform })),
        )
        .await
        .map(drop)
    }

    async fn video_settings(&self) -> ObsResult<VideoSettings> {
        self.call_typed("GetVideoSettings", None).await
    }

    async fn scene_collection_list(&self) -> ObsResult<SceneCollections> {
        let data = self.call("GetSceneCollectionList", None).await?;
        Ok(SceneCollections::from_response(&data))
    }

    async fn set_current_scene_collection(&self, name: &str) -> ObsResult<()> {
        self.call(
            "SetCurrentSceneCollection",
            Some(json!({ "sceneCollectionName": name })),
        )
        .await
        .map(drop)
    }

    async fn create_scene_collection(&self, name: &str) -> ObsResult<()> {
        self.call("CreateSceneCollection", Some(json!({ "sceneCollectionName": name })))
            .await
            .map(drop)
    }
}
