//! OBS scene reconciliation
//!
//! Keeps one scene, one media source and an optional chat overlay per
//! tracked stream inside OBS, over the obs-websocket v5 protocol.

pub mod client;
pub mod error;
pub mod layout;
pub mod naming;
pub mod protocol;
pub mod reconciler;
pub mod supervisor;
pub mod ws;

#[cfg(test)]
pub mod test_helpers;

pub use client::{ObsClient, ObsConnection, ObsConnector, SessionHook};
pub use error::{ObsError, ObsResult};
pub use reconciler::{ReconcilerSettings, SceneReconciler};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorSettings, SupervisorStatus};
pub use ws::WsConnector;
