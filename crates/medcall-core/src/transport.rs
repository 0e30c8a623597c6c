//! Seams to the external real-time media engine.
//!
//! The engine itself (capture, codecs, networking) is not part of this crate.
//! It is reached through two traits: [`MediaDevices`] for local capture and
//! [`TransportClient`] for the channel connection. A fresh client is created
//! for every join attempt by a [`TransportConnector`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::credentials::SessionCredentials;
use crate::errors::{DeviceError, ScreenShareError, TransportError};
use crate::events::MediaKind;

/// Opaque handle to a local or remote media track, issued by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection states as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// One variant per engine callback, every field required.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    UserPublished { identity: String, kind: MediaKind },
    UserUnpublished { identity: String, kind: MediaKind },
    UserLeft { identity: String },
    ConnectionStateChanged { state: TransportState, reason: Option<String> },
    NetworkQuality { uplink: u8, downlink: u8 },
    /// The platform stopped a local screen capture (e.g. the OS "stop sharing" button).
    ScreenShareEnded { track: TrackId },
}

/// Receiving half of the engine's event stream for one joined client.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A screen-capture track plus the signal fired when the user stops sharing
/// through the platform's native controls.
#[derive(Debug)]
pub struct ScreenCapture {
    pub track: TrackId,
    pub ended: oneshot::Receiver<()>,
}

/// Local capture hardware exposed by the engine.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn create_microphone_track(&self) -> Result<TrackId, DeviceError>;
    async fn create_camera_track(&self) -> Result<TrackId, DeviceError>;
    async fn create_screen_track(&self) -> Result<ScreenCapture, ScreenShareError>;
    fn set_track_enabled(&self, track: &TrackId, enabled: bool);
    /// Stops the capture and frees the device. Closing twice is a no-op.
    fn close_track(&self, track: &TrackId);
}

/// One connection to a channel.
///
/// `leave` must be idempotent: it may be called on a client that never
/// finished joining or that has already left.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn join(&self, credentials: &SessionCredentials) -> Result<TransportEvents, TransportError>;
    async fn leave(&self) -> Result<(), TransportError>;
    async fn publish(&self, tracks: &[TrackId]) -> Result<(), TransportError>;
    async fn unpublish(&self, tracks: &[TrackId]) -> Result<(), TransportError>;
    async fn subscribe(&self, identity: &str, kind: MediaKind) -> Result<TrackId, TransportError>;
    async fn unsubscribe(&self, identity: &str, kind: MediaKind) -> Result<(), TransportError>;
}

/// Creates transport clients, one per join attempt.
pub trait TransportConnector: Send + Sync {
    fn create_client(&self) -> Arc<dyn TransportClient>;
}
