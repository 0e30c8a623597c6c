use thiserror::Error;

use crate::events::ConnectionState;

/// Failures raised while capturing local audio/video hardware.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("permission to use the camera or microphone was denied")]
    PermissionDenied,
    #[error("media device unavailable: {0}")]
    Unavailable(String),
    /// The handles were released while the acquisition was still in flight.
    #[error("device acquisition interrupted by release")]
    Interrupted,
}

/// Failures raised while acquiring a screen-capture source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenShareError {
    #[error("screen capture was cancelled by the user")]
    Cancelled,
    #[error("screen capture unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the transport engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("participant identity is already joined to this channel")]
    SessionConflict,
    #[error("transport rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// A state-machine input that is not valid in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {input} while {from:?}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub input: &'static str,
}

/// Error taxonomy surfaced to the hosting UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("camera or microphone permission denied")]
    DevicePermissionDenied,
    #[error("camera or microphone unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("could not obtain a session token: {0}")]
    TokenAcquisitionFailed(String),
    #[error("not authorized to join this session: {0}")]
    AuthenticationInvalid(String),
    #[error("this identity is already connected to the session")]
    SessionConflict,
    #[error("connection lost: {0}")]
    TransportDisconnected(String),
    #[error("screen sharing unavailable: {0}")]
    ScreenShareUnavailable(String),
    #[error("screen sharing cancelled")]
    ScreenShareCancelled,
    #[error("not connected")]
    NotConnected,
    #[error("operation cancelled by leave")]
    Cancelled,
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl CallError {
    /// Whether the UI should offer a retry action for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::DevicePermissionDenied
                | CallError::DeviceUnavailable(_)
                | CallError::TokenAcquisitionFailed(_)
                | CallError::SessionConflict
                | CallError::TransportDisconnected(_)
        )
    }
}

impl From<DeviceError> for CallError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::PermissionDenied => CallError::DevicePermissionDenied,
            DeviceError::Unavailable(msg) => CallError::DeviceUnavailable(msg),
            DeviceError::Interrupted => CallError::Cancelled,
        }
    }
}

impl From<ScreenShareError> for CallError {
    fn from(e: ScreenShareError) -> Self {
        match e {
            ScreenShareError::Cancelled => CallError::ScreenShareCancelled,
            ScreenShareError::Unavailable(msg) => CallError::ScreenShareUnavailable(msg),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::SessionConflict => CallError::SessionConflict,
            TransportError::Unauthorized(msg) => CallError::AuthenticationInvalid(msg),
            TransportError::Other(msg) => CallError::TransportDisconnected(msg),
        }
    }
}
