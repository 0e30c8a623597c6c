use std::sync::{Arc, PoisonError, RwLock};

use crate::participants::RemoteParticipantInfo;
use crate::quality::QualityLabel;

/// Events emitted by the core to the hosting UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    ParticipantPublished { identity: String, kind: MediaKind },
    ParticipantUnpublished { identity: String, kind: MediaKind },
    ParticipantLeft(String), // participant identity
    NetworkQualityChanged(QualityLabel),
    LocalMediaChanged {
        mic_enabled: bool,
        camera_enabled: bool,
        screen_sharing: bool,
    },
    ErrorRaised { message: String, retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Observable snapshot of a call session.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatus {
    pub connection_state: ConnectionState,
    pub remote_participants: Vec<RemoteParticipantInfo>,
    pub network_quality_label: QualityLabel,
    pub error_message: Option<String>,
    pub retry_allowed: bool,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub screen_sharing: bool,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!(?event, "emitting session event");
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
