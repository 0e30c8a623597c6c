//! Medcall core: call-session logic for one-to-one and small group
//! telemedicine calls.
//!
//! Pure Rust, no platform dependencies. The media engine is reached through
//! the traits in [`transport`]; session tokens come from a
//! [`CredentialProvider`], by default the HTTP [`TokenBrokerClient`].

pub mod attachments;
pub mod credentials;
pub mod devices;
pub mod errors;
pub mod events;
pub mod layout;
pub mod machine;
pub mod participants;
pub mod preflight;
pub mod quality;
pub mod roster;
pub mod screen_share;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

pub use attachments::{AttachmentKey, SessionAttachments};
pub use credentials::{CredentialProvider, SessionCredentials, TokenBrokerClient};
pub use devices::{DeviceCaptureManager, LocalMediaState, LocalTracks};
pub use errors::{CallError, DeviceError, ScreenShareError, TransportError};
pub use events::{CallStatus, ConnectionState, MediaKind, SessionEvent, SessionEventListener};
pub use preflight::{Preflight, PreflightStatus, RecoveryAction};
pub use quality::QualityLabel;
pub use roster::{Roster, Tile};
pub use session::{CallBackends, CallIdentity, CallSession};
pub use settings::{CallSettings, SettingsStore};
pub use transport::{MediaDevices, TrackId, TransportClient, TransportConnector, TransportEvent};

/// Install a `tracing` subscriber writing to stderr. Honors `RUST_LOG`,
/// defaulting to `medcall_core=debug`. Safe to call more than once.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("medcall_core=debug"));
        // Fails only if the host already installed a global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}
