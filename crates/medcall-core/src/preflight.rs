//! Waiting-room device check before a session starts.

use std::sync::Arc;

use crate::devices::{DeviceCaptureManager, LocalTracks};
use crate::errors::DeviceError;
use crate::events::MediaKind;
use crate::settings::CallSettings;
use crate::transport::MediaDevices;

/// Recovery the UI should offer for a failed device check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Ask the user to grant camera/microphone permission, then retry.
    RequestPermission,
    /// Ask the user to check the hardware (in use elsewhere, unplugged), then retry.
    CheckHardware,
}

impl RecoveryAction {
    fn for_error(err: &DeviceError) -> Option<Self> {
        match err {
            DeviceError::PermissionDenied => Some(Self::RequestPermission),
            DeviceError::Unavailable(_) => Some(Self::CheckHardware),
            DeviceError::Interrupted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightStatus {
    pub ready: bool,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub tracks: Option<LocalTracks>,
    pub error: Option<DeviceError>,
    pub recovery: Option<RecoveryAction>,
}

/// Pre-join preview: acquires devices, lets the user mute or hide video
/// before joining, then hands the live handles to the call session.
///
/// Dropping a preflight that was never handed off releases its devices.
pub struct Preflight {
    devices: Option<DeviceCaptureManager>,
    error: Option<DeviceError>,
}

impl Preflight {
    pub fn new(media: Arc<dyn MediaDevices>, settings: &CallSettings) -> Self {
        Self {
            devices: Some(DeviceCaptureManager::new(
                media,
                settings.mic_enabled_on_join,
                settings.camera_enabled_on_join,
            )),
            error: None,
        }
    }

    fn devices(&self) -> Option<&DeviceCaptureManager> {
        self.devices.as_ref()
    }

    /// Acquire the microphone and camera for the preview.
    pub async fn mount(&mut self) -> Result<LocalTracks, DeviceError> {
        let Some(devices) = self.devices.clone() else {
            return Err(DeviceError::Interrupted);
        };
        match devices.acquire().await {
            Ok(tracks) => {
                self.error = None;
                Ok(tracks)
            }
            Err(e) => {
                tracing::warn!("preflight device check failed: {e}");
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Release any partial handles and acquire again.
    pub async fn retry(&mut self) -> Result<LocalTracks, DeviceError> {
        if let Some(devices) = self.devices() {
            devices.release();
        }
        tracing::info!("retrying preflight device check");
        self.mount().await
    }

    pub fn toggle_mic(&self) -> bool {
        self.devices()
            .map(|d| d.toggle(MediaKind::Audio))
            .unwrap_or(false)
    }

    pub fn toggle_camera(&self) -> bool {
        self.devices()
            .map(|d| d.toggle(MediaKind::Video))
            .unwrap_or(false)
    }

    pub fn status(&self) -> PreflightStatus {
        let tracks = self.devices().and_then(DeviceCaptureManager::tracks);
        PreflightStatus {
            ready: tracks.is_some(),
            mic_enabled: self.devices().is_some_and(|d| d.is_enabled(MediaKind::Audio)),
            camera_enabled: self.devices().is_some_and(|d| d.is_enabled(MediaKind::Video)),
            tracks,
            error: self.error.clone(),
            recovery: self.error.as_ref().and_then(RecoveryAction::for_error),
        }
    }

    /// Give the acquired devices to a call session. The session reuses the
    /// handles instead of acquiring again.
    pub fn hand_off(mut self) -> Option<DeviceCaptureManager> {
        self.devices.take()
    }
}

impl Drop for Preflight {
    fn drop(&mut self) {
        if let Some(devices) = self.devices.take() {
            devices.release();
        }
    }
}
