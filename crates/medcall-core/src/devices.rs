use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::{DeviceError, ScreenShareError};
use crate::events::MediaKind;
use crate::transport::{MediaDevices, ScreenCapture, TrackId};

/// The local microphone and camera handles held for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTracks {
    pub audio: TrackId,
    pub video: TrackId,
}

/// Snapshot of everything the local participant is capturing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMediaState {
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub audio: Option<TrackId>,
    pub camera: Option<TrackId>,
    pub screen: Option<TrackId>,
}

#[derive(Debug)]
struct Slots {
    audio: Option<TrackId>,
    camera: Option<TrackId>,
    mic_enabled: bool,
    camera_enabled: bool,
    /// Bumped by every release or interrupt so in-flight acquisitions and
    /// screen-share swaps can detect it.
    epoch: u64,
}

/// Acquires and releases the local microphone and camera.
///
/// Cheap to clone; clones share the same handles. Each handle is acquired at
/// most once until released, and enable/disable flips a flag on the existing
/// handle instead of re-acquiring it.
#[derive(Clone)]
pub struct DeviceCaptureManager {
    media: Arc<dyn MediaDevices>,
    slots: Arc<Mutex<Slots>>,
    acquiring: Arc<tokio::sync::Mutex<()>>,
}

impl DeviceCaptureManager {
    pub fn new(media: Arc<dyn MediaDevices>, mic_enabled: bool, camera_enabled: bool) -> Self {
        Self {
            media,
            slots: Arc::new(Mutex::new(Slots {
                audio: None,
                camera: None,
                mic_enabled,
                camera_enabled,
                epoch: 0,
            })),
            acquiring: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire both handles, reusing any already held.
    ///
    /// If the camera fails after the microphone was opened by this call, the
    /// microphone is closed again before the error is returned.
    pub async fn acquire(&self) -> Result<LocalTracks, DeviceError> {
        let _serial = self.acquiring.lock().await;

        let (epoch, held_audio, held_camera) = {
            let slots = self.slots();
            (slots.epoch, slots.audio.clone(), slots.camera.clone())
        };
        if let (Some(audio), Some(video)) = (&held_audio, &held_camera) {
            return Ok(LocalTracks {
                audio: audio.clone(),
                video: video.clone(),
            });
        }

        let mut created = Vec::new();
        let audio = match held_audio {
            Some(track) => track,
            None => {
                let track = self.media.create_microphone_track().await?;
                created.push(track.clone());
                track
            }
        };
        let video = match held_camera {
            Some(track) => track,
            None => match self.media.create_camera_track().await {
                Ok(track) => {
                    created.push(track.clone());
                    track
                }
                Err(e) => {
                    tracing::warn!("camera acquisition failed, closing partial handles: {e}");
                    self.close_all(&created);
                    return Err(e);
                }
            },
        };

        let mut slots = self.slots();
        if slots.epoch != epoch {
            drop(slots);
            tracing::info!("devices released during acquisition, discarding new handles");
            self.close_all(&created);
            return Err(DeviceError::Interrupted);
        }
        slots.audio = Some(audio.clone());
        slots.camera = Some(video.clone());
        let (mic_enabled, camera_enabled) = (slots.mic_enabled, slots.camera_enabled);
        drop(slots);

        self.media.set_track_enabled(&audio, mic_enabled);
        self.media.set_track_enabled(&video, camera_enabled);
        tracing::info!(%audio, %video, mic_enabled, camera_enabled, "local devices acquired");
        Ok(LocalTracks { audio, video })
    }

    /// Camera handle, opening the camera only if it is not currently held.
    pub async fn acquire_camera(&self) -> Result<TrackId, DeviceError> {
        self.acquire_camera_since(None).await
    }

    /// Like [`acquire_camera`](Self::acquire_camera), but fails with
    /// `Interrupted` if a release happened after `expected` was read.
    pub(crate) async fn acquire_camera_since(
        &self,
        expected: Option<u64>,
    ) -> Result<TrackId, DeviceError> {
        let _serial = self.acquiring.lock().await;

        let epoch = {
            let slots = self.slots();
            if expected.is_some_and(|e| e != slots.epoch) {
                return Err(DeviceError::Interrupted);
            }
            if let Some(track) = &slots.camera {
                return Ok(track.clone());
            }
            slots.epoch
        };

        let track = self.media.create_camera_track().await?;
        let mut slots = self.slots();
        if slots.epoch != epoch {
            drop(slots);
            self.media.close_track(&track);
            return Err(DeviceError::Interrupted);
        }
        slots.camera = Some(track.clone());
        let enabled = slots.camera_enabled;
        drop(slots);

        self.media.set_track_enabled(&track, enabled);
        tracing::info!(%track, "camera re-acquired");
        Ok(track)
    }

    /// Set the enabled flag for a kind. Applied to the held handle if any,
    /// otherwise remembered for the next acquisition.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        let mut slots = self.slots();
        let track = match kind {
            MediaKind::Audio => {
                slots.mic_enabled = enabled;
                slots.audio.clone()
            }
            MediaKind::Video => {
                slots.camera_enabled = enabled;
                slots.camera.clone()
            }
        };
        drop(slots);

        if let Some(track) = track {
            self.media.set_track_enabled(&track, enabled);
        }
        tracing::info!(?kind, enabled, "local track enabled flag changed");
    }

    /// Flip the enabled flag for a kind and return the new value.
    pub fn toggle(&self, kind: MediaKind) -> bool {
        let enabled = !self.is_enabled(kind);
        self.set_enabled(kind, enabled);
        enabled
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        let slots = self.slots();
        match kind {
            MediaKind::Audio => slots.mic_enabled,
            MediaKind::Video => slots.camera_enabled,
        }
    }

    pub fn tracks(&self) -> Option<LocalTracks> {
        let slots = self.slots();
        Some(LocalTracks {
            audio: slots.audio.clone()?,
            video: slots.camera.clone()?,
        })
    }

    pub fn audio_track(&self) -> Option<TrackId> {
        self.slots().audio.clone()
    }

    pub fn camera_track(&self) -> Option<TrackId> {
        self.slots().camera.clone()
    }

    /// Number of microphone/camera handles currently open.
    pub fn held_handles(&self) -> usize {
        let slots = self.slots();
        usize::from(slots.audio.is_some()) + usize::from(slots.camera.is_some())
    }

    /// Close every held handle. Releasing with nothing held is a no-op.
    pub fn release(&self) {
        let (audio, camera) = {
            let mut slots = self.slots();
            slots.epoch += 1;
            (slots.audio.take(), slots.camera.take())
        };
        if audio.is_none() && camera.is_none() {
            return;
        }
        for track in audio.iter().chain(camera.iter()) {
            self.media.close_track(track);
        }
        tracing::info!("local devices released");
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.slots().epoch
    }

    /// Invalidate in-flight work without closing the held handles.
    pub(crate) fn interrupt(&self) {
        self.slots().epoch += 1;
    }

    pub fn snapshot(&self, screen: Option<TrackId>) -> LocalMediaState {
        let slots = self.slots();
        LocalMediaState {
            mic_enabled: slots.mic_enabled,
            camera_enabled: slots.camera_enabled,
            audio: slots.audio.clone(),
            camera: slots.camera.clone(),
            screen,
        }
    }

    pub(crate) async fn capture_screen(&self) -> Result<ScreenCapture, ScreenShareError> {
        self.media.create_screen_track().await
    }

    pub(crate) fn close_track(&self, track: &TrackId) {
        self.media.close_track(track);
    }

    fn close_all(&self, tracks: &[TrackId]) {
        for track in tracks {
            self.media.close_track(track);
        }
    }
}
