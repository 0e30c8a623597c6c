use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::devices::DeviceCaptureManager;
use crate::errors::CallError;
use crate::transport::{TrackId, TransportClient};

/// What currently occupies the single outgoing video slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSlot {
    Empty,
    Camera,
    Screen,
}

#[derive(Debug)]
struct ShareState {
    slot: VideoSlot,
    screen: Option<TrackId>,
    swapping: bool,
}

/// A started screen share. `ended` fires when the user stops sharing from
/// the platform's own controls.
#[derive(Debug)]
pub struct ScreenShare {
    pub track: TrackId,
    pub ended: oneshot::Receiver<()>,
}

/// Swaps the outgoing video between camera and screen capture.
///
/// Camera and screen are never published at the same time: the camera is
/// unpublished before the screen is published, and the screen is unpublished
/// before the camera comes back.
#[derive(Clone)]
pub struct ScreenShareCoordinator {
    devices: DeviceCaptureManager,
    state: Arc<Mutex<ShareState>>,
}

impl ScreenShareCoordinator {
    pub fn new(devices: DeviceCaptureManager) -> Self {
        Self {
            devices,
            state: Arc::new(Mutex::new(ShareState {
                slot: VideoSlot::Empty,
                screen: None,
                swapping: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ShareState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn slot(&self) -> VideoSlot {
        self.state().slot
    }

    pub fn is_sharing(&self) -> bool {
        self.state().screen.is_some()
    }

    pub fn screen_track(&self) -> Option<TrackId> {
        self.state().screen.clone()
    }

    /// Record that the camera went out with the initial publish of a join.
    pub(crate) fn camera_published(&self) {
        self.state().slot = VideoSlot::Camera;
    }

    pub async fn start(&self, transport: &dyn TransportClient) -> Result<ScreenShare, CallError> {
        let (epoch, camera) = {
            let mut st = self.state();
            if st.swapping || st.screen.is_some() {
                return Err(CallError::ScreenShareUnavailable(
                    "screen share already active".into(),
                ));
            }
            st.swapping = true;
            let camera = match st.slot {
                VideoSlot::Camera => self.devices.camera_track(),
                _ => None,
            };
            (self.epoch(), camera)
        };

        if let Some(camera) = &camera {
            if let Err(e) = transport.unpublish(std::slice::from_ref(camera)).await {
                self.finish_swap(epoch, None);
                return Err(e.into());
            }
            self.set_slot(epoch, VideoSlot::Empty);
            tracing::info!(%camera, "camera unpublished for screen share");
        }

        let capture = match self.devices.capture_screen().await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!("screen capture not started: {e}");
                self.restore_camera(transport, epoch, camera.as_ref()).await;
                return Err(e.into());
            }
        };

        if self.epoch() != epoch {
            self.devices.close_track(&capture.track);
            return Err(CallError::Cancelled);
        }

        let screen = capture.track;
        if let Err(e) = transport.publish(std::slice::from_ref(&screen)).await {
            self.devices.close_track(&screen);
            self.restore_camera(transport, epoch, camera.as_ref()).await;
            return Err(e.into());
        }

        let mut st = self.state();
        if self.epoch() != epoch {
            drop(st);
            self.devices.close_track(&screen);
            return Err(CallError::Cancelled);
        }
        st.slot = VideoSlot::Screen;
        st.screen = Some(screen.clone());
        st.swapping = false;
        drop(st);

        tracing::info!(%screen, "screen share published");
        Ok(ScreenShare {
            track: screen,
            ended: capture.ended,
        })
    }

    /// Unpublish and close the screen, then put the camera back, re-acquiring
    /// it only if it was released in the meantime.
    pub async fn stop(&self, transport: &dyn TransportClient) -> Result<(), CallError> {
        let (epoch, screen) = {
            let mut st = self.state();
            if st.swapping {
                return Err(CallError::ScreenShareUnavailable(
                    "screen share change in progress".into(),
                ));
            }
            let Some(screen) = st.screen.take() else {
                return Ok(());
            };
            st.swapping = true;
            (self.epoch(), screen)
        };

        if let Err(e) = transport.unpublish(std::slice::from_ref(&screen)).await {
            tracing::warn!(%screen, "screen unpublish failed: {e}");
        }
        self.devices.close_track(&screen);
        self.set_slot(epoch, VideoSlot::Empty);
        tracing::info!(%screen, "screen share stopped");

        if self.epoch() != epoch {
            return Err(CallError::Cancelled);
        }
        let camera = match self.devices.acquire_camera_since(Some(epoch)).await {
            Ok(camera) => camera,
            Err(e) => {
                self.finish_swap(epoch, None);
                return Err(e.into());
            }
        };
        if self.epoch() != epoch {
            return Err(CallError::Cancelled);
        }
        if let Err(e) = transport.publish(std::slice::from_ref(&camera)).await {
            self.finish_swap(epoch, None);
            return Err(e.into());
        }
        self.finish_swap(epoch, Some(VideoSlot::Camera));
        tracing::info!(%camera, "camera republished");
        Ok(())
    }

    /// Drop any screen share as part of leaving. Cancels a swap suspended on
    /// the capture prompt. `transport` is None once the client is gone.
    pub async fn teardown(&self, transport: Option<&dyn TransportClient>) {
        let (slot, screen) = {
            let mut st = self.state();
            self.devices.interrupt();
            st.swapping = false;
            let slot = std::mem::replace(&mut st.slot, VideoSlot::Empty);
            (slot, st.screen.take())
        };
        let Some(screen) = screen else {
            return;
        };
        if slot == VideoSlot::Screen {
            if let Some(transport) = transport {
                if let Err(e) = transport.unpublish(std::slice::from_ref(&screen)).await {
                    tracing::warn!(%screen, "screen unpublish during teardown failed: {e}");
                }
            }
        }
        self.devices.close_track(&screen);
        tracing::info!(%screen, "screen share torn down");
    }

    async fn restore_camera(
        &self,
        transport: &dyn TransportClient,
        epoch: u64,
        camera: Option<&TrackId>,
    ) {
        let Some(camera) = camera else {
            self.finish_swap(epoch, None);
            return;
        };
        if self.epoch() != epoch {
            return;
        }
        match transport.publish(std::slice::from_ref(camera)).await {
            Ok(()) => self.finish_swap(epoch, Some(VideoSlot::Camera)),
            Err(e) => {
                tracing::error!(%camera, "could not republish camera: {e}");
                self.finish_swap(epoch, None);
            }
        }
    }

    /// Teardown and device release both bump the device epoch, which
    /// invalidates any swap suspended across them.
    fn epoch(&self) -> u64 {
        self.devices.epoch()
    }

    fn set_slot(&self, epoch: u64, slot: VideoSlot) {
        let mut st = self.state();
        if self.epoch() == epoch {
            st.slot = slot;
        }
    }

    fn finish_swap(&self, epoch: u64, slot: Option<VideoSlot>) {
        let mut st = self.state();
        if self.epoch() != epoch {
            return;
        }
        if let Some(slot) = slot {
            st.slot = slot;
        }
        st.swapping = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SessionCredentials;
    use crate::errors::ScreenShareError;
    use crate::testing::{FakeMedia, FakeNetwork};

    async fn connected() -> (
        Arc<FakeMedia>,
        Arc<FakeNetwork>,
        Arc<dyn TransportClient>,
        ScreenShareCoordinator,
        TrackId,
    ) {
        let media = Arc::new(FakeMedia::new());
        let network = FakeNetwork::new();
        let client = network.connector().create_client();
        let _events = client
            .join(&SessionCredentials {
                transport_app_id: "app".into(),
                token: "tok".into(),
                channel_name: "appt-1".into(),
                participant_identity: "patient-1".into(),
            })
            .await
            .unwrap();

        let devices = DeviceCaptureManager::new(media.clone(), true, true);
        let tracks = devices.acquire().await.unwrap();
        client.publish(&[tracks.audio.clone(), tracks.video.clone()]).await.unwrap();

        let coordinator = ScreenShareCoordinator::new(devices);
        coordinator.camera_published();
        (media, network, client, coordinator, tracks.video)
    }

    #[tokio::test]
    async fn start_and_stop_swap_exactly_once() {
        let (_media, network, client, coordinator, camera) = connected().await;

        let share = coordinator.start(client.as_ref()).await.unwrap();
        assert_eq!(coordinator.slot(), VideoSlot::Screen);
        assert_eq!(network.unpublish_count(&camera), 1);
        assert_eq!(network.publish_count(&share.track), 1);
        assert!(!network.is_published(&camera));

        coordinator.stop(client.as_ref()).await.unwrap();
        assert_eq!(coordinator.slot(), VideoSlot::Camera);
        assert_eq!(network.unpublish_count(&share.track), 1);
        assert_eq!(network.publish_count(&camera), 2);
        assert!(network.is_published(&camera));
        assert!(!network.video_overlap());
    }

    #[tokio::test]
    async fn cancelled_prompt_restores_camera() {
        let (media, network, client, coordinator, camera) = connected().await;
        media.fail_screen(ScreenShareError::Cancelled);

        let err = coordinator.start(client.as_ref()).await.unwrap_err();
        assert_eq!(err, CallError::ScreenShareCancelled);
        assert_eq!(coordinator.slot(), VideoSlot::Camera);
        assert!(network.is_published(&camera));
        assert!(!coordinator.is_sharing());
    }

    #[tokio::test]
    async fn stop_reacquires_released_camera() {
        let (media, network, client, coordinator, camera) = connected().await;
        coordinator.start(client.as_ref()).await.unwrap();

        coordinator.devices.release();
        assert!(!media.is_open(&camera));

        coordinator.stop(client.as_ref()).await.unwrap();
        let fresh = coordinator.devices.camera_track().unwrap();
        assert_ne!(fresh, camera);
        assert!(network.is_published(&fresh));
    }

    #[tokio::test]
    async fn native_stop_signal_is_delivered() {
        let (media, _network, client, coordinator, _camera) = connected().await;
        let share = coordinator.start(client.as_ref()).await.unwrap();

        media.end_screen_share(&share.track);
        assert!(share.ended.await.is_ok());
    }

    #[tokio::test]
    async fn teardown_closes_screen_without_republishing_camera() {
        let (media, network, client, coordinator, camera) = connected().await;
        let share = coordinator.start(client.as_ref()).await.unwrap();

        coordinator.teardown(Some(client.as_ref())).await;
        assert!(!media.is_open(&share.track));
        assert!(!network.is_published(&share.track));
        assert_eq!(network.publish_count(&camera), 1);
        assert_eq!(coordinator.slot(), VideoSlot::Empty);

        // stop after teardown has nothing to do
        coordinator.stop(client.as_ref()).await.unwrap();
        assert_eq!(network.publish_count(&camera), 1);
    }

    #[tokio::test]
    async fn teardown_cancels_pending_camera_restore() {
        let (media, network, client, coordinator, _camera) = connected().await;
        coordinator.start(client.as_ref()).await.unwrap();
        coordinator.devices.release();
        let gate = media.hold_camera();

        let (result, ()) = tokio::join!(coordinator.stop(client.as_ref()), async {
            media.wait_for_camera_request().await;
            coordinator.teardown(Some(client.as_ref())).await;
            gate.notify_one();
        });

        assert_eq!(result, Err(CallError::Cancelled));
        assert!(coordinator.devices.camera_track().is_none());
        assert_eq!(media.open_count(), 0);
        assert_eq!(network.published_count(), 1);
        assert_eq!(coordinator.slot(), VideoSlot::Empty);

        // no swap is left marked in progress
        assert!(coordinator.start(client.as_ref()).await.is_ok());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (_media, _network, client, coordinator, _camera) = connected().await;
        coordinator.start(client.as_ref()).await.unwrap();
        assert!(matches!(
            coordinator.start(client.as_ref()).await,
            Err(CallError::ScreenShareUnavailable(_))
        ));
    }
}
