//! The call session controller.
//!
//! A [`CallSession`] owns one participant's view of a call: the local
//! devices, at most one transport client, the remote participant registry
//! and the connection state. Lifecycle decisions come from
//! [`ConnectionMachine`]; this module runs the commands it returns.
//!
//! Every join records the session generation. Leave, rejoin and failure bump
//! it, so a join suspended on devices, credentials or the transport notices
//! on resumption that it was superseded and stops without touching state.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::attachments::{AttachmentKey, SessionAttachments, StaleAttachment};
use crate::credentials::{CredentialProvider, SessionCredentials};
use crate::devices::{DeviceCaptureManager, LocalMediaState};
use crate::errors::{CallError, TransitionError, TransportError};
use crate::events::{
    CallStatus, ConnectionState, EventEmitter, MediaKind, SessionEvent, SessionEventListener,
};
use crate::machine::{Command, ConnectionMachine, Input, Transition};
use crate::participants::ParticipantRegistry;
use crate::preflight::Preflight;
use crate::quality::{NetworkQualityMonitor, NetworkQualitySample};
use crate::roster::{LocalTile, Roster};
use crate::screen_share::ScreenShareCoordinator;
use crate::settings::CallSettings;
use crate::transport::{
    MediaDevices, TrackId, TransportClient, TransportConnector, TransportEvent, TransportEvents,
    TransportState,
};

/// Who is joining what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub session_id: String,
    pub display_name: String,
}

impl CallIdentity {
    pub fn new(session_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// External collaborators a session talks to.
#[derive(Clone)]
pub struct CallBackends {
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn TransportConnector>,
    pub media: Arc<dyn MediaDevices>,
    /// Shared by every session in the process.
    pub attachments: SessionAttachments,
}

struct Attachment {
    id: Uuid,
    client: Arc<dyn TransportClient>,
    events_task: Option<JoinHandle<()>>,
}

struct SessionInner {
    machine: ConnectionMachine,
    attachment: Option<Attachment>,
    registry: ParticipantRegistry,
    quality: NetworkQualityMonitor,
    error: Option<CallError>,
    local_identity: Option<String>,
    screen_watcher: Option<JoinHandle<()>>,
    generation: u64,
    /// Join attempt holding this caller's key in the shared attachments.
    claim: Option<Uuid>,
}

impl SessionInner {
    fn is_current(&self, id: Uuid) -> bool {
        self.attachment.as_ref().is_some_and(|a| a.id == id)
    }
}

/// An accepted transition plus whatever it detached, ready to execute
/// outside the lock.
struct Effects {
    transition: Transition,
    detached: Option<Attachment>,
    claim: Option<Uuid>,
    watcher: Option<JoinHandle<()>>,
    generation: u64,
}

pub(crate) struct SessionShared {
    this: Weak<SessionShared>,
    identity: CallIdentity,
    key: AttachmentKey,
    cleanup_delay: Duration,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn TransportConnector>,
    attachments: SessionAttachments,
    devices: DeviceCaptureManager,
    screen: ScreenShareCoordinator,
    emitter: EventEmitter,
    inner: Mutex<SessionInner>,
}

/// One participant's call.
///
/// Dropping the session runs the leave sequence in the background.
pub struct CallSession {
    shared: Arc<SessionShared>,
}

impl CallSession {
    pub fn new(identity: CallIdentity, settings: &CallSettings, backends: CallBackends) -> Self {
        let devices = DeviceCaptureManager::new(
            backends.media.clone(),
            settings.mic_enabled_on_join,
            settings.camera_enabled_on_join,
        );
        Self::with_devices(identity, settings, backends, devices)
    }

    /// Start from a finished preflight, reusing its device handles.
    pub fn from_preflight(
        identity: CallIdentity,
        settings: &CallSettings,
        backends: CallBackends,
        preflight: Preflight,
    ) -> Self {
        match preflight.hand_off() {
            Some(devices) => Self::with_devices(identity, settings, backends, devices),
            None => Self::new(identity, settings, backends),
        }
    }

    fn with_devices(
        identity: CallIdentity,
        settings: &CallSettings,
        backends: CallBackends,
        devices: DeviceCaptureManager,
    ) -> Self {
        let key = AttachmentKey {
            session_id: identity.session_id.clone(),
            caller: identity.display_name.clone(),
        };
        let shared = Arc::new_cyclic(|this| SessionShared {
            this: this.clone(),
            identity,
            key,
            cleanup_delay: settings.stale_client_cleanup(),
            credentials: backends.credentials,
            connector: backends.connector,
            attachments: backends.attachments,
            screen: ScreenShareCoordinator::new(devices.clone()),
            devices,
            emitter: EventEmitter::new(),
            inner: Mutex::new(SessionInner {
                machine: ConnectionMachine::new(),
                attachment: None,
                registry: ParticipantRegistry::new(),
                quality: NetworkQualityMonitor::new(),
                error: None,
                local_identity: None,
                screen_watcher: None,
                generation: 0,
                claim: None,
            }),
        });
        Self { shared }
    }

    pub fn identity(&self) -> &CallIdentity {
        &self.shared.identity
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    /// Acquire devices, fetch credentials, join the channel and publish the
    /// microphone and camera. Joining while already active replaces the
    /// current attempt. Returns `Cancelled` if a leave or newer join
    /// superseded this one.
    pub async fn join(&self) -> Result<(), CallError> {
        self.shared.join().await
    }

    /// Tear everything down and return to idle. Safe from any state and
    /// idempotent.
    pub async fn leave(&self) {
        self.shared.leave().await;
    }

    /// Flip the microphone's enabled flag. Returns the new value.
    pub fn toggle_mic(&self) -> bool {
        let enabled = self.shared.devices.toggle(MediaKind::Audio);
        self.shared.emit_local_media();
        enabled
    }

    /// Flip the camera's enabled flag. Returns the new value.
    pub fn toggle_camera(&self) -> bool {
        let enabled = self.shared.devices.toggle(MediaKind::Video);
        self.shared.emit_local_media();
        enabled
    }

    /// Start or stop sharing the screen. Returns whether a share is active
    /// afterwards.
    pub async fn toggle_screen_share(&self) -> Result<bool, CallError> {
        if self.shared.screen.is_sharing() {
            self.shared.stop_screen_share(false).await?;
            Ok(false)
        } else {
            self.shared.start_screen_share().await?;
            Ok(true)
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.inner.lock().await.machine.state().clone()
    }

    pub async fn status(&self) -> CallStatus {
        let shared = &self.shared;
        let inner = shared.inner.lock().await;
        CallStatus {
            connection_state: inner.machine.state().clone(),
            remote_participants: inner.registry.snapshot(),
            network_quality_label: inner.quality.label(),
            error_message: inner.error.as_ref().map(ToString::to_string),
            retry_allowed: inner.error.as_ref().is_some_and(CallError::is_retryable),
            mic_enabled: shared.devices.is_enabled(MediaKind::Audio),
            camera_enabled: shared.devices.is_enabled(MediaKind::Video),
            screen_sharing: shared.screen.is_sharing(),
        }
    }

    pub fn local_media(&self) -> LocalMediaState {
        self.shared
            .devices
            .snapshot(self.shared.screen.screen_track())
    }

    /// Tiles for the group-call grid. `directory` maps remote identities to
    /// display names.
    pub async fn roster(&self, directory: &HashMap<String, String>) -> Roster {
        let shared = &self.shared;
        let (remotes, local_identity) = {
            let inner = shared.inner.lock().await;
            (inner.registry.snapshot(), inner.local_identity.clone())
        };
        let local = LocalTile {
            identity: local_identity.unwrap_or_else(|| shared.identity.display_name.clone()),
            display_name: shared.identity.display_name.clone(),
            has_audio: shared.devices.is_enabled(MediaKind::Audio),
            has_video: shared.devices.is_enabled(MediaKind::Video) || shared.screen.is_sharing(),
        };
        Roster::build(local, &remotes, directory)
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.leave().await });
            }
            Err(_) => {
                tracing::warn!("call session dropped outside a runtime, releasing devices only");
                shared.devices.release();
            }
        }
    }
}

impl SessionShared {
    fn transition_locked(inner: &mut SessionInner, input: Input) -> Result<Effects, TransitionError> {
        let transition = inner.machine.apply(input)?;
        let (mut detached, mut claim) = (None, None);
        if transition.commands.contains(&Command::LeaveTransport) {
            inner.generation += 1;
            detached = inner.attachment.take();
            claim = inner.claim.take();
        }
        let watcher = if transition.commands.contains(&Command::StopScreenShare) {
            inner.screen_watcher.take()
        } else {
            None
        };
        Ok(Effects {
            transition,
            detached,
            claim,
            watcher,
            generation: inner.generation,
        })
    }

    async fn execute(&self, effects: Effects) {
        let Effects {
            transition,
            detached,
            claim,
            watcher,
            generation,
        } = effects;
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        let client = detached.as_ref().map(|a| a.client.clone());
        let mut left = false;

        for command in &transition.commands {
            match command {
                Command::StopScreenShare => self.screen.teardown(client.as_deref()).await,
                Command::ReleaseDevices => self.devices.release(),
                Command::LeaveTransport => {
                    if let Some(attachment) = &detached {
                        self.leave_client(attachment).await;
                        left = true;
                    }
                    if let Some(claim) = claim {
                        self.attachments.detach(&self.key, claim);
                    }
                }
                Command::AwaitCleanup => {
                    if left {
                        self.wait_for_cleanup().await;
                    }
                }
                Command::ClearParticipants => {
                    let mut inner = self.inner.lock().await;
                    if inner.generation == generation {
                        inner.registry.clear();
                        inner.quality.reset();
                    }
                }
                Command::ClearError => {
                    let mut inner = self.inner.lock().await;
                    if inner.generation == generation {
                        inner.error = None;
                    }
                }
                Command::ReportError(err) => {
                    tracing::error!(session_id = %self.identity.session_id, "call failed: {err}");
                    {
                        let mut inner = self.inner.lock().await;
                        if inner.generation != generation {
                            continue;
                        }
                        inner.error = Some(err.clone());
                    }
                    self.emitter.emit(SessionEvent::ErrorRaised {
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
            }
        }

        if transition.from != transition.to {
            let current = self.inner.lock().await.machine.state().clone();
            if current == transition.to {
                self.emitter
                    .emit(SessionEvent::ConnectionStateChanged(current));
            }
        }
    }

    async fn leave_client(&self, attachment: &Attachment) {
        if let Some(task) = &attachment.events_task {
            task.abort();
        }
        if let Err(e) = attachment.client.leave().await {
            tracing::warn!(attachment = %attachment.id, "transport leave failed: {e}");
        }
        tracing::info!(attachment = %attachment.id, "transport client detached");
    }

    async fn wait_for_cleanup(&self) {
        if self.cleanup_delay.is_zero() {
            return;
        }
        tracing::debug!(
            delay_ms = self.cleanup_delay.as_millis() as u64,
            "waiting for the server to drop the previous client"
        );
        tokio::time::sleep(self.cleanup_delay).await;
    }

    async fn ensure_current(&self, generation: u64) -> Result<(), CallError> {
        if self.inner.lock().await.generation == generation {
            Ok(())
        } else {
            Err(CallError::Cancelled)
        }
    }

    async fn join(&self) -> Result<(), CallError> {
        tracing::info!(session_id = %self.identity.session_id, "join requested");
        let (effects, claim, stale) = {
            let mut inner = self.inner.lock().await;
            let effects = Self::transition_locked(&mut inner, Input::JoinRequested)?;
            let claim = Uuid::new_v4();
            inner.claim = Some(claim);
            let stale = self
                .attachments
                .claim(self.key.clone(), claim, self.this.clone())
                .filter(|stale| !stale.is_owned_by(&self.this));
            (effects, claim, stale)
        };
        let generation = effects.generation;
        self.execute(effects).await;

        let err = match self.run_join(generation, claim, stale).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let effects = {
            let mut inner = self.inner.lock().await;
            if err == CallError::Cancelled || inner.generation != generation {
                tracing::info!(session_id = %self.identity.session_id, "join superseded");
                return Err(CallError::Cancelled);
            }
            Self::transition_locked(&mut inner, Input::JoinFailed(err.clone()))?
        };
        self.execute(effects).await;
        Err(err)
    }

    async fn run_join(
        &self,
        generation: u64,
        claim: Uuid,
        stale: Option<StaleAttachment>,
    ) -> Result<(), CallError> {
        if let Some(stale) = stale {
            stale.evict().await;
            self.ensure_current(generation).await?;
            self.wait_for_cleanup().await;
            self.ensure_current(generation).await?;
        }

        let tracks = self.devices.acquire().await?;
        self.ensure_current(generation).await?;

        let credentials = self
            .credentials
            .request_credentials(&self.identity.session_id, &self.identity.display_name)
            .await?;
        self.ensure_current(generation).await?;

        let (client, events) = self.connect(generation, claim, &credentials).await?;

        client
            .publish(&[tracks.audio.clone(), tracks.video.clone()])
            .await?;
        tracing::info!(audio = %tracks.audio, video = %tracks.video, "local tracks published");

        let effects = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Err(CallError::Cancelled);
            }
            self.screen.camera_published();
            inner.local_identity = Some(credentials.participant_identity.clone());
            let effects = Self::transition_locked(&mut inner, Input::JoinSucceeded)?;
            let task = tokio::spawn(event_loop(self.this.clone(), claim, events));
            if let Some(current) = inner.attachment.as_mut() {
                current.events_task = Some(task);
            }
            effects
        };
        self.execute(effects).await;
        tracing::info!(
            session_id = %self.identity.session_id,
            identity = %credentials.participant_identity,
            "joined call"
        );
        Ok(())
    }

    /// Create a client, attach it under our claim, then join. A session
    /// conflict is retried once after leaving and waiting for cleanup.
    async fn connect(
        &self,
        generation: u64,
        id: Uuid,
        credentials: &SessionCredentials,
    ) -> Result<(Arc<dyn TransportClient>, TransportEvents), CallError> {
        let mut retried = false;
        loop {
            let client = self.connector.create_client();
            let attached = {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return Err(CallError::Cancelled);
                }
                let attached = self.attachments.attach(&self.key, id, client.clone());
                if attached {
                    inner.attachment = Some(Attachment {
                        id,
                        client: client.clone(),
                        events_task: None,
                    });
                }
                attached
            };
            if !attached {
                tracing::warn!(
                    attachment = %id,
                    "another session claimed this caller, abandoning join"
                );
                self.leave().await;
                return Err(CallError::Cancelled);
            }

            tracing::info!(attachment = %id, channel = %credentials.channel_name, "joining transport channel");
            let result = client.join(credentials).await;

            if self.ensure_current(generation).await.is_err() {
                // A leave already detached this attempt; the late join must not linger.
                if let Err(e) = client.leave().await {
                    tracing::warn!(attachment = %id, "leave after cancelled join failed: {e}");
                }
                return Err(CallError::Cancelled);
            }

            match result {
                Ok(events) => return Ok((client, events)),
                Err(TransportError::SessionConflict) if !retried => {
                    retried = true;
                    tracing::warn!(attachment = %id, "session conflict on join, retrying once");
                    self.drop_attachment(id).await;
                    self.wait_for_cleanup().await;
                    self.ensure_current(generation).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn drop_attachment(&self, id: Uuid) {
        let attachment = {
            let mut inner = self.inner.lock().await;
            if inner.is_current(id) {
                inner.attachment.take()
            } else {
                None
            }
        };
        if let Some(attachment) = attachment {
            self.leave_client(&attachment).await;
        }
    }

    pub(crate) async fn leave(&self) {
        let effects =
            match Self::transition_locked(&mut *self.inner.lock().await, Input::LeaveRequested) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::warn!("leave rejected: {e}");
                    return;
                }
            };
        let was_active = effects.transition.from != ConnectionState::Idle;
        self.execute(effects).await;
        if was_active {
            tracing::info!(session_id = %self.identity.session_id, "left call");
        }
    }

    /// Another controller is joining as the same caller. If attempt `id` is
    /// still ours, leave completely, even mid-join; otherwise only make sure
    /// its client is gone.
    pub(crate) async fn force_leave(&self, id: Uuid, client: Option<Arc<dyn TransportClient>>) {
        let owned = self.inner.lock().await.claim == Some(id);
        if owned {
            tracing::warn!(
                session_id = %self.identity.session_id,
                "another session joined as the same caller, leaving"
            );
            self.leave().await;
        } else if let Some(client) = client {
            if let Err(e) = client.leave().await {
                tracing::warn!(attachment = %id, "stale client leave failed: {e}");
            }
        }
    }

    fn emit_local_media(&self) {
        self.emitter.emit(SessionEvent::LocalMediaChanged {
            mic_enabled: self.devices.is_enabled(MediaKind::Audio),
            camera_enabled: self.devices.is_enabled(MediaKind::Video),
            screen_sharing: self.screen.is_sharing(),
        });
    }

    // ── Screen share ─────────────────────────────────────────────────

    async fn start_screen_share(&self) -> Result<(), CallError> {
        let (generation, client) = {
            let inner = self.inner.lock().await;
            match (inner.machine.state(), &inner.attachment) {
                (ConnectionState::Connected, Some(a)) => (inner.generation, a.client.clone()),
                _ => return Err(CallError::NotConnected),
            }
        };

        let share = match self.screen.start(client.as_ref()).await {
            Ok(share) => share,
            Err(e) => {
                match &e {
                    CallError::ScreenShareCancelled | CallError::Cancelled => {
                        tracing::info!("screen share not started: {e}");
                    }
                    _ => self.emitter.emit(SessionEvent::ErrorRaised {
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    }),
                }
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                // The pending teardown closes the new share.
                return Err(CallError::Cancelled);
            }
            let watcher = tokio::spawn(watch_screen_share(
                self.this.clone(),
                share.track,
                share.ended,
            ));
            if let Some(previous) = inner.screen_watcher.replace(watcher) {
                previous.abort();
            }
        }
        self.emit_local_media();
        Ok(())
    }

    /// `from_watcher` is set when running on the watcher task itself, which
    /// must not abort itself.
    async fn stop_screen_share(&self, from_watcher: bool) -> Result<(), CallError> {
        let client = {
            let mut inner = self.inner.lock().await;
            if let Some(watcher) = inner.screen_watcher.take() {
                if !from_watcher {
                    watcher.abort();
                }
            }
            inner.attachment.as_ref().map(|a| a.client.clone())
        };
        match client {
            Some(client) => self.screen.stop(client.as_ref()).await?,
            None => self.screen.teardown(None).await,
        }
        self.emit_local_media();
        Ok(())
    }

    // ── Transport events ─────────────────────────────────────────────

    /// Returns false once the attachment is gone and the loop should stop.
    async fn handle_transport_event(&self, attachment: Uuid, event: TransportEvent) -> bool {
        let client = {
            let inner = self.inner.lock().await;
            match &inner.attachment {
                Some(a) if a.id == attachment => a.client.clone(),
                _ => return false,
            }
        };

        match event {
            TransportEvent::UserPublished { identity, kind } => {
                let newly_published = {
                    let mut inner = self.inner.lock().await;
                    if !inner.is_current(attachment) {
                        return false;
                    }
                    inner.registry.on_published(&identity, kind)
                };
                if newly_published {
                    self.emitter.emit(SessionEvent::ParticipantPublished {
                        identity: identity.clone(),
                        kind,
                    });
                    self.subscribe_remote(attachment, client.as_ref(), &identity, kind)
                        .await;
                }
            }

            TransportEvent::UserUnpublished { identity, kind } => {
                let (known, subscribed) = {
                    let mut inner = self.inner.lock().await;
                    if !inner.is_current(attachment) {
                        return false;
                    }
                    let known = inner
                        .registry
                        .participant(&identity)
                        .is_some_and(|p| match kind {
                            MediaKind::Audio => p.has_audio,
                            MediaKind::Video => p.has_video,
                        });
                    (known, inner.registry.on_unpublished(&identity, kind))
                };
                if subscribed {
                    if let Err(e) = client.unsubscribe(&identity, kind).await {
                        tracing::warn!(%identity, ?kind, "unsubscribe failed: {e}");
                    }
                }
                if known {
                    self.emitter
                        .emit(SessionEvent::ParticipantUnpublished { identity, kind });
                }
            }

            TransportEvent::UserLeft { identity } => {
                let removed = {
                    let mut inner = self.inner.lock().await;
                    if !inner.is_current(attachment) {
                        return false;
                    }
                    inner.registry.on_left(&identity)
                };
                if removed.is_some() {
                    tracing::info!(%identity, "remote participant left");
                    self.emitter.emit(SessionEvent::ParticipantLeft(identity));
                }
            }

            TransportEvent::ConnectionStateChanged { state, reason } => {
                let input = match state {
                    TransportState::Reconnecting => Input::TransportInterrupted,
                    TransportState::Connected => Input::TransportRecovered,
                    TransportState::Disconnected => Input::TransportClosed {
                        reason: reason.unwrap_or_else(|| "disconnected by the server".into()),
                    },
                    TransportState::Connecting => return true,
                };
                let closing = matches!(input, Input::TransportClosed { .. });
                self.apply_transport_input(attachment, input).await;
                if closing {
                    return false;
                }
            }

            TransportEvent::NetworkQuality { uplink, downlink } => {
                let changed = {
                    let mut inner = self.inner.lock().await;
                    if !inner.is_current(attachment) {
                        return false;
                    }
                    inner
                        .quality
                        .record(NetworkQualitySample { uplink, downlink })
                };
                if let Some(label) = changed {
                    tracing::debug!(uplink, downlink, ?label, "network quality changed");
                    self.emitter.emit(SessionEvent::NetworkQualityChanged(label));
                }
            }

            TransportEvent::ScreenShareEnded { track } => {
                if self.screen.screen_track().as_ref() == Some(&track) {
                    tracing::info!(%track, "screen share ended by the engine");
                    if let Err(e) = self.stop_screen_share(false).await {
                        tracing::warn!("camera not restored after screen share ended: {e}");
                    }
                }
            }
        }
        true
    }

    async fn subscribe_remote(
        &self,
        attachment: Uuid,
        client: &dyn TransportClient,
        identity: &str,
        kind: MediaKind,
    ) {
        let track = match client.subscribe(identity, kind).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(%identity, ?kind, "subscribe failed: {e}");
                return;
            }
        };
        let attached = {
            let mut inner = self.inner.lock().await;
            inner.is_current(attachment) && inner.registry.attach_track(identity, kind, track)
        };
        // Unpublished while the subscription was in flight.
        if !attached {
            if let Err(e) = client.unsubscribe(identity, kind).await {
                tracing::warn!(%identity, ?kind, "unsubscribe failed: {e}");
            }
        }
    }

    /// Feed an engine state change to the machine. Runs on the event loop
    /// task, so a closing transition must not abort that task.
    async fn apply_transport_input(&self, attachment: Uuid, input: Input) {
        let closing = matches!(input, Input::TransportClosed { .. });
        let effects = {
            let mut inner = self.inner.lock().await;
            if !inner.is_current(attachment) {
                return;
            }
            if input == Input::TransportRecovered
                && !matches!(inner.machine.state(), ConnectionState::Reconnecting { .. })
            {
                return;
            }
            match Self::transition_locked(&mut inner, input) {
                Ok(mut effects) => {
                    if closing {
                        if let Some(detached) = effects.detached.as_mut() {
                            detached.events_task = None;
                        }
                    }
                    effects
                }
                Err(e) => {
                    tracing::debug!("ignoring transport state change: {e}");
                    return;
                }
            }
        };
        self.execute(effects).await;
    }
}

async fn event_loop(session: Weak<SessionShared>, attachment: Uuid, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(shared) = session.upgrade() else {
            return;
        };
        if !shared.handle_transport_event(attachment, event).await {
            tracing::debug!(%attachment, "transport event loop stopped");
            return;
        }
    }
    if let Some(shared) = session.upgrade() {
        shared
            .apply_transport_input(
                attachment,
                Input::TransportClosed {
                    reason: "transport event stream closed".into(),
                },
            )
            .await;
    }
    tracing::info!(%attachment, "transport event loop ended");
}

async fn watch_screen_share(
    session: Weak<SessionShared>,
    track: TrackId,
    ended: oneshot::Receiver<()>,
) {
    // Err means the track was closed by us.
    if ended.await.is_err() {
        return;
    }
    let Some(shared) = session.upgrade() else {
        return;
    };
    if shared.screen.screen_track().as_ref() != Some(&track) {
        return;
    }
    tracing::info!(%track, "screen share ended from platform controls");
    if let Err(e) = shared.stop_screen_share(true).await {
        tracing::warn!("camera not restored after screen share ended: {e}");
    }
}
