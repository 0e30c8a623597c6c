//! In-memory media engine and token broker used by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::credentials::{CredentialProvider, SessionCredentials};
use crate::errors::{CallError, DeviceError, ScreenShareError, TransportError};
use crate::events::{MediaKind, SessionEvent, SessionEventListener};
use crate::transport::{
    MediaDevices, ScreenCapture, TrackId, TransportClient, TransportConnector, TransportEvent,
    TransportEvents,
};

/// Let spawned tasks (event loops, watchers, teardown) run to quiescence.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

// ── Media devices ────────────────────────────────────────────────────

#[derive(Default)]
struct MediaState {
    next_id: u32,
    created: usize,
    close_calls: usize,
    open: BTreeMap<TrackId, bool>,
    mic_error: Option<DeviceError>,
    camera_error: Option<DeviceError>,
    screen_error: Option<ScreenShareError>,
    screen_enders: HashMap<TrackId, oneshot::Sender<()>>,
    keep_screen_enders: bool,
    camera_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
pub struct FakeMedia {
    state: Mutex<MediaState>,
    camera_requested: Notify,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_track(&self, prefix: &str) -> TrackId {
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        st.created += 1;
        let track = TrackId::new(format!("{prefix}-{}", st.next_id));
        st.open.insert(track.clone(), true);
        track
    }

    pub fn deny_permission(&self) {
        let mut st = self.state.lock().unwrap();
        st.mic_error = Some(DeviceError::PermissionDenied);
        st.camera_error = Some(DeviceError::PermissionDenied);
    }

    pub fn grant_permission(&self) {
        let mut st = self.state.lock().unwrap();
        st.mic_error = None;
        st.camera_error = None;
    }

    pub fn fail_camera(&self, err: DeviceError) {
        self.state.lock().unwrap().camera_error = Some(err);
    }

    pub fn fail_screen(&self, err: ScreenShareError) {
        self.state.lock().unwrap().screen_error = Some(err);
    }

    /// Make camera creation wait until the returned gate is notified.
    pub fn hold_camera(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().camera_gate = Some(gate.clone());
        gate
    }

    pub async fn wait_for_camera_request(&self) {
        self.camera_requested.notified().await;
    }

    /// Simulate the user pressing the platform's "stop sharing" button.
    pub fn end_screen_share(&self, track: &TrackId) {
        if let Some(tx) = self.state.lock().unwrap().screen_enders.remove(track) {
            let _ = tx.send(());
        }
    }

    /// Engines that keep the "ended" signal alive after the track closes.
    pub fn keep_screen_signal_on_close(&self) {
        self.state.lock().unwrap().keep_screen_enders = true;
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn is_open(&self, track: &TrackId) -> bool {
        self.state.lock().unwrap().open.contains_key(track)
    }

    pub fn is_enabled(&self, track: &TrackId) -> Option<bool> {
        self.state.lock().unwrap().open.get(track).copied()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn create_microphone_track(&self) -> Result<TrackId, DeviceError> {
        let err = self.state.lock().unwrap().mic_error.clone();
        match err {
            Some(e) => Err(e),
            None => Ok(self.open_track("mic")),
        }
    }

    async fn create_camera_track(&self) -> Result<TrackId, DeviceError> {
        self.camera_requested.notify_one();
        let gate = self.state.lock().unwrap().camera_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let err = self.state.lock().unwrap().camera_error.clone();
        match err {
            Some(e) => Err(e),
            None => Ok(self.open_track("camera")),
        }
    }

    async fn create_screen_track(&self) -> Result<ScreenCapture, ScreenShareError> {
        let err = self.state.lock().unwrap().screen_error.clone();
        if let Some(e) = err {
            return Err(e);
        }
        let track = self.open_track("screen");
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().screen_enders.insert(track.clone(), tx);
        Ok(ScreenCapture { track, ended: rx })
    }

    fn set_track_enabled(&self, track: &TrackId, enabled: bool) {
        if let Some(flag) = self.state.lock().unwrap().open.get_mut(track) {
            *flag = enabled;
        }
    }

    fn close_track(&self, track: &TrackId) {
        let mut st = self.state.lock().unwrap();
        st.close_calls += 1;
        st.open.remove(track);
        if !st.keep_screen_enders {
            st.screen_enders.remove(track);
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Join { client: u32, identity: String },
    Leave { client: u32 },
    Publish { client: u32, tracks: Vec<TrackId> },
    Unpublish { client: u32, tracks: Vec<TrackId> },
    Subscribe { identity: String, kind: MediaKind },
    Unsubscribe { identity: String, kind: MediaKind },
}

#[derive(Default)]
struct NetState {
    next_client: u32,
    calls: Vec<Call>,
    joined: HashMap<String, u32>,
    senders: BTreeMap<u32, mpsc::UnboundedSender<TransportEvent>>,
    published: BTreeMap<TrackId, u32>,
    video_overlap: bool,
    forced_conflicts: u32,
    join_error: Option<TransportError>,
    join_gate: Option<Arc<Notify>>,
}

/// Shared view of every client the fake connector has created.
#[derive(Default)]
pub struct FakeNetwork {
    state: Mutex<NetState>,
    join_requested: Notify,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn TransportConnector> {
        Arc::new(FakeConnector(self.clone()))
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn publish_count(&self, track: &TrackId) -> usize {
        self.count_calls(|c| matches!(c, Call::Publish { tracks, .. } if tracks.contains(track)))
    }

    pub fn unpublish_count(&self, track: &TrackId) -> usize {
        self.count_calls(|c| matches!(c, Call::Unpublish { tracks, .. } if tracks.contains(track)))
    }

    pub fn is_published(&self, track: &TrackId) -> bool {
        self.state.lock().unwrap().published.contains_key(track)
    }

    pub fn published_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    /// True if camera and screen video were ever published at the same time.
    pub fn video_overlap(&self) -> bool {
        self.state.lock().unwrap().video_overlap
    }

    pub fn joined_clients(&self) -> usize {
        self.state.lock().unwrap().joined.len()
    }

    pub fn force_conflicts(&self, n: u32) {
        self.state.lock().unwrap().forced_conflicts = n;
    }

    pub fn fail_join(&self, err: TransportError) {
        self.state.lock().unwrap().join_error = Some(err);
    }

    /// Make the next join wait until the returned gate is notified.
    pub fn hold_join(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().join_gate = Some(gate.clone());
        gate
    }

    pub async fn wait_for_join_request(&self) {
        self.join_requested.notified().await;
    }

    /// Deliver an engine event to the most recently joined client.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let st = self.state.lock().unwrap();
        match st.senders.values().next_back() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

struct FakeConnector(Arc<FakeNetwork>);

impl TransportConnector for FakeConnector {
    fn create_client(&self) -> Arc<dyn TransportClient> {
        let id = {
            let mut st = self.0.state.lock().unwrap();
            st.next_client += 1;
            st.next_client
        };
        Arc::new(FakeClient {
            id,
            network: self.0.clone(),
            identity: Mutex::new(None),
        })
    }
}

struct FakeClient {
    id: u32,
    network: Arc<FakeNetwork>,
    identity: Mutex<Option<String>>,
}

#[async_trait]
impl TransportClient for FakeClient {
    async fn join(&self, credentials: &SessionCredentials) -> Result<TransportEvents, TransportError> {
        let identity = credentials.participant_identity.clone();
        self.network.join_requested.notify_one();
        let gate = self.network.state.lock().unwrap().join_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut st = self.network.state.lock().unwrap();
        st.calls.push(Call::Join {
            client: self.id,
            identity: identity.clone(),
        });
        if let Some(err) = st.join_error.take() {
            return Err(err);
        }
        if st.forced_conflicts > 0 {
            st.forced_conflicts -= 1;
            return Err(TransportError::SessionConflict);
        }
        if st.joined.get(&identity).is_some_and(|owner| *owner != self.id) {
            return Err(TransportError::SessionConflict);
        }
        st.joined.insert(identity.clone(), self.id);
        let (tx, rx) = mpsc::unbounded_channel();
        st.senders.insert(self.id, tx);
        *self.identity.lock().unwrap() = Some(identity);
        Ok(rx)
    }

    async fn leave(&self) -> Result<(), TransportError> {
        let mut st = self.network.state.lock().unwrap();
        st.calls.push(Call::Leave { client: self.id });
        st.senders.remove(&self.id);
        let id = self.id;
        st.published.retain(|_, owner| *owner != id);
        if let Some(identity) = self.identity.lock().unwrap().take() {
            if st.joined.get(&identity) == Some(&id) {
                st.joined.remove(&identity);
            }
        }
        Ok(())
    }

    async fn publish(&self, tracks: &[TrackId]) -> Result<(), TransportError> {
        let mut st = self.network.state.lock().unwrap();
        st.calls.push(Call::Publish {
            client: self.id,
            tracks: tracks.to_vec(),
        });
        for track in tracks {
            st.published.insert(track.clone(), self.id);
        }
        let camera = st.published.keys().any(|t| t.as_str().starts_with("camera"));
        let screen = st.published.keys().any(|t| t.as_str().starts_with("screen"));
        if camera && screen {
            st.video_overlap = true;
        }
        Ok(())
    }

    async fn unpublish(&self, tracks: &[TrackId]) -> Result<(), TransportError> {
        let mut st = self.network.state.lock().unwrap();
        st.calls.push(Call::Unpublish {
            client: self.id,
            tracks: tracks.to_vec(),
        });
        for track in tracks {
            st.published.remove(track);
        }
        Ok(())
    }

    async fn subscribe(&self, identity: &str, kind: MediaKind) -> Result<TrackId, TransportError> {
        self.network.state.lock().unwrap().calls.push(Call::Subscribe {
            identity: identity.to_string(),
            kind,
        });
        Ok(TrackId::new(format!("remote-{identity}-{kind:?}")))
    }

    async fn unsubscribe(&self, identity: &str, kind: MediaKind) -> Result<(), TransportError> {
        self.network.state.lock().unwrap().calls.push(Call::Unsubscribe {
            identity: identity.to_string(),
            kind,
        });
        Ok(())
    }
}

// ── Token broker ─────────────────────────────────────────────────────

pub struct FakeCredentials {
    identity: String,
    error: Mutex<Option<CallError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    requested: Notify,
    requests: AtomicUsize,
}

impl FakeCredentials {
    pub fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            error: Mutex::new(None),
            gate: Mutex::new(None),
            requested: Notify::new(),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn fail_with(&self, err: CallError) {
        *self.error.lock().unwrap() = Some(err);
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn wait_for_request(&self) {
        self.requested.notified().await;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn request_credentials(
        &self,
        session_id: &str,
        _display_name: &str,
    ) -> Result<SessionCredentials, CallError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.requested.notify_one();
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(SessionCredentials {
            transport_app_id: "test-app".into(),
            token: "test-token".into(),
            channel_name: session_id.to_string(),
            participant_identity: self.identity.clone(),
        })
    }
}

// ── Event capture ────────────────────────────────────────────────────

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<crate::events::ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ConnectionStateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl SessionEventListener for EventLog {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
