use crate::events::MediaKind;
use crate::transport::TrackId;

/// A remote identity that currently publishes at least one media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_track: Option<TrackId>,
    pub video_track: Option<TrackId>,
}

impl RemoteParticipant {
    fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            has_audio: false,
            has_video: false,
            audio_track: None,
            video_track: None,
        }
    }

    fn flag(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_audio,
            MediaKind::Video => self.has_video,
        }
    }

    fn flag_mut(&mut self, kind: MediaKind) -> &mut bool {
        match kind {
            MediaKind::Audio => &mut self.has_audio,
            MediaKind::Video => &mut self.has_video,
        }
    }

    fn track_mut(&mut self, kind: MediaKind) -> &mut Option<TrackId> {
        match kind {
            MediaKind::Audio => &mut self.audio_track,
            MediaKind::Video => &mut self.video_track,
        }
    }

    fn is_publishing(&self) -> bool {
        self.has_audio || self.has_video
    }
}

/// UI-facing view of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipantInfo {
    pub identity: String,
    pub has_audio: bool,
    pub has_video: bool,
}

impl From<&RemoteParticipant> for RemoteParticipantInfo {
    fn from(p: &RemoteParticipant) -> Self {
        Self {
            identity: p.identity.clone(),
            has_audio: p.has_audio,
            has_video: p.has_video,
        }
    }
}

/// Tracks which remote identities are publishing, in first-published order.
///
/// Updated by the session event loop. Membership mirrors the transport's
/// published-identity set: an entry exists iff at least one kind is published.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: Vec<RemoteParticipant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `identity` published `kind`. Returns true if the kind was
    /// not already published, i.e. a subscription is needed.
    pub fn on_published(&mut self, identity: &str, kind: MediaKind) -> bool {
        let idx = match self.participants.iter().position(|p| p.identity == identity) {
            Some(idx) => idx,
            None => {
                self.participants.push(RemoteParticipant::new(identity));
                self.participants.len() - 1
            }
        };
        let flag = self.participants[idx].flag_mut(kind);
        let newly_published = !*flag;
        *flag = true;
        newly_published
    }

    /// Bind a subscribed track. Returns false if the kind is no longer
    /// published, in which case the caller should unsubscribe it.
    pub fn attach_track(&mut self, identity: &str, kind: MediaKind, track: TrackId) -> bool {
        match self.participant_mut(identity) {
            Some(p) if p.flag(kind) => {
                *p.track_mut(kind) = Some(track);
                true
            }
            _ => false,
        }
    }

    /// Record that `identity` stopped publishing `kind`. The entry is removed
    /// once neither kind remains. Returns whether the kind was subscribed.
    pub fn on_unpublished(&mut self, identity: &str, kind: MediaKind) -> bool {
        let Some(p) = self.participant_mut(identity) else {
            return false;
        };
        *p.flag_mut(kind) = false;
        let was_subscribed = p.track_mut(kind).take().is_some();
        if !p.is_publishing() {
            self.participants.retain(|p| p.identity != identity);
        }
        was_subscribed
    }

    /// Drop the entry entirely (the identity left the channel).
    pub fn on_left(&mut self, identity: &str) -> Option<RemoteParticipant> {
        let idx = self.participants.iter().position(|p| p.identity == identity)?;
        Some(self.participants.remove(idx))
    }

    pub fn participants(&self) -> &[RemoteParticipant] {
        &self.participants
    }

    pub fn participant(&self, identity: &str) -> Option<&RemoteParticipant> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    fn participant_mut(&mut self, identity: &str) -> Option<&mut RemoteParticipant> {
        self.participants.iter_mut().find(|p| p.identity == identity)
    }

    pub fn snapshot(&self) -> Vec<RemoteParticipantInfo> {
        self.participants.iter().map(RemoteParticipantInfo::from).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
