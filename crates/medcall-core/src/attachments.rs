use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use uuid::Uuid;

use crate::session::SessionShared;
use crate::transport::TransportClient;

/// One caller in one session. At most one transport client per key is
/// attached at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    pub session_id: String,
    pub caller: String,
}

struct Entry {
    id: Uuid,
    /// None while the owning join is still fetching devices or credentials.
    client: Option<Arc<dyn TransportClient>>,
    owner: Weak<SessionShared>,
}

/// A key held by some other session controller that must be forced out
/// before a new join proceeds.
pub(crate) struct StaleAttachment {
    id: Uuid,
    client: Option<Arc<dyn TransportClient>>,
    owner: Weak<SessionShared>,
}

impl StaleAttachment {
    pub(crate) fn is_owned_by(&self, owner: &Weak<SessionShared>) -> bool {
        self.owner.ptr_eq(owner)
    }

    pub(crate) async fn evict(self) {
        tracing::warn!(attachment = %self.id, "forcing stale transport client to leave");
        match self.owner.upgrade() {
            Some(owner) => owner.force_leave(self.id, self.client).await,
            None => {
                if let Some(client) = self.client {
                    if let Err(e) = client.leave().await {
                        tracing::warn!("stale client leave failed: {e}");
                    }
                }
            }
        }
    }
}

impl From<Entry> for StaleAttachment {
    fn from(e: Entry) -> Self {
        Self {
            id: e.id,
            client: e.client,
            owner: e.owner,
        }
    }
}

/// Which join attempts hold which keys, shared by every session controller
/// in the process. Owned by the host and passed in, never a global.
#[derive(Clone, Default)]
pub struct SessionAttachments {
    entries: Arc<Mutex<HashMap<AttachmentKey, Entry>>>,
}

impl SessionAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AttachmentKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the key for join attempt `id` before it has a client; returns
    /// whatever held the key before.
    pub(crate) fn claim(
        &self,
        key: AttachmentKey,
        id: Uuid,
        owner: Weak<SessionShared>,
    ) -> Option<StaleAttachment> {
        let entry = Entry {
            id,
            client: None,
            owner,
        };
        self.entries()
            .insert(key, entry)
            .filter(|previous| previous.id != id)
            .map(StaleAttachment::from)
    }

    /// Record the client of attempt `id`. Returns false if a newer attempt
    /// has claimed the key since.
    pub(crate) fn attach(
        &self,
        key: &AttachmentKey,
        id: Uuid,
        client: Arc<dyn TransportClient>,
    ) -> bool {
        match self.entries().get_mut(key) {
            Some(entry) if entry.id == id => {
                entry.client = Some(client);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry, but only if it still belongs to attempt `id`.
    pub(crate) fn detach(&self, key: &AttachmentKey, id: Uuid) {
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
        }
    }

    pub fn is_attached(&self, key: &AttachmentKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeNetwork};

    fn key() -> AttachmentKey {
        AttachmentKey {
            session_id: "appt-1".into(),
            caller: "Alice".into(),
        }
    }

    #[test]
    fn newer_claim_supersedes_older_attempt() {
        let network = FakeNetwork::new();
        let attachments = SessionAttachments::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(attachments.claim(key(), first, Weak::new()).is_none());
        let stale = attachments.claim(key(), second, Weak::new()).unwrap();
        assert_eq!(stale.id, first);
        assert!(stale.client.is_none());

        // the older attempt can no longer attach or detach the newer one
        assert!(!attachments.attach(&key(), first, network.connector().create_client()));
        attachments.detach(&key(), first);
        assert!(attachments.is_attached(&key()));

        assert!(attachments.attach(&key(), second, network.connector().create_client()));
        attachments.detach(&key(), second);
        assert!(attachments.is_empty());
    }

    #[tokio::test]
    async fn evicting_orphan_leaves_its_client() {
        let network = FakeNetwork::new();
        let attachments = SessionAttachments::new();
        let id = Uuid::new_v4();
        attachments.claim(key(), id, Weak::new());
        attachments.attach(&key(), id, network.connector().create_client());

        let stale = attachments.claim(key(), Uuid::new_v4(), Weak::new()).unwrap();
        stale.evict().await;

        assert_eq!(network.count_calls(|c| matches!(c, Call::Leave { .. })), 1);
        assert_eq!(attachments.len(), 1);
    }
}
