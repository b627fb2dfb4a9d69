//! Session store: creates, tracks, and indexes sessions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tally_countdown::Countdown;
use tally_protocol::{ParticipantId, SessionId};
use tokio::sync::{Mutex, MutexGuard};

use crate::{Session, SessionConfig, SessionError};

/// Characters used in generated session codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Everything guarded by one session's lock.
#[derive(Debug)]
pub struct SessionSlot {
    pub session: Session,
    /// The session's auto-reveal countdown.
    pub countdown: Countdown,
}

/// One registered session.
///
/// The lock is a `tokio::sync::Mutex` because the countdown callback
/// awaits it from a spawned task.
#[derive(Debug)]
pub struct SessionEntry {
    id: SessionId,
    state: Mutex<SessionSlot>,
}

impl SessionEntry {
    fn new(id: SessionId, config: &SessionConfig) -> Self {
        Self {
            state: Mutex::new(SessionSlot {
                session: Session::new(id.clone()),
                countdown: Countdown::new(config.countdown()),
            }),
            id,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Locks the session. Every mutation happens under this guard.
    pub async fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.state.lock().await
    }
}

/// Registry of all live sessions and of which session each connection
/// has joined.
///
/// The maps use synchronous locks that are never held across an await.
/// Callers may take these while holding a session lock, never the other
/// way round.
#[derive(Debug)]
pub struct SessionStore {
    config: SessionConfig,

    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,

    /// Maps each connection to the session it joined.
    /// A connection is in at most ONE session at a time.
    memberships: RwLock<HashMap<ParticipantId, SessionId>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: config.validated(),
            sessions: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registers a session under `id`, or returns the existing one.
    ///
    /// Creating an existing code is not an error and leaves its state
    /// untouched.
    pub fn create(
        &self,
        id: SessionId,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        if id.is_blank() {
            return Err(SessionError::InvalidCode(id.as_str().to_string()));
        }

        let mut sessions = self.sessions.write();
        match sessions.entry(id) {
            Entry::Occupied(existing) => {
                tracing::debug!(session_id = %existing.key(), "session already exists");
                Ok(Arc::clone(existing.get()))
            }
            Entry::Vacant(slot) => {
                let entry = Arc::new(SessionEntry::new(slot.key().clone(), &self.config));
                tracing::info!(session_id = %slot.key(), "session created");
                Ok(Arc::clone(slot.insert(entry)))
            }
        }
    }

    /// Registers a session under a freshly generated, unused code.
    pub fn create_with_code(&self) -> (SessionId, Arc<SessionEntry>) {
        let mut rng = rand::rng();
        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate = generate_code(&mut rng, self.config.code_length);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let entry = Arc::new(SessionEntry::new(id.clone(), &self.config));
        sessions.insert(id.clone(), Arc::clone(&entry));
        tracing::info!(session_id = %id, "session created");
        (id, entry)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(id).cloned()
    }

    /// Like [`get`](Self::get), but names the miss.
    pub fn require(&self, id: &SessionId) -> Result<Arc<SessionEntry>, SessionError> {
        self.get(id).ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Whether `entry` is still the session registered under its code.
    ///
    /// False once it was removed, even if the code has since been reused.
    pub fn is_registered(&self, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .read()
            .get(entry.id())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Unregisters a session and forgets every membership pointing at it.
    ///
    /// Holders of the returned entry can keep using it; it is simply no
    /// longer reachable by code.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        let removed = self.sessions.write().remove(id)?;
        self.memberships.write().retain(|_, sid| sid != id);
        tracing::info!(session_id = %id, "session removed");
        Some(removed)
    }

    /// Unregisters `entry` if it is still the one registered under its
    /// code, and forgets every membership pointing at it.
    pub fn remove_entry(&self, entry: &Arc<SessionEntry>) -> bool {
        let id = entry.id();
        {
            let mut sessions = self.sessions.write();
            match sessions.get(id) {
                Some(current) if Arc::ptr_eq(current, entry) => {
                    sessions.remove(id);
                }
                _ => return false,
            }
        }
        self.memberships.write().retain(|_, sid| sid != id);
        tracing::info!(session_id = %id, "session removed");
        true
    }

    /// Records that `participant` joined `session`.
    ///
    /// Rebinding to the same session is a no-op; binding to a different
    /// one fails with [`SessionError::AlreadyInSession`].
    pub fn bind_participant(
        &self,
        participant: ParticipantId,
        session: &SessionId,
    ) -> Result<(), SessionError> {
        let mut memberships = self.memberships.write();
        match memberships.get(&participant) {
            Some(current) if current == session => Ok(()),
            Some(current) => {
                Err(SessionError::AlreadyInSession(participant, current.clone()))
            }
            None => {
                memberships.insert(participant, session.clone());
                Ok(())
            }
        }
    }

    /// Forgets `participant`'s membership. Returns the session it was in.
    pub fn unbind_participant(&self, participant: ParticipantId) -> Option<SessionId> {
        self.memberships.write().remove(&participant)
    }

    /// Forgets `participant`'s membership only if it points at `session`.
    pub fn unbind_from(&self, participant: ParticipantId, session: &SessionId) -> bool {
        let mut memberships = self.memberships.write();
        if memberships.get(&participant) == Some(session) {
            memberships.remove(&participant);
            true
        } else {
            false
        }
    }

    /// The session `participant` joined, if any.
    pub fn session_of(&self, participant: ParticipantId) -> Option<SessionId> {
        self.memberships.read().get(&participant).cloned()
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Lists all registered session codes.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Generates an uppercase alphanumeric code of `len` characters.
fn generate_code<R: Rng>(rng: &mut R, len: usize) -> SessionId {
    let code: String = (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    SessionId::new(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registers_session() {
        let store = SessionStore::default();
        let entry = store.create(SessionId::new("ABCD")).unwrap();

        assert_eq!(entry.id().as_str(), "ABCD");
        assert!(store.exists(&SessionId::new("ABCD")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_keeps_state() {
        let store = SessionStore::default();
        let first = store.create(SessionId::new("ABCD")).unwrap();
        first
            .lock()
            .await
            .session
            .add_participant(ParticipantId(1), "Ada");

        let second = store.create(SessionId::new("ABCD")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.session.participant_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_rejects_blank_code() {
        let store = SessionStore::default();
        let err = store.create(SessionId::new("   ")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCode(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_with_code_generates_alphanumeric_code() {
        let store = SessionStore::default();
        let (id, entry) = store.create_with_code();

        assert_eq!(id.as_str().len(), 6);
        assert!(
            id.as_str()
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        );
        assert_eq!(entry.id(), &id);
        assert!(store.exists(&id));
    }

    #[test]
    fn test_create_with_code_never_reuses_a_code() {
        let store = SessionStore::default();
        for _ in 0..200 {
            store.create_with_code();
        }
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn test_get_unknown_session_is_none() {
        let store = SessionStore::default();
        assert!(store.get(&SessionId::new("NOPE")).is_none());
    }

    #[test]
    fn test_bind_participant_one_session_at_a_time() {
        let store = SessionStore::default();
        let a = SessionId::new("AAAA");
        let b = SessionId::new("BBBB");

        store.bind_participant(ParticipantId(1), &a).unwrap();
        store.bind_participant(ParticipantId(1), &a).unwrap();
        let err = store.bind_participant(ParticipantId(1), &b).unwrap_err();

        assert!(matches!(err, SessionError::AlreadyInSession(ParticipantId(1), ref s) if *s == a));
        assert_eq!(store.session_of(ParticipantId(1)), Some(a));
    }

    #[test]
    fn test_unbind_participant_returns_session() {
        let store = SessionStore::default();
        let a = SessionId::new("AAAA");
        store.bind_participant(ParticipantId(1), &a).unwrap();

        assert_eq!(store.unbind_participant(ParticipantId(1)), Some(a));
        assert_eq!(store.unbind_participant(ParticipantId(1)), None);
        assert_eq!(store.session_of(ParticipantId(1)), None);
    }

    #[test]
    fn test_unbind_from_only_matching_session() {
        let store = SessionStore::default();
        let a = SessionId::new("AAAA");
        let b = SessionId::new("BBBB");
        store.bind_participant(ParticipantId(1), &a).unwrap();

        assert!(!store.unbind_from(ParticipantId(1), &b));
        assert_eq!(store.session_of(ParticipantId(1)), Some(a.clone()));
        assert!(store.unbind_from(ParticipantId(1), &a));
        assert_eq!(store.session_of(ParticipantId(1)), None);
    }

    #[test]
    fn test_remove_forgets_memberships() {
        let store = SessionStore::default();
        let a = SessionId::new("AAAA");
        store.create(a.clone()).unwrap();
        store.bind_participant(ParticipantId(1), &a).unwrap();
        store.bind_participant(ParticipantId(2), &a).unwrap();

        assert!(store.remove(&a).is_some());

        assert!(!store.exists(&a));
        assert_eq!(store.session_of(ParticipantId(1)), None);
        assert_eq!(store.session_of(ParticipantId(2)), None);
        assert!(store.remove(&a).is_none());
    }

    #[test]
    fn test_require_names_missing_session() {
        let store = SessionStore::default();
        store.create(SessionId::new("ABCD")).unwrap();

        assert!(store.require(&SessionId::new("ABCD")).is_ok());
        let err = store.require(&SessionId::new("NOPE")).unwrap_err();
        assert!(matches!(err, SessionError::NotFound(ref id) if id.as_str() == "NOPE"));
    }

    #[test]
    fn test_remove_entry_ignores_recreated_code() {
        let store = SessionStore::default();
        let a = SessionId::new("AAAA");
        let old = store.create(a.clone()).unwrap();
        assert!(store.remove_entry(&old));
        assert!(!store.is_registered(&old));

        let new = store.create(a.clone()).unwrap();
        store.bind_participant(ParticipantId(1), &a).unwrap();

        assert!(!store.remove_entry(&old), "stale entry must not evict its successor");
        assert!(store.is_registered(&new));
        assert_eq!(store.session_of(ParticipantId(1)), Some(a));
    }

    #[test]
    fn test_store_validates_config() {
        let store = SessionStore::new(SessionConfig {
            history_limit: 0,
            ..SessionConfig::default()
        });
        assert_eq!(store.config().history_limit, 1);
    }
}
