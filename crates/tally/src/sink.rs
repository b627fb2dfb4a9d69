//! Event delivery: the seam between the engine and the transport.
//!
//! The hub decides *what* each session member should hear; an
//! [`EventSink`] decides *how* it gets there. Real deployments wrap their
//! socket layer in one. [`ChannelSink`] is the in-process implementation,
//! one unbounded channel per connection, used by tests and the demo.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tally_protocol::{ParticipantId, Recipient, SessionEvent, SessionId};
use tokio::sync::mpsc;

/// Delivers session events to connections.
///
/// Every method is called while a session lock is held, so implementations
/// must not block: queue the event and return.
pub trait EventSink: Send + Sync + 'static {
    /// Adds a connection to the broadcast group of `session`.
    fn join_group(&self, session: &SessionId, participant: ParticipantId);

    /// Removes a connection from the broadcast group of `session`.
    fn leave_group(&self, session: &SessionId, participant: ParticipantId);

    /// Sends `event` to the group of `session` or to one connection.
    fn deliver(
        &self,
        session: &SessionId,
        recipient: Recipient,
        event: &SessionEvent,
    );
}

/// Channel sender for delivering events to one connection.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Channel receiver a connection reads its events from.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// An [`EventSink`] backed by one unbounded channel per connection.
#[derive(Debug, Default)]
pub struct ChannelSink {
    connections: RwLock<HashMap<ParticipantId, EventSender>>,
    groups: RwLock<HashMap<SessionId, BTreeSet<ParticipantId>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel for `participant` and returns its receiving end.
    ///
    /// Connecting an id that is already connected replaces its channel;
    /// the old receiver sees the stream end.
    pub fn connect(&self, participant: ParticipantId) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().insert(participant, tx);
        rx
    }

    /// Drops `participant`'s channel and removes it from every group.
    pub fn close(&self, participant: ParticipantId) {
        self.connections.write().remove(&participant);
        let mut groups = self.groups.write();
        groups.retain(|_, members| {
            members.remove(&participant);
            !members.is_empty()
        });
    }

    /// Current members of `session`'s group, in id order.
    pub fn group_members(&self, session: &SessionId) -> Vec<ParticipantId> {
        self.groups
            .read()
            .get(session)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.connections.read().contains_key(&participant)
    }

    /// Sends to a single connection. Silently drops if the receiver is
    /// gone.
    fn send_to(&self, participant: ParticipantId, event: SessionEvent) {
        let connections = self.connections.read();
        match connections.get(&participant) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    tracing::debug!(%participant, "receiver dropped, event discarded");
                }
            }
            None => {
                tracing::trace!(%participant, "no channel for participant");
            }
        }
    }
}

impl EventSink for ChannelSink {
    fn join_group(&self, session: &SessionId, participant: ParticipantId) {
        self.groups
            .write()
            .entry(session.clone())
            .or_default()
            .insert(participant);
    }

    fn leave_group(&self, session: &SessionId, participant: ParticipantId) {
        let mut groups = self.groups.write();
        if let Some(members) = groups.get_mut(session) {
            members.remove(&participant);
            if members.is_empty() {
                groups.remove(session);
            }
        }
    }

    fn deliver(
        &self,
        session: &SessionId,
        recipient: Recipient,
        event: &SessionEvent,
    ) {
        match recipient {
            Recipient::All => {
                for participant in self.group_members(session) {
                    tracing::trace!(
                        session_id = %session,
                        %participant,
                        event = event.kind(),
                        "deliver"
                    );
                    self.send_to(participant, event.clone());
                }
            }
            Recipient::Participant(participant) => {
                tracing::trace!(
                    session_id = %session,
                    %participant,
                    event = event.kind(),
                    "deliver (targeted)"
                );
                self.send_to(participant, event.clone());
            }
        }
    }
}
