//! The session hub: applies participant actions and broadcasts the results.
//!
//! Every operation follows the same shape:
//!   1. Look the session up in the store (unknown sessions are dropped)
//!   2. Lock it for the rest of the operation, dropping the action if the
//!      session was removed while it waited
//!   3. Check facilitator authority where required
//!   4. Mutate, arm or cancel the countdown
//!   5. Hand the resulting events to the [`EventSink`] before unlocking
//!
//! Rejections never reach the caller. They are logged at `debug` and the
//! action is dropped, so a stale or forged action from a client can never
//! disturb anyone else.

use std::sync::{Arc, Weak};

use tally_countdown::{CountdownStats, Ticket};
use tally_protocol::{
    ClientAction, ClientEnvelope, Codec, JsonCodec, ParticipantId,
    ProtocolError, Recipient, SessionEvent, SessionId, SessionSnapshot, Story,
};
use tally_session::{
    Session, SessionConfig, SessionEntry, SessionError, SessionSlot,
    SessionStore,
};
use tracing::{debug, info};

use crate::{EventSink, TallyError};

/// Events produced by one operation, in delivery order.
type Outbox = Vec<(Recipient, SessionEvent)>;

/// Coordinates sessions, their countdowns, and event delivery.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct SessionHub<S: EventSink, C: Codec = JsonCodec> {
    store: SessionStore,
    sink: Arc<S>,
    codec: C,
}

impl<S: EventSink> SessionHub<S, JsonCodec> {
    /// Creates a hub that decodes frames as JSON.
    pub fn new(config: SessionConfig, sink: Arc<S>) -> Self {
        Self::with_codec(config, sink, JsonCodec)
    }
}

impl<S: EventSink, C: Codec> SessionHub<S, C> {
    pub fn with_codec(config: SessionConfig, sink: Arc<S>, codec: C) -> Self {
        Self {
            store: SessionStore::new(config),
            sink,
            codec,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    // -- Session lifecycle ------------------------------------------------

    /// Registers a session under `id` so participants can join it.
    ///
    /// Creating an existing session is a no-op.
    pub fn create_session(
        &self,
        id: impl Into<SessionId>,
    ) -> Result<SessionId, TallyError> {
        let entry = self.store.create(id.into())?;
        Ok(entry.id().clone())
    }

    /// Registers a session under a freshly generated code.
    pub fn create_session_with_code(&self) -> SessionId {
        self.store.create_with_code().0
    }

    pub fn session_exists(&self, id: &SessionId) -> bool {
        self.store.exists(id)
    }

    /// Unregisters a session and sends its members away.
    ///
    /// A running countdown is cancelled and resolved right here with an
    /// empty reveal. Every member then leaves the session's group, so
    /// nothing from this session reaches a later one under the same code.
    pub async fn remove_session(&self, id: &SessionId) -> bool {
        let Some(entry) = self.store.get(id) else {
            return false;
        };
        let mut slot = entry.lock().await;
        if !self.store.remove_entry(&entry) {
            return false;
        }

        let mut outbox = Outbox::new();
        if slot.countdown.cancel() {
            info!(session_id = %id, "session removed during countdown, empty reveal");
            outbox.push((
                Recipient::All,
                SessionEvent::VotesRevealed { votes: Vec::new() },
            ));
        }
        self.dispatch(id, outbox);

        for participant in slot.session.participants() {
            self.sink.leave_group(id, participant.id);
        }
        true
    }

    /// The session as a newly joined participant would see it.
    pub async fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let entry = self.store.get(id)?;
        let slot = entry.lock().await;
        Some(slot.session.snapshot())
    }

    /// Countdown counters for a session.
    pub async fn countdown_stats(&self, id: &SessionId) -> Option<CountdownStats> {
        let entry = self.store.get(id)?;
        let slot = entry.lock().await;
        Some(*slot.countdown.stats())
    }

    /// Whether an auto-reveal countdown is running for a session.
    pub async fn is_counting_down(&self, id: &SessionId) -> bool {
        match self.store.get(id) {
            Some(entry) => entry.lock().await.countdown.is_counting_down(),
            None => false,
        }
    }

    // -- Membership -------------------------------------------------------

    /// Adds `participant` to a session.
    ///
    /// The first participant claims the facilitator role. Everyone gets
    /// the new roster; the joiner also gets a full snapshot and their own
    /// facilitator status.
    pub async fn join(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        name: impl Into<String>,
        wants_facilitator: bool,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "join") else {
            return;
        };
        // Bound before queueing on the lock, so a disconnect arriving in
        // the meantime finds the membership and revokes it.
        if let Err(e) = self.store.bind_participant(participant, session_id) {
            debug!(%session_id, %participant, error = %e, "join dropped");
            return;
        }
        let mut slot = entry.lock().await;

        if !self.still_registered(&entry, participant, "join") {
            self.store.unbind_from(participant, session_id);
            return;
        }
        if self.store.session_of(participant).as_ref() != Some(session_id) {
            debug!(%session_id, %participant, "disconnected before join applied, join dropped");
            return;
        }

        let name = name.into();
        let claimed = slot.session.claim_if_vacant(participant);
        let added = slot.session.add_participant(participant, name.as_str());
        if wants_facilitator && !claimed && !slot.session.is_facilitator(participant) {
            debug!(%session_id, %participant, "facilitator requested but role is taken");
        }
        info!(
            %session_id,
            %participant,
            %name,
            facilitator = slot.session.is_facilitator(participant),
            participants = slot.session.participant_count(),
            rejoin = !added,
            "participant joined"
        );

        self.sink.join_group(session_id, participant);

        let mut outbox = Outbox::new();
        self.reevaluate_countdown(&mut slot, "participant joined");
        outbox.push((Recipient::All, roster(&slot.session)));
        outbox.push((Recipient::All, progress(&slot.session)));
        outbox.push((
            Recipient::Participant(participant),
            SessionEvent::SessionData {
                session: slot.session.snapshot(),
            },
        ));
        outbox.push((
            Recipient::Participant(participant),
            SessionEvent::FacilitatorStatus {
                is_facilitator: slot.session.is_facilitator(participant),
            },
        ));
        self.dispatch(session_id, outbox);
    }

    /// Removes a connection from whatever session it joined.
    ///
    /// If it held the facilitator role, a random remaining member inherits
    /// it and is told so privately.
    pub async fn disconnect(&self, participant: ParticipantId) {
        let Some(session_id) = self.store.session_of(participant) else {
            debug!(%participant, "disconnect of participant in no session");
            return;
        };
        let Some(entry) = self.lookup(&session_id, participant, "disconnect") else {
            self.store.unbind_from(participant, &session_id);
            return;
        };
        let mut slot = entry.lock().await;

        // Unbinding under the lock: a join still queued behind us sees
        // the membership gone and drops itself.
        self.store.unbind_from(participant, &session_id);
        if !self.still_registered(&entry, participant, "disconnect") {
            return;
        }
        self.sink.leave_group(&session_id, participant);

        if let Err(e) = slot.session.require_member(participant) {
            debug!(error = %e, "disconnect of non-member");
            return;
        }
        let was_facilitator = slot.session.is_facilitator(participant);
        slot.session.remove_participant(participant);
        info!(
            %session_id,
            %participant,
            participants = slot.session.participant_count(),
            "participant left"
        );

        let mut outbox = Outbox::new();
        if was_facilitator {
            match slot.session.reassign_facilitator() {
                Some(successor) => {
                    info!(%session_id, from = %participant, to = %successor, "facilitator reassigned");
                    outbox.push((
                        Recipient::Participant(successor),
                        SessionEvent::FacilitatorStatus { is_facilitator: true },
                    ));
                }
                None => info!(%session_id, "session empty, facilitator cleared"),
            }
        }

        self.reevaluate_countdown(&mut slot, "participant left");
        outbox.push((Recipient::All, roster(&slot.session)));
        outbox.push((Recipient::All, progress(&slot.session)));
        self.dispatch(&session_id, outbox);
    }

    // -- Voting -----------------------------------------------------------

    /// Facilitator: replaces the story and clears every vote.
    pub async fn set_story(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        title: impl Into<String>,
        description: impl Into<String>,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "set_story") else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "set_story")
            || !self.authorized(&slot.session, participant, "set_story")
        {
            return;
        }

        cancel_countdown(&mut slot, "story changed");
        let story = Story::new(title, description);
        slot.session.set_story(story.clone());
        info!(%session_id, title = %story.title, "story set");

        self.dispatch(
            session_id,
            vec![
                (Recipient::All, SessionEvent::StoryUpdated { story }),
                (Recipient::All, SessionEvent::VotesCleared),
            ],
        );
    }

    /// Records a vote (an empty `value` clears it) and arms or cancels the
    /// auto-reveal countdown.
    ///
    /// No roster check: a vote may arrive before its caster's join. A
    /// connection that joined a different session cannot vote here.
    pub async fn cast_vote(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        value: impl Into<String>,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "cast_vote") else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "cast_vote") {
            return;
        }
        match self.store.session_of(participant) {
            Some(bound) if bound != *session_id => {
                let e = SessionError::AlreadyInSession(participant, bound);
                debug!(%session_id, error = %e, "vote dropped");
                return;
            }
            _ => {}
        }

        slot.session.cast_vote(participant, value);
        debug!(
            %session_id,
            %participant,
            votes = slot.session.vote_count(),
            participants = slot.session.participant_count(),
            "vote cast"
        );

        let mut outbox = vec![(Recipient::All, progress(&slot.session))];
        if slot.session.auto_reveal_due() {
            outbox.push((Recipient::All, self.arm_countdown(&entry, &mut slot)));
        } else {
            cancel_countdown(&mut slot, "not everyone has voted");
        }
        self.dispatch(session_id, outbox);
    }

    /// Facilitator: turns the cards over now.
    pub async fn reveal_votes(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "reveal_votes") else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "reveal_votes")
            || !self.authorized(&slot.session, participant, "reveal_votes")
        {
            return;
        }

        cancel_countdown(&mut slot, "revealed manually");
        slot.session.reveal_votes();
        let votes = slot.session.revealed_votes();
        info!(%session_id, votes = votes.len(), "votes revealed");

        self.dispatch(
            session_id,
            vec![(Recipient::All, SessionEvent::VotesRevealed { votes })],
        );
    }

    /// Facilitator: archives the round if it was revealed and starts a
    /// new one.
    pub async fn reset_voting(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "reset_voting") else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "reset_voting")
            || !self.authorized(&slot.session, participant, "reset_voting")
        {
            return;
        }

        cancel_countdown(&mut slot, "voting reset");
        let outcome = slot
            .session
            .reset_voting(self.store.config().history_limit);
        info!(
            %session_id,
            archived = outcome.archived.is_some(),
            round = slot.session.round_number(),
            "voting reset"
        );

        let mut outbox = vec![(Recipient::All, SessionEvent::VotingReset)];
        if outcome.archived.is_some() {
            outbox.push((
                Recipient::All,
                SessionEvent::RoundHistoryUpdated {
                    rounds: slot.session.previous_rounds().to_vec(),
                },
            ));
        }
        if outcome.round_advanced {
            outbox.push((
                Recipient::All,
                SessionEvent::RoundNumberUpdated {
                    round_number: slot.session.round_number(),
                },
            ));
        }
        self.dispatch(session_id, outbox);
    }

    // -- Settings ---------------------------------------------------------

    /// Facilitator: turns automatic reveal on or off.
    ///
    /// Turning it off stops a running countdown. Turning it on does not
    /// start one; the next qualifying vote does.
    pub async fn set_auto_reveal(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        enabled: bool,
    ) {
        let Some(entry) = self.lookup(session_id, participant, "set_auto_reveal") else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "set_auto_reveal")
            || !self.authorized(&slot.session, participant, "set_auto_reveal")
        {
            return;
        }

        slot.session.set_auto_reveal(enabled);
        if !enabled {
            cancel_countdown(&mut slot, "auto-reveal disabled");
        }
        info!(%session_id, enabled, "auto-reveal toggled");

        self.dispatch(
            session_id,
            vec![(Recipient::All, SessionEvent::AutoRevealToggled { enabled })],
        );
    }

    /// Facilitator: hides or shows the story description.
    pub async fn set_hide_story_description(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        hide: bool,
    ) {
        let Some(entry) =
            self.lookup(session_id, participant, "set_hide_story_description")
        else {
            return;
        };
        let mut slot = entry.lock().await;
        if !self.still_registered(&entry, participant, "set_hide_story_description")
            || !self.authorized(&slot.session, participant, "set_hide_story_description")
        {
            return;
        }

        slot.session.set_hide_story_description(hide);
        info!(%session_id, hide, "story description visibility toggled");

        self.dispatch(
            session_id,
            vec![(Recipient::All, SessionEvent::StoryDescriptionToggled { hide })],
        );
    }

    // -- Inbound routing --------------------------------------------------

    /// Applies a decoded action from `participant`.
    pub async fn handle_action(
        &self,
        participant: ParticipantId,
        envelope: ClientEnvelope,
    ) {
        let ClientEnvelope { session_id, action } = envelope;
        match action {
            ClientAction::JoinSession {
                name,
                wants_facilitator,
            } => {
                self.join(&session_id, participant, name, wants_facilitator)
                    .await
            }
            ClientAction::SetStory { title, description } => {
                self.set_story(&session_id, participant, title, description)
                    .await
            }
            ClientAction::CastVote { value } => {
                self.cast_vote(&session_id, participant, value).await
            }
            ClientAction::RevealVotes => {
                self.reveal_votes(&session_id, participant).await
            }
            ClientAction::ResetVoting => {
                self.reset_voting(&session_id, participant).await
            }
            ClientAction::SetAutoReveal { enabled } => {
                self.set_auto_reveal(&session_id, participant, enabled)
                    .await
            }
            ClientAction::SetHideStoryDescription { hide } => {
                self.set_hide_story_description(&session_id, participant, hide)
                    .await
            }
        }
    }

    /// Decodes a raw frame with the hub's codec and applies it.
    ///
    /// # Errors
    /// Returns `TallyError::Protocol` if the frame does not decode to a
    /// [`ClientEnvelope`] or names a blank session code. Nothing is applied
    /// in that case.
    pub async fn handle_frame(
        &self,
        participant: ParticipantId,
        frame: &[u8],
    ) -> Result<(), TallyError> {
        let envelope: ClientEnvelope = self.codec.decode(frame)?;
        if envelope.session_id.is_blank() {
            return Err(ProtocolError::InvalidMessage(
                "session code must not be blank".into(),
            )
            .into());
        }
        self.handle_action(participant, envelope).await;
        Ok(())
    }

    /// Encodes an outbound event with the hub's codec, for sinks that
    /// write bytes.
    pub fn encode_event(&self, event: &SessionEvent) -> Result<Vec<u8>, TallyError> {
        Ok(self.codec.encode(event)?)
    }

    // -- Internals --------------------------------------------------------

    fn lookup(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        op: &'static str,
    ) -> Option<Arc<SessionEntry>> {
        match self.store.require(session_id) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(%participant, op, error = %e, "action dropped");
                None
            }
        }
    }

    /// False if the session was removed while this operation waited for
    /// its lock.
    fn still_registered(
        &self,
        entry: &Arc<SessionEntry>,
        participant: ParticipantId,
        op: &'static str,
    ) -> bool {
        let registered = self.store.is_registered(entry);
        if !registered {
            debug!(session_id = %entry.id(), %participant, op, "session removed, action dropped");
        }
        registered
    }

    fn authorized(
        &self,
        session: &Session,
        participant: ParticipantId,
        op: &'static str,
    ) -> bool {
        match session.authorize(participant) {
            Ok(()) => true,
            Err(e) => {
                debug!(op, error = %e, "action dropped");
                false
            }
        }
    }

    /// Arms (or re-arms) the session's countdown and returns the
    /// announcement to broadcast.
    fn arm_countdown(
        &self,
        entry: &Arc<SessionEntry>,
        slot: &mut SessionSlot,
    ) -> SessionEvent {
        let owner = Arc::downgrade(entry);
        let sink = Arc::clone(&self.sink);
        let session_id = entry.id().clone();
        let ticket = slot
            .countdown
            .arm(move |ticket| complete_countdown(owner, sink, session_id, ticket));
        info!(
            session_id = %entry.id(),
            generation = ticket.generation(),
            "auto-reveal countdown started"
        );
        SessionEvent::CountdownStarted {
            grace_ms: slot.countdown.config().grace_ms(),
        }
    }

    /// Cancels a running countdown if the session no longer qualifies.
    /// Never arms one.
    fn reevaluate_countdown(&self, slot: &mut SessionSlot, reason: &'static str) {
        if !slot.session.auto_reveal_due() {
            cancel_countdown(slot, reason);
        }
    }

    fn dispatch(&self, session_id: &SessionId, outbox: Outbox) {
        for (recipient, event) in outbox {
            self.sink.deliver(session_id, recipient, &event);
        }
    }
}

/// Runs when a countdown elapses. Reveals and broadcasts under the session
/// lock, unless the countdown was cancelled or replaced in the meantime.
async fn complete_countdown<S: EventSink>(
    owner: Weak<SessionEntry>,
    sink: Arc<S>,
    session_id: SessionId,
    ticket: Ticket,
) {
    let Some(entry) = owner.upgrade() else {
        debug!(%session_id, "session dropped before countdown elapsed");
        return;
    };

    let mut slot = entry.lock().await;
    if !slot.countdown.try_complete(ticket) {
        return;
    }

    slot.session.reveal_votes();
    let votes = slot.session.revealed_votes();
    info!(%session_id, votes = votes.len(), "votes auto-revealed");
    sink.deliver(
        &session_id,
        Recipient::All,
        &SessionEvent::VotesRevealed { votes },
    );
}

fn cancel_countdown(slot: &mut SessionSlot, reason: &'static str) {
    if slot.countdown.cancel() {
        debug!(session_id = %slot.session.id(), reason, "auto-reveal countdown cancelled");
    }
}

fn roster(session: &Session) -> SessionEvent {
    SessionEvent::ParticipantsUpdated {
        participants: session.participants().to_vec(),
    }
}

fn progress(session: &Session) -> SessionEvent {
    SessionEvent::VoteProgress {
        voted: session.voted(),
        participant_count: session.participant_count(),
    }
}
