//! The session model and its vote aggregation.
//!
//! A [`Session`] is plain data plus the rules for mutating it. It does no
//! locking and no broadcasting: the hub holds the session's lock around
//! every call and turns the results into events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tally_protocol::{
    Participant, ParticipantId, RevealedVote, Round, RoundVote, SessionId,
    SessionSnapshot, Story, Vote,
};

use crate::SessionError;

/// Display name used for a vote whose caster is not in the roster.
pub const UNKNOWN_PARTICIPANT: &str = "Unknown";

/// What [`Session::reset_voting`] did besides clearing the votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    /// The round that was archived, if the votes had been revealed and at
    /// least one of them was non-blank.
    pub archived: Option<Round>,
    /// Whether the round counter moved on (no titled story was set).
    pub round_advanced: bool,
}

/// One voting room.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) facilitator: Option<ParticipantId>,
    /// Join order.
    pub(crate) participants: Vec<Participant>,
    pub(crate) current_story: Option<Story>,
    pub(crate) votes: HashMap<ParticipantId, Vote>,
    /// Most recent first.
    pub(crate) previous_rounds: Vec<Round>,
    pub(crate) round_number: u32,
    pub(crate) votes_revealed: bool,
    pub(crate) auto_reveal: bool,
    pub(crate) hide_story_description: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session at round 1.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            facilitator: None,
            participants: Vec::new(),
            current_story: None,
            votes: HashMap::new(),
            previous_rounds: Vec::new(),
            round_number: 1,
            votes_revealed: false,
            auto_reveal: false,
            hide_story_description: false,
            created_at: Utc::now(),
        }
    }

    // -- Accessors --------------------------------------------------------

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn facilitator(&self) -> Option<ParticipantId> {
        self.facilitator
    }

    /// The roster in join order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    /// Checks that `id` is in the roster.
    pub fn require_member(&self, id: ParticipantId) -> Result<(), SessionError> {
        if self.is_member(id) {
            Ok(())
        } else {
            Err(SessionError::NotAMember(id, self.id.clone()))
        }
    }

    pub fn current_story(&self) -> Option<&Story> {
        self.current_story.as_ref()
    }

    pub fn vote(&self, id: ParticipantId) -> Option<&Vote> {
        self.votes.get(&id)
    }

    /// Archived rounds, most recent first.
    pub fn previous_rounds(&self) -> &[Round] {
        &self.previous_rounds
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn votes_revealed(&self) -> bool {
        self.votes_revealed
    }

    pub fn auto_reveal(&self) -> bool {
        self.auto_reveal
    }

    pub fn hide_story_description(&self) -> bool {
        self.hide_story_description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // -- Settings ---------------------------------------------------------

    pub fn set_auto_reveal(&mut self, enabled: bool) {
        self.auto_reveal = enabled;
    }

    pub fn set_hide_story_description(&mut self, hide: bool) {
        self.hide_story_description = hide;
    }

    // -- Roster -----------------------------------------------------------

    /// Adds a participant at the end of the roster.
    ///
    /// A connection that is already a member keeps its place and only has
    /// its display name updated. Returns `true` if the participant is new.
    pub fn add_participant(
        &mut self,
        id: ParticipantId,
        name: impl Into<String>,
    ) -> bool {
        let name = name.into();
        if let Some(existing) = self.participants.iter_mut().find(|p| p.id == id) {
            existing.name = name;
            return false;
        }
        self.participants.push(Participant {
            id,
            name,
            is_facilitator: self.facilitator == Some(id),
        });
        true
    }

    /// Removes a participant and any vote they cast.
    ///
    /// Does not touch the facilitator field; reassignment is a separate
    /// decision made by the caller. Returns `true` if they were a member.
    pub fn remove_participant(&mut self, id: ParticipantId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        self.votes.remove(&id);
        self.participants.len() != before
    }

    /// Returns the member's display name, or [`UNKNOWN_PARTICIPANT`].
    pub fn name_of(&self, id: ParticipantId) -> &str {
        self.participant(id)
            .map(|p| p.name.as_str())
            .unwrap_or(UNKNOWN_PARTICIPANT)
    }

    // -- Voting -----------------------------------------------------------

    /// Replaces the current story and starts voting on it from scratch.
    pub fn set_story(&mut self, story: Story) {
        self.current_story = Some(story);
        self.votes.clear();
        self.votes_revealed = false;
    }

    /// Records `value` as the participant's vote, replacing any earlier one.
    ///
    /// Membership is not checked: a connection may vote before its join has
    /// been processed. An empty `value` clears the vote.
    pub fn cast_vote(&mut self, id: ParticipantId, value: impl Into<String>) {
        self.votes.insert(
            id,
            Vote {
                participant: id,
                value: value.into(),
                cast_at: Utc::now(),
            },
        );
    }

    /// Turns the cards over. Returns `true` if they were hidden before.
    pub fn reveal_votes(&mut self) -> bool {
        !std::mem::replace(&mut self.votes_revealed, true)
    }

    /// Ends the current round.
    ///
    /// If the votes were revealed and at least one is non-blank, the round
    /// is archived at the front of the history, which is then cut down to
    /// `history_limit` entries. The round counter advances only when no
    /// titled story is set (titled stories name the round instead). Votes
    /// and the reveal flag are always cleared.
    pub fn reset_voting(&mut self, history_limit: usize) -> ResetOutcome {
        let mut archived = None;

        if self.votes_revealed {
            let votes: Vec<RoundVote> = self
                .named_votes()
                .into_iter()
                .map(|(participant_name, value)| RoundVote {
                    participant_name,
                    value,
                })
                .collect();

            if !votes.is_empty() {
                let title = match &self.current_story {
                    Some(story) if !story.is_untitled() => story.title.clone(),
                    _ => format!("Round {}", self.round_number),
                };
                let round = Round {
                    title,
                    description: self
                        .current_story
                        .as_ref()
                        .map(|s| s.description.clone())
                        .unwrap_or_default(),
                    votes,
                    round_number: self.round_number,
                    completed_at: Utc::now(),
                };
                self.previous_rounds.insert(0, round.clone());
                self.previous_rounds.truncate(history_limit);
                archived = Some(round);
            }
        }

        let round_advanced = self
            .current_story
            .as_ref()
            .is_none_or(Story::is_untitled);
        if round_advanced {
            self.round_number += 1;
        }

        self.votes.clear();
        self.votes_revealed = false;

        ResetOutcome {
            archived,
            round_advanced,
        }
    }

    // -- Derived views ------------------------------------------------------
    //
    // Always computed from the collections, never cached.

    /// Members, in roster order, who currently hold a non-blank vote.
    pub fn voted(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| self.votes.get(&p.id).is_some_and(|v| !v.is_blank()))
            .map(|p| p.id)
            .collect()
    }

    /// Number of members holding a non-blank vote.
    pub fn vote_count(&self) -> usize {
        self.voted().len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// `true` when the roster is non-empty and every member has voted.
    pub fn all_voted(&self) -> bool {
        let participants = self.participant_count();
        participants > 0 && self.vote_count() == participants
    }

    /// Whether the auto-reveal countdown should be running right now.
    pub fn auto_reveal_due(&self) -> bool {
        self.auto_reveal && !self.votes_revealed && self.all_voted()
    }

    /// The reveal payload: non-blank votes with their caster's name.
    pub fn revealed_votes(&self) -> Vec<RevealedVote> {
        self.named_votes()
            .into_iter()
            .map(|(participant_name, value)| RevealedVote {
                participant_name,
                value,
            })
            .collect()
    }

    /// A full picture of the session for a participant who just joined.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            facilitator: self.facilitator,
            participants: self.participants.clone(),
            current_story: self.current_story.clone(),
            voted: self.voted(),
            revealed_votes: self.votes_revealed.then(|| self.revealed_votes()),
            round_number: self.round_number,
            previous_rounds: self.previous_rounds.clone(),
            votes_revealed: self.votes_revealed,
            auto_reveal: self.auto_reveal,
            hide_story_description: self.hide_story_description,
            created_at: self.created_at,
        }
    }

    /// `(name, value)` for every non-blank vote: members in roster order,
    /// then votes from non-members in the order they were cast.
    fn named_votes(&self) -> Vec<(String, String)> {
        let mut named: Vec<(String, String)> = self
            .participants
            .iter()
            .filter_map(|p| self.votes.get(&p.id))
            .filter(|v| !v.is_blank())
            .map(|v| (self.name_of(v.participant).to_string(), v.value.clone()))
            .collect();

        let mut strangers: Vec<&Vote> = self
            .votes
            .values()
            .filter(|v| !v.is_blank() && !self.is_member(v.participant))
            .collect();
        strangers.sort_by_key(|v| (v.cast_at, v.participant));
        named.extend(
            strangers
                .into_iter()
                .map(|v| (UNKNOWN_PARTICIPANT.to_string(), v.value.clone())),
        );

        named
    }
}
