//! Core protocol types: identities, inbound actions, outbound events, and
//! the data transfer shapes carried inside events.
//!
//! Everything in this module travels "on the wire", so every type derives
//! `Serialize`/`Deserialize`. Enums use `#[serde(tag = "type")]`, which
//! produces `{ "type": "CastVote", "value": "5" }` rather than
//! `{ "CastVote": { "value": "5" } }` and is friendlier to browser clients.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The shared code identifying a voting session, e.g. `"ABCD"`.
///
/// Codes are chosen by whoever creates the session (or generated by the
/// store) and are compared exactly; upper-casing user input is the
/// client's job.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the code is empty or whitespace. Such a code never
    /// names a session.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Opaque identifier of one participant connection.
///
/// A participant *is* its connection: reconnecting yields a new id, and the
/// old one is cleaned up by the disconnect path.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Specifies who should receive an outbound [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every member of the session the event belongs to.
    All,

    /// One specific participant (the caller of a join, or a newly chosen
    /// facilitator).
    Participant(ParticipantId),
}

// ---------------------------------------------------------------------------
// Session data shapes
// ---------------------------------------------------------------------------

/// A member of a session as shown in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Mirrors the session's facilitator field. At most one member of a
    /// session has this set.
    pub is_facilitator: bool,
}

/// The user story currently being estimated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    pub description: String,
}

impl Story {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if the title is empty or whitespace only.
    pub fn is_untitled(&self) -> bool {
        self.title.trim().is_empty()
    }
}

/// One participant's current estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub participant: ParticipantId,
    /// The card value. An empty string means "no vote / cleared".
    pub value: String,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Returns `true` for the cleared-vote sentinel (empty or whitespace).
    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// A vote as shown once the cards are turned over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedVote {
    pub participant_name: String,
    pub value: String,
}

/// A vote retained in round history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVote {
    pub participant_name: String,
    pub value: String,
}

/// An archived, immutable voting round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// The story title, or `"Round N"` when the round had no titled story.
    pub title: String,
    pub description: String,
    /// Only non-blank votes are kept.
    pub votes: Vec<RoundVote>,
    pub round_number: u32,
    pub completed_at: DateTime<Utc>,
}

/// Everything a participant needs to render a session after joining.
///
/// Vote *values* are only present once revealed; before that the snapshot
/// only says who has voted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub facilitator: Option<ParticipantId>,
    pub participants: Vec<Participant>,
    pub current_story: Option<Story>,
    pub voted: Vec<ParticipantId>,
    pub revealed_votes: Option<Vec<RevealedVote>>,
    pub round_number: u32,
    pub previous_rounds: Vec<Round>,
    pub votes_revealed: bool,
    pub auto_reveal: bool,
    pub hide_story_description: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// An action a participant asks the engine to perform.
///
/// Facilitator-only actions from anyone else are dropped without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientAction {
    /// Enter the session. `wants_facilitator` is advisory: the first
    /// joiner becomes facilitator regardless.
    JoinSession {
        name: String,
        #[serde(default)]
        wants_facilitator: bool,
    },

    /// Facilitator: replace the current story and clear all votes.
    SetStory {
        title: String,
        #[serde(default)]
        description: String,
    },

    /// Cast (or with `""`, clear) the caller's vote.
    CastVote {
        #[serde(default)]
        value: String,
    },

    /// Facilitator: turn the cards over.
    RevealVotes,

    /// Facilitator: archive the round (if revealed) and start a new one.
    ResetVoting,

    /// Facilitator: toggle automatic reveal once everyone has voted.
    SetAutoReveal { enabled: bool },

    /// Facilitator: toggle hiding the story description from participants.
    SetHideStoryDescription { hide: bool },
}

/// An action addressed to a session, as it arrives from a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub session_id: SessionId,
    pub action: ClientAction,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An event the engine broadcasts after a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// The full roster, in join order.
    ParticipantsUpdated { participants: Vec<Participant> },

    /// Personal snapshot for a participant who just joined.
    SessionData { session: SessionSnapshot },

    StoryUpdated { story: Story },

    VotesCleared,

    /// Who has voted so far, out of how many members.
    VoteProgress {
        voted: Vec<ParticipantId>,
        participant_count: usize,
    },

    /// Everyone has voted and auto-reveal is on: cards turn over after
    /// `grace_ms` unless something changes first.
    CountdownStarted { grace_ms: u64 },

    VotesRevealed { votes: Vec<RevealedVote> },

    VotingReset,

    /// Most recent round first.
    RoundHistoryUpdated { rounds: Vec<Round> },

    RoundNumberUpdated { round_number: u32 },

    /// Tells one participant whether they hold the facilitator role.
    FacilitatorStatus { is_facilitator: bool },

    AutoRevealToggled { enabled: bool },

    StoryDescriptionToggled { hide: bool },
}

impl SessionEvent {
    /// The variant name, matching the `type` tag on the wire. Handy for
    /// structured logging without serializing the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantsUpdated { .. } => "ParticipantsUpdated",
            Self::SessionData { .. } => "SessionData",
            Self::StoryUpdated { .. } => "StoryUpdated",
            Self::VotesCleared => "VotesCleared",
            Self::VoteProgress { .. } => "VoteProgress",
            Self::CountdownStarted { .. } => "CountdownStarted",
            Self::VotesRevealed { .. } => "VotesRevealed",
            Self::VotingReset => "VotingReset",
            Self::RoundHistoryUpdated { .. } => "RoundHistoryUpdated",
            Self::RoundNumberUpdated { .. } => "RoundNumberUpdated",
            Self::FacilitatorStatus { .. } => "FacilitatorStatus",
            Self::AutoRevealToggled { .. } => "AutoRevealToggled",
            Self::StoryDescriptionToggled { .. } => "StoryDescriptionToggled",
        }
    }
}
