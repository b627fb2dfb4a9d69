//! Error types for the session layer.
//!
//! None of these reach a participant: the hub logs them and drops the
//! action. They exist so each rejection has a name in the logs and tests.

use tally_protocol::{ParticipantId, SessionId};

/// Reasons a session operation was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session is registered under this code.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A facilitator-only operation was invoked by someone else.
    #[error("participant {participant} is not the facilitator of session {session}")]
    Unauthorized {
        participant: ParticipantId,
        session: SessionId,
    },

    /// The participant is not in this session's roster.
    #[error("participant {0} is not in session {1}")]
    NotAMember(ParticipantId, SessionId),

    /// A connection belongs to at most one session.
    #[error("participant {0} already belongs to session {1}")]
    AlreadyInSession(ParticipantId, SessionId),

    /// Session codes must contain a non-whitespace character.
    #[error("invalid session code {0:?}")]
    InvalidCode(String),
}
