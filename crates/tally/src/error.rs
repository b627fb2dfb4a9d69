//! Unified error type for the Tally engine.

use tally_protocol::ProtocolError;
use tally_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// Participant actions never produce one of these: rejected actions are
/// logged and dropped. They reach the embedder only from frame decoding
/// and from session creation.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown session, bad code, membership).
    #[error(transparent)]
    Session(#[from] SessionError),
}
