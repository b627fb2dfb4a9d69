//! Wire protocol for Tally planning sessions.
//!
//! This crate defines what participants and the session engine say to each
//! other:
//!
//! - **Identity** ([`SessionId`], [`ParticipantId`]): who and where.
//! - **Actions** ([`ClientAction`], [`ClientEnvelope`]): what a
//!   participant asks the engine to do.
//! - **Events** ([`SessionEvent`], [`Recipient`]): what the engine tells
//!   the session members afterwards.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages are
//!   converted to and from bytes.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about locking, timers, or connections.
//! It only describes messages and their serialized shape.
//!
//! ```text
//! Transport (bytes) → Protocol (ClientEnvelope) → Hub (session mutation)
//!                                                  ↓
//! Transport (bytes) ← Protocol (SessionEvent)  ←  Recipient fan-out
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientAction, ClientEnvelope, Participant, ParticipantId, Recipient,
    RevealedVote, Round, RoundVote, SessionEvent, SessionId,
    SessionSnapshot, Story, Vote,
};
