//! Session state for Tally.
//!
//! Each session lives behind its own lock inside a [`SessionEntry`], so
//! unrelated sessions never contend. The [`SessionStore`] is the single
//! registry of entries and of which session each connection belongs to.
//!
//! # Key types
//!
//! - [`Session`]: the per-session model (roster, story, votes, history,
//!   settings). Vote aggregation and facilitator authority are methods on it.
//! - [`SessionEntry`] / [`SessionSlot`]: the lock bundling a session with
//!   its auto-reveal countdown slot
//! - [`SessionStore`]: creates, finds, and indexes sessions
//! - [`SessionConfig`]: history depth, countdown grace, code length

mod authority;
mod config;
mod error;
mod session;
mod store;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{ResetOutcome, Session, UNKNOWN_PARTICIPANT};
pub use store::{SessionEntry, SessionSlot, SessionStore};
