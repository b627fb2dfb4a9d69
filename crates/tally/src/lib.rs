//! # Tally
//!
//! Real-time planning-poker session engine.
//!
//! A [`SessionHub`] owns every live session. Transports feed it decoded
//! participant actions (or raw frames) and receive the resulting events
//! through an [`EventSink`]. Facilitator-only actions, the auto-reveal
//! countdown, round history and facilitator failover are all handled
//! inside the hub.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally::prelude::*;
//!
//! # async fn run() -> Result<(), TallyError> {
//! let sink = Arc::new(ChannelSink::new());
//! let hub = SessionHub::new(SessionConfig::default(), Arc::clone(&sink));
//!
//! let code = hub.create_session("ABCD")?;
//! let mut events = sink.connect(ParticipantId(1));
//! hub.join(&code, ParticipantId(1), "Ada", true).await;
//! hub.cast_vote(&code, ParticipantId(1), "5").await;
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod hub;
mod sink;

pub use error::TallyError;
pub use hub::SessionHub;
pub use sink::{ChannelSink, EventReceiver, EventSender, EventSink};

pub mod prelude {
    pub use crate::{ChannelSink, EventSink, SessionHub, TallyError};
    pub use tally_countdown::{CountdownConfig, CountdownStats};
    pub use tally_protocol::{
        ClientAction, ClientEnvelope, Codec, JsonCodec, Participant,
        ParticipantId, Recipient, RevealedVote, Round, SessionEvent,
        SessionId, SessionSnapshot, Story,
    };
    pub use tally_session::{SessionConfig, SessionError};
}
