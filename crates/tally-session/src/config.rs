//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_countdown::CountdownConfig;

/// Settings shared by every session in a store.
///
/// Embedders override these when constructing the hub; the defaults match
/// the behaviour participants expect from a planning-poker table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of archived rounds kept per session.
    pub history_limit: usize,

    /// Delay between "everyone has voted" and the automatic reveal.
    pub countdown_grace: Duration,

    /// Length of generated session codes.
    pub code_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 5,
            countdown_grace: Duration::from_secs(3),
            code_length: 6,
        }
    }
}

impl SessionConfig {
    /// Shortest generated code. Shorter codes collide too often to be
    /// useful for more than a handful of tables.
    pub const MIN_CODE_LENGTH: usize = 4;
    /// Longest generated code.
    pub const MAX_CODE_LENGTH: usize = 12;

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// - `history_limit` is at least 1.
    /// - `code_length` is within [`MIN_CODE_LENGTH`](Self::MIN_CODE_LENGTH)
    ///   ..= [`MAX_CODE_LENGTH`](Self::MAX_CODE_LENGTH).
    /// - `countdown_grace` is clamped by [`CountdownConfig::validated`].
    pub fn validated(mut self) -> Self {
        if self.history_limit == 0 {
            tracing::warn!("history_limit of 0 would discard every round, using 1");
            self.history_limit = 1;
        }
        self.code_length = self
            .code_length
            .clamp(Self::MIN_CODE_LENGTH, Self::MAX_CODE_LENGTH);
        self.countdown_grace = self.countdown().validated().grace;
        self
    }

    /// The countdown configuration derived from these settings.
    pub fn countdown(&self) -> CountdownConfig {
        CountdownConfig::with_grace(self.countdown_grace)
    }
}
