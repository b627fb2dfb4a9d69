//! Debounced, cancellable grace-period timer for Tally.
//!
//! A [`Countdown`] is a single timer slot: arming it while a countdown is
//! already running replaces the old one (debounce, never accumulate), and
//! cancelling it is harmless when nothing is running.
//!
//! # Effective-once
//!
//! Every arm bumps a generation counter and hands the elapse callback a
//! [`Ticket`] stamped with that generation. The callback must call
//! [`Countdown::try_complete`] before acting; it succeeds only if the
//! ticket is still the live one. As long as `arm`, `cancel`, and
//! `try_complete` are serialized by the owner (the session lock in the
//! hub), at most one of {cancellation, completion} takes effect for each
//! armed instance.
//!
//! # Integration
//!
//! ```ignore
//! let mut slot = entry.lock().await;
//! let owner = Arc::clone(&entry);
//! slot.countdown.arm(move |ticket| async move {
//!     let mut slot = owner.lock().await;
//!     if slot.countdown.try_complete(ticket) {
//!         /* reveal and broadcast while still holding the lock */
//!     }
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a countdown slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    /// How long to wait after arming before the elapse callback runs.
    pub grace: Duration,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(3),
        }
    }
}

impl CountdownConfig {
    /// Longest grace period accepted by [`validated`](Self::validated).
    pub const MAX_GRACE: Duration = Duration::from_secs(60);

    /// Creates a config with the given grace period.
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Countdown::new`]. A zero grace is allowed
    /// and means "fire on the next scheduler turn".
    pub fn validated(mut self) -> Self {
        if self.grace > Self::MAX_GRACE {
            warn!(
                grace_ms = self.grace.as_millis() as u64,
                max_ms = Self::MAX_GRACE.as_millis() as u64,
                "countdown grace exceeds maximum, clamping"
            );
            self.grace = Self::MAX_GRACE;
        }
        self
    }

    /// The grace period in whole milliseconds, as announced to clients.
    pub fn grace_ms(&self) -> u64 {
        self.grace.as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The state of a countdown slot.
///
/// ```text
///          arm                 arm (restart)
///   Idle ───────→ CountingDown ────────────┐
///    ↑               │    │  ↑──────────────┘
///    └── cancel ─────┘    │
///    └── try_complete ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    /// No countdown is running.
    Idle,
    /// A countdown is armed and will elapse at `deadline`.
    CountingDown { generation: u64, deadline: Instant },
}

impl CountdownState {
    /// Returns `true` while a countdown is armed.
    pub fn is_counting_down(&self) -> bool {
        matches!(self, Self::CountingDown { .. })
    }
}

impl fmt::Display for CountdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::CountingDown { generation, .. } => {
                write!(f, "CountingDown(#{generation})")
            }
        }
    }
}

/// Proof of which armed instance an elapse callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    /// The generation this ticket was stamped with.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Lifetime counters for a countdown slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountdownStats {
    /// Total arms, including restarts.
    pub armed: u64,
    /// Arms that replaced a running countdown.
    pub restarted: u64,
    /// Explicit cancellations that stopped a running countdown.
    pub cancelled: u64,
    /// Countdowns whose elapse callback won the race and completed.
    pub completed: u64,
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

/// One logical timer slot. Owned by exactly one session.
///
/// Must be used from within a Tokio runtime: arming spawns a task.
pub struct Countdown {
    config: CountdownConfig,
    generation: u64,
    state: CountdownState,
    /// The spawned sleep-then-callback task of the live instance.
    task: Option<JoinHandle<()>>,
    stats: CountdownStats,
}

impl Countdown {
    /// Creates an idle slot.
    pub fn new(config: CountdownConfig) -> Self {
        Self {
            config: config.validated(),
            generation: 0,
            state: CountdownState::Idle,
            task: None,
            stats: CountdownStats::default(),
        }
    }

    /// Arms a fresh countdown, replacing any running one.
    ///
    /// After the grace period, `on_elapse` is called with the instance's
    /// [`Ticket`]. The callback is expected to take the owner's lock and
    /// call [`try_complete`](Self::try_complete) before doing anything.
    pub fn arm<F, Fut>(&mut self, on_elapse: F) -> Ticket
    where
        F: FnOnce(Ticket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.stop_pending() {
            self.stats.restarted += 1;
        }

        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
        };
        let deadline = Instant::now() + self.config.grace;
        self.state = CountdownState::CountingDown {
            generation: ticket.generation,
            deadline,
        };
        self.task = Some(tokio::spawn(async move {
            time::sleep_until(deadline).await;
            on_elapse(ticket).await;
        }));
        self.stats.armed += 1;

        debug!(
            generation = ticket.generation,
            grace_ms = self.config.grace_ms(),
            "countdown armed"
        );
        ticket
    }

    /// Cancels the running countdown, if any.
    ///
    /// Returns `true` if a countdown was stopped. Repeated or late calls
    /// are no-ops returning `false`.
    pub fn cancel(&mut self) -> bool {
        let generation = self.generation;
        if self.stop_pending() {
            self.stats.cancelled += 1;
            debug!(generation, "countdown cancelled");
            true
        } else {
            false
        }
    }

    /// Commits the instance identified by `ticket` to completing.
    ///
    /// Returns `true` exactly once per armed instance, and only if it was
    /// neither cancelled nor replaced. On success the slot returns to
    /// [`CountdownState::Idle`].
    pub fn try_complete(&mut self, ticket: Ticket) -> bool {
        match self.state {
            CountdownState::CountingDown { generation, .. }
                if generation == ticket.generation =>
            {
                self.state = CountdownState::Idle;
                // The task calling us is the one in `self.task`; detach it
                // rather than aborting ourselves.
                self.task = None;
                self.stats.completed += 1;
                debug!(generation, "countdown completed");
                true
            }
            _ => {
                trace!(
                    ticket = ticket.generation,
                    state = %self.state,
                    "stale countdown ticket ignored"
                );
                false
            }
        }
    }

    /// Whether a countdown is currently armed.
    pub fn is_counting_down(&self) -> bool {
        self.state.is_counting_down()
    }

    /// Current state.
    pub fn state(&self) -> CountdownState {
        self.state
    }

    /// Time left on the running countdown, or `None` when idle.
    pub fn remaining(&self) -> Option<Duration> {
        match self.state {
            CountdownState::CountingDown { deadline, .. } => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            CountdownState::Idle => None,
        }
    }

    /// The generation of the most recent arm (0 if never armed).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &CountdownStats {
        &self.stats
    }

    /// The (validated) configuration.
    pub fn config(&self) -> &CountdownConfig {
        &self.config
    }

    /// Aborts the live task and returns to idle. Returns whether a
    /// countdown was running.
    fn stop_pending(&mut self) -> bool {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let was_running = self.state.is_counting_down();
        self.state = CountdownState::Idle;
        was_running
    }
}

impl fmt::Debug for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Countdown")
            .field("config", &self.config)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
