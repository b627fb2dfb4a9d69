//! Facilitator authority.
//!
//! A session has at most one facilitator. The first participant to join
//! claims the role; when the facilitator leaves, a random remaining member
//! inherits it. Every facilitator-only operation goes through
//! [`Session::authorize`].

use rand::Rng;
use tally_protocol::ParticipantId;

use crate::{Session, SessionError};

impl Session {
    /// Makes `id` the facilitator if the role is vacant.
    ///
    /// Returns `true` if the role was claimed by this call.
    pub fn claim_if_vacant(&mut self, id: ParticipantId) -> bool {
        if self.facilitator.is_some() {
            return false;
        }
        self.facilitator = Some(id);
        self.sync_facilitator_flags();
        true
    }

    pub fn is_facilitator(&self, id: ParticipantId) -> bool {
        self.facilitator == Some(id)
    }

    /// Checks that `id` holds the facilitator role.
    pub fn authorize(&self, id: ParticipantId) -> Result<(), SessionError> {
        if self.is_facilitator(id) {
            Ok(())
        } else {
            Err(SessionError::Unauthorized {
                participant: id,
                session: self.id.clone(),
            })
        }
    }

    /// Hands the facilitator role to a uniformly random member, using the
    /// thread-local RNG.
    pub fn reassign_facilitator(&mut self) -> Option<ParticipantId> {
        self.reassign_facilitator_with(&mut rand::rng())
    }

    /// Hands the facilitator role to a uniformly random member.
    ///
    /// Clears the role when the roster is empty. Returns the new
    /// facilitator, if any.
    pub fn reassign_facilitator_with<R: Rng>(
        &mut self,
        rng: &mut R,
    ) -> Option<ParticipantId> {
        self.facilitator = if self.participants.is_empty() {
            None
        } else {
            let index = rng.random_range(0..self.participants.len());
            Some(self.participants[index].id)
        };
        self.sync_facilitator_flags();
        self.facilitator
    }

    /// Makes every roster entry's `is_facilitator` agree with the session.
    fn sync_facilitator_flags(&mut self) {
        let facilitator = self.facilitator;
        for p in &mut self.participants {
            p.is_facilitator = facilitator == Some(p.id);
        }
    }
}
