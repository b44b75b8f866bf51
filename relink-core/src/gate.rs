use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    errors::{CoordinationError, CoordinationResult},
    store::{Offer, OfferId, UserId},
};

type Sections = Arc<DashMap<OfferId, Arc<Mutex<()>>>>;

/// Held while inside an offer's critical section. Dropping it leaves the section.
///
/// The last one to leave an offer's section also removes it from the gate,
/// so ids that were only ever looked up don't pile up.
pub struct GateGuard {
    offer_id: OfferId,
    sections: Sections,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        drop(self.held.take());

        // Only the map itself still points at the section once nobody holds or waits on it
        self.sections
            .remove_if(&self.offer_id, |_, section| Arc::strong_count(section) == 1);
    }
}

/// Serializes every membership decision and room subscription for a single offer.
///
/// Each offer gets its own section, so unrelated offers never wait on each other.
/// Callers queue up fairly on the section instead of being turned away.
#[derive(Debug, Default)]
pub struct CapacityGate {
    sections: Sections,
}

impl CapacityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and enters the critical section of an offer
    pub async fn enter(&self, offer_id: &OfferId) -> GateGuard {
        // The map guard must be dropped before awaiting, or the shard stays locked
        let section = self
            .sections
            .entry(offer_id.clone())
            .or_default()
            .value()
            .clone();

        // Declared before the wait, so a cancelled wait releases its section first
        let mut guard = GateGuard {
            offer_id: offer_id.clone(),
            sections: self.sections.clone(),
            held: None,
        };

        guard.held = Some(section.lock_owned().await);
        guard
    }

    /// Decides a join against the offer as currently stored, returning the new member list
    pub fn admit(offer: &Offer, user_id: &UserId) -> CoordinationResult<Vec<UserId>> {
        if offer.is_member(user_id) {
            return Err(CoordinationError::AlreadyMember);
        }

        if offer.is_full() {
            return Err(CoordinationError::Full);
        }

        let mut members = offer.members.clone();
        members.push(user_id.clone());

        Ok(members)
    }

    /// Decides a leave, returning the remaining members in their original order
    pub fn release(offer: &Offer, user_id: &UserId) -> CoordinationResult<Vec<UserId>> {
        if !offer.is_member(user_id) {
            return Err(CoordinationError::NotMember);
        }

        if &offer.creator_id == user_id {
            return Err(CoordinationError::ForbiddenCreatorLeave);
        }

        Ok(offer
            .members
            .iter()
            .filter(|m| *m != user_id)
            .cloned()
            .collect())
    }

    /// Only the creator may take an offer down
    pub fn authorize_delete(offer: &Offer, requester_id: &UserId) -> CoordinationResult<()> {
        if &offer.creator_id != requester_id {
            return Err(CoordinationError::Forbidden);
        }

        Ok(())
    }

    #[cfg(test)]
    fn section_count(&self) -> usize {
        self.sections.len()
    }
}
