use log::info;

use crate::{
    errors::{CoordinationError, CoordinationResult},
    gate::CapacityGate,
    session::EvictionReason,
    store::{ChatId, Location, Offer, OfferDetails, OfferId, UserId},
    util::unix_now,
    CoordinatorContext,
};

/// Used when a location filter doesn't name a radius
pub const DEFAULT_RADIUS_KM: f64 = 25.0;

pub struct OfferManager {
    context: CoordinatorContext,
}

/// Everything needed to create an offer
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub creator_id: UserId,
    /// Slots including the creator's own
    pub capacity: u32,
    pub details: OfferDetails,
}

/// Narrows down a listing of offers
#[derive(Debug, Clone, Copy, Default)]
pub struct OfferFilter {
    /// Only offers near this point
    pub near: Option<Location>,
    /// Search radius around `near`, [DEFAULT_RADIUS_KM] if not given
    pub radius_km: Option<f64>,
}

impl OfferFilter {
    pub fn near(location: Location, radius_km: Option<f64>) -> Self {
        Self {
            near: Some(location),
            radius_km,
        }
    }

    fn matches(&self, offer: &Offer) -> bool {
        let Some(center) = self.near else {
            return true;
        };

        let radius = self.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        center.distance_km(&offer.details.location) <= radius
    }
}

impl OfferManager {
    pub(crate) fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Opens a room for every stored offer, continuing each log where it left off
    pub async fn restore(&self) -> CoordinationResult<usize> {
        let offers = self.context.storage.list_offers().await?;

        for offer in &offers {
            let last_message_id = self.context.storage.last_message_id(&offer.chat_id).await?;
            self.context.open_room(offer, last_message_id);
        }

        info!("Restored {} offers and their chats", offers.len());
        Ok(offers.len())
    }

    /// Creates an offer with the creator as its first member, and opens its room
    pub async fn create_offer(&self, new_offer: NewOffer) -> CoordinationResult<Offer> {
        if new_offer.capacity == 0 {
            return Err(CoordinationError::InvalidArgument(
                "Capacity must be at least 1".to_string(),
            ));
        }

        let offer = Offer {
            id: OfferId::generate(),
            creator_id: new_offer.creator_id.clone(),
            capacity: new_offer.capacity,
            members: vec![new_offer.creator_id],
            chat_id: ChatId::generate(),
            details: new_offer.details,
            created_at: unix_now(),
        };

        let _section = self.context.gate.enter(&offer.id).await;
        let offer = self.context.storage.insert_offer(offer).await?;

        self.context.open_room(&offer, 0);

        info!(
            "{} created offer {} with {} slots",
            offer.creator_id, offer.id, offer.capacity
        );

        Ok(offer)
    }

    /// Adds a user to an offer, if there is still a free slot
    pub async fn join(&self, offer_id: &OfferId, user_id: &UserId) -> CoordinationResult<Offer> {
        let _section = self.context.gate.enter(offer_id).await;

        let offer = self.context.storage.offer_by_id(offer_id).await?;
        let members = CapacityGate::admit(&offer, user_id)?;
        let offer = self.context.storage.update_members(offer_id, members).await?;

        info!(
            "{} joined offer {} ({}/{})",
            user_id,
            offer_id,
            offer.members.len(),
            offer.capacity
        );

        Ok(offer)
    }

    /// Removes a member from an offer and evicts their sessions from its room before returning
    pub async fn leave(&self, offer_id: &OfferId, user_id: &UserId) -> CoordinationResult<Offer> {
        let _section = self.context.gate.enter(offer_id).await;

        let offer = self.context.storage.offer_by_id(offer_id).await?;
        let members = CapacityGate::release(&offer, user_id)?;

        let offer = match self.context.room(offer_id) {
            Some(room) => {
                let _cursor = room.lock_log().await;
                let offer = self.context.storage.update_members(offer_id, members).await?;

                room.evict_user(user_id, EvictionReason::MembershipRevoked);
                offer
            }
            None => self.context.storage.update_members(offer_id, members).await?,
        };

        info!("{} left offer {}", user_id, offer_id);
        Ok(offer)
    }

    /// Takes down an offer together with its chat. Only the creator may do this.
    pub async fn delete(&self, offer_id: &OfferId, requester_id: &UserId) -> CoordinationResult<()> {
        let _section = self.context.gate.enter(offer_id).await;

        let offer = self.context.storage.offer_by_id(offer_id).await?;
        CapacityGate::authorize_delete(&offer, requester_id)?;

        match self.context.room(offer_id) {
            Some(room) => {
                let mut cursor = room.lock_log().await;
                self.context.storage.delete_offer(offer_id).await?;

                cursor.closed = true;
                room.evict_all(EvictionReason::OfferDeleted);
            }
            None => {
                self.context.storage.delete_offer(offer_id).await?;
            }
        }

        self.context.close_room(&offer);

        info!("{} deleted offer {}", requester_id, offer_id);
        Ok(())
    }

    pub async fn offer(&self, offer_id: &OfferId) -> CoordinationResult<Offer> {
        Ok(self.context.storage.offer_by_id(offer_id).await?)
    }

    /// All offers in creation order
    pub async fn offers(&self, filter: &OfferFilter) -> CoordinationResult<Vec<Offer>> {
        let offers = self.context.storage.list_offers().await?;

        Ok(offers.into_iter().filter(|o| filter.matches(o)).collect())
    }

    /// The offers a user currently belongs to, in creation order
    pub async fn offers_for_member(&self, user_id: &UserId) -> CoordinationResult<Vec<Offer>> {
        let offers = self.context.storage.list_offers().await?;

        Ok(offers.into_iter().filter(|o| o.is_member(user_id)).collect())
    }
}

#[cfg(test)]
impl NewOffer {
    pub fn mock(creator: &str, capacity: u32) -> Self {
        Self {
            creator_id: creator.into(),
            capacity,
            details: OfferDetails::mock("Spare room"),
        }
    }
}
