use serde::{Deserialize, Serialize};

use crate::util::{random_string, string_id};

string_id!(
    /// Identifies an offer. Also the key of the offer's room in the registry.
    OfferId
);

string_id!(
    /// Identifies the chat room bound to an offer.
    ChatId
);

string_id!(
    /// An already authenticated user, as handed to us by the identity collaborator.
    UserId
);

impl OfferId {
    pub fn generate() -> Self {
        Self(format!("p_{}", random_string(8)))
    }
}

impl ChatId {
    pub fn generate() -> Self {
        Self(format!("c_{}", random_string(8)))
    }
}

/// Strictly increasing per chat, starting at 1.
pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

impl Location {
    /// Great-circle distance to another point, using the haversine formula
    pub fn distance_km(&self, other: &Location) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Everything about an offer that the core stores but never interprets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferDetails {
    pub title: String,
    pub description: String,
    pub location: Location,
    /// A `data:image/...` URL, if the creator attached one
    pub image: Option<String>,
}

/// A capacity-bounded help posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub creator_id: UserId,
    /// Upper bound for `members.len()`, creator included
    pub capacity: u32,
    /// In join order. The creator is always first.
    pub members: Vec<UserId>,
    pub chat_id: ChatId,
    #[serde(flatten)]
    pub details: OfferDetails,
    /// Seconds since epoch
    pub created_at: i64,
}

impl Offer {
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity as usize
    }
}

/// A chat message as it is stored in a room's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub text: String,
    /// Seconds since epoch
    pub ts: i64,
}

/// The append-only log of a single chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLog {
    pub id: ChatId,
    pub offer_id: OfferId,
    pub messages: Vec<Message>,
}

#[cfg(test)]
impl OfferDetails {
    pub fn mock(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: format!("{title}, come and get it"),
            location: Location {
                lat: 10.0,
                lng: 10.0,
            },
            image: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Location;

    #[test]
    fn distances_are_great_circle_kilometres() {
        let berlin = Location {
            lat: 52.52,
            lng: 13.405,
        };
        let hamburg = Location {
            lat: 53.5511,
            lng: 9.9937,
        };

        let distance = berlin.distance_km(&hamburg);

        assert!((distance - 255.0).abs() < 5.0, "got {distance}");
        assert_eq!(berlin.distance_km(&berlin), 0.0);
    }
}
