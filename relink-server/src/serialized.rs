//! All schemas that are exposed from endpoints are defined here
//! along with the From<T> impls

use relink_core::{
    EvictionReason, Location as CoreLocation, Message as CoreMessage, Offer as CoreOffer,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Offer {
    id: String,
    creator_id: String,
    title: String,
    description: String,
    image: Option<String>,
    capacity: u32,
    /// In join order, the creator first
    members: Vec<String>,
    chat_id: String,
    location: Location,
    created_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Message {
    id: u64,
    chat_id: String,
    user_id: String,
    text: String,
    ts: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OfferList {
    posts: Vec<Offer>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageList {
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Success {
    success: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    ok: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    error: String,
}

/// Why a session was removed from a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Eviction {
    OfferDeleted,
    MembershipRevoked,
    Lagged,
}

impl OfferList {
    pub fn new(posts: Vec<Offer>) -> Self {
        Self { posts }
    }
}

impl MessageList {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl Success {
    pub fn yes() -> Self {
        Self { success: true }
    }
}

impl Health {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<Offer> for CoreOffer {
    fn to_serialized(&self) -> Offer {
        Offer {
            id: self.id.to_string(),
            creator_id: self.creator_id.to_string(),
            title: self.details.title.clone(),
            description: self.details.description.clone(),
            image: self.details.image.clone(),
            capacity: self.capacity,
            members: self.members.iter().map(|m| m.to_string()).collect(),
            chat_id: self.chat_id.to_string(),
            location: self.details.location.to_serialized(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Location> for CoreLocation {
    fn to_serialized(&self) -> Location {
        Location {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

impl ToSerialized<Message> for CoreMessage {
    fn to_serialized(&self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id.to_string(),
            user_id: self.user_id.to_string(),
            text: self.text.clone(),
            ts: self.ts,
        }
    }
}

impl ToSerialized<Eviction> for EvictionReason {
    fn to_serialized(&self) -> Eviction {
        match self {
            EvictionReason::OfferDeleted => Eviction::OfferDeleted,
            EvictionReason::MembershipRevoked => Eviction::MembershipRevoked,
            EvictionReason::Lagged => Eviction::Lagged,
        }
    }
}
