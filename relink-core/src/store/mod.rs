use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod json;
pub use json::*;

pub type StorageResult<T> = Result<T, StorageError>;
pub type SharedStorage = Arc<dyn Storage>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A record doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// A record already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored data could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(resource: &'static str, identifier: impl ToString) -> Self {
        Self::NotFound {
            resource,
            identifier: identifier.to_string(),
        }
    }
}

/// The durable record of offers, their members, and the message log of every chat.
///
/// Implementations only store. Deciding whether a change is allowed is the job of
/// the [crate::CapacityGate], and callers are expected to hold the offer's section
/// while mutating it.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn offer_by_id(&self, offer_id: &OfferId) -> StorageResult<Offer>;
    /// All offers in creation order
    async fn list_offers(&self) -> StorageResult<Vec<Offer>>;
    /// Stores the offer together with an empty log for its chat
    async fn insert_offer(&self, offer: Offer) -> StorageResult<Offer>;
    async fn update_members(&self, offer_id: &OfferId, members: Vec<UserId>) -> StorageResult<Offer>;
    /// Removes the offer together with its chat log
    async fn delete_offer(&self, offer_id: &OfferId) -> StorageResult<Offer>;

    async fn append_message(&self, message: Message) -> StorageResult<Message>;
    /// The whole log of a chat, in ascending id order
    async fn messages(&self, chat_id: &ChatId) -> StorageResult<Vec<Message>>;
    /// The id of the newest message, or 0 if the log is empty
    async fn last_message_id(&self, chat_id: &ChatId) -> StorageResult<MessageId>;
}
