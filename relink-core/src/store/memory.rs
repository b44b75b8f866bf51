use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use dashmap::{mapref::entry::Entry, DashMap};

use super::{
    ChatId, ChatLog, Message, MessageId, Offer, OfferId, Storage, StorageError, StorageResult, UserId,
};

/// Keeps everything in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sequence: AtomicCell<u64>,
    offers: DashMap<OfferId, (u64, Offer)>,
    chats: DashMap<ChatId, ChatLog>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered_offers(&self) -> Vec<Offer> {
        let mut offers: Vec<_> = self.offers.iter().map(|e| e.value().clone()).collect();
        offers.sort_by_key(|(order, _)| *order);

        offers.into_iter().map(|(_, o)| o).collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn offer_by_id(&self, offer_id: &OfferId) -> StorageResult<Offer> {
        self.offers
            .get(offer_id)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| StorageError::not_found("offer", offer_id))
    }

    async fn list_offers(&self) -> StorageResult<Vec<Offer>> {
        Ok(self.ordered_offers())
    }

    async fn insert_offer(&self, offer: Offer) -> StorageResult<Offer> {
        if self.chats.contains_key(&offer.chat_id) {
            return Err(StorageError::Conflict {
                resource: "chat",
                field: "id",
                value: offer.chat_id.to_string(),
            });
        }

        match self.offers.entry(offer.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict {
                resource: "offer",
                field: "id",
                value: offer.id.to_string(),
            }),
            Entry::Vacant(entry) => {
                self.chats.insert(
                    offer.chat_id.clone(),
                    ChatLog {
                        id: offer.chat_id.clone(),
                        offer_id: offer.id.clone(),
                        messages: vec![],
                    },
                );

                entry.insert((self.sequence.fetch_add(1), offer.clone()));
                Ok(offer)
            }
        }
    }

    async fn update_members(&self, offer_id: &OfferId, members: Vec<UserId>) -> StorageResult<Offer> {
        let mut entry = self
            .offers
            .get_mut(offer_id)
            .ok_or_else(|| StorageError::not_found("offer", offer_id))?;

        entry.1.members = members;
        Ok(entry.1.clone())
    }

    async fn delete_offer(&self, offer_id: &OfferId) -> StorageResult<Offer> {
        let (_, (_, offer)) = self
            .offers
            .remove(offer_id)
            .ok_or_else(|| StorageError::not_found("offer", offer_id))?;

        self.chats.remove(&offer.chat_id);
        Ok(offer)
    }

    async fn append_message(&self, message: Message) -> StorageResult<Message> {
        let mut chat = self
            .chats
            .get_mut(&message.chat_id)
            .ok_or_else(|| StorageError::not_found("chat", &message.chat_id))?;

        if chat.messages.last().is_some_and(|m| m.id >= message.id) {
            return Err(StorageError::Conflict {
                resource: "message",
                field: "id",
                value: message.id.to_string(),
            });
        }

        chat.messages.push(message.clone());
        Ok(message)
    }

    async fn messages(&self, chat_id: &ChatId) -> StorageResult<Vec<Message>> {
        self.chats
            .get(chat_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| StorageError::not_found("chat", chat_id))
    }

    async fn last_message_id(&self, chat_id: &ChatId) -> StorageResult<MessageId> {
        self.chats
            .get(chat_id)
            .map(|c| c.messages.last().map(|m| m.id).unwrap_or(0))
            .ok_or_else(|| StorageError::not_found("chat", chat_id))
    }
}
