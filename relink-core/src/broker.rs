use std::sync::Arc;

use log::debug;

use crate::{
    errors::{CoordinationError, CoordinationResult},
    session::Session,
    store::{ChatId, Message, MessageId, UserId},
    util::unix_now,
    CoordinatorContext,
};

/// Accepts chat messages into a room's log and hands them to everyone listening.
pub struct MessageBroker {
    context: CoordinatorContext,
}

impl MessageBroker {
    pub(crate) fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Appends a message to a room and broadcasts it to every subscriber, the sender included.
    ///
    /// The session must be subscribed to the room. Messages of a room are accepted one at a time,
    /// so every subscriber sees them in the order of the log.
    pub async fn send(
        &self,
        session: &Session,
        chat_id: &ChatId,
        text: &str,
    ) -> CoordinationResult<Message> {
        let text = text.trim();
        let max_length = self.context.config.max_message_length;

        if text.is_empty() {
            return Err(CoordinationError::EmptyMessage);
        }

        if text.chars().count() > max_length {
            return Err(CoordinationError::InvalidArgument(format!(
                "Message must be at most {max_length} characters"
            )));
        }

        let room = self.context.room_by_chat_id(chat_id)?;
        let mut cursor = room.lock_log().await;

        if cursor.closed {
            return Err(CoordinationError::NotFound { resource: "chat" });
        }

        if session.is_closed() || !room.has_subscriber(session.id) {
            return Err(CoordinationError::Unauthorized);
        }

        let message = Message {
            id: cursor.next_id,
            chat_id: chat_id.clone(),
            user_id: session.user_id.clone(),
            text: text.to_string(),
            ts: unix_now(),
        };

        let message = self.context.storage.append_message(message).await?;
        cursor.next_id = message.id + 1;

        debug!(
            "Accepted message {} from {} in chat {}",
            message.id, message.user_id, chat_id
        );

        room.fan_out(Arc::new(message.clone()));

        Ok(message)
    }

    /// The log of a room in ascending order, optionally only what came after a given id
    pub async fn history(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        after: Option<MessageId>,
    ) -> CoordinationResult<Vec<Message>> {
        let room = self.context.room_by_chat_id(chat_id)?;
        let offer = self.context.offer_of(&room).await?;

        if !offer.is_member(user_id) {
            return Err(CoordinationError::Unauthorized);
        }

        let messages = self.context.storage.messages(chat_id).await?;

        Ok(match after {
            Some(after) => messages.into_iter().filter(|m| m.id > after).collect(),
            None => messages,
        })
    }
}
