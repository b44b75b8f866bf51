mod room;

use std::sync::Arc;

use log::debug;

pub use room::*;

use crate::{
    errors::{CoordinationError, CoordinationResult},
    session::Session,
    store::{ChatId, Message, UserId},
    CoordinatorContext,
};

/// Decides who may listen to a room and keeps track of who is listening.
pub struct RoomRegistry {
    context: CoordinatorContext,
}

impl RoomRegistry {
    pub(crate) fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Whether the user is currently a member of the offer owning the chat
    pub async fn authorize(&self, chat_id: &ChatId, user_id: &UserId) -> CoordinationResult<bool> {
        let Ok(room) = self.context.room_by_chat_id(chat_id) else {
            return Ok(false);
        };

        match self.context.offer_of(&room).await {
            Ok(offer) => Ok(offer.is_member(user_id)),
            Err(CoordinationError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Subscribes a session to a room, returning the history up to the moment it was attached.
    ///
    /// Everything accepted after the returned history is delivered to the session's queue,
    /// so history followed by the queue is the complete log with no overlap.
    pub async fn subscribe(
        &self,
        session: &Arc<Session>,
        chat_id: &ChatId,
    ) -> CoordinationResult<Vec<Message>> {
        let room = self.context.room_by_chat_id(chat_id)?;
        let _section = self.context.gate.enter(room.offer_id()).await;

        let offer = self.context.offer_of(&room).await?;

        if session.is_closed() || !offer.is_member(&session.user_id) {
            return Err(CoordinationError::Unauthorized);
        }

        let cursor = room.lock_log().await;

        if cursor.closed {
            return Err(CoordinationError::NotFound { resource: "chat" });
        }

        let history = self.context.storage.messages(chat_id).await?;

        // Anything still queued from an earlier subscription is part of this history now
        if let Some(last) = history.last() {
            session.mark_replayed(chat_id, last.id);
        }

        self.make_space_for(session, chat_id);
        room.attach(session);

        // A disconnect that raced us has already collected the subscriptions it will remove
        if session.is_closed() {
            room.detach(session);
            return Err(CoordinationError::Unauthorized);
        }

        drop(cursor);
        Ok(history)
    }

    /// Removes a session from a room. Does nothing if it wasn't subscribed.
    pub fn unsubscribe(&self, session: &Session, chat_id: &ChatId) -> bool {
        session.remove_subscription(chat_id);

        match self.context.room_by_chat_id(chat_id) {
            Ok(room) => room.detach(session),
            Err(_) => false,
        }
    }

    /// Closes a session and removes it from every room it is subscribed to
    pub fn disconnect(&self, session: &Session) {
        if session.close() {
            debug!("Session {} of {} disconnected", session.id, session.user_id);
        }

        for chat_id in session.subscriptions() {
            self.unsubscribe(session, &chat_id);
        }
    }

    pub fn room(&self, chat_id: &ChatId) -> CoordinationResult<Arc<Room>> {
        self.context.room_by_chat_id(chat_id)
    }

    /// Drops the oldest subscriptions until the session may hold one more room
    fn make_space_for(&self, session: &Session, chat_id: &ChatId) {
        if session.is_subscribed(chat_id) {
            return;
        }

        let limit = self.context.config.max_rooms_per_session.max(1);
        let held = session.subscriptions();

        if held.len() < limit {
            return;
        }

        for stale in held.iter().take(held.len() + 1 - limit) {
            self.unsubscribe(session, stale);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        errors::CoordinationError,
        offers::NewOffer,
        store::Message,
        Config, Coordinator, MemoryStorage, SessionEvent,
    };

    #[tokio::test]
    async fn only_members_may_subscribe() {
        let coordinator = Coordinator::in_memory();
        let offer = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 3))
            .await
            .unwrap();

        let (stranger, _receiver) = coordinator.connect("alex".into());
        let result = coordinator.rooms.subscribe(&stranger, &offer.chat_id).await;
        assert!(matches!(result, Err(CoordinationError::Unauthorized)));

        coordinator.offers.join(&offer.id, &"alex".into()).await.unwrap();

        let (member, _receiver) = coordinator.connect("alex".into());
        let history = coordinator.rooms.subscribe(&member, &offer.chat_id).await.unwrap();

        assert!(history.is_empty());
        assert!(coordinator
            .rooms
            .authorize(&offer.chat_id, &"alex".into())
            .await
            .unwrap());
        assert!(!coordinator
            .rooms
            .authorize(&offer.chat_id, &"bea".into())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_chats_are_not_found() {
        let coordinator = Coordinator::in_memory();
        let (session, _receiver) = coordinator.connect("carol".into());

        let result = coordinator
            .rooms
            .subscribe(&session, &"c_missing0".into())
            .await;

        assert!(matches!(result, Err(CoordinationError::NotFound { .. })));
        assert!(!coordinator
            .rooms
            .authorize(&"c_missing0".into(), &"carol".into())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn subscribing_twice_returns_the_history_again() {
        let coordinator = Coordinator::in_memory();
        let offer = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 2))
            .await
            .unwrap();

        let (session, _receiver) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&session, &offer.chat_id).await.unwrap();
        coordinator
            .broker
            .send(&session, &offer.chat_id, "anyone around?")
            .await
            .unwrap();

        let history: Vec<Message> = coordinator
            .rooms
            .subscribe(&session, &offer.chat_id)
            .await
            .unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(session.subscriptions(), vec![offer.chat_id.clone()]);

        let room = coordinator.rooms.room(&offer.chat_id).unwrap();
        assert_eq!(room.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn the_oldest_room_is_dropped_at_the_limit() {
        let coordinator = Coordinator::in_memory();
        let first = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 2))
            .await
            .unwrap();
        let second = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 2))
            .await
            .unwrap();

        let (session, _receiver) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&session, &first.chat_id).await.unwrap();
        coordinator.rooms.subscribe(&session, &second.chat_id).await.unwrap();

        assert_eq!(session.subscriptions(), vec![second.chat_id.clone()]);
        assert_eq!(
            coordinator.rooms.room(&first.chat_id).unwrap().subscriber_count(),
            0
        );
    }

    #[tokio::test]
    async fn sessions_may_hold_several_rooms_when_configured() {
        let config = Config {
            max_rooms_per_session: 2,
            ..Default::default()
        };
        let coordinator = Coordinator::new(config, MemoryStorage::new());

        let mut chats = vec![];
        for _ in 0..3 {
            let offer = coordinator
                .offers
                .create_offer(NewOffer::mock("carol", 2))
                .await
                .unwrap();
            chats.push(offer.chat_id);
        }

        let (session, _receiver) = coordinator.connect("carol".into());
        for chat_id in &chats {
            coordinator.rooms.subscribe(&session, chat_id).await.unwrap();
        }

        assert_eq!(session.subscriptions(), chats[1..].to_vec());
    }

    #[tokio::test]
    async fn unsubscribe_and_disconnect_are_idempotent() {
        let coordinator = Coordinator::in_memory();
        let offer = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 2))
            .await
            .unwrap();

        let (session, _receiver) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&session, &offer.chat_id).await.unwrap();

        assert!(coordinator.rooms.unsubscribe(&session, &offer.chat_id));
        assert!(!coordinator.rooms.unsubscribe(&session, &offer.chat_id));

        coordinator.rooms.subscribe(&session, &offer.chat_id).await.unwrap();
        coordinator.disconnect(&session);
        coordinator.disconnect(&session);

        let room = coordinator.rooms.room(&offer.chat_id).unwrap();
        assert_eq!(room.subscriber_count(), 0);
        assert!(session.is_closed());

        // A closed session can't come back
        let result = coordinator.rooms.subscribe(&session, &offer.chat_id).await;
        assert!(matches!(result, Err(CoordinationError::Unauthorized)));
    }

    #[tokio::test]
    async fn resubscribing_does_not_repeat_queued_messages() {
        let coordinator = Coordinator::in_memory();
        let offer = coordinator
            .offers
            .create_offer(NewOffer::mock("carol", 2))
            .await
            .unwrap();

        let (session, mut receiver) = coordinator.connect("carol".into());
        coordinator.rooms.subscribe(&session, &offer.chat_id).await.unwrap();
        coordinator
            .broker
            .send(&session, &offer.chat_id, "hello")
            .await
            .unwrap();

        // The live copy of "hello" is still queued when the client joins again
        let history = coordinator
            .rooms
            .subscribe(&session, &offer.chat_id)
            .await
            .unwrap();
        assert_eq!(history.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
        assert!(receiver.try_recv().is_err());

        coordinator
            .broker
            .send(&session, &offer.chat_id, "anyone?")
            .await
            .unwrap();

        match receiver.try_recv() {
            Ok(SessionEvent::Message(message)) => assert_eq!(message.id, 2),
            other => panic!("expected the next message, got {:?}", other),
        }
    }
}
