use std::{collections::HashMap, sync::Arc};

use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    session::{DeliveryError, EvictionReason, Session, SessionEvent, SessionId},
    store::{ChatId, Message, MessageId, OfferId, UserId},
};

/// The live chat room of an offer.
///
/// The log section serializes appends, history snapshots, and evictions, which is what
/// keeps delivery order equal to log order. Subscribers are kept behind a plain lock that
/// is never held across an await, so unsubscribing never has to wait for a broadcast.
pub struct Room {
    offer_id: OfferId,
    chat_id: ChatId,
    log: Mutex<LogCursor>,
    /// The sessions currently receiving this room's messages
    subscribers: RwLock<HashMap<SessionId, Arc<Session>>>,
}

pub(crate) struct LogCursor {
    /// The id the next accepted message gets
    pub next_id: MessageId,
    /// Set when the room is torn down. Nothing is appended afterwards.
    pub closed: bool,
}

impl Room {
    pub fn new(offer_id: OfferId, chat_id: ChatId, last_message_id: MessageId) -> Self {
        Self {
            offer_id,
            chat_id,
            log: Mutex::new(LogCursor {
                next_id: last_message_id + 1,
                closed: false,
            }),
            subscribers: Default::default(),
        }
    }

    pub fn offer_id(&self) -> &OfferId {
        &self.offer_id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Enters the room's log section
    pub(crate) async fn lock_log(&self) -> MutexGuard<'_, LogCursor> {
        self.log.lock().await
    }

    pub fn has_subscriber(&self, session_id: SessionId) -> bool {
        self.subscribers.read().contains_key(&session_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub(crate) fn attach(&self, session: &Arc<Session>) {
        session.add_subscription(&self.chat_id);

        let previous = self
            .subscribers
            .write()
            .insert(session.id, session.clone());

        if previous.is_none() {
            info!(
                "Session {} of {} subscribed to chat {}",
                session.id, session.user_id, self.chat_id
            );
        }
    }

    /// Removes a session from the room. Returns false if it wasn't subscribed.
    pub(crate) fn detach(&self, session: &Session) -> bool {
        session.remove_subscription(&self.chat_id);
        let removed = self.subscribers.write().remove(&session.id).is_some();

        if removed {
            info!(
                "Session {} of {} unsubscribed from chat {}",
                session.id, session.user_id, self.chat_id
            );
        }

        removed
    }

    /// Evicts every session of a user, telling each of them why
    pub(crate) fn evict_user(&self, user_id: &UserId, reason: EvictionReason) -> usize {
        let evicted: Vec<_> = {
            let mut subscribers = self.subscribers.write();

            let ids: Vec<_> = subscribers
                .values()
                .filter(|s| &s.user_id == user_id)
                .map(|s| s.id)
                .collect();

            ids.into_iter()
                .filter_map(|id| subscribers.remove(&id))
                .collect()
        };

        self.notify_evicted(&evicted, reason);
        evicted.len()
    }

    /// Evicts every session, telling each of them why
    pub(crate) fn evict_all(&self, reason: EvictionReason) -> usize {
        let evicted: Vec<_> = self
            .subscribers
            .write()
            .drain()
            .map(|(_, s)| s)
            .collect();

        self.notify_evicted(&evicted, reason);
        evicted.len()
    }

    /// Hands a message to every subscriber without waiting on any of them.
    /// Sessions that can't keep up are dropped from the room and closed.
    pub(crate) fn fan_out(&self, message: Arc<Message>) {
        let failed: Vec<_> = self
            .subscribers
            .read()
            .values()
            .filter_map(|session| {
                session
                    .deliver(SessionEvent::Message(message.clone()))
                    .err()
                    .map(|e| (session.clone(), e))
            })
            .collect();

        for (session, error) in failed {
            self.subscribers.write().remove(&session.id);
            session.remove_subscription(&self.chat_id);

            match error {
                DeliveryError::Lagged => {
                    warn!(
                        "Session {} of {} fell behind in chat {}, disconnecting it",
                        session.id, session.user_id, self.chat_id
                    );
                    session.mark_lagged(&self.chat_id);
                }
                DeliveryError::Gone => debug!(
                    "Session {} in chat {} went away without unsubscribing",
                    session.id, self.chat_id
                ),
            }

            session.close();
        }
    }

    fn notify_evicted(&self, sessions: &[Arc<Session>], reason: EvictionReason) {
        for session in sessions {
            session.remove_subscription(&self.chat_id);

            info!(
                "Session {} of {} evicted from chat {} ({:?})",
                session.id, session.user_id, self.chat_id, reason
            );

            let notice = SessionEvent::Evicted {
                chat_id: self.chat_id.clone(),
                reason,
            };

            if let Err(DeliveryError::Lagged) = session.deliver(notice) {
                session.mark_lagged(&self.chat_id);
                session.close();
            }
        }
    }
}
