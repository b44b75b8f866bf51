use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{
        self,
        error::{TryRecvError, TrySendError},
    },
    Notify,
};

use crate::{
    store::{ChatId, Message, MessageId, UserId},
    util::LocalId,
};

pub type SessionId = LocalId<Session>;

/// The newest message each chat's last history handed to the client
type Replayed = Arc<Mutex<HashMap<ChatId, MessageId>>>;

/// Something a session should tell its client about
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message was accepted into a room the session is subscribed to
    Message(Arc<Message>),
    /// The session lost its subscription to a room without asking for it
    Evicted {
        chat_id: ChatId,
        reason: EvictionReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The offer and its room were deleted
    OfferDeleted,
    /// The user is no longer a member of the offer
    MembershipRevoked,
    /// The outbound queue overflowed
    Lagged,
}

pub(crate) enum DeliveryError {
    /// The queue is full, the client isn't keeping up
    Lagged,
    /// The receiving half is gone
    Gone,
}

/// A live connection bound to a single user.
///
/// Events are pushed into a bounded queue and drained by whoever owns the [SessionReceiver].
/// A session is closed once, after which it can't subscribe or send anymore.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    outbound: mpsc::Sender<SessionEvent>,
    /// Oldest first
    subscriptions: Mutex<Vec<ChatId>>,
    /// The chat whose broadcast overflowed the queue, if that's what closed the session
    lagged_in: Mutex<Option<ChatId>>,
    replayed: Replayed,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Session {
    pub fn new(user_id: UserId, queue_size: usize) -> (Arc<Self>, SessionReceiver) {
        let (outbound, events) = mpsc::channel(queue_size.max(1));
        let replayed = Replayed::default();

        let session = Self {
            id: SessionId::next(),
            user_id,
            outbound,
            subscriptions: Default::default(),
            lagged_in: Default::default(),
            replayed: replayed.clone(),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        };

        (Arc::new(session), SessionReceiver { events, replayed })
    }

    /// The chats this session is subscribed to, oldest first
    pub fn subscriptions(&self) -> Vec<ChatId> {
        self.subscriptions.lock().clone()
    }

    pub fn is_subscribed(&self, chat_id: &ChatId) -> bool {
        self.subscriptions.lock().contains(chat_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the session as closed and wakes up [Session::closed]. Idempotent.
    /// Returns true if this call closed it.
    pub fn close(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::AcqRel);

        if was_open {
            self.close_notify.notify_one();
        }

        was_open
    }

    /// The chat this session fell behind in, if it was dropped for lagging
    pub fn lagged_in(&self) -> Option<ChatId> {
        self.lagged_in.lock().clone()
    }

    /// Resolves once the session is closed
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }

        self.close_notify.notified().await
    }

    pub(crate) fn deliver(&self, event: SessionEvent) -> Result<(), DeliveryError> {
        self.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagged,
            TrySendError::Closed(_) => DeliveryError::Gone,
        })
    }

    pub(crate) fn mark_lagged(&self, chat_id: &ChatId) {
        self.lagged_in.lock().get_or_insert_with(|| chat_id.clone());
    }

    /// Records that the client got a chat's history up to and including `last_id`
    pub(crate) fn mark_replayed(&self, chat_id: &ChatId, last_id: MessageId) {
        self.replayed.lock().insert(chat_id.clone(), last_id);
    }

    pub(crate) fn add_subscription(&self, chat_id: &ChatId) {
        let mut subscriptions = self.subscriptions.lock();

        if !subscriptions.contains(chat_id) {
            subscriptions.push(chat_id.clone());
        }
    }

    pub(crate) fn remove_subscription(&self, chat_id: &ChatId) {
        self.subscriptions.lock().retain(|c| c != chat_id);
    }
}

/// The receiving half of a session's queue.
///
/// A message can sit in the queue while the same session subscribes to its room again,
/// in which case the new history already contains it. Such messages are skipped here.
#[derive(Debug)]
pub struct SessionReceiver {
    events: mpsc::Receiver<SessionEvent>,
    replayed: Replayed,
}

impl SessionReceiver {
    /// Waits for the next event. Returns `None` once the session is dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let event = self.events.recv().await?;

            if !self.is_stale(&event) {
                return Some(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<SessionEvent, TryRecvError> {
        loop {
            let event = self.events.try_recv()?;

            if !self.is_stale(&event) {
                return Ok(event);
            }
        }
    }

    /// Whether the event is a message the client has since received as history.
    ///
    /// Worth asking again right before writing an event out, if a subscribe may have
    /// finished in the meantime.
    pub fn is_stale(&self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Message(message) => self
                .replayed
                .lock()
                .get(&message.chat_id)
                .is_some_and(|last_id| message.id <= *last_id),
            SessionEvent::Evicted { .. } => false,
        }
    }
}
