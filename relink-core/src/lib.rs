mod broker;
mod config;
mod errors;
mod gate;
mod offers;
mod rooms;
mod session;
mod store;
mod util;

use std::sync::Arc;

use dashmap::DashMap;

pub use broker::*;
pub use config::*;
pub use errors::*;
pub use gate::*;
pub use offers::*;
pub use rooms::*;
pub use session::*;
pub use store::*;
pub use util::LocalId;

/// The reLink coordination core, keeping offer membership, chat rooms, and live sessions consistent.
pub struct Coordinator {
    context: CoordinatorContext,

    pub offers: OfferManager,
    pub rooms: RoomRegistry,
    pub broker: MessageBroker,
}

/// A type passed to the components of the coordinator, to reach storage, the gate, and the live rooms.
#[derive(Clone)]
pub struct CoordinatorContext {
    pub(crate) config: Arc<Config>,
    pub(crate) storage: SharedStorage,
    pub(crate) gate: Arc<CapacityGate>,

    /// Live rooms, keyed by the offer that owns them
    pub(crate) rooms: Arc<DashMap<OfferId, Arc<Room>>>,
    /// Index from a chat id to the offer owning the room
    pub(crate) chats: Arc<DashMap<ChatId, OfferId>>,
}

impl Coordinator {
    pub fn new<S>(config: Config, storage: S) -> Self
    where
        S: Storage + 'static,
    {
        Self::with_shared_storage(config, Arc::new(storage))
    }

    pub fn with_shared_storage(config: Config, storage: SharedStorage) -> Self {
        let context = CoordinatorContext {
            config: Arc::new(config),
            storage,
            gate: Default::default(),
            rooms: Default::default(),
            chats: Default::default(),
        };

        Self {
            offers: OfferManager::new(&context),
            rooms: RoomRegistry::new(&context),
            broker: MessageBroker::new(&context),
            context,
        }
    }

    /// A coordinator with default settings that forgets everything on restart
    pub fn in_memory() -> Self {
        Self::new(Config::default(), MemoryStorage::new())
    }

    /// Opens a room for every stored offer. Call once on startup, before accepting connections.
    pub async fn restore(&self) -> CoordinationResult<usize> {
        self.offers.restore().await
    }

    /// Creates a session for an authenticated user. Events for it arrive on the returned receiver.
    pub fn connect(&self, user_id: UserId) -> (Arc<Session>, SessionReceiver) {
        Session::new(user_id, self.context.config.outbound_queue_size)
    }

    /// Closes a session and removes it from every room
    pub fn disconnect(&self, session: &Session) {
        self.rooms.disconnect(session)
    }
}

impl CoordinatorContext {
    pub(crate) fn room(&self, offer_id: &OfferId) -> Option<Arc<Room>> {
        self.rooms.get(offer_id).map(|r| r.value().clone())
    }

    pub(crate) fn room_by_chat_id(&self, chat_id: &ChatId) -> CoordinationResult<Arc<Room>> {
        self.chats
            .get(chat_id)
            .and_then(|offer_id| self.room(offer_id.value()))
            .ok_or(CoordinationError::NotFound { resource: "chat" })
    }

    /// Reads the offer owning a room, live from storage
    pub(crate) async fn offer_of(&self, room: &Room) -> CoordinationResult<Offer> {
        self.storage
            .offer_by_id(room.offer_id())
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => CoordinationError::NotFound { resource: "chat" },
                e => e.into(),
            })
    }

    pub(crate) fn open_room(&self, offer: &Offer, last_message_id: MessageId) -> Arc<Room> {
        let room = Arc::new(Room::new(
            offer.id.clone(),
            offer.chat_id.clone(),
            last_message_id,
        ));

        self.rooms.insert(offer.id.clone(), room.clone());
        self.chats.insert(offer.chat_id.clone(), offer.id.clone());

        room
    }

    pub(crate) fn close_room(&self, offer: &Offer) {
        self.chats.remove(&offer.chat_id);
        self.rooms.remove(&offer.id);
    }
}
