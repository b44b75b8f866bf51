use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::spawn_blocking};

use super::{ChatId, Message, MessageId, Offer, OfferId, Storage, StorageError, StorageResult, UserId};

const OFFERS_DIR: &str = "offers";
const CHATS_DIR: &str = "chats";

/// Persists every offer as its own JSON file and every chat as an append-only log of JSON lines.
///
/// An offer's file is what makes it exist: writing the file creates or updates the offer and
/// removing it deletes the offer, so both happen in a single atomic step. Chat logs without an
/// offer file are leftovers of an interrupted delete and are ignored when opening.
///
/// Each offer and each chat has its own write lock. Writing one never waits on another.
pub struct JsonStorage {
    offers_dir: PathBuf,
    chats_dir: PathBuf,
    sequence: AtomicCell<u64>,
    offers: DashMap<OfferId, Arc<OfferSlot>>,
    chats: DashMap<ChatId, Arc<ChatSlot>>,
}

struct OfferSlot {
    /// Creation order
    seq: u64,
    offer: RwLock<Offer>,
    /// Serializes writes of the offer file. True once the offer is deleted.
    write: Mutex<bool>,
}

struct ChatSlot {
    messages: RwLock<Vec<Message>>,
    /// Serializes appends to the log file. True once the chat is removed.
    write: Mutex<bool>,
}

/// The contents of an offer file
#[derive(Serialize, Deserialize)]
struct StoredOffer {
    seq: u64,
    offer: Offer,
}

impl OfferSlot {
    fn new(seq: u64, offer: Offer) -> Self {
        Self {
            seq,
            offer: RwLock::new(offer),
            write: Mutex::new(false),
        }
    }
}

impl ChatSlot {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: RwLock::new(messages),
            write: Mutex::new(false),
        }
    }
}

impl JsonStorage {
    /// Opens the data directory, creating it if needed, and loads existing records
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        let offers_dir = dir.join(OFFERS_DIR);
        let chats_dir = dir.join(CHATS_DIR);

        fs::create_dir_all(&offers_dir)?;
        fs::create_dir_all(&chats_dir)?;

        let storage = Self {
            offers_dir,
            chats_dir,
            sequence: AtomicCell::new(1),
            offers: DashMap::new(),
            chats: DashMap::new(),
        };

        let mut next_seq = 1;

        for entry in fs::read_dir(&storage.offers_dir)? {
            let path = entry?.path();

            // Skips temporary files of writes that never finished
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }

            let stored: StoredOffer = serde_json::from_slice(&fs::read(&path)?)?;
            let messages = read_log(&storage.chat_path(&stored.offer.chat_id))?;

            next_seq = next_seq.max(stored.seq + 1);

            storage.chats.insert(
                stored.offer.chat_id.clone(),
                Arc::new(ChatSlot::new(messages)),
            );
            storage.offers.insert(
                stored.offer.id.clone(),
                Arc::new(OfferSlot::new(stored.seq, stored.offer)),
            );
        }

        storage.sequence.store(next_seq);

        info!(
            "Loaded {} offers from {}",
            storage.offers.len(),
            dir.to_string_lossy()
        );

        Ok(storage)
    }

    fn offer_path(&self, offer_id: &OfferId) -> PathBuf {
        self.offers_dir.join(format!("{}.json", offer_id))
    }

    fn chat_path(&self, chat_id: &ChatId) -> PathBuf {
        self.chats_dir.join(format!("{}.jsonl", chat_id))
    }

    // Map guards must not outlive these, so the slot is cloned out before anyone awaits on it
    fn offer_slot(&self, offer_id: &OfferId) -> StorageResult<Arc<OfferSlot>> {
        self.offers
            .get(offer_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::not_found("offer", offer_id))
    }

    fn chat_slot(&self, chat_id: &ChatId) -> StorageResult<Arc<ChatSlot>> {
        self.chats
            .get(chat_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::not_found("chat", chat_id))
    }

    async fn write_offer(&self, seq: u64, offer: &Offer) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(&StoredOffer {
            seq,
            offer: offer.clone(),
        })?;

        write_atomically(self.offer_path(&offer.id), bytes).await
    }

    /// Forgets a chat and removes its log. The offer is already gone at this point,
    /// so a log that can't be removed is only reported.
    async fn remove_chat(&self, chat_id: &ChatId) {
        let Ok(slot) = self.chat_slot(chat_id) else {
            return;
        };

        let mut removed = slot.write.lock().await;
        *removed = true;
        self.chats.remove(chat_id);

        let path = self.chat_path(chat_id);
        let result = blocking(move || match fs::remove_file(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        })
        .await;

        if let Err(e) = result {
            warn!("Could not remove the log of chat {}: {}", chat_id, e);
        }
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn offer_by_id(&self, offer_id: &OfferId) -> StorageResult<Offer> {
        let slot = self.offer_slot(offer_id)?;
        let offer = slot.offer.read().clone();

        Ok(offer)
    }

    async fn list_offers(&self) -> StorageResult<Vec<Offer>> {
        let mut offers: Vec<(u64, Offer)> = self
            .offers
            .iter()
            .map(|s| (s.seq, s.offer.read().clone()))
            .collect();

        offers.sort_by_key(|(seq, _)| *seq);

        Ok(offers.into_iter().map(|(_, offer)| offer).collect())
    }

    async fn insert_offer(&self, offer: Offer) -> StorageResult<Offer> {
        if self.offers.contains_key(&offer.id) {
            return Err(StorageError::Conflict {
                resource: "offer",
                field: "id",
                value: offer.id.to_string(),
            });
        }

        if self.chats.contains_key(&offer.chat_id) {
            return Err(StorageError::Conflict {
                resource: "chat",
                field: "id",
                value: offer.chat_id.to_string(),
            });
        }

        let seq = self.sequence.fetch_add(1);
        self.write_offer(seq, &offer).await?;

        // The chat exists before the offer is visible, so nobody looks for it in between
        self.chats
            .insert(offer.chat_id.clone(), Arc::new(ChatSlot::new(vec![])));
        self.offers
            .insert(offer.id.clone(), Arc::new(OfferSlot::new(seq, offer.clone())));

        Ok(offer)
    }

    async fn update_members(&self, offer_id: &OfferId, members: Vec<UserId>) -> StorageResult<Offer> {
        let slot = self.offer_slot(offer_id)?;
        let deleted = slot.write.lock().await;

        if *deleted {
            return Err(StorageError::not_found("offer", offer_id));
        }

        let mut offer = slot.offer.read().clone();
        offer.members = members;

        self.write_offer(slot.seq, &offer).await?;
        *slot.offer.write() = offer.clone();

        Ok(offer)
    }

    async fn delete_offer(&self, offer_id: &OfferId) -> StorageResult<Offer> {
        let slot = self.offer_slot(offer_id)?;
        let mut deleted = slot.write.lock().await;

        if *deleted {
            return Err(StorageError::not_found("offer", offer_id));
        }

        let path = self.offer_path(offer_id);
        blocking(move || fs::remove_file(path)).await?;

        *deleted = true;
        self.offers.remove(offer_id);

        let offer = slot.offer.read().clone();
        self.remove_chat(&offer.chat_id).await;

        debug!("Deleted offer {} and its chat {}", offer.id, offer.chat_id);
        Ok(offer)
    }

    async fn append_message(&self, message: Message) -> StorageResult<Message> {
        let slot = self.chat_slot(&message.chat_id)?;
        let removed = slot.write.lock().await;

        if *removed {
            return Err(StorageError::not_found("chat", &message.chat_id));
        }

        let last_id = slot.messages.read().last().map(|m| m.id);

        if last_id.is_some_and(|id| id >= message.id) {
            return Err(StorageError::Conflict {
                resource: "message",
                field: "id",
                value: message.id.to_string(),
            });
        }

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        append_line(self.chat_path(&message.chat_id), line).await?;
        slot.messages.write().push(message.clone());

        Ok(message)
    }

    async fn messages(&self, chat_id: &ChatId) -> StorageResult<Vec<Message>> {
        let slot = self.chat_slot(chat_id)?;
        let messages = slot.messages.read().clone();

        Ok(messages)
    }

    async fn last_message_id(&self, chat_id: &ChatId) -> StorageResult<MessageId> {
        let slot = self.chat_slot(chat_id)?;
        let last_id = slot.messages.read().last().map(|m| m.id).unwrap_or(0);

        Ok(last_id)
    }
}

/// Reads a chat log. A missing log is an empty chat.
///
/// A crash in the middle of an append leaves a last line without its newline.
/// That line is cut off, so the next append starts on a fresh line.
fn read_log(path: &Path) -> StorageResult<Vec<Message>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut messages = vec![];
    let mut complete = 0;

    for line in contents.split_inclusive('\n') {
        if !line.ends_with('\n') {
            warn!("Dropping an unfinished message at the end of {}", path.display());

            OpenOptions::new()
                .write(true)
                .open(path)?
                .set_len(complete as u64)?;
            break;
        }

        if !line.trim().is_empty() {
            messages.push(serde_json::from_str(line)?);
        }

        complete += line.len();
    }

    Ok(messages)
}

/// Appends a line and syncs it. A failed append is cut off again.
async fn append_line(path: PathBuf, line: Vec<u8>) -> StorageResult<()> {
    blocking(move || {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let length = file.metadata()?.len();

        let written = file.write_all(&line).and_then(|_| file.sync_data());

        if written.is_err() {
            let _ = file.set_len(length);
        }

        written
    })
    .await
}

async fn write_atomically(target: PathBuf, bytes: Vec<u8>) -> StorageResult<()> {
    blocking(move || {
        let mut temporary = target.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        {
            let mut file = fs::File::create(&temporary)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        fs::rename(&temporary, &target)
    })
    .await
}

/// Runs file I/O off the async workers
async fn blocking<F, T>(task: F) -> StorageResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = spawn_blocking(task)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(result?)
}
