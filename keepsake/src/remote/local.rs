//! In-process backend: record table, blob table and broadcast feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{KeepsakeError, Result};
use crate::models::{FeedMessage, Memory, NewMemory};
use crate::photo::NormalizedPhoto;
use crate::remote::traits::{ChangeFeed, FeedSubscription, RemoteStore};

const FEED_CAPACITY: usize = 64;

/// An in-process implementation of both backend interfaces.
///
/// Replaces the module-level record array of the early prototype backend
/// with an explicit lifecycle: construct once, share behind `Arc`, drop to
/// tear down. Several stores may subscribe to one backend, which makes
/// multi-session reconciliation testable without a server.
pub struct LocalBackend {
    records: Mutex<Vec<Memory>>,
    blobs: Mutex<HashMap<String, StoredBlob>>,
    feed_tx: broadcast::Sender<FeedMessage>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

/// One uploaded blob as held by the local store.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl LocalBackend {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            records: Mutex::new(Vec::new()),
            blobs: Mutex::new(HashMap::new()),
            feed_tx,
            // Millis-seeded so assigned ids sort after any fixed seed ids.
            next_id: AtomicU64::new(Utc::now().timestamp_millis() as u64),
            next_seq: AtomicU64::new(1),
        }
    }

    /// A backend preloaded with the journal's sample season.
    pub fn seeded() -> Self {
        let backend = Self::new();
        *backend.records.lock().unwrap() = sample_memories();
        backend
    }

    /// Look up an uploaded blob by its storage path.
    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.lock().unwrap().get(path).cloned()
    }

    /// Stamp the next sequence number and broadcast. Send fails only when
    /// nobody is subscribed, which is fine.
    fn emit(&self, message: FeedMessage) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.feed_tx.send(message.with_seq(seq));
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for LocalBackend {
    async fn list_memories(&self) -> Result<Vec<Memory>> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn insert_memory(&self, draft: &NewMemory) -> Result<Memory> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let record = Memory {
            id,
            date: draft.date,
            description: draft.description.clone(),
            journal_entry: draft.journal_entry.clone(),
            intensity: draft.intensity,
            photo: draft.photo.clone(),
            frame_style: draft.frame_style,
            photo_effect: draft.photo_effect,
        };

        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        self.emit(FeedMessage::insert(record.clone()));
        Ok(record)
    }

    async fn update_memory(&self, record: &Memory) -> Result<Memory> {
        let mut records = self.records.lock().unwrap();
        let Some(slot) = records.iter_mut().find(|m| m.id == record.id) else {
            return Err(KeepsakeError::NotFound(format!("memory '{}'", record.id)));
        };
        *slot = record.clone();
        self.emit(FeedMessage::update(record.clone()));
        Ok(record.clone())
    }

    async fn delete_memory(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|m| m.id != id);
        if records.len() == before {
            return Err(KeepsakeError::NotFound(format!("memory '{id}'")));
        }
        self.emit(FeedMessage::delete(id));
        Ok(())
    }

    async fn upload_photo(&self, photo: &NormalizedPhoto) -> Result<String> {
        let path = format!(
            "photos/{}-{}",
            Utc::now().timestamp_millis(),
            nanoid::nanoid!(8)
        );
        self.blobs.lock().unwrap().insert(
            path.clone(),
            StoredBlob {
                content_type: photo.content_type.to_string(),
                bytes: photo.bytes.clone(),
            },
        );
        Ok(path)
    }
}

#[async_trait]
impl ChangeFeed for LocalBackend {
    async fn subscribe(&self) -> Result<FeedSubscription> {
        let mut feed_rx = self.feed_tx.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = feed_rx.recv() => match received {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Lost events cannot be replayed; the subscriber
                            // must re-list.
                            tracing::warn!(missed, "Local feed subscriber lagged, ending subscription");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(FeedSubscription::new(rx, cancel))
    }
}

fn sample_memories() -> Vec<Memory> {
    [
        (
            "1",
            (2024, 11, 5),
            "Bonfire night celebration",
            "The sky was lit up with amazing fireworks. The warmth of the bonfire made the chilly night feel cozy.",
            3,
        ),
        (
            "2",
            (2024, 12, 25),
            "Christmas morning",
            "Waking up to the excitement of presents under the tree. The smell of cinnamon and pine filled the air.",
            4,
        ),
        (
            "3",
            (2024, 12, 31),
            "New Year's Eve party",
            "Counting down to midnight with friends, the anticipation building as we watched the ball drop on TV.",
            4,
        ),
        (
            "4",
            (2025, 1, 1),
            "New Year's Day brunch",
            "Starting the year off right with a delicious spread of food and great company.",
            3,
        ),
        (
            "5",
            (2025, 2, 14),
            "Valentine's Day dinner",
            "A romantic candlelit dinner at our favorite restaurant. The food was exquisite, and the company even better.",
            3,
        ),
    ]
    .into_iter()
    .map(|(id, (y, m, d), description, journal, intensity)| Memory {
        id: id.to_string(),
        date: NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default(),
        description: description.to_string(),
        journal_entry: Some(journal.to_string()),
        intensity,
        photo: None,
        frame_style: None,
        photo_effect: None,
    })
    .collect()
}
