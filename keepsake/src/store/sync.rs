//! The synchronized store: local snapshot, remote writes, feed reconciliation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::config::{Config, FeedConfig};
use crate::error::{KeepsakeError, Result};
use crate::models::{FeedMessage, Memory, MemoryDraft, MemoryPatch, NewMemory, PhotoInput};
use crate::photo::PhotoPipeline;
use crate::remote::{ChangeFeed, FeedSubscription, RemoteStore};
use crate::store::collection::MemoryCollection;

/// State shared between the store handle and its feed task.
struct Shared {
    collection: Mutex<MemoryCollection>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn apply(&self, message: &FeedMessage) -> bool {
        let changed = self.collection.lock().unwrap().apply_event(message);
        if changed {
            self.bump();
        }
        changed
    }

    fn store(&self, record: Memory) {
        let changed = {
            let mut collection = self.collection.lock().unwrap();
            let prev = collection.upsert(record.clone());
            prev.as_ref() != Some(&record)
        };
        if changed {
            self.bump();
        }
    }

    fn discard(&self, id: &str) {
        let removed = self.collection.lock().unwrap().remove(id).is_some();
        if removed {
            self.bump();
        }
    }

    fn reset(&self, records: Vec<Memory>) {
        self.collection.lock().unwrap().replace_all(records);
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// A client-side replica of the memory collection.
///
/// All reads are served from the in-memory snapshot. Mutations go to the
/// remote first and are committed locally only after the remote accepts
/// them, so the snapshot never shows a write the backend refused. A
/// background task folds feed events into the snapshot and resubscribes
/// with exponential backoff when the feed drops.
pub struct SyncStore {
    remote: Arc<dyn RemoteStore>,
    pipeline: PhotoPipeline,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncStore {
    /// Open the change feed, hydrate from the remote listing and start the
    /// feed task.
    ///
    /// The subscription is taken before the listing, so a write landing
    /// between the two arrives as a buffered event instead of falling into
    /// a gap. Fails when either step fails; a store that never saw the
    /// collection has nothing meaningful to serve.
    pub async fn connect(
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        config: &Config,
    ) -> Result<Self> {
        let subscription = feed.subscribe().await?;
        let records = remote.list_memories().await?;
        let mut collection = MemoryCollection::new();
        collection.replace_all(records);
        tracing::info!(count = collection.len(), "Hydrated memory store");

        let shared = Arc::new(Shared {
            collection: Mutex::new(collection),
            revision: watch::channel(1).0,
        });
        let cancel = CancellationToken::new();
        let feed_task = tokio::spawn(run_feed_loop(
            feed,
            Arc::clone(&remote),
            Arc::clone(&shared),
            cancel.clone(),
            config.feed.clone(),
            subscription,
        ));

        Ok(Self {
            remote,
            pipeline: PhotoPipeline::new(&config.photo),
            shared,
            cancel,
            feed_task: Mutex::new(Some(feed_task)),
        })
    }

    /// The collection in presentation order: date descending, id ascending.
    pub fn list(&self) -> Vec<Memory> {
        self.shared.collection.lock().unwrap().snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Memory> {
        self.shared.collection.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.collection.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.collection.lock().unwrap().is_empty()
    }

    /// Current snapshot revision. Bumps on every visible change.
    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    /// A channel that fires whenever the snapshot changes, for hosts that
    /// re-render on updates.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Validate, normalize any attached photo, create remotely, commit.
    pub async fn create(&self, draft: MemoryDraft) -> Result<Memory> {
        draft.validate()?;
        let photo = self.resolve_photo(&draft.photo).await?;

        let new = NewMemory {
            date: draft.date,
            description: draft.description,
            journal_entry: draft.journal_entry,
            intensity: draft.intensity,
            photo,
            frame_style: draft.frame_style,
            photo_effect: draft.photo_effect,
        };
        let record = self.remote.insert_memory(&new).await?;
        self.shared.store(record.clone());
        Ok(record)
    }

    /// Replace a record wholesale. The patch must describe the full desired
    /// state; absent optional fields clear their counterparts.
    pub async fn edit(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        patch.validate()?;
        if !self.shared.collection.lock().unwrap().contains(id) {
            return Err(KeepsakeError::NotFound(format!("memory '{id}'")));
        }
        let photo = self.resolve_photo(&patch.photo).await?;

        let record = Memory {
            id: id.to_string(),
            date: patch.date,
            description: patch.description,
            journal_entry: patch.journal_entry,
            intensity: patch.intensity,
            photo,
            frame_style: patch.frame_style,
            photo_effect: patch.photo_effect,
        };
        let record = self.remote.update_memory(&record).await?;
        self.shared.store(record.clone());
        Ok(record)
    }

    /// Delete remotely, then drop the local copy.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.remote.delete_memory(id).await?;
        self.shared.discard(id);
        Ok(())
    }

    /// Fold one feed event into the snapshot. Exposed for hosts that drive
    /// their own feed transport. Returns whether anything visible changed.
    pub fn apply_remote_event(&self, message: &FeedMessage) -> bool {
        self.shared.apply(message)
    }

    /// Re-list the collection and swap the snapshot wholesale.
    pub async fn refresh(&self) -> Result<()> {
        let records = self.remote.list_memories().await?;
        self.shared.reset(records);
        Ok(())
    }

    /// Stop the feed task and wait for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let feed_task = self.feed_task.lock().unwrap().take();
        if let Some(task) = feed_task {
            let _ = task.await;
        }
    }

    /// Pass `Reference` photos through unchanged; run raw captures through
    /// the pipeline and upload the normalized result.
    async fn resolve_photo(&self, photo: &Option<PhotoInput>) -> Result<Option<String>> {
        let Some(input) = photo else {
            return Ok(None);
        };
        if let PhotoInput::Reference(path) = input {
            return Ok(Some(path.clone()));
        }

        let bytes = input.raw_bytes()?;
        let normalized = self.pipeline.normalize(&bytes)?;
        let path = self.remote.upload_photo(&normalized).await?;
        tracing::debug!(
            path = %path,
            width = normalized.width,
            height = normalized.height,
            "Uploaded normalized photo"
        );
        Ok(Some(path))
    }
}

impl Drop for SyncStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keep a feed subscription alive for the life of the store.
///
/// The first subscription arrives pre-established from `connect`. A dropped
/// feed marks the snapshot suspect until a recovery succeeds; a recovery
/// that cannot re-list counts as failed and goes back through the backoff.
async fn run_feed_loop(
    feed: Arc<dyn ChangeFeed>,
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    config: FeedConfig,
    initial: FeedSubscription,
) {
    let mut attempt: u32 = 0;
    let mut live = Some(initial);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let recovered = match live.take() {
            Some(subscription) => Ok(subscription),
            None => resubscribe(feed.as_ref(), remote.as_ref(), &shared).await,
        };

        match recovered {
            Ok(mut subscription) => {
                attempt = 0;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        event = subscription.next_event() => match event {
                            Some(message) => {
                                shared.apply(&message);
                            }
                            None => {
                                tracing::warn!("Memory change feed dropped, resubscribing");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Feed recovery failed: {e}");
            }
        }

        let delay = backoff_delay(&config, attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Recover a dropped feed: subscribe, then swap in a fresh listing so
/// changes missed during the gap are applied. The subscription is taken
/// first, so writes landing during the listing arrive as buffered events;
/// a subscription whose listing fails is dropped unused.
async fn resubscribe(
    feed: &dyn ChangeFeed,
    remote: &dyn RemoteStore,
    shared: &Shared,
) -> Result<FeedSubscription> {
    let subscription = feed.subscribe().await?;
    let records = remote.list_memories().await?;
    shared.reset(records);
    tracing::info!("Resubscribed to memory change feed");
    Ok(subscription)
}

/// Exponential backoff: doubles from the configured floor up to the cap.
fn backoff_delay(config: &FeedConfig, attempt: u32) -> Duration {
    let doubled = config.backoff_initial_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(doubled.min(config.backoff_cap_secs.saturating_mul(1000)))
}
