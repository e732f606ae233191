use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{FeedMessage, Memory, NewMemory};
use crate::photo::NormalizedPhoto;

/// CRUD, bulk-list and blob-upload operations against the backend.
///
/// The backend owns record identity: `insert_memory` returns the canonical
/// record with its assigned `id`, and `update_memory` returns the persisted
/// replacement. Implementations map missing targets to
/// [`KeepsakeError::NotFound`](crate::error::KeepsakeError::NotFound).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All persisted records, ordered by date descending.
    async fn list_memories(&self) -> Result<Vec<Memory>>;
    async fn insert_memory(&self, draft: &NewMemory) -> Result<Memory>;
    async fn update_memory(&self, record: &Memory) -> Result<Memory>;
    async fn delete_memory(&self, id: &str) -> Result<()>;
    /// Store an encoded photo payload; returns the storage path.
    async fn upload_photo(&self, photo: &NormalizedPhoto) -> Result<String>;
}

/// Push notifications for collection changes made by any writer.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self) -> Result<FeedSubscription>;
}

/// A live feed subscription.
///
/// Yields messages until the transport ends; dropping the handle cancels the
/// underlying delivery task, after which no further messages arrive.
#[derive(Debug)]
pub struct FeedSubscription {
    events: mpsc::Receiver<FeedMessage>,
    cancel: CancellationToken,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<FeedMessage>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next message, or `None` once the feed has ended.
    pub async fn next_event(&mut self) -> Option<FeedMessage> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
