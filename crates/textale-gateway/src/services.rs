use std::sync::Arc;

use tracing::error;

use textale_db::Database;

use crate::broadcaster::Broadcaster;
use crate::error::{Error, Result};
use crate::metadata::MetadataService;
use crate::store::MessageStore;

/// Long-lived handles every session needs. Built once by the process and
/// passed into each session explicitly.
#[derive(Clone)]
pub struct Services {
    pub store: MessageStore,
    pub broadcaster: Broadcaster,
    pub metadata: Arc<dyn MetadataService>,
}

impl Services {
    /// Message log and metadata both live in `db`.
    pub fn new(db: Arc<Database>, subscriber_buffer: usize) -> Self {
        Self {
            store: MessageStore::new(db.clone()),
            broadcaster: Broadcaster::new(subscriber_buffer),
            metadata: db,
        }
    }

    /// Run a blocking metadata call off the async runtime.
    async fn with_metadata<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn MetadataService) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let metadata = self.metadata.clone();
        tokio::task::spawn_blocking(move || f(metadata.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                Error::MetadataUnavailable(e.to_string())
            })?
            .map_err(|e| Error::MetadataUnavailable(e.to_string()))
    }

    pub async fn is_banned(&self, client_addr: &str) -> Result<bool> {
        let addr = client_addr.to_string();
        self.with_metadata(move |m| m.is_banned(&addr)).await
    }

    pub async fn list_channels(&self) -> Result<Vec<String>> {
        self.with_metadata(|m| m.list_channels()).await
    }

    pub async fn save_preference(&self, client_addr: &str, username: &str, channel: &str) -> Result<()> {
        let (addr, username, channel) = (client_addr.to_string(), username.to_string(), channel.to_string());
        self.with_metadata(move |m| m.save_preference(&addr, &username, &channel))
            .await
    }

    pub async fn last_channel(&self, client_addr: &str) -> Result<Option<String>> {
        let addr = client_addr.to_string();
        self.with_metadata(move |m| m.last_channel(&addr)).await
    }

    pub async fn retention_policies(&self) -> Result<Vec<(String, i64)>> {
        self.with_metadata(|m| m.retention_policies()).await
    }
}
