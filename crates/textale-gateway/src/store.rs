use std::sync::Arc;

use tracing::{debug, error, warn};

use textale_db::Database;
use textale_types::{ChannelName, Message};

use crate::error::{Error, Result};

/// History window returned when the caller has no preference.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Durable, time-ordered message log, one per channel.
///
/// Every call runs the blocking SQLite work on the blocking pool. Channels
/// share nothing but the connection; position in a channel's log is decided
/// by `(timestamp, insertion order)`, never by which append reached the
/// store first.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Durably append a message. Stamps the current time if the message has
    /// none and returns the message exactly as stored.
    ///
    /// Once this returns `Ok`, every later history read sees the message.
    pub async fn append(&self, channel: &ChannelName, message: Message) -> Result<Message> {
        let message = message.stamped();
        let payload = message.encode()?;
        let key = channel.history_key();
        let timestamp = message.timestamp;

        let db = self.db.clone();
        let seq = tokio::task::spawn_blocking(move || db.append_message(&key, timestamp, &payload))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                Error::StoreUnavailable(e.to_string())
            })?
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        debug!("Appended message #{} to #{} (ts={})", seq, channel, timestamp);
        Ok(message)
    }

    /// Up to `limit` most recent messages, oldest first.
    ///
    /// Records that fail to decode are logged and skipped; the rest of the
    /// window is still returned.
    pub async fn recent_history(&self, channel: &ChannelName, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = channel.history_key();
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);

        let db = self.db.clone();
        let rows = tokio::task::spawn_blocking(move || db.recent_messages(&key, limit))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                Error::StoreUnavailable(e.to_string())
            })?
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        // Rows come back newest first
        let messages = rows
            .into_iter()
            .rev()
            .filter_map(|row| match Message::decode(&row.payload) {
                Ok(mut message) => {
                    if !message.has_timestamp() {
                        message.timestamp = row.timestamp;
                    }
                    Some(message)
                }
                Err(e) => {
                    warn!("Skipping corrupt record #{} in #{}: {}", row.seq, channel, e);
                    None
                }
            })
            .collect();

        Ok(messages)
    }

    /// Drop every message in `channel` older than `cutoff` (seconds since epoch).
    pub async fn prune_before(&self, channel: &ChannelName, cutoff: i64) -> Result<usize> {
        let key = channel.history_key();

        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.prune_messages_before(&key, cutoff))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                Error::StoreUnavailable(e.to_string())
            })?
            .map_err(|e| Error::StoreUnavailable(e.to_string()))
    }
}
