use textale_db::Database;

/// Keyed lookups the core needs from the relational side: bans, the channel
/// directory and per-client preferences.
///
/// Calls are blocking; async callers go through `Services`, which moves them
/// onto the blocking pool.
pub trait MetadataService: Send + Sync {
    fn is_banned(&self, client_addr: &str) -> anyhow::Result<bool>;

    /// Known channel names, ordered by name.
    fn list_channels(&self) -> anyhow::Result<Vec<String>>;

    fn save_preference(&self, client_addr: &str, username: &str, channel: &str) -> anyhow::Result<()>;

    /// Channel the client was last seen in, if any.
    fn last_channel(&self, client_addr: &str) -> anyhow::Result<Option<String>>;

    /// `(channel, retention_seconds)` for every channel with a retention policy.
    fn retention_policies(&self) -> anyhow::Result<Vec<(String, i64)>>;
}

impl MetadataService for Database {
    fn is_banned(&self, client_addr: &str) -> anyhow::Result<bool> {
        Database::is_banned(self, client_addr)
    }

    fn list_channels(&self) -> anyhow::Result<Vec<String>> {
        Database::list_channels(self)
    }

    fn save_preference(&self, client_addr: &str, username: &str, channel: &str) -> anyhow::Result<()> {
        Database::save_preference(self, client_addr, username, channel)
    }

    fn last_channel(&self, client_addr: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .get_preference(client_addr)?
            .and_then(|pref| pref.last_channel))
    }

    fn retention_policies(&self) -> anyhow::Result<Vec<(String, i64)>> {
        Ok(self
            .channel_rows()?
            .into_iter()
            .filter_map(|row| {
                row.retention_seconds
                    .filter(|secs| *secs > 0)
                    .map(|secs| (row.name, secs))
            })
            .collect())
    }
}
