use crate::models::{ChannelRow, MessageRow, PreferenceRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Message log --

    /// Append one encoded record to a channel's log. Returns its sequence number.
    pub fn append_message(&self, history_key: &str, timestamp: i64, payload: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_messages (history_key, timestamp, payload) VALUES (?1, ?2, ?3)",
                rusqlite::params![history_key, timestamp, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest-first window of a channel's log.
    pub fn recent_messages(&self, history_key: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, history_key, limit))
    }

    /// Delete every record strictly older than `cutoff`. Returns the number removed.
    pub fn prune_messages_before(&self, history_key: &str, cutoff: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM channel_messages WHERE history_key = ?1 AND timestamp < ?2",
                rusqlite::params![history_key, cutoff],
            )?;
            Ok(removed)
        })
    }

    // -- Channels --

    pub fn list_channels(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM channels ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    pub fn channel_rows(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, retention_seconds, created_at FROM channels ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ChannelRow {
                        name: row.get(0)?,
                        retention_seconds: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Register a channel, or update its retention if it already exists.
    pub fn upsert_channel(&self, name: &str, retention_seconds: Option<i64>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (name, retention_seconds) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET retention_seconds = excluded.retention_seconds",
                rusqlite::params![name, retention_seconds],
            )?;
            Ok(())
        })
    }

    // -- Bans --

    pub fn is_banned(&self, ip_address: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM banned_users WHERE ip_address = ?1",
                [ip_address],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn ban(&self, ip_address: &str, username: Option<&str>, reason: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO banned_users (ip_address, username, reason) VALUES (?1, ?2, ?3)",
                rusqlite::params![ip_address, username, reason],
            )?;
            Ok(())
        })
    }

    // -- Preferences --

    pub fn save_preference(&self, ip_address: &str, username: &str, channel: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (ip_address, username, last_channel, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(ip_address) DO UPDATE SET
                     username = excluded.username,
                     last_channel = excluded.last_channel,
                     updated_at = datetime('now')",
                rusqlite::params![ip_address, username, channel],
            )?;
            Ok(())
        })
    }

    pub fn get_preference(&self, ip_address: &str) -> Result<Option<PreferenceRow>> {
        self.with_conn(|conn| query_preference(conn, ip_address))
    }
}

fn query_recent_messages(conn: &Connection, history_key: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, history_key, timestamp, payload
         FROM channel_messages
         WHERE history_key = ?1
         ORDER BY timestamp DESC, seq DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![history_key, limit], |row| {
            Ok(MessageRow {
                seq: row.get(0)?,
                history_key: row.get(1)?,
                timestamp: row.get(2)?,
                payload: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_preference(conn: &Connection, ip_address: &str) -> Result<Option<PreferenceRow>> {
    let mut stmt = conn.prepare(
        "SELECT ip_address, username, last_channel, updated_at
         FROM user_preferences WHERE ip_address = ?1",
    )?;

    let row = stmt
        .query_row([ip_address], |row| {
            Ok(PreferenceRow {
                ip_address: row.get(0)?,
                username: row.get(1)?,
                last_channel: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
