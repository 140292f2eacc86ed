use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT NOT NULL UNIQUE,
            retention_seconds   INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS banned_users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            ip_address  TEXT NOT NULL,
            username    TEXT,
            reason      TEXT,
            banned_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_banned_ip
            ON banned_users(ip_address);

        CREATE TABLE IF NOT EXISTS user_preferences (
            ip_address      TEXT PRIMARY KEY,
            username        TEXT,
            last_channel    TEXT,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append log: one row per message. `seq` breaks timestamp ties in
        -- insertion order.
        CREATE TABLE IF NOT EXISTS channel_messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            history_key     TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            payload         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channel_messages_key
            ON channel_messages(history_key, timestamp, seq);

        -- Seed the default channels. Retention is opt-in per channel; NULL
        -- keeps history indefinitely.
        INSERT OR IGNORE INTO channels (name) VALUES ('general'), ('random'), ('admin');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
