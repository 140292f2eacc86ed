/// Row types read back from SQLite.
/// Distinct from textale-types models to keep the DB layer independent.

pub struct MessageRow {
    pub seq: i64,
    pub history_key: String,
    pub timestamp: i64,
    /// Encoded message record. Not guaranteed to decode.
    pub payload: String,
}

pub struct ChannelRow {
    pub name: String,
    pub retention_seconds: Option<i64>,
    pub created_at: String,
}

pub struct PreferenceRow {
    pub ip_address: String,
    pub username: Option<String>,
    pub last_channel: Option<String>,
    pub updated_at: String,
}
