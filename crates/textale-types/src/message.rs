use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message. Immutable once created.
///
/// The serialized form is the persistence wire format: a JSON object with
/// `author`, `body` and `timestamp` (seconds since epoch). Unknown fields are
/// ignored on decode, and records written with the older
/// `Username`/`Content`/`Timestamp` field names are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "Username")]
    pub author: String,

    #[serde(alias = "Content")]
    pub body: String,

    /// Seconds since epoch. `0` is reserved for "not supplied", both in code
    /// and on the wire (a record without the field decodes as `0`), so an
    /// explicit epoch-zero timestamp is indistinguishable from a missing one
    /// and gets stamped on append.
    #[serde(default, alias = "Timestamp")]
    pub timestamp: i64,
}

impl Message {
    /// A message without a timestamp. The store assigns one on append.
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            timestamp: 0,
        }
    }

    /// A message with a caller-chosen timestamp. `0` counts as unset.
    pub fn at(author: impl Into<String>, body: impl Into<String>, timestamp: i64) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            timestamp,
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp != 0
    }

    /// Returns a copy stamped with the current wall clock if no timestamp
    /// was supplied.
    pub fn stamped(mut self) -> Self {
        if !self.has_timestamp() {
            self.timestamp = Utc::now().timestamp();
        }
        self
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// `HH:MM:SS author: body`, in UTC.
    pub fn render_line(&self) -> String {
        let clock = DateTime::<Utc>::from_timestamp(self.timestamp, 0)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        format!("{} {}: {}", clock, self.author, self.body)
    }
}
