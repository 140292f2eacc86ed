use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel every new session lands in unless told otherwise.
pub const DEFAULT_CHANNEL: &str = "general";

pub const MAX_CHANNEL_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelNameError {
    #[error("channel name is empty")]
    Empty,

    #[error("channel name is longer than {MAX_CHANNEL_NAME_LEN} characters")]
    TooLong,

    #[error("channel name contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated channel name.
///
/// Names never contain `:` or whitespace, so the history key and the live
/// topic derived from a name can't collide with those of another channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(raw: &str) -> Result<Self, ChannelNameError> {
        let name = raw.trim().trim_start_matches('#');
        if name.is_empty() {
            return Err(ChannelNameError::Empty);
        }
        if name.chars().count() > MAX_CHANNEL_NAME_LEN {
            return Err(ChannelNameError::TooLong);
        }
        if let Some(c) = name.chars().find(|c| *c == ':' || c.is_whitespace() || c.is_control()) {
            return Err(ChannelNameError::InvalidChar(c));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key of the channel's durable message log.
    pub fn history_key(&self) -> String {
        format!("channel:{}:messages", self.0)
    }

    /// Name of the channel's live fan-out topic.
    pub fn live_topic(&self) -> String {
        format!("channel:{}", self.0)
    }
}

impl Default for ChannelName {
    fn default() -> Self {
        Self(DEFAULT_CHANNEL.to_string())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = ChannelNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let general = ChannelName::parse("general").unwrap();
        assert_eq!(general.history_key(), "channel:general:messages");
        assert_eq!(general.live_topic(), "channel:general");
        assert_ne!(general.history_key(), general.live_topic());
    }

    #[test]
    fn leading_hash_is_stripped() {
        let name = ChannelName::parse("  #random ").unwrap();
        assert_eq!(name.as_str(), "random");
    }

    #[test]
    fn rejects_colliding_names() {
        // "general:messages" would otherwise own the live topic equal to
        // the history key of "general".
        assert_eq!(
            ChannelName::parse("general:messages"),
            Err(ChannelNameError::InvalidChar(':'))
        );
        assert_eq!(ChannelName::parse("two words"), Err(ChannelNameError::InvalidChar(' ')));
        assert_eq!(ChannelName::parse("   "), Err(ChannelNameError::Empty));
        assert_eq!(ChannelName::parse(&"x".repeat(65)), Err(ChannelNameError::TooLong));
    }

    #[test]
    fn deserialize_validates() {
        let ok: ChannelName = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(ok.as_str(), "admin");
        assert!(serde_json::from_str::<ChannelName>("\"a:b\"").is_err());
    }
}
