use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use textale_gateway::SessionConfig;
use textale_gateway::broadcaster::MIN_SUBSCRIBER_BUFFER;
use textale_gateway::store::DEFAULT_HISTORY_LIMIT;
use textale_types::ChannelName;
use textale_types::channel::DEFAULT_CHANNEL;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub default_channel: ChannelName,
    pub history_limit: usize,
    pub subscriber_buffer: usize,
    pub retention_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("TEXTALE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "TEXTALE_PORT", 2222u16)?;
        let db_path: PathBuf = lookup("TEXTALE_DB_PATH")
            .unwrap_or_else(|| "./data/textale.db".into())
            .into();

        let default_channel = lookup("TEXTALE_DEFAULT_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.into());
        let default_channel = ChannelName::parse(&default_channel)
            .with_context(|| format!("TEXTALE_DEFAULT_CHANNEL={:?}", default_channel))?;

        let history_limit = parse_or(&lookup, "TEXTALE_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        let subscriber_buffer = parse_or(&lookup, "TEXTALE_SUBSCRIBER_BUFFER", MIN_SUBSCRIBER_BUFFER)?
            .max(MIN_SUBSCRIBER_BUFFER);
        let retention_secs = parse_or(&lookup, "TEXTALE_RETENTION_INTERVAL_SECS", 60u64)?.max(1);

        Ok(Self {
            host,
            port,
            db_path,
            default_channel,
            history_limit,
            subscriber_buffer,
            retention_interval: Duration::from_secs(retention_secs),
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .with_context(|| format!("invalid bind address {}", addr))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_channel: self.default_channel.clone(),
            history_limit: self.history_limit,
            delivery_buffer: self.subscriber_buffer,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{}={:?} is not valid", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:2222");
        assert_eq!(config.db_path, PathBuf::from("./data/textale.db"));
        assert_eq!(config.default_channel.as_str(), "general");
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.subscriber_buffer, 32);
        assert_eq!(config.retention_interval, Duration::from_secs(60));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("TEXTALE_HOST", "127.0.0.1"),
            ("TEXTALE_PORT", "4000"),
            ("TEXTALE_DEFAULT_CHANNEL", "#lobby"),
            ("TEXTALE_HISTORY_LIMIT", "20"),
            ("TEXTALE_SUBSCRIBER_BUFFER", "8"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:4000");
        let session = config.session_config();
        assert_eq!(session.default_channel.as_str(), "lobby");
        assert_eq!(session.history_limit, 20);
        // Buffer never drops below the floor
        assert_eq!(session.delivery_buffer, 32);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("TEXTALE_PORT", "lots")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TEXTALE_DEFAULT_CHANNEL", "a:b")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TEXTALE_HISTORY_LIMIT", "-1")])).is_err());
    }
}
