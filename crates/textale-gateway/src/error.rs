use thiserror::Error;

use textale_types::ChannelNameError;

#[derive(Debug, Error)]
pub enum Error {
    /// Durable storage could not be reached; the append or read did not happen.
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),

    /// The live-delivery backend is gone; nothing was published or subscribed.
    #[error("live broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("metadata service unavailable: {0}")]
    MetadataUnavailable(String),

    /// A record could not be encoded or decoded. Bulk history reads skip
    /// such records instead of returning this.
    #[error("malformed message record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidChannel(#[from] ChannelNameError),

    #[error("session has not picked a username yet")]
    NotActive,

    #[error("session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
