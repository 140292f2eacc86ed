pub mod broadcaster;
pub mod error;
pub mod metadata;
pub mod retention;
pub mod services;
pub mod session;
pub mod store;

pub use broadcaster::{Broadcaster, CancelHandle, Subscription};
pub use error::{Error, Result};
pub use metadata::MetadataService;
pub use services::Services;
pub use session::{ChannelSession, Delivery, SessionConfig, SessionEvent, SessionState};
pub use store::MessageStore;
