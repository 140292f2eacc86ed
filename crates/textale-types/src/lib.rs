pub mod channel;
pub mod events;
pub mod message;

pub use channel::{ChannelName, ChannelNameError};
pub use message::Message;
