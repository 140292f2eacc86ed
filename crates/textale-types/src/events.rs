use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Frames sent FROM the presentation adapter TO the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientFrame {
    /// A submitted input line (username first, then message bodies or commands)
    Line { text: String },

    /// Terminal window was resized
    Resize { width: u16, height: u16 },

    /// User asked to leave (ctrl+c / esc)
    Quit,
}

/// Frames sent FROM the server TO the presentation adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    /// Ask the user for input (username prompt)
    Prompt { text: String },

    /// Session is active in a channel
    Joined { channel: String, username: String },

    /// Most recent history window, oldest first
    History { channel: String, messages: Vec<Message> },

    /// A live message delivered from the channel's subscription
    Message { channel: String, message: Message },

    /// Informational line
    Notice { text: String },

    /// Live updates are unavailable; history still works
    Degraded { channel: String, reason: String },

    /// Known channels, ordered by name
    Channels { names: Vec<String> },

    /// Something the user asked for failed (e.g. message not sent)
    Error { text: String },

    /// Session ended
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_tagged_layout() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"Line","data":{"text":"hello"}}"#).unwrap();
        assert_eq!(frame, ClientFrame::Line { text: "hello".into() });

        let quit: ClientFrame = serde_json::from_str(r#"{"type":"Quit"}"#).unwrap();
        assert_eq!(quit, ClientFrame::Quit);
    }

    #[test]
    fn server_message_frame_embeds_wire_message() {
        let frame = ServerFrame::Message {
            channel: "general".into(),
            message: Message::at("alice", "hi", 100),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Message");
        assert_eq!(json["data"]["message"]["author"], "alice");
        assert_eq!(json["data"]["message"]["timestamp"], 100);
    }
}
