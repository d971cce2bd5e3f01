//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outbound metadata flag: keep the typing indicator on after this reply
pub const KEEP_TYPING: &str = "keep_typing";

/// What the user actually sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text, carried in `content`
    Text,
    /// Voice note; the downloaded audio file path is the first `media` entry
    Voice,
    /// Bot command such as `/reset`, without the leading slash
    Command { name: String, args: String },
}

/// Message received from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g. "telegram")
    pub channel: String,
    /// Stable numeric user identifier
    pub user_id: i64,
    /// Public handle or first name, when the platform provides one
    pub username: Option<String>,
    /// Chat to answer in
    pub chat_id: String,
    /// Message text content
    pub content: String,
    pub kind: MessageKind,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Local file paths of downloaded attachments
    pub media: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Create a new text message
    pub fn text(
        channel: impl Into<String>,
        user_id: i64,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            user_id,
            username: None,
            chat_id: chat_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Create a voice message pointing at a downloaded audio file
    pub fn voice(
        channel: impl Into<String>,
        user_id: i64,
        chat_id: impl Into<String>,
        audio_path: impl Into<String>,
    ) -> Self {
        let mut msg = Self::text(channel, user_id, chat_id, "");
        msg.kind = MessageKind::Voice;
        msg.media.push(audio_path.into());
        msg
    }

    /// Create a command message
    pub fn command(
        channel: impl Into<String>,
        user_id: i64,
        chat_id: impl Into<String>,
        name: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let args = args.into();
        let content = if args.is_empty() {
            format!("/{}", name)
        } else {
            format!("/{} {}", name, args)
        };
        let mut msg = Self::text(channel, user_id, chat_id, content);
        msg.kind = MessageKind::Command { name, args };
        msg
    }

    /// Attach the sender's display name
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|u| !u.trim().is_empty());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a reply addressed to the chat this message came from
    pub fn reply(&self, content: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(&self.channel, &self.chat_id, content)
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat identifier
    pub chat_id: String,
    /// Message text content, Markdown allowed
    pub content: String,
    /// Optional message to reply to
    pub reply_to: Option<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the reply-to message ID
    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_content() {
        let msg = InboundMessage::command("telegram", 7, "7", "broadcast", "hello all");
        assert_eq!(msg.content, "/broadcast hello all");
        assert_eq!(
            msg.kind,
            MessageKind::Command {
                name: "broadcast".to_string(),
                args: "hello all".to_string()
            }
        );

        let bare = InboundMessage::command("telegram", 7, "7", "help", "");
        assert_eq!(bare.content, "/help");
    }

    #[test]
    fn test_voice_carries_path() {
        let msg = InboundMessage::voice("telegram", 1, "1", "/tmp/voice.ogg");
        assert_eq!(msg.kind, MessageKind::Voice);
        assert_eq!(msg.media, vec!["/tmp/voice.ogg".to_string()]);
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_blank_username_dropped() {
        let msg = InboundMessage::text("telegram", 1, "1", "hi").with_username(Some(" ".into()));
        assert!(msg.username.is_none());
    }

    #[test]
    fn test_reply_targets_origin_chat() {
        let msg = InboundMessage::text("telegram", 1, "100", "hi");
        let reply = msg.reply("hello");
        assert_eq!(reply.channel, "telegram");
        assert_eq!(reply.chat_id, "100");
        assert_eq!(reply.content, "hello");
    }
}
