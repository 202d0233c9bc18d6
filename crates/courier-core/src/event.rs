//! Events emitted by the protocol client.

use serde::{Deserialize, Serialize};

/// Lifecycle and message events delivered after the client is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The connection is up and authenticated.
    Connected,
    /// The connection dropped.
    Disconnected,
    /// The device was unlinked remotely.
    LoggedOut,
    /// An inbound chat message.
    Message(InboundMessage),
    /// Anything else the client reports; informational only.
    Other { name: String },
}

/// Events on the pairing channel, only produced while no identity exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingEvent {
    /// A fresh code to present for scanning. Codes rotate periodically.
    Code { code: String },
    /// Informational pairing notice (`timeout`, `success`, `error`, ...).
    Other { event: String },
}

/// Inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub chat: String,
    #[serde(default)]
    pub is_from_me: bool,
    pub content: MessageContent,
}

impl InboundMessage {
    /// Text of the message, empty for unsupported content.
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.text()
    }
}

/// Message payload as delivered by the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain conversation text.
    Conversation { text: String },
    /// Text with a quote, link preview or mention context.
    ExtendedText {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quoted: Option<String>,
    },
    /// Media, reactions, polls and the like.
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    /// Extract the text body; unsupported content yields `""`.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Conversation { text } | Self::ExtendedText { text, .. } => text,
            Self::Unsupported => "",
        }
    }
}
