use serde::{Deserialize, Serialize};

/// Delivery state of an outbound message.
///
/// Ordered: `Pending < Sent < Delivered < Read`, so acknowledgement
/// progress can be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ack {
    Pending,
    Sent,
    Delivered,
    Read,
}

impl Ack {
    /// Numeric acknowledgement codes as reported by older provider versions.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Ack::Pending),
            1 => Some(Ack::Sent),
            2 => Some(Ack::Delivered),
            3 => Some(Ack::Read),
            _ => None,
        }
    }

    /// Named acknowledgement states, matched case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Ack::Pending),
            "SENT" => Some(Ack::Sent),
            "DELIVERED" => Some(Ack::Delivered),
            "READ" => Some(Ack::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
}

/// Preview of the most recent message, embedded in a chat overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub body: String,
    pub timestamp: i64,
    pub from_me: bool,
}

/// Summary record for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOverview {
    pub id: String,
    /// Display name; empty until enrichment or the phone-number fallback
    /// fills it in.
    pub name: String,
    /// Derived from the id suffix convention, never provider-supplied.
    pub is_group: bool,
    pub avatar: Option<String>,
    pub picture: Option<String>,
    pub unread_count: u32,
    pub last_message: Option<LastMessage>,
    pub archived: Option<bool>,
    pub pinned: Option<bool>,
}

impl ChatOverview {
    /// Timestamp of the latest known activity, used for inbox ordering.
    pub fn last_activity(&self) -> i64 {
        self.last_message.as_ref().map_or(0, |m| m.timestamp)
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// A single normalized message.
///
/// Timestamps are always epoch milliseconds regardless of the unit the
/// provider reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub body: Option<String>,
    pub timestamp: i64,
    pub from_me: bool,
    pub kind: MessageKind,
    pub ack: Option<Ack>,
    pub author: Option<String>,
    pub quoted_msg_id: Option<String>,
    pub has_media: bool,
    pub media_url: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    pub mime_type: Option<String>,
}

/// Connection state of the provider session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub status: String,
    pub name: Option<String>,
}
