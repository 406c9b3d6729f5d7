//! Pure converters from raw provider records to the canonical domain model.
//!
//! The provider's field names, nesting and type shapes vary across versions
//! and message kinds, so every extraction goes through a fallback chain of
//! candidate paths and never panics: malformed input degrades to `None` or
//! a default instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::{Ack, ChatOverview, LastMessage, Message, MessageKind, SessionStatus};

/// The provider's broadcast-status pseudo chat, filtered everywhere.
pub const BROADCAST_STATUS_ID: &str = "status@broadcast";

/// Group chat ids carry this suffix; individual chats do not.
pub const GROUP_ID_SUFFIX: &str = "@g.us";

/// Timestamps below this magnitude are seconds, not milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D+").expect("valid regex"));

/// Walk a dotted path ("contact.profilePicUrl") into a JSON value.
fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = raw;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// First candidate path holding a non-empty string.
pub(crate) fn str_at<'a>(raw: &'a Value, candidates: &[&str]) -> Option<&'a str> {
    for path in candidates {
        if let Some(s) = lookup(raw, path).and_then(Value::as_str) {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s);
            }
        }
    }
    None
}

/// First candidate path holding something number-like (number or numeric
/// string).
fn i64_at(raw: &Value, candidates: &[&str]) -> Option<i64> {
    for path in candidates {
        let Some(value) = lookup(raw, path) else {
            continue;
        };
        if let Some(n) = value.as_i64() {
            return Some(n);
        }
        if let Some(f) = value.as_f64() {
            return Some(f as i64);
        }
        if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
            return Some(n);
        }
    }
    None
}

fn bool_at(raw: &Value, candidates: &[&str]) -> Option<bool> {
    for path in candidates {
        if let Some(b) = lookup(raw, path).and_then(Value::as_bool) {
            return Some(b);
        }
    }
    None
}

/// Scale second-precision timestamps to milliseconds; millisecond values
/// pass through unchanged.
pub fn normalize_timestamp(value: i64) -> i64 {
    if value < MILLIS_THRESHOLD {
        value * 1000
    } else {
        value
    }
}

fn timestamp_at(raw: &Value, candidates: &[&str]) -> Option<i64> {
    i64_at(raw, candidates).map(normalize_timestamp)
}

fn has_media(raw: &Value) -> bool {
    bool_at(raw, &["hasMedia", "has_media"]).unwrap_or(false)
        || str_at(raw, &["media.url", "mediaUrl"]).is_some()
}

/// Detect the message kind, in priority order: explicit type field, MIME
/// prefix, filename extension, media-flag fallback.
pub fn detect_kind(raw: &Value) -> MessageKind {
    if let Some(kind) = str_at(raw, &["type", "messageType", "_data.type"]) {
        match kind.to_ascii_lowercase().as_str() {
            "audio" | "ptt" | "voice" => return MessageKind::Audio,
            "image" => return MessageKind::Image,
            "chat" | "text" => return MessageKind::Text,
            _ => {}
        }
    }
    if let Some(mime) = str_at(raw, &["mimeType", "mimetype", "media.mimetype"]) {
        if mime.starts_with("audio/") {
            return MessageKind::Audio;
        }
        if mime.starts_with("image/") {
            return MessageKind::Image;
        }
    }
    if let Some(filename) = str_at(raw, &["filename", "media.filename"]) {
        if let Some((_, ext)) = filename.rsplit_once('.') {
            match ext.to_ascii_lowercase().as_str() {
                "jpg" | "jpeg" | "png" | "gif" | "webp" => return MessageKind::Image,
                "ogg" | "opus" | "mp3" | "m4a" | "wav" => return MessageKind::Audio,
                _ => {}
            }
        }
    }
    // Media with no recognizable type is treated as an image.
    if has_media(raw) {
        return MessageKind::Image;
    }
    MessageKind::Text
}

/// Resolve the acknowledgement state: named field first, then the numeric
/// code. An unrecognized value yields `None`, never a guess.
pub fn ack_from_value(raw: &Value) -> Option<Ack> {
    if let Some(name) = str_at(raw, &["ackName", "ack_name"]) {
        if let Some(ack) = Ack::from_name(name) {
            return Some(ack);
        }
    }
    if let Some(name) = raw.get("ack").and_then(Value::as_str) {
        return Ack::from_name(name);
    }
    i64_at(raw, &["ack"]).and_then(Ack::from_code)
}

fn last_message_preview(last: &Value) -> LastMessage {
    let body = str_at(last, &["body", "caption", "text"]).unwrap_or("");
    let body = if body.is_empty() {
        match detect_kind(last) {
            MessageKind::Image => "Imagem",
            MessageKind::Audio => "Mensagem de áudio",
            MessageKind::Text => "Nova conversa",
        }
    } else {
        body
    };
    LastMessage {
        body: body.to_string(),
        timestamp: timestamp_at(last, &["timestamp", "t"]).unwrap_or(0),
        from_me: bool_at(last, &["fromMe", "from_me"]).unwrap_or(false),
    }
}

/// Normalize a raw chat overview record.
///
/// Rejects records without an id, the broadcast-status pseudo chat, and
/// records carrying an explicit `null` name.
pub fn normalize_chat(raw: &Value) -> Option<ChatOverview> {
    let id = str_at(raw, &["id._serialized", "id", "chatId"])?.to_string();
    if id == BROADCAST_STATUS_ID {
        return None;
    }
    if matches!(raw.get("name"), Some(Value::Null)) {
        return None;
    }

    let is_group = id.contains(GROUP_ID_SUFFIX);
    let name = str_at(raw, &["name", "contact.name", "contact.pushname", "subject"])
        .unwrap_or("")
        .to_string();
    let last_message = raw
        .get("lastMessage")
        .or_else(|| raw.get("last_message"))
        .filter(|v| v.is_object())
        .map(last_message_preview);

    Some(ChatOverview {
        name,
        is_group,
        avatar: str_at(raw, &["avatar", "contact.profilePicUrl"]).map(str::to_string),
        picture: str_at(raw, &["picture", "profilePicUrl", "image"]).map(str::to_string),
        unread_count: i64_at(raw, &["unreadCount", "unread_count", "unread"])
            .unwrap_or(0)
            .max(0) as u32,
        last_message,
        archived: bool_at(raw, &["archived", "isArchived"]),
        pinned: bool_at(raw, &["pinned", "isPinned"]),
        id,
    })
}

/// Normalize a raw message record. Requires an id and a parseable timestamp.
pub fn normalize_message(raw: &Value, chat_id: &str) -> Option<Message> {
    let id = str_at(raw, &["id._serialized", "id", "key.id"])?.to_string();
    let timestamp = timestamp_at(raw, &["timestamp", "t", "messageTimestamp"])?;

    Some(Message {
        id,
        chat_id: chat_id.to_string(),
        body: str_at(raw, &["body", "content", "text"]).map(str::to_string),
        timestamp,
        from_me: bool_at(raw, &["fromMe", "from_me"]).unwrap_or(false),
        kind: detect_kind(raw),
        ack: ack_from_value(raw),
        author: str_at(raw, &["author", "participant"]).map(str::to_string),
        quoted_msg_id: str_at(raw, &["quotedMsgId", "quotedMsg.id"]).map(str::to_string),
        has_media: has_media(raw),
        media_url: str_at(raw, &["media.url", "mediaUrl"]).map(str::to_string),
        filename: str_at(raw, &["filename", "media.filename"]).map(str::to_string),
        caption: str_at(raw, &["caption"]).map(str::to_string),
        mime_type: str_at(raw, &["mimeType", "mimetype", "media.mimetype"]).map(str::to_string),
    })
}

/// Extract a phone number from a chat id
/// (e.g. "46760789806@c.us" -> "+46760789806"), used as the last-resort
/// chat name.
pub fn phone_from_chat_id(id: &str) -> String {
    let local = id.split('@').next().unwrap_or(id);
    let digits = NON_DIGITS.replace_all(local, "");
    if digits.is_empty() {
        id.to_string()
    } else {
        format!("+{digits}")
    }
}

/// Normalize a session-status payload. Never fails; an unreadable status
/// becomes "UNKNOWN".
pub fn normalize_session(raw: &Value) -> SessionStatus {
    SessionStatus {
        status: str_at(raw, &["status", "state", "engine.state"])
            .unwrap_or("UNKNOWN")
            .to_string(),
        name: str_at(raw, &["name", "session"]).map(str::to_string),
    }
}
