//! Synchronization state store.
//!
//! Holds the canonical in-memory view the CRM front end reads: chats,
//! messages by chat, the active chat and the session status. Every
//! mutation is a single-step replacement under one lock, so readers never
//! observe a half-updated list, and every asynchronous completion checks
//! the liveness flag before committing so nothing writes after teardown.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::model::{Ack, ChatOverview, LastMessage, Message, MessageKind, SessionStatus};
use crate::normalize;
use crate::poller::{self, PollerHandle};
use crate::provider::ChatProvider;
use crate::sync;

#[derive(Default)]
pub(crate) struct SyncState {
    pub(crate) chats: HashMap<String, ChatOverview>,
    pub(crate) messages_by_chat: HashMap<String, Vec<Message>>,
    pub(crate) active_chat_id: Option<String>,
    pub(crate) session_status: Option<SessionStatus>,
}

pub struct SyncStore<P: ChatProvider> {
    provider: Arc<P>,
    state: Arc<Mutex<SyncState>>,
    alive: Arc<AtomicBool>,
    poller: Mutex<Option<PollerHandle>>,
}

impl<P: ChatProvider + 'static> SyncStore<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(SyncState::default())),
            alive: Arc::new(AtomicBool::new(true)),
            poller: Mutex::new(None),
        }
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Synchronize the chat list. Replaces (never appends to) the stored
    /// map; on failure the previous list stays untouched.
    pub async fn load_chats(&self) -> Result<Vec<ChatOverview>> {
        let chats = sync::load_chats(self.provider.as_ref()).await?;
        if self.alive() {
            let mut state = self.state.lock().await;
            state.chats = chats.iter().map(|c| (c.id.clone(), c.clone())).collect();
        }
        Ok(chats)
    }

    /// Make a chat active. History is fetched only on the first selection;
    /// afterwards the cached list is reused. The chat is then marked read,
    /// both on the provider (best effort) and locally.
    pub async fn select_chat(&self, chat_id: &str) -> Result<()> {
        let cached = {
            let mut state = self.state.lock().await;
            state.active_chat_id = Some(chat_id.to_string());
            state.messages_by_chat.contains_key(chat_id)
        };

        if !cached {
            let messages = sync::load_messages(self.provider.as_ref(), chat_id).await?;
            if !self.alive() {
                return Ok(());
            }
            let mut state = self.state.lock().await;
            state.messages_by_chat.insert(chat_id.to_string(), messages);
        }

        let seen = {
            let state = self.state.lock().await;
            state.messages_by_chat.get(chat_id).map_or(0, Vec::len)
        };
        if let Err(e) = self.provider.mark_read(chat_id, seen).await {
            warn!("select_chat: mark-read failed for {}: {}", chat_id, e);
        }
        if self.alive() {
            let mut state = self.state.lock().await;
            if let Some(chat) = state.chats.get_mut(chat_id) {
                chat.unread_count = 0;
            }
        }
        Ok(())
    }

    /// Send a text message and apply the result optimistically: the
    /// confirmed (or locally constructed pending) message is appended to
    /// the chat and becomes its last-message preview before any re-fetch.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message> {
        let raw = self.provider.send_text(chat_id, text).await?;
        let mut message = normalize::normalize_message(&raw, chat_id)
            .unwrap_or_else(|| pending_message(chat_id, text));
        message.from_me = true;
        if message.body.as_deref().map_or(true, str::is_empty) {
            message.body = Some(text.to_string());
        }

        if self.alive() {
            let mut state = self.state.lock().await;
            let messages = state.messages_by_chat.entry(chat_id.to_string()).or_default();
            insert_message(messages, message.clone());
            if let Some(chat) = state.chats.get_mut(chat_id) {
                chat.last_message = Some(LastMessage {
                    body: message.body.clone().unwrap_or_default(),
                    timestamp: message.timestamp,
                    from_me: true,
                });
            }
        }
        Ok(message)
    }

    /// Apply a webhook-originated inbound message: insert it in order and
    /// bump the chat's unread count unless it is self-authored.
    pub async fn add_message(&self, message: Message) {
        if !self.alive() {
            return;
        }
        let mut state = self.state.lock().await;
        let messages = state
            .messages_by_chat
            .entry(message.chat_id.clone())
            .or_default();
        insert_message(messages, message.clone());
        if let Some(chat) = state.chats.get_mut(&message.chat_id) {
            if !message.from_me {
                chat.unread_count += 1;
            }
            chat.last_message = Some(LastMessage {
                body: message.body.clone().unwrap_or_default(),
                timestamp: message.timestamp,
                from_me: message.from_me,
            });
        }
    }

    /// Chats ordered newest-first by last activity.
    pub async fn chats(&self) -> Vec<ChatOverview> {
        let state = self.state.lock().await;
        let mut chats: Vec<ChatOverview> = state.chats.values().cloned().collect();
        chats.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        chats
    }

    pub async fn active_chat_id(&self) -> Option<String> {
        self.state.lock().await.active_chat_id.clone()
    }

    pub async fn active_chat(&self) -> Option<ChatOverview> {
        let state = self.state.lock().await;
        let id = state.active_chat_id.as_ref()?;
        state.chats.get(id).cloned()
    }

    pub async fn active_chat_messages(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .active_chat_id
            .as_ref()
            .and_then(|id| state.messages_by_chat.get(id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn session_status(&self) -> Option<SessionStatus> {
        self.state.lock().await.session_status.clone()
    }

    /// Start (or restart) the background session poll.
    pub async fn start_polling(&self, period: Duration) {
        let handle = poller::spawn(
            self.provider.clone(),
            self.state.clone(),
            self.alive.clone(),
            period,
        );
        if let Some(old) = self.poller.lock().await.replace(handle) {
            old.stop();
        }
    }

    /// Tear down: clear the liveness flag first so late-resolving fetches
    /// are discarded, then cancel the poll timer.
    pub async fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poller.lock().await.take() {
            handle.stop();
        }
    }
}

/// Insert keeping the list unique by id and ordered by timestamp.
fn insert_message(messages: &mut Vec<Message>, message: Message) {
    messages.retain(|m| m.id != message.id);
    let at = messages.partition_point(|m| m.timestamp <= message.timestamp);
    messages.insert(at, message);
}

/// Local stand-in used when the send endpoint confirms the send but echoes
/// no usable message record.
fn pending_message(chat_id: &str, text: &str) -> Message {
    let now = Utc::now().timestamp_millis();
    Message {
        id: format!("pending-{now}"),
        chat_id: chat_id.to_string(),
        body: Some(text.to_string()),
        timestamp: now,
        from_me: true,
        kind: MessageKind::Text,
        ack: Some(Ack::Pending),
        author: None,
        quoted_msg_id: None,
        has_media: false,
        media_url: None,
        filename: None,
        caption: None,
        mime_type: None,
    }
}
