//! Chat list synchronization and message history fetching.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{ChatOverview, Message};
use crate::normalize;
use crate::provider::ChatProvider;

/// Single overview page is enough for a practice's inbox.
pub const OVERVIEW_LIMIT: usize = 200;

pub const MESSAGE_PAGE_SIZE: usize = 100;

/// Hard stop on the history walk so a misbehaving provider that keeps
/// returning full pages cannot pull us into an unbounded loop.
pub const MAX_MESSAGE_PAGES: usize = 10;

/// Fetch the chat overview list, enrich bare entries from the chat-info
/// endpoint and return the result newest-first.
///
/// Enrichment failures degrade to the unenriched chat; only the overview
/// fetch itself can fail the call.
pub async fn load_chats<P: ChatProvider>(provider: &P) -> Result<Vec<ChatOverview>> {
    debug!("load_chats: requesting chat overview");
    let raw = provider.chats_overview(OVERVIEW_LIMIT, 0).await?;
    debug!("load_chats: got {} raw records", raw.len());

    let mut chats: Vec<ChatOverview> = raw.iter().filter_map(normalize::normalize_chat).collect();

    // Secondary fetch for chats the overview left without name and avatar.
    // The fetches run as one batch and are matched back by chat id.
    let targets: Vec<String> = chats
        .iter()
        .filter(|c| needs_enrichment(c))
        .map(|c| c.id.clone())
        .collect();
    if !targets.is_empty() {
        debug!(
            "load_chats: enriching {} of {} chats",
            targets.len(),
            chats.len()
        );
        let fetches = targets.into_iter().map(|id| async move {
            let result = provider.chat_info(&id).await;
            (id, result)
        });
        for (id, result) in join_all(fetches).await {
            match result {
                Ok(info) => {
                    if let Some(chat) = chats.iter_mut().find(|c| c.id == id) {
                        merge_chat_info(chat, &info);
                    }
                }
                Err(e) => warn!("load_chats: enrichment failed for {}: {}", id, e),
            }
        }
    }

    // Last resort: derive a name from the id's phone-number part.
    for chat in &mut chats {
        if !chat.has_name() {
            chat.name = normalize::phone_from_chat_id(&chat.id);
        }
    }

    chats.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
    debug!("load_chats: returning {} chats", chats.len());
    Ok(chats)
}

fn needs_enrichment(chat: &ChatOverview) -> bool {
    !chat.has_name() && chat.avatar.is_none() && chat.picture.is_none()
}

/// Merge the richest name/avatar out of a chat-info payload. Candidates in
/// priority order: contact object, nested profile-picture object, chat
/// object, root object; first non-empty wins.
fn merge_chat_info(chat: &mut ChatOverview, info: &Value) {
    if !chat.has_name() {
        if let Some(name) = normalize::str_at(
            info,
            &[
                "contact.name",
                "contact.pushname",
                "chat.name",
                "name",
                "pushName",
            ],
        ) {
            chat.name = name.to_string();
        }
    }
    if chat.avatar.is_none() && chat.picture.is_none() {
        if let Some(url) = normalize::str_at(
            info,
            &[
                "contact.profilePicUrl",
                "profilePicture.profilePictureURL",
                "profilePicture.url",
                "chat.picture",
                "picture",
                "avatar",
            ],
        ) {
            chat.avatar = Some(url.to_string());
        }
    }
}

/// Fetch a chat's full history: fixed-size pages from offset 0 until a
/// short page or the page bound, deduplicated by id (last write wins) and
/// sorted ascending by timestamp.
///
/// Any page error aborts the whole call; partial pages are discarded.
pub async fn load_messages<P: ChatProvider>(provider: &P, chat_id: &str) -> Result<Vec<Message>> {
    let mut raw_records: Vec<Value> = Vec::new();
    let mut offset = 0;
    for page in 0..MAX_MESSAGE_PAGES {
        let page_records = provider.messages(chat_id, MESSAGE_PAGE_SIZE, offset).await?;
        let count = page_records.len();
        debug!(
            "load_messages: chat {} page {} returned {} records",
            chat_id, page, count
        );
        raw_records.extend(page_records);
        if count < MESSAGE_PAGE_SIZE {
            break;
        }
        offset += MESSAGE_PAGE_SIZE;
        if page + 1 == MAX_MESSAGE_PAGES {
            warn!(
                "load_messages: chat {} still returning full pages after {} pages, stopping",
                chat_id, MAX_MESSAGE_PAGES
            );
        }
    }

    let mut by_id: HashMap<String, Message> = HashMap::new();
    for raw in &raw_records {
        match normalize::normalize_message(raw, chat_id) {
            Some(message) => {
                by_id.insert(message.id.clone(), message);
            }
            None => debug!("load_messages: skipping malformed record for chat {}", chat_id),
        }
    }

    let mut messages: Vec<Message> = by_id.into_values().collect();
    // Tie-break on id so reruns over equal timestamps stay stable.
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    debug!(
        "load_messages: returning {} messages for chat {}",
        messages.len(),
        chat_id
    );
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::Ack;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        chats: Vec<Value>,
        fail_overview: bool,
        infos: HashMap<String, Value>,
        fail_info: HashSet<String>,
        pages: Vec<Vec<Value>>,
        fail_page: Option<usize>,
        info_calls: Mutex<Vec<String>>,
        message_calls: Mutex<Vec<(usize, usize)>>,
    }

    fn http_error() -> SyncError {
        SyncError::Status {
            status: 500,
            url: "https://waha.test".into(),
        }
    }

    #[async_trait]
    impl ChatProvider for FakeProvider {
        async fn chats_overview(&self, _limit: usize, _offset: usize) -> Result<Vec<Value>> {
            if self.fail_overview {
                return Err(http_error());
            }
            Ok(self.chats.clone())
        }

        async fn chat_info(&self, chat_id: &str) -> Result<Value> {
            self.info_calls.lock().unwrap().push(chat_id.to_string());
            if self.fail_info.contains(chat_id) {
                return Err(http_error());
            }
            Ok(self.infos.get(chat_id).cloned().unwrap_or(Value::Null))
        }

        async fn messages(&self, _chat_id: &str, limit: usize, offset: usize) -> Result<Vec<Value>> {
            self.message_calls.lock().unwrap().push((limit, offset));
            let page = offset / limit.max(1);
            if self.fail_page == Some(page) {
                return Err(http_error());
            }
            Ok(self.pages.get(page).cloned().unwrap_or_default())
        }

        async fn send_text(&self, _chat_id: &str, _text: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn mark_read(&self, _chat_id: &str, _messages: usize) -> Result<()> {
            Ok(())
        }

        async fn session_status(&self) -> Result<Value> {
            Ok(json!({ "status": "WORKING" }))
        }
    }

    fn full_page(page: usize) -> Vec<Value> {
        (0..MESSAGE_PAGE_SIZE)
            .map(|i| {
                let n = page * MESSAGE_PAGE_SIZE + i;
                json!({ "id": format!("m{n}"), "timestamp": 1_700_000_000 + n })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_load_chats_filters_and_orders_newest_first() {
        let provider = FakeProvider {
            chats: vec![
                json!({ "id": "old@c.us", "name": "Antiga",
                        "lastMessage": { "body": "oi", "timestamp": 1_700_000_000 } }),
                json!({ "id": "status@broadcast", "name": "Status" }),
                json!({ "id": "new@c.us", "name": "Recente",
                        "lastMessage": { "body": "tchau", "timestamp": 1_700_000_500 } }),
                json!({ "name": "sem id" }),
            ],
            ..Default::default()
        };
        let chats = load_chats(&provider).await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "new@c.us");
        assert_eq!(chats[1].id, "old@c.us");
    }

    #[tokio::test]
    async fn test_enrichment_issued_only_for_bare_chats() {
        let provider = FakeProvider {
            chats: vec![
                json!({ "id": "named@c.us", "name": "Ana" }),
                json!({ "id": "5511888887777@c.us" }),
                json!({ "id": "pictured@c.us", "picture": "https://cdn/p.jpg" }),
            ],
            infos: HashMap::from([(
                "5511888887777@c.us".to_string(),
                json!({
                    "contact": { "name": "Carlos", "profilePicUrl": "https://cdn/c.jpg" },
                    "chat": { "name": "ignored" }
                }),
            )]),
            ..Default::default()
        };
        let chats = load_chats(&provider).await.unwrap();

        let calls = provider.info_calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["5511888887777@c.us".to_string()]);

        let enriched = chats.iter().find(|c| c.id == "5511888887777@c.us").unwrap();
        assert_eq!(enriched.name, "Carlos");
        assert_eq!(enriched.avatar.as_deref(), Some("https://cdn/c.jpg"));

        // Still nameless after skipping enrichment: phone-derived fallback.
        let pictured = chats.iter().find(|c| c.id == "pictured@c.us").unwrap();
        assert!(pictured.has_name());
    }

    #[tokio::test]
    async fn test_enrichment_candidate_priority() {
        let provider = FakeProvider {
            chats: vec![json!({ "id": "1@c.us" })],
            infos: HashMap::from([(
                "1@c.us".to_string(),
                json!({
                    "profilePicture": { "url": "https://cdn/nested.jpg" },
                    "chat": { "name": "Da Conversa" },
                    "name": "Da Raiz"
                }),
            )]),
            ..Default::default()
        };
        let chats = load_chats(&provider).await.unwrap();
        assert_eq!(chats[0].name, "Da Conversa");
        assert_eq!(chats[0].avatar.as_deref(), Some("https://cdn/nested.jpg"));
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_the_chat() {
        let provider = FakeProvider {
            chats: vec![
                json!({ "id": "5511999990000@c.us" }),
                json!({ "id": "ok@c.us", "name": "Ok" }),
            ],
            fail_info: HashSet::from(["5511999990000@c.us".to_string()]),
            ..Default::default()
        };
        let chats = load_chats(&provider).await.unwrap();
        assert_eq!(chats.len(), 2);
        let kept = chats.iter().find(|c| c.id == "5511999990000@c.us").unwrap();
        assert_eq!(kept.name, "+5511999990000");
    }

    #[tokio::test]
    async fn test_overview_failure_propagates() {
        let provider = FakeProvider {
            fail_overview: true,
            ..Default::default()
        };
        assert!(load_chats(&provider).await.is_err());
    }

    #[tokio::test]
    async fn test_load_messages_paginates_until_short_page() {
        let short: Vec<Value> = (0..40)
            .map(|i| {
                let n = MESSAGE_PAGE_SIZE + i;
                json!({ "id": format!("m{n}"), "timestamp": 1_700_000_000 + n })
            })
            .collect();
        let provider = FakeProvider {
            pages: vec![full_page(0), short],
            ..Default::default()
        };
        let messages = load_messages(&provider, "1@c.us").await.unwrap();
        assert_eq!(messages.len(), MESSAGE_PAGE_SIZE + 40);

        let calls = provider.message_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(MESSAGE_PAGE_SIZE, 0), (MESSAGE_PAGE_SIZE, 100)]);

        // Non-decreasing timestamps, no duplicate ids.
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), messages.len());
    }

    #[tokio::test]
    async fn test_load_messages_dedups_by_id_last_write_wins() {
        let provider = FakeProvider {
            pages: vec![vec![
                json!({ "id": "m1", "timestamp": 1_700_000_000, "ack": 1 }),
                json!({ "id": "m2", "timestamp": 1_700_000_010 }),
                json!({ "id": "m1", "timestamp": 1_700_000_000, "ack": 3 }),
            ]],
            ..Default::default()
        };
        let messages = load_messages(&provider, "1@c.us").await.unwrap();
        assert_eq!(messages.len(), 2);
        let m1 = messages.iter().find(|m| m.id == "m1").unwrap();
        assert_eq!(m1.ack, Some(Ack::Read));
    }

    #[tokio::test]
    async fn test_load_messages_stops_at_page_bound() {
        let provider = FakeProvider {
            pages: (0..MAX_MESSAGE_PAGES + 2).map(full_page).collect(),
            ..Default::default()
        };
        let messages = load_messages(&provider, "1@c.us").await.unwrap();
        assert_eq!(
            provider.message_calls.lock().unwrap().len(),
            MAX_MESSAGE_PAGES
        );
        assert_eq!(messages.len(), MAX_MESSAGE_PAGES * MESSAGE_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_page_error_aborts_the_whole_call() {
        let provider = FakeProvider {
            pages: vec![full_page(0), full_page(1)],
            fail_page: Some(1),
            ..Default::default()
        };
        assert!(load_messages(&provider, "1@c.us").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped_not_fatal() {
        let provider = FakeProvider {
            pages: vec![vec![
                json!({ "id": "m1", "timestamp": 1_700_000_000 }),
                json!({ "timestamp": 1_700_000_001 }),
                json!("garbage"),
            ]],
            ..Default::default()
        };
        let messages = load_messages(&provider, "1@c.us").await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
