use anyhow::{Context, Result};
use std::sync::Arc;

use whatsapp_sync_rs::config::ConfigResolver;
use whatsapp_sync_rs::poller::DEFAULT_POLL_INTERVAL;
use whatsapp_sync_rs::provider::{default_http_client, HttpProvider};
use whatsapp_sync_rs::store::SyncStore;

/// End-to-end smoke driver: resolve the tenant config, synchronize the
/// chat list, open the newest chat and watch session status until Ctrl+C.
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config_url = std::env::var("WHATSAPP_CONFIG_URL")
        .context("WHATSAPP_CONFIG_URL must point at the tenant connection-config endpoint")?;

    let http = default_http_client().context("failed to build HTTP client")?;
    let resolver = Arc::new(ConfigResolver::new(http.clone(), config_url));
    if let Ok(session) = std::env::var("WHATSAPP_SESSION") {
        resolver.set_session_override(Some(session));
    }

    let provider = Arc::new(HttpProvider::new(http, resolver));
    let store = SyncStore::new(provider);

    let chats = store.load_chats().await?;
    println!("{} chats:", chats.len());
    for chat in &chats {
        let preview = chat
            .last_message
            .as_ref()
            .map(|m| m.body.as_str())
            .unwrap_or("-");
        println!("  [{:>3}] {:30} {}", chat.unread_count, chat.name, preview);
    }

    if let Some(first) = chats.first() {
        store.select_chat(&first.id).await?;
        let messages = store.active_chat_messages().await;
        println!("--- {} ({} messages) ---", first.name, messages.len());
        let start = messages.len().saturating_sub(10);
        for message in &messages[start..] {
            let when = chrono::DateTime::from_timestamp_millis(message.timestamp)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let who = if message.from_me {
                "me"
            } else {
                message.author.as_deref().unwrap_or("them")
            };
            println!("  {} {}: {}", when, who, message.body.as_deref().unwrap_or("[media]"));
        }
    }

    store.start_polling(DEFAULT_POLL_INTERVAL).await;
    println!("Watching session status; press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    store.stop().await;
    if let Some(status) = store.session_status().await {
        println!("Last session status: {}", status.status);
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
