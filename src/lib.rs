//! Chat synchronization client for a WAHA-style WhatsApp-bridging provider.
//!
//! Resolves per-tenant connection configuration, normalizes the provider's
//! untyped payloads into a canonical domain model, synchronizes chat
//! overviews and message history, and polls session status in the
//! background. All state is held in memory and rebuilt from the provider on
//! load.

pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod poller;
pub mod provider;
pub mod store;
pub mod sync;

pub use error::{Result, SyncError};
pub use model::{Ack, ChatOverview, LastMessage, Message, MessageKind, SessionStatus};
pub use store::SyncStore;
