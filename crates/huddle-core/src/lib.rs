//! # huddle-core
//!
//! Connection registry, presence counting, and broadcast fan-out for the
//! huddle realtime messaging hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Which connections are open and which user each one represents
//! - **Presence** - Reference-counted online state per user, across tabs
//! - **Fan-out** - Best-effort delivery of one event to many connections
//! - **Hub** - The per-connection state machine tying the three together
//! - **Store** - Conversation/message persistence used by the REST layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│   Fan-out   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │
//!                        ▼       ▼
//!              ┌──────────┐   ┌──────────┐
//!              │ Registry │──▶│ Presence │
//!              └──────────┘   └──────────┘
//! ```

pub mod connection;
pub mod fanout;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod store;

pub use connection::{CloseReason, ConnectionId, ConnectionState, DeliveryError, Outbox};
pub use fanout::FanoutReport;
pub use hub::{Dispatch, DropReason, Hub, HubConfig, HubStats};
pub use presence::PresenceCounter;
pub use registry::{Identified, Registry, Released, RepeatIdentify, Unregistered};
pub use store::{Conversation, ConversationStore, MemoryStore, Message, NewMessage, StoreError};
