//! # huddle-protocol
//!
//! Wire events for the huddle realtime messaging hub.
//!
//! Every event is a UTF-8 JSON object carried in a single WebSocket frame.
//! The `type` field selects the event:
//!
//! - `init` - Bind the connection to a user (`userId`)
//! - `message` / `typing` / `delete` / `presence` - Relayed verbatim to every
//!   other connection
//! - `presence` (server to client) - A user's aggregate online state changed
//!
//! Anything else is rejected by the decoder and dropped by the hub.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, ServerEvent};
//!
//! let event = codec::decode(br#"{"type":"init","userId":"u1"}"#).unwrap();
//! assert_eq!(event, ClientEvent::Init { user_id: "u1".into() });
//!
//! let online = codec::encode(&ServerEvent::presence("u1", true)).unwrap();
//! assert_eq!(online.as_str(), r#"{"type":"presence","userId":"u1","online":true}"#);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, encode_relay, ProtocolError, MAX_EVENT_SIZE};
pub use events::{ClientEvent, Encoded, RelayKind, ServerEvent, UserId};
