//! Conversation and message storage.
//!
//! The store is consulted by the REST layer only. The hub never reads or
//! writes it; clients learn about changes through relayed `message` and
//! `delete` events and re-fetch the thread from here.

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// A conversation identifier.
pub type ConversationId = String;

/// A message identifier.
pub type MessageId = String;

/// Maximum message length in characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Counter mixed into generated identifiers so they stay unique within a
/// single clock tick.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn generate_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}{:04x}", timestamp, counter & 0xffff)
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// The requester may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request failed validation.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The storage backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// Exactly two distinct participants.
    pub participants: [UserId; 2],
    /// When the last message was sent (unix millis).
    pub last_message_at: u64,
    /// When the conversation was created (unix millis).
    pub created_at: u64,
}

impl Conversation {
    /// Whether `user` takes part in this conversation.
    #[must_use]
    pub fn includes(&self, user: &str) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// The participant that is not `user`.
    #[must_use]
    pub fn other_participant(&self, user: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == user => Some(b.as_str()),
            [a, b] if b == user => Some(a.as_str()),
            _ => None,
        }
    }
}

/// A message within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender: UserId,
    /// The other participant.
    pub recipient: UserId,
    /// Message text.
    pub content: String,
    /// When the message was created (unix millis).
    pub created_at: u64,
}

/// A message to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Existing conversation, or `None` to find or create one between sender
    /// and recipient.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender: UserId,
    /// The other participant.
    pub recipient: UserId,
    /// Message text.
    pub content: String,
}

/// Persistence for conversations and messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Get the conversation between `a` and `b`, creating it if needed.
    async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError>;

    /// Get a conversation by id.
    async fn conversation(&self, id: &str) -> Result<Conversation, StoreError>;

    /// All conversations `user` takes part in, most recently active first.
    async fn conversations_for(&self, user: &str) -> Result<Vec<Conversation>, StoreError>;

    /// Store a message and bump its conversation's activity time.
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    /// Messages in a conversation, oldest first.
    async fn messages_in(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Delete a message. Only its sender may delete it.
    async fn delete_message(&self, id: &str, requester: &str) -> Result<Message, StoreError>;
}

/// Validate message content.
///
/// # Errors
///
/// Returns an error if the content is blank or too long.
pub fn validate_content(content: &str) -> Result<(), StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::Invalid("content cannot be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(StoreError::Invalid(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

struct StoredMessage {
    seq: u64,
    message: Message,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    conversations: DashMap<ConversationId, Conversation>,
    /// Sorted participant pair -> conversation id.
    pairs: DashMap<(UserId, UserId), ConversationId>,
    messages: DashMap<MessageId, StoredMessage>,
    seq: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(a: &str, b: &str) -> (UserId, UserId) {
        if a <= b {
            (a.to_owned(), b.to_owned())
        } else {
            (b.to_owned(), a.to_owned())
        }
    }

    fn touch(&self, conversation_id: &str, at: u64) {
        if let Some(mut conversation) = self.conversations.get_mut(conversation_id) {
            conversation.last_message_at = conversation.last_message_at.max(at);
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        if a.is_empty() || b.is_empty() {
            return Err(StoreError::Invalid("participants cannot be empty".into()));
        }
        if a == b {
            return Err(StoreError::Invalid(
                "a conversation needs two distinct participants".into(),
            ));
        }

        let id = self
            .pairs
            .entry(Self::pair_key(a, b))
            .or_insert_with(|| {
                let now = now_millis();
                let conversation = Conversation {
                    id: generate_id(),
                    participants: [a.to_owned(), b.to_owned()],
                    last_message_at: now,
                    created_at: now,
                };
                debug!(conversation = %conversation.id, "Created conversation");
                let id = conversation.id.clone();
                self.conversations.insert(id.clone(), conversation);
                id
            })
            .clone();

        self.conversation(&id).await
    }

    async fn conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        self.conversations
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::NotFound("conversation", id.to_owned()))
    }

    async fn conversations_for(&self, user: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.includes(user))
            .map(|c| c.clone())
            .collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        validate_content(&new.content)?;

        let conversation = match &new.conversation_id {
            Some(id) => {
                let conversation = self.conversation(id).await?;
                if !conversation.includes(&new.sender) {
                    return Err(StoreError::Forbidden(format!(
                        "{} is not a participant of {}",
                        new.sender, id
                    )));
                }
                if conversation.other_participant(&new.sender) != Some(new.recipient.as_str()) {
                    return Err(StoreError::Invalid(format!(
                        "{} is not the other participant of {}",
                        new.recipient, id
                    )));
                }
                conversation
            }
            None => {
                self.find_or_create_conversation(&new.sender, &new.recipient)
                    .await?
            }
        };

        let message = Message {
            id: generate_id(),
            conversation_id: conversation.id.clone(),
            sender: new.sender,
            recipient: new.recipient,
            content: new.content,
            created_at: now_millis(),
        };

        self.messages.insert(
            message.id.clone(),
            StoredMessage {
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                message: message.clone(),
            },
        );
        self.touch(&conversation.id, message.created_at);

        debug!(
            conversation = %conversation.id,
            message = %message.id,
            "Stored message"
        );
        Ok(message)
    }

    async fn messages_in(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<(u64, Message)> = self
            .messages
            .iter()
            .filter(|m| m.message.conversation_id == conversation_id)
            .map(|m| (m.seq, m.message.clone()))
            .collect();
        messages.sort_by_key(|(seq, m)| (m.created_at, *seq));
        Ok(messages.into_iter().map(|(_, m)| m).collect())
    }

    async fn delete_message(&self, id: &str, requester: &str) -> Result<Message, StoreError> {
        let sender = self
            .messages
            .get(id)
            .map(|m| m.message.sender.clone())
            .ok_or_else(|| StoreError::NotFound("message", id.to_owned()))?;

        if sender != requester {
            return Err(StoreError::Forbidden(format!(
                "{requester} did not send message {id}"
            )));
        }

        let (_, stored) = self
            .messages
            .remove(id)
            .ok_or_else(|| StoreError::NotFound("message", id.to_owned()))?;

        debug!(message = %id, "Deleted message");
        Ok(stored.message)
    }
}
