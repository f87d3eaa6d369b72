use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TITLE_MAX_CHARS;
use crate::message::{new_id, Message};

/// The authoritative, serializable record of one conversation.
///
/// Messages can only be appended; nothing hands out mutable access to an
/// existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    chat_id: String,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::with_id(new_id())
    }

    pub fn with_id(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Rebuilds a state from a stored chat.
    pub fn from_chat(chat: Chat) -> Self {
        Self {
            chat_id: chat.id,
            created_at: chat.created_at,
            messages: chat.messages,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted conversation as handed to a [`crate::store::ChatStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub path: String,
}

impl Chat {
    pub fn from_state(state: &ConversationState, user_id: impl Into<String>) -> Self {
        let title = state
            .messages()
            .first()
            .and_then(Message::text)
            .map(derive_title)
            .unwrap_or_default();

        Self {
            id: state.chat_id().to_string(),
            title,
            user_id: user_id.into(),
            created_at: state.created_at(),
            messages: state.messages().to_vec(),
            path: chat_path(state.chat_id()),
        }
    }
}

/// Chat ids double as file names and URL segments: `[A-Za-z0-9_-]+`.
pub fn is_valid_chat_id(chat_id: &str) -> bool {
    !chat_id.is_empty()
        && chat_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn chat_path(chat_id: &str) -> String {
    format!("/chat/{}", chat_id)
}

/// Truncates to [`TITLE_MAX_CHARS`] characters without splitting a code point.
pub fn derive_title(text: &str) -> String {
    text.chars().take(TITLE_MAX_CHARS).collect()
}
