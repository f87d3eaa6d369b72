use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conversation::{Chat, ConversationState};
use crate::error::ChatResult;
use crate::render::{derive_renderable, RenderableState};
use crate::session::Session;
use crate::store::ChatStore;

/// Bridges conversation state and the [`ChatStore`], gated on a session.
///
/// Every operation is a silent no-op for anonymous callers.
#[derive(Clone)]
pub struct PersistenceSink {
    store: Arc<dyn ChatStore>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Upserts the conversation under the session user. Returns the written record.
    pub async fn finalize(
        &self,
        session: Option<&Session>,
        state: &ConversationState,
    ) -> ChatResult<Option<Chat>> {
        let Some(session) = session else {
            debug!(chat_id = %state.chat_id(), "Anonymous session, skipping chat save");
            return Ok(None);
        };
        if state.is_empty() {
            debug!(chat_id = %state.chat_id(), "Empty conversation, skipping chat save");
            return Ok(None);
        }

        let chat = Chat::from_state(state, session.user_id.clone());
        if !self.store.save_owned(&chat).await? {
            warn!(chat_id = %chat.id, user_id = %chat.user_id, "Chat belongs to another user, skipping save");
            return Ok(None);
        }
        info!(chat_id = %chat.id, user_id = %chat.user_id, messages = chat.messages.len(), "Saved chat");
        Ok(Some(chat))
    }

    /// Loads a chat owned by the session user along with its renderable projection.
    pub async fn hydrate(
        &self,
        session: Option<&Session>,
        chat_id: &str,
    ) -> ChatResult<Option<(ConversationState, RenderableState)>> {
        let Some(chat) = self.owned_chat(session, chat_id).await? else {
            return Ok(None);
        };
        let state = ConversationState::from_chat(chat);
        let rendered = derive_renderable(&state);
        Ok(Some((state, rendered)))
    }

    pub async fn list(&self, session: Option<&Session>) -> ChatResult<Vec<Chat>> {
        match session {
            Some(session) => self.store.list_for_user(&session.user_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Deletes a chat owned by the session user. Returns whether anything was removed.
    pub async fn remove(&self, session: Option<&Session>, chat_id: &str) -> ChatResult<bool> {
        if self.owned_chat(session, chat_id).await?.is_none() {
            return Ok(false);
        }
        self.store.remove(chat_id).await
    }

    async fn owned_chat(&self, session: Option<&Session>, chat_id: &str) -> ChatResult<Option<Chat>> {
        let Some(session) = session else {
            return Ok(None);
        };
        Ok(self
            .store
            .get(chat_id)
            .await?
            .filter(|chat| chat.user_id == session.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::store::MemoryChatStore;

    fn sink() -> (PersistenceSink, Arc<MemoryChatStore>) {
        let store = Arc::new(MemoryChatStore::new());
        (PersistenceSink::new(store.clone()), store)
    }

    fn state_with(text: &str) -> ConversationState {
        let mut state = ConversationState::with_id("chat-1");
        state.push(Message::user(text));
        state
    }

    #[tokio::test]
    async fn test_anonymous_finalize_writes_nothing() {
        let (sink, store) = sink();
        let saved = sink.finalize(None, &state_with("hello")).await.unwrap();
        assert!(saved.is_none());
        assert!(store.get("chat-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_state_is_not_saved() {
        let (sink, store) = sink();
        let session = Session::new("u1");
        let saved = sink
            .finalize(Some(&session), &ConversationState::with_id("chat-1"))
            .await
            .unwrap();
        assert!(saved.is_none());
        assert!(store.get("chat-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finalize_truncates_title() {
        let (sink, store) = sink();
        let session = Session::new("u1");
        let text = "x".repeat(250);
        sink.finalize(Some(&session), &state_with(&text)).await.unwrap();

        let chat = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(chat.title.chars().count(), 100);
        assert!(text.starts_with(&chat.title));
        assert_eq!(chat.user_id, "u1");
        assert_eq!(chat.path, "/chat/chat-1");
    }

    #[tokio::test]
    async fn test_hydrate_requires_owner() {
        let (sink, _store) = sink();
        let owner = Session::new("owner");
        let stranger = Session::new("stranger");
        sink.finalize(Some(&owner), &state_with("hello")).await.unwrap();

        assert!(sink.hydrate(None, "chat-1").await.unwrap().is_none());
        assert!(sink.hydrate(Some(&stranger), "chat-1").await.unwrap().is_none());

        let (state, rendered) = sink.hydrate(Some(&owner), "chat-1").await.unwrap().unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(rendered.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_owner_scoped() {
        let (sink, store) = sink();
        let owner = Session::new("owner");
        sink.finalize(Some(&owner), &state_with("hello")).await.unwrap();

        assert!(!sink.remove(None, "chat-1").await.unwrap());
        assert!(!sink.remove(Some(&Session::new("other")), "chat-1").await.unwrap());
        assert!(sink.remove(Some(&owner), "chat-1").await.unwrap());
        assert!(store.get("chat-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finalize_never_overwrites_foreign_chat() {
        let (sink, store) = sink();
        sink.finalize(Some(&Session::new("owner")), &state_with("mine"))
            .await
            .unwrap();
        let saved = sink
            .finalize(Some(&Session::new("intruder")), &state_with("theirs"))
            .await
            .unwrap();
        assert!(saved.is_none());
        let chat = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(chat.user_id, "owner");
        assert_eq!(chat.title, "mine");
    }

    #[tokio::test]
    async fn test_concurrent_first_saves_have_one_owner() {
        let (sink, store) = sink();
        let alice = Session::new("alice");
        let bob = Session::new("bob");
        let alice_state = state_with("from alice");
        let bob_state = state_with("from bob");

        let (a, b) = tokio::join!(
            sink.finalize(Some(&alice), &alice_state),
            sink.finalize(Some(&bob), &bob_state),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.is_some() != b.is_some(), "exactly one save must win");

        let winner = a.or(b).unwrap();
        let stored = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(stored.user_id, winner.user_id);
        assert_eq!(stored.title, winner.title);
    }

    #[tokio::test]
    async fn test_list_anonymous_is_empty() {
        let (sink, _store) = sink();
        sink.finalize(Some(&Session::new("u1")), &state_with("hi")).await.unwrap();
        assert!(sink.list(None).await.unwrap().is_empty());
        assert_eq!(sink.list(Some(&Session::new("u1"))).await.unwrap().len(), 1);
    }
}
