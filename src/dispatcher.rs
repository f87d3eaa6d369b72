use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::conversation::ConversationState;
use crate::error::{ChatError, ChatResult};
use crate::llm_interaction::{CompletionRequest, ModelClient};
use crate::message::Message;
use crate::persistence::PersistenceSink;
use crate::render::{derive_renderable, RenderableState};
use crate::session::{Session, SessionProvider};
use crate::stream::{stream_channel, StreamHandle, StreamSink};

/// Everything one conversation needs, passed explicitly to each operation.
pub struct ChatContext {
    chat_id: String,
    session: Option<Session>,
    state: Mutex<ConversationState>,
    // One permit: at most one response streams per conversation.
    turn: Arc<Semaphore>,
}

impl ChatContext {
    pub fn new(session: Option<Session>, state: ConversationState) -> Self {
        Self {
            chat_id: state.chat_id().to_string(),
            session,
            state: Mutex::new(state),
            turn: Arc::new(Semaphore::new(1)),
        }
    }

    /// Resolves the session and, for a known chat owned by it, restores the stored history.
    pub async fn open(
        sessions: &dyn SessionProvider,
        persistence: &PersistenceSink,
        chat_id: Option<&str>,
    ) -> ChatResult<Self> {
        let session = sessions.current().await;
        let state = match chat_id {
            Some(id) => match persistence.hydrate(session.as_ref(), id).await? {
                Some((state, _)) => {
                    debug!(chat_id = %id, messages = state.len(), "Restored chat");
                    state
                }
                None => ConversationState::with_id(id),
            },
            None => ConversationState::new(),
        };
        Ok(Self::new(session, state))
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub async fn snapshot(&self) -> ConversationState {
        self.state.lock().await.clone()
    }

    pub async fn renderable(&self) -> RenderableState {
        derive_renderable(&*self.state.lock().await)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub model: String,
    pub system_prompt: String,
    pub response_timeout: Duration,
}

impl DispatchSettings {
    pub fn from_env() -> Self {
        Self {
            model: constants::MODEL_NAME.clone(),
            system_prompt: constants::SYSTEM_PROMPT.to_string(),
            response_timeout: *constants::RESPONSE_TIMEOUT,
        }
    }
}

/// Result of a submission: the user message already appended, plus the
/// handle the assistant's reply streams into.
#[derive(Debug)]
pub struct Submission {
    pub user_message: Message,
    pub stream: StreamHandle,
}

#[derive(Clone)]
pub struct Dispatcher {
    model: Arc<dyn ModelClient>,
    persistence: PersistenceSink,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        model: Arc<dyn ModelClient>,
        persistence: PersistenceSink,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            model,
            persistence,
            settings,
        }
    }

    pub fn persistence(&self) -> &PersistenceSink {
        &self.persistence
    }

    /// Appends `text` as a user message and starts streaming the reply.
    ///
    /// The user message is in the conversation by the time this returns. The
    /// reply is committed as one assistant message just before the handle's
    /// `Done` update; on failure nothing is committed and the handle ends
    /// with `Failed`.
    pub async fn submit(&self, ctx: Arc<ChatContext>, text: &str) -> ChatResult<Submission> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let permit = ctx
            .turn
            .clone()
            .try_acquire_owned()
            .map_err(|_| ChatError::TurnInProgress(ctx.chat_id().to_string()))?;

        let user_message = Message::user(text);
        let request = {
            let mut state = ctx.state.lock().await;
            state.push(user_message.clone());
            CompletionRequest::from_conversation(
                self.settings.model.as_str(),
                self.settings.system_prompt.as_str(),
                &state,
            )
        };
        info!(chat_id = %ctx.chat_id(), messages = request.messages.len(), "Submitting user message");

        let (sink, stream) = stream_channel();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run_turn(ctx, request, sink, permit).await;
        });

        Ok(Submission {
            user_message,
            stream,
        })
    }

    async fn run_turn(
        self,
        ctx: Arc<ChatContext>,
        request: CompletionRequest,
        sink: StreamSink,
        permit: OwnedSemaphorePermit,
    ) {
        let timeout = self.settings.response_timeout;
        let result = tokio::time::timeout(timeout, self.model.stream_completion(&request, &sink))
            .await
            .unwrap_or(Err(ChatError::Timeout(timeout)));

        let snapshot = {
            let mut state = ctx.state.lock().await;
            if let Ok(content) = &result {
                state.push(Message::assistant(content.clone()));
            }
            state.clone()
        };

        if let Err(e) = self.persistence.finalize(ctx.session(), &snapshot).await {
            error!(chat_id = %ctx.chat_id(), error = %e, "Failed to persist chat");
        }

        // Free the turn before the terminal update so the caller can submit again immediately.
        drop(permit);

        match result {
            Ok(content) => {
                debug!(chat_id = %ctx.chat_id(), chars = content.len(), "Assistant reply committed");
                sink.done(content).await;
            }
            Err(e) => {
                warn!(chat_id = %ctx.chat_id(), error = %e, "Model call failed");
                sink.fail(e.to_string()).await;
            }
        }
    }
}
