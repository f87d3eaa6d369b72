use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html,
    },
    routing::{get, post},
    serve, Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use minijinja::Environment;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::conversation::{is_valid_chat_id, Chat, ConversationState};
use crate::dispatcher::{ChatContext, Dispatcher};
use crate::error::ChatError;
use crate::render::RenderableState;
use crate::session::{session_from_header, FixedSession, Session};
use crate::stream::StreamUpdate;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<Environment<'static>>,
    dispatcher: Dispatcher,
    user_header: String,
    // Live signed-in conversations keyed by owner and chat id. Anonymous
    // conversations are never cached.
    conversations: Cache<String, Arc<ChatContext>>,
}

fn context_cache(capacity: u64, idle: Duration) -> Cache<String, Arc<ChatContext>> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_idle(idle)
        .build()
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, user_header: impl Into<String>) -> Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        Ok(Self {
            templates: Arc::new(templates),
            dispatcher,
            user_header: user_header.into().to_ascii_lowercase(),
            conversations: context_cache(
                constants::CONTEXT_CACHE_CAPACITY,
                constants::CONTEXT_IDLE_TIMEOUT,
            ),
        })
    }

    /// Replaces the live conversation cache with one of the given size and idle timeout.
    pub fn with_context_cache(mut self, capacity: u64, idle: Duration) -> Self {
        self.conversations = context_cache(capacity, idle);
        self
    }

    fn session(&self, headers: &HeaderMap) -> Option<Session> {
        session_from_header(
            headers
                .get(self.user_header.as_str())
                .and_then(|value| value.to_str().ok()),
        )
    }

    fn context_key(session: &Session, chat_id: &str) -> String {
        format!("{}/{}", session.user_id, chat_id)
    }

    /// Anonymous callers get a fresh single-request conversation every time.
    async fn context_for(
        &self,
        session: Option<Session>,
        chat_id: &str,
    ) -> Result<Arc<ChatContext>, ChatError> {
        let Some(session) = session else {
            debug!(%chat_id, "Anonymous submission, using an uncached conversation");
            return Ok(Arc::new(ChatContext::new(
                None,
                ConversationState::with_id(chat_id),
            )));
        };

        let key = Self::context_key(&session, chat_id);
        if let Some(ctx) = self.conversations.get(&key).await {
            return Ok(ctx);
        }

        let sessions = FixedSession::from(Some(session));
        let ctx = ChatContext::open(&sessions, self.dispatcher.persistence(), Some(chat_id)).await?;
        Ok(self
            .conversations
            .entry(key)
            .or_insert_with(async move { Arc::new(ctx) })
            .await
            .into_value())
    }
}

fn create_minijinja_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("index.html", INDEX_TEMPLATE)?;
    Ok(env)
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub path: String,
}

impl From<Chat> for ChatSummary {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            path: chat.path,
        }
    }
}

type ApiError = (StatusCode, String);

fn api_error(e: ChatError) -> ApiError {
    let status = match e {
        ChatError::EmptyInput => StatusCode::BAD_REQUEST,
        ChatError::TurnInProgress(_) => StatusCode::CONFLICT,
        _ => {
            error!(error = %e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

fn check_chat_id(chat_id: &str) -> Result<(), ApiError> {
    if is_valid_chat_id(chat_id) {
        Ok(())
    } else {
        Err((StatusCode::BAD_REQUEST, format!("invalid chat id '{}'", chat_id)))
    }
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    state
        .templates
        .get_template("index.html")
        .and_then(|tmpl| {
            tmpl.render(minijinja::context! {
                title => "Repurposely AI Writer",
                idea_count => 10,
                plan_days => 30,
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn list_chats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let session = state.session(&headers);
    let chats = state
        .dispatcher
        .persistence()
        .list(session.as_ref())
        .await
        .map_err(api_error)?;
    Ok(Json(chats.into_iter().map(ChatSummary::from).collect()))
}

async fn get_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RenderableState>, ApiError> {
    check_chat_id(&chat_id)?;
    let Some(session) = state.session(&headers) else {
        return Ok(Json(Vec::new()));
    };

    let key = AppState::context_key(&session, &chat_id);
    if let Some(ctx) = state.conversations.get(&key).await {
        return Ok(Json(ctx.renderable().await));
    }
    let rendered = state
        .dispatcher
        .persistence()
        .hydrate(Some(&session), &chat_id)
        .await
        .map_err(api_error)?
        .map(|(_, rendered)| rendered)
        .unwrap_or_default();
    Ok(Json(rendered))
}

async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    check_chat_id(&chat_id)?;
    let Some(session) = state.session(&headers) else {
        return Err((StatusCode::UNAUTHORIZED, "sign in to delete chats".to_string()));
    };

    let removed = state
        .dispatcher
        .persistence()
        .remove(Some(&session), &chat_id)
        .await
        .map_err(api_error)?;
    state
        .conversations
        .invalidate(&AppState::context_key(&session, &chat_id))
        .await;

    if removed {
        info!(%chat_id, user_id = %session.user_id, "Deleted chat");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("chat '{}' not found", chat_id)))
    }
}

fn sse_event(name: &str, payload: serde_json::Value) -> Event {
    Event::default()
        .event(name)
        .data(serde_json::to_string(&payload).unwrap_or_default())
}

fn update_event(update: StreamUpdate) -> Event {
    match update {
        StreamUpdate::Delta(text) => sse_event("delta", serde_json::json!({ "text": text })),
        StreamUpdate::Done(content) => sse_event("done", serde_json::json!({ "content": content })),
        StreamUpdate::Failed(message) => {
            sse_event("error", serde_json::json!({ "message": message }))
        }
    }
}

/// Streams the assistant reply as server-sent events: one `user` event,
/// any number of `delta` events, then exactly one `done` or `error`.
async fn submit_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    check_chat_id(&chat_id)?;
    let session = state.session(&headers);
    let ctx = state.context_for(session, &chat_id).await.map_err(api_error)?;
    let submission = state
        .dispatcher
        .submit(ctx, &req.content)
        .await
        .map_err(|e| {
            warn!(%chat_id, error = %e, "Rejected submission");
            api_error(e)
        })?;

    let user_event = sse_event(
        "user",
        serde_json::to_value(&submission.user_message).unwrap_or_default(),
    );
    let events = stream::once(async move { user_event })
        .chain(submission.stream.into_stream().map(update_event))
        .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/chats", get(list_chats_handler))
        .route(
            "/api/chats/:chat_id",
            get(get_chat_handler).delete(delete_chat_handler),
        )
        .route(
            "/api/chats/:chat_id/messages",
            post(submit_handler),
        )
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())) // Add request logging
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
