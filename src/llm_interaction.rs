use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::constants;
use crate::conversation::ConversationState;
use crate::error::{ChatError, ChatResult};
use crate::message::{AssistantContent, MessageContent, Role};
use crate::stream::StreamSink;

/// One `{role, content}` pair as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    /// Builds a request from the whole history.
    ///
    /// Tool invocations and their results are not forwarded; tool use is
    /// disabled for the writing assistant.
    pub fn from_conversation(
        model: impl Into<String>,
        system: impl Into<String>,
        state: &ConversationState,
    ) -> Self {
        let messages = state
            .messages()
            .iter()
            .filter_map(|message| {
                let (role, content) = match &message.content {
                    MessageContent::User(text) => (Role::User, text),
                    MessageContent::System(text) => (Role::System, text),
                    MessageContent::Assistant(AssistantContent::Text(text)) => {
                        (Role::Assistant, text)
                    }
                    MessageContent::Assistant(AssistantContent::ToolCalls(_))
                    | MessageContent::Tool(_) => return None,
                };
                Some(ChatMessage {
                    role,
                    content: content.clone(),
                })
            })
            .collect();

        Self {
            model: model.into(),
            system: system.into(),
            messages,
        }
    }
}

/// A chat-completion backend that streams its answer.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Pushes every text delta into `sink` and returns the accumulated text
    /// once the endpoint signals completion. Does not finish the sink.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        sink: &StreamSink,
    ) -> ChatResult<String>;
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl ModelSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: constants::MODEL_BASE_URL.clone(),
            api_key: constants::MODEL_API_KEY.clone(),
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            base_backoff: constants::DEFAULT_BASE_BACKOFF,
        }
    }
}

// Structures matching the OpenAI-compatible /chat/completions endpoint
#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<WireError>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireError {
    message: String,
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Delta { text: String, finished: bool },
    Done,
}

fn parse_event(data: &str) -> ChatResult<StreamEvent> {
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::MalformedResponse(format!("{}: {}", e, data)))?;
    if let Some(err) = chunk.error {
        return Err(ChatError::Model(err.message));
    }

    let mut text = String::new();
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            text.push_str(&content);
        }
        finished |= choice.finish_reason.is_some();
    }
    Ok(StreamEvent::Delta { text, finished })
}

/// Splits a server-sent-events byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = Self::data_of(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::data_of(&line)
    }

    fn data_of(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);
        line.strip_prefix("data:")
            .map(|data| data.trim_start().to_string())
            .filter(|data| !data.is_empty())
    }
}

pub struct OpenAiCompatibleClient {
    http: Client,
    settings: ModelSettings,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: ModelSettings) -> ChatResult<Self> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    /// Sends the request, retrying transient failures with exponential backoff.
    async fn send_with_retry(&self, body: &WireRequest<'_>) -> ChatResult<Response> {
        let url = self.endpoint();
        let mut attempt = 0;
        let mut backoff = self.settings.base_backoff;

        loop {
            match self.send_once(&url, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    warn!(%url, error = %e, attempt, "Transient model endpoint failure, retrying in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, url: &str, body: &WireRequest<'_>) -> ChatResult<Response> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, error_body = %body, "Model endpoint request failed");
            return Err(ChatError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    #[instrument(skip(self, request, sink), fields(model = %request.model, messages = request.messages.len()))]
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        sink: &StreamSink,
    ) -> ChatResult<String> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: Role::System.as_str(),
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        let body = WireRequest {
            model: &request.model,
            messages,
            stream: true,
        };

        let response = self.send_with_retry(&body).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut content = String::new();
        let mut finished = false;
        // A dropped receiver stops forwarding only. The reply is still read to the
        // end so the turn can commit it.
        let mut forwarding = true;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                match parse_event(&data)? {
                    StreamEvent::Done => {
                        debug!(chars = content.len(), "Model stream completed");
                        return Ok(content);
                    }
                    StreamEvent::Delta { text, finished: last } => {
                        if !text.is_empty() {
                            content.push_str(&text);
                            forward(sink, &mut forwarding, text).await;
                        }
                        finished |= last;
                    }
                }
            }
        }

        if let Some(data) = decoder.finish() {
            match parse_event(&data)? {
                StreamEvent::Done => finished = true,
                StreamEvent::Delta { text, finished: last } => {
                    if !text.is_empty() {
                        content.push_str(&text);
                        forward(sink, &mut forwarding, text).await;
                    }
                    finished |= last;
                }
            }
        }

        if finished {
            Ok(content)
        } else {
            Err(ChatError::MalformedResponse(
                "stream ended before a completion signal".to_string(),
            ))
        }
    }
}

async fn forward(sink: &StreamSink, forwarding: &mut bool, text: String) {
    if *forwarding && !sink.update(text).await {
        debug!("Response stream receiver dropped, reading the rest without forwarding");
        *forwarding = false;
    }
}
