#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use repurposely::conversation::Chat;
use repurposely::dispatcher::{DispatchSettings, Dispatcher};
use repurposely::error::{ChatError, ChatResult};
use repurposely::llm_interaction::{CompletionRequest, ModelClient};
use repurposely::persistence::PersistenceSink;
use repurposely::store::{ChatStore, MemoryChatStore};
use repurposely::stream::StreamSink;

pub const TEST_SYSTEM_PROMPT: &str = "You are a test writer.";

/// What the scripted model does on every call.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(Vec<&'static str>),
    Fail(&'static str),
    Hang,
}

/// A model client that replays a fixed script and records every request.
pub struct ScriptedModel {
    script: Script,
    gate: Option<Arc<Notify>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Holds every reply until `gate.notify_one()` is called.
    pub fn gated(script: Script, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        sink: &StreamSink,
    ) -> ChatResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.script {
            Script::Reply(deltas) => {
                for delta in deltas {
                    sink.update(*delta).await;
                }
                Ok(deltas.concat())
            }
            Script::Fail(message) => Err(ChatError::Model(message.to_string())),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// A memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryChatStore,
    saves: AtomicUsize,
}

impl CountingStore {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatStore for CountingStore {
    async fn save(&self, chat: &Chat) -> ChatResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(chat).await
    }

    async fn save_owned(&self, chat: &Chat) -> ChatResult<bool> {
        let written = self.inner.save_owned(chat).await?;
        if written {
            self.saves.fetch_add(1, Ordering::SeqCst);
        }
        Ok(written)
    }

    async fn get(&self, chat_id: &str) -> ChatResult<Option<Chat>> {
        self.inner.get(chat_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Chat>> {
        self.inner.list_for_user(user_id).await
    }

    async fn remove(&self, chat_id: &str) -> ChatResult<bool> {
        self.inner.remove(chat_id).await
    }
}

pub fn test_settings() -> DispatchSettings {
    DispatchSettings {
        model: "test-model".to_string(),
        system_prompt: TEST_SYSTEM_PROMPT.to_string(),
        response_timeout: Duration::from_secs(5),
    }
}

pub fn dispatcher_with(
    model: Arc<ScriptedModel>,
    store: Arc<CountingStore>,
    settings: DispatchSettings,
) -> Dispatcher {
    Dispatcher::new(model, PersistenceSink::new(store), settings)
}
