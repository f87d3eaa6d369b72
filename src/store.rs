//! Durable chat storage.
//!
//! Directory layout of [`JsonFileChatStore`]:
//! ```text
//! data_dir/
//! ├── <chat-id>.json
//! └── <chat-id>.json
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::conversation::{is_valid_chat_id, Chat};
use crate::error::ChatResult;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Inserts or replaces the chat with the same id.
    async fn save(&self, chat: &Chat) -> ChatResult<()>;

    /// Inserts or replaces the chat unless the stored record belongs to another
    /// user. The ownership check and the write happen under one lock. Returns
    /// whether the chat was written.
    async fn save_owned(&self, chat: &Chat) -> ChatResult<bool>;

    async fn get(&self, chat_id: &str) -> ChatResult<Option<Chat>>;

    /// Chats owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Chat>>;

    /// Returns whether a chat was removed.
    async fn remove(&self, chat_id: &str) -> ChatResult<bool>;
}

fn newest_first(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[derive(Debug, Default)]
pub struct MemoryChatStore {
    chats: RwLock<HashMap<String, Chat>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn save(&self, chat: &Chat) -> ChatResult<()> {
        self.chats.write().await.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn save_owned(&self, chat: &Chat) -> ChatResult<bool> {
        let mut chats = self.chats.write().await;
        if chats.get(&chat.id).is_some_and(|existing| existing.user_id != chat.user_id) {
            return Ok(false);
        }
        chats.insert(chat.id.clone(), chat.clone());
        Ok(true)
    }

    async fn get(&self, chat_id: &str) -> ChatResult<Option<Chat>> {
        Ok(self.chats.read().await.get(chat_id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .chats
            .read()
            .await
            .values()
            .filter(|chat| chat.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut chats);
        Ok(chats)
    }

    async fn remove(&self, chat_id: &str) -> ChatResult<bool> {
        Ok(self.chats.write().await.remove(chat_id).is_some())
    }
}

/// One JSON file per chat, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileChatStore {
    dir: PathBuf,
    // Serializes read-check-write sequences within this process.
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileChatStore {
    pub async fn open(dir: impl AsRef<Path>) -> ChatResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened chat store");
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Chat ids come from clients and are never used as paths unless valid.
    fn path_for(&self, chat_id: &str) -> Option<PathBuf> {
        is_valid_chat_id(chat_id).then(|| self.dir.join(format!("{}.json", chat_id)))
    }

    async fn read_chat(path: &Path) -> ChatResult<Option<Chat>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn checked_path(&self, chat_id: &str) -> ChatResult<PathBuf> {
        let path = self.path_for(chat_id).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid chat id '{}'", chat_id),
            )
        })?;
        Ok(path)
    }

    async fn write_chat(path: &Path, chat: &Chat) -> ChatResult<()> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(chat)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        debug!(chat_id = %chat.id, "Saved chat");
        Ok(())
    }
}

#[async_trait]
impl ChatStore for JsonFileChatStore {
    async fn save(&self, chat: &Chat) -> ChatResult<()> {
        let path = self.checked_path(&chat.id)?;
        let _guard = self.write_lock.lock().await;
        Self::write_chat(&path, chat).await
    }

    async fn save_owned(&self, chat: &Chat) -> ChatResult<bool> {
        let path = self.checked_path(&chat.id)?;
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = Self::read_chat(&path).await? {
            if existing.user_id != chat.user_id {
                return Ok(false);
            }
        }
        Self::write_chat(&path, chat).await?;
        Ok(true)
    }

    async fn get(&self, chat_id: &str) -> ChatResult<Option<Chat>> {
        match self.path_for(chat_id) {
            Some(path) => Self::read_chat(&path).await,
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Chat>> {
        let mut chats = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_chat(&path).await {
                Ok(Some(chat)) if chat.user_id == user_id => chats.push(chat),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable chat file"),
            }
        }
        newest_first(&mut chats);
        Ok(chats)
    }

    async fn remove(&self, chat_id: &str) -> ChatResult<bool> {
        let Some(path) = self.path_for(chat_id) else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
