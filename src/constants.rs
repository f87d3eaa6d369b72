// Environment-backed defaults. CLI flags override these where they exist.

use std::env;
use std::time::Duration;

/// Maximum number of characters kept from the first message when titling a chat.
pub const TITLE_MAX_CHARS: usize = 100;

/// Capacity of the delta channel between the model task and a stream handle.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Live signed-in conversations kept by the web server before the least used are evicted.
pub const CONTEXT_CACHE_CAPACITY: u64 = 10_000;
/// Idle live conversations are dropped after this long; they are restored from the store on next use.
pub const CONTEXT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const SYSTEM_PROMPT: &str = "\
You are an AI writer for Repurposly.ai called Repurposly Writer, you are designed to assist users in writing and editing text. \
You can guide users through the process of drafting, refining, and finalizing their text. \
Users can discuss their writing goals with you, and you can offer suggestions, corrections, and enhancements in the UI.
Messages inside [] denote UI elements or user actions. For example:
- \"[User input: 'Rewrite this paragraph']\" means the user has asked for a paragraph to be rewritten.
- \"[User selects 'Grammar Check']\" indicates that the user has requested a grammar check in the UI.

If the user asks for tasks beyond writing assistance, respond that you are Repurposlys AI writing assistant and cannot perform that action.

In addition to these functionalities, you can also chat with users and assist with basic writing queries if necessary. \
Tool use is prohibited, never call up a tool!";

lazy_static::lazy_static! {
    pub static ref MODEL_BASE_URL: String = env::var("REPURPOSELY_MODEL_BASE_URL").unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
    pub static ref MODEL_NAME: String = env::var("REPURPOSELY_MODEL").unwrap_or_else(|_| "llama3-8b-8192".to_string());
    pub static ref MODEL_API_KEY: String = env::var("OPENAI_API_KEY").unwrap_or_default();
    pub static ref DATA_DIR: String = env::var("REPURPOSELY_DATA_DIR").unwrap_or_else(|_| "data/chats".to_string());
    pub static ref USER_HEADER: String = env::var("REPURPOSELY_USER_HEADER").unwrap_or_else(|_| "x-user-id".to_string());
    pub static ref RESPONSE_TIMEOUT: Duration = env::var("REPURPOSELY_RESPONSE_TIMEOUT_SECS")
        .ok()
        .and_then(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(120));
}
