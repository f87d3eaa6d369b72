pub mod chat;
pub mod constants;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod llm_interaction;
pub mod message;
pub mod persistence;
pub mod render;
pub mod session;
pub mod store;
pub mod stream;
pub mod web_server;

pub use conversation::{Chat, ConversationState};
pub use dispatcher::{ChatContext, DispatchSettings, Dispatcher, Submission};
pub use error::{ChatError, ChatResult};
pub use message::{Message, MessageContent, Role};
pub use render::{derive_renderable, RenderedDisplay, RenderableState, RenderedMessage};
pub use stream::{StreamHandle, StreamUpdate};
