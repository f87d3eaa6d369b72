use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a fresh message or chat identifier.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A single entry of a conversation.
///
/// Serialized as `{"id": .., "role": .., "content": ..}` so stored chats keep
/// the same shape regardless of role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum MessageContent {
    User(String),
    Assistant(AssistantContent),
    System(String),
    Tool(Vec<ToolResult>),
}

/// Assistant payload: either streamed prose or a batch of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "tool-call", rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "tool-result", rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Tools the renderer knows how to display. Every other name is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KnownTool {
    ListStocks,
    ShowStockPrice,
    ShowStockPurchase,
    GetEvents,
}

impl KnownTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "listStocks" => Some(KnownTool::ListStocks),
            "showStockPrice" => Some(KnownTool::ShowStockPrice),
            "showStockPurchase" => Some(KnownTool::ShowStockPurchase),
            "getEvents" => Some(KnownTool::GetEvents),
            _ => None,
        }
    }
}

impl Message {
    fn with_content(content: MessageContent) -> Self {
        Self {
            id: new_id(),
            content,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(MessageContent::User(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(MessageContent::Assistant(AssistantContent::Text(text.into())))
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::with_content(MessageContent::Assistant(AssistantContent::ToolCalls(calls)))
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_content(MessageContent::System(text.into()))
    }

    pub fn tool(results: Vec<ToolResult>) -> Self {
        Self::with_content(MessageContent::Tool(results))
    }

    pub fn role(&self) -> Role {
        match self.content {
            MessageContent::User(_) => Role::User,
            MessageContent::Assistant(_) => Role::Assistant,
            MessageContent::System(_) => Role::System,
            MessageContent::Tool(_) => Role::Tool,
        }
    }

    /// The plain-text payload, if this message carries one.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::User(text)
            | MessageContent::System(text)
            | MessageContent::Assistant(AssistantContent::Text(text)) => Some(text),
            MessageContent::Assistant(AssistantContent::ToolCalls(_)) | MessageContent::Tool(_) => {
                None
            }
        }
    }
}
