//! Display-oriented projection of a [`ConversationState`].
//!
//! The renderable form has no state of its own: it is recomputed from the
//! conversation whenever it is needed.

use serde::Serialize;

use crate::conversation::ConversationState;
use crate::message::{AssistantContent, KnownTool, Message, MessageContent, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCard {
    pub tool: KnownTool,
    pub props: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RenderedDisplay {
    UserText(String),
    AssistantText(String),
    /// One slot per tool-result record; `None` where the tool is not recognised.
    ToolCards(Vec<Option<ToolCard>>),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    pub id: String,
    pub message_id: String,
    pub display: RenderedDisplay,
}

pub type RenderableState = Vec<RenderedMessage>;

pub fn derive_renderable(state: &ConversationState) -> RenderableState {
    state
        .messages()
        .iter()
        .filter(|message| !matches!(message.content, MessageContent::System(_)))
        .enumerate()
        .map(|(index, message)| RenderedMessage {
            id: format!("{}-{}", state.chat_id(), index),
            message_id: message.id.clone(),
            display: display_for(message),
        })
        .collect()
}

fn display_for(message: &Message) -> RenderedDisplay {
    match &message.content {
        MessageContent::User(text) => RenderedDisplay::UserText(text.clone()),
        MessageContent::Assistant(AssistantContent::Text(text)) => {
            RenderedDisplay::AssistantText(text.clone())
        }
        MessageContent::Assistant(AssistantContent::ToolCalls(_)) => RenderedDisplay::Empty,
        MessageContent::Tool(results) => {
            RenderedDisplay::ToolCards(results.iter().map(tool_card).collect())
        }
        // Filtered out before projection; kept for exhaustiveness.
        MessageContent::System(_) => RenderedDisplay::Empty,
    }
}

fn tool_card(result: &ToolResult) -> Option<ToolCard> {
    KnownTool::from_name(&result.tool_name).map(|tool| ToolCard {
        tool,
        props: result.result.clone(),
    })
}
