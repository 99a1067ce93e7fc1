//! Unified message model shared by the router and every adapter.
//!
//! Adapters translate these types to and from their own wire shapes; nothing
//! in here knows about a specific backend.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Caller-supplied tool results.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Message content: either a bare string or a list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

/// A block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// An image, inline or by reference.
    Image { source: ImageSource },

    /// A model-originated request to invoke a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Outcome of a prior tool invocation, correlated by `tool_use_id`.
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool-use block.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a textual tool-result block.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(content.into()),
            is_error: None,
        }
    }
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSourceKind {
    Base64,
    Url,
}

/// Image payload. `data` is set for base64 sources, `url` for url sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: ImageSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ImageSource {
    /// Inline base64 image.
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: ImageSourceKind::Base64,
            media_type: Some(media_type.into()),
            data: Some(data.into()),
            url: None,
        }
    }

    /// Image referenced by URL.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            kind: ImageSourceKind::Url,
            media_type: None,
            data: None,
            url: Some(url.into()),
        }
    }
}

/// Content of a tool result: a string or a list of text/image blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Text of the result, with text blocks joined by newlines.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a message with the given role and content.
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a user message from text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    /// Create an assistant message from content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, MessageContent::Blocks(content))
    }

    /// Create a system message from text.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    /// Create a tool-role message carrying one result.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::Tool,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: ToolResultContent::Text(content.into()),
                is_error: is_error.then_some(true),
            }]),
        )
    }

    /// Set the optional participant name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Content blocks of this message. A plain-text message has none.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }

    /// Concatenated text content.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Tool exposed to the model. The schema is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A chat request in the unified format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Create a request from a list of messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// System text from `system_prompt` and every system-role message, in order.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<String> = self
            .system_prompt
            .iter()
            .cloned()
            .chain(
                self.messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(Message::text),
            )
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Messages that travel as conversational turns (everything but system).
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Check that every tool result answers a tool use seen earlier.
    pub fn validate_tool_results(&self) -> Result<(), ProviderError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for (idx, msg) in self.messages.iter().enumerate() {
            let blocks = msg.blocks();
            if msg.role == Role::Tool
                && !blocks
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
            {
                return Err(ProviderError::InvalidRequest(format!(
                    "message {idx} has role tool but carries no tool_result block"
                )));
            }

            for block in blocks {
                match block {
                    ContentBlock::ToolUse { id, .. } => {
                        seen.insert(id.as_str());
                    }
                    ContentBlock::ToolResult { tool_use_id, .. }
                        if !seen.contains(tool_use_id.as_str()) =>
                    {
                        return Err(ProviderError::InvalidRequest(format!(
                            "tool_result in message {idx} references unknown tool_use id '{tool_use_id}'"
                        )));
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

/// Reason the model stopped generating.
///
/// Backend values outside the four canonical ones are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for StopReason {
    fn from(value: &str) -> Self {
        match value {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StopReason {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<StopReason> for String {
    fn from(value: StopReason) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl ChatResponse {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool-use blocks, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// One normalized unit of a streaming response.
///
/// A stream ends with exactly one terminal chunk (`Error` or `Done`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    /// `input` is the fragment carried by this delta only.
    ToolUseDelta {
        id: String,
        name: String,
        input: String,
    },
    /// `input` is the full accumulated JSON string.
    ToolUseEnd {
        id: String,
        name: String,
        input: String,
    },
    Error {
        error: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// A `done` chunk without stop reason or usage.
    pub fn done() -> Self {
        Self::Done {
            stop_reason: None,
            usage: None,
        }
    }

    /// Whether this chunk ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_use_turn() -> Message {
        Message::assistant(vec![ContentBlock::tool_use(
            "tu_1",
            "read",
            json!({"path": "a.txt"}),
        )])
    }

    #[test]
    fn test_content_block_tags() {
        let block = ContentBlock::tool_use("tu_1", "read", json!({}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");

        let image = ContentBlock::Image {
            source: ImageSource::base64("image/png", "AAAA"),
        };
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["source"]["type"], "base64");
        assert_eq!(value["source"]["media_type"], "image/png");
        assert!(value["source"].get("url").is_none());
    }

    #[test]
    fn test_message_content_untagged() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.content, MessageContent::Text("hi".to_string()));

        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.text(), "ab");
        assert_eq!(msg.blocks().len(), 2);
    }

    #[test]
    fn test_system_text_merges_prompt_and_messages() {
        let request = ChatRequest::new(vec![
            Message::system("Be terse."),
            Message::user("hi"),
            Message::system("Answer in English."),
        ])
        .with_system_prompt("You are helpful.");

        assert_eq!(
            request.system_text().as_deref(),
            Some("You are helpful.\n\nBe terse.\n\nAnswer in English.")
        );
        assert_eq!(request.conversation().count(), 1);
    }

    #[test]
    fn test_system_text_absent() {
        let request = ChatRequest::new(vec![Message::user("hi")]);
        assert!(request.system_text().is_none());
    }

    #[test]
    fn test_validate_matched_tool_result() {
        let request = ChatRequest::new(vec![
            Message::user("read a.txt"),
            tool_use_turn(),
            Message::tool_result("tu_1", "contents", false),
        ]);
        assert!(request.validate_tool_results().is_ok());
    }

    #[test]
    fn test_validate_unmatched_tool_result() {
        let request = ChatRequest::new(vec![
            Message::user("read a.txt"),
            Message::tool_result("tu_missing", "contents", false),
        ]);
        let err = request.validate_tool_results().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(err.to_string().contains("tu_missing"));
    }

    #[test]
    fn test_validate_result_before_use() {
        let request = ChatRequest::new(vec![
            Message::tool_result("tu_1", "too early", false),
            tool_use_turn(),
        ]);
        assert!(request.validate_tool_results().is_err());
    }

    #[test]
    fn test_validate_tool_role_without_result() {
        let request = ChatRequest::new(vec![Message::new(Role::Tool, "plain text")]);
        assert!(request.validate_tool_results().is_err());
    }

    #[test]
    fn test_stop_reason_passthrough() {
        assert_eq!(StopReason::from("tool_use"), StopReason::ToolUse);
        assert_eq!(
            StopReason::from("content_filter"),
            StopReason::Other("content_filter".to_string())
        );

        let json = serde_json::to_string(&StopReason::MaxTokens).unwrap();
        assert_eq!(json, "\"max_tokens\"");
        let parsed: StopReason = serde_json::from_str("\"length\"").unwrap();
        assert_eq!(parsed.as_str(), "length");
    }

    #[test]
    fn test_stream_chunk_terminal() {
        assert!(StreamChunk::done().is_terminal());
        assert!(StreamChunk::error("boom").is_terminal());
        assert!(!StreamChunk::text("hi").is_terminal());

        let value = serde_json::to_value(StreamChunk::ToolUseStart {
            id: "a".to_string(),
            name: "b".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "tool_use_start");
    }

    #[test]
    fn test_response_accessors() {
        let response = ChatResponse {
            id: "r1".to_string(),
            model: "m".to_string(),
            content: vec![
                ContentBlock::text("Hello "),
                ContentBlock::tool_use("tu_1", "read", json!({})),
                ContentBlock::text("world"),
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        };
        assert_eq!(response.text(), "Hello world");
        assert_eq!(response.tool_uses().count(), 1);
    }
}
