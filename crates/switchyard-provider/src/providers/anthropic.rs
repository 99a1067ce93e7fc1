//! Anthropic Messages API adapter.
//!
//! Speaks the typed SSE protocol (`content_block_*`, `message_*` envelopes).

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::stream::{ChunkSender, ChunkStream};
use crate::traits::{
    apply_headers, error_for_status, with_deadline, Capabilities, Provider, ToolCalling,
};
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, ImageSource, ImageSourceKind, Message,
    MessageContent, Role, StopReason, StreamChunk, ToolResultContent, Usage,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    client: Client,
    name: String,
}

impl AnthropicProvider {
    /// Adapter registered as "anthropic".
    pub fn new() -> Self {
        Self::named("anthropic")
    }

    /// Adapter speaking the Anthropic protocol under another registry name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
        }
    }

    /// Convert a unified request into the Messages API body.
    fn build_request_body(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<WireRequest, ProviderError> {
        request.validate_tool_results()?;

        let mut messages: Vec<WireMessage> = Vec::new();
        for msg in request.conversation() {
            let wire = WireMessage::from(msg);
            if wire.content.is_empty() {
                continue;
            }
            // Tool results answering one assistant turn share a single user turn.
            if msg.role == Role::Tool {
                if let Some(last) = messages.last_mut() {
                    if last.is_tool_results() {
                        last.content.extend(wire.content);
                        continue;
                    }
                }
            }
            messages.push(wire);
        }

        Ok(WireRequest {
            model: config.model_id.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system_text(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.clone(),
            stream,
        })
    }

    /// Send the request and return the response once headers are in.
    async fn send(
        &self,
        config: &ProviderConfig,
        body: &WireRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = config.api_key().ok_or_else(|| {
            ProviderError::NotConfigured(format!("{} requires an API key", self.name))
        })?;
        let url = format!("{}/v1/messages", config.base_url_or(API_BASE));

        debug!(
            provider = %self.name,
            model = %config.model_id,
            stream = body.stream,
            messages = body.messages.len(),
            "sending messages request"
        );

        let builder = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json");
        let response = apply_headers(builder, config).json(body).send().await?;

        error_for_status(response).await
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_calling: ToolCalling::Native,
            images: true,
            system_field: true,
        }
    }

    fn is_configured(&self, config: &ProviderConfig) -> bool {
        config.api_key().is_some()
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
    ) -> Result<ChatResponse, ProviderError> {
        let body = self.build_request_body(request, config, false)?;

        with_deadline(config, async {
            let response = self.send(config, &body).await?;
            let text = response.text().await?;
            let wire: WireResponse = serde_json::from_str(&text)
                .map_err(|e| ProviderError::Parse(format!("messages response: {e}")))?;
            Ok(wire.into())
        })
        .await
    }

    async fn chat_stream(&self, request: &ChatRequest, config: &ProviderConfig) -> ChunkStream {
        let body = match self.build_request_body(request, config, true) {
            Ok(body) => body,
            Err(e) => return ChunkStream::error(e.to_string()),
        };

        match with_deadline(config, self.send(config, &body)).await {
            Ok(response) => ChunkStream::spawn(move |tx| pump_events(response, tx)),
            Err(e) => {
                warn!(provider = %self.name, error = %e, "stream request failed");
                ChunkStream::error(e.to_string())
            }
        }
    }
}

/// Read SSE frames off the response and push normalized chunks.
async fn pump_events(response: reqwest::Response, tx: ChunkSender) {
    let mut events = response.bytes_stream().eventsource();
    let mut state = AnthropicStreamState::default();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tx.send(StreamChunk::error(format!("Network error: {e}")))
                    .await;
                return;
            }
        };

        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }

        match serde_json::from_str::<AnthropicEvent>(data) {
            Ok(parsed) => {
                if !tx.send_all(state.on_event(parsed)).await {
                    return;
                }
            }
            Err(e) => debug!(error = %e, "skipping unparseable SSE frame"),
        }
    }

    tx.send_all(state.finish()).await;
}

// ──────────────────────────────────────────────────────────
// Stream state machine
// ──────────────────────────────────────────────────────────

struct ToolAccumulator {
    id: String,
    name: String,
    input: String,
}

/// Per-stream state: the open tool-use block plus usage bookkeeping.
#[derive(Default)]
struct AnthropicStreamState {
    current_tool: Option<ToolAccumulator>,
    input_tokens: u32,
    stop_reason: Option<StopReason>,
}

impl AnthropicStreamState {
    fn on_event(&mut self, event: AnthropicEvent) -> Vec<StreamChunk> {
        match event {
            AnthropicEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens.unwrap_or(0);
                }
                vec![]
            }
            AnthropicEvent::ContentBlockStart { content_block, .. } => match content_block {
                ContentBlockInfo::ToolUse { id, name } => {
                    self.current_tool = Some(ToolAccumulator {
                        id: id.clone(),
                        name: name.clone(),
                        input: String::new(),
                    });
                    vec![StreamChunk::ToolUseStart { id, name }]
                }
                ContentBlockInfo::Text { .. } | ContentBlockInfo::Other => vec![],
            },
            AnthropicEvent::ContentBlockDelta { delta, .. } => match delta {
                Delta::Text { text } => vec![StreamChunk::text(text)],
                Delta::InputJson { partial_json } => match self.current_tool.as_mut() {
                    Some(tool) => {
                        tool.input.push_str(&partial_json);
                        vec![StreamChunk::ToolUseDelta {
                            id: tool.id.clone(),
                            name: tool.name.clone(),
                            input: partial_json,
                        }]
                    }
                    None => {
                        debug!("input_json_delta outside a tool_use block");
                        vec![]
                    }
                },
                Delta::Other => vec![],
            },
            AnthropicEvent::ContentBlockStop { .. } => self.close_tool().into_iter().collect(),
            AnthropicEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(StopReason::from(reason));
                }
                match usage {
                    Some(usage) => vec![StreamChunk::Done {
                        stop_reason: self.stop_reason.clone(),
                        usage: Some(Usage {
                            input_tokens: usage.input_tokens.unwrap_or(self.input_tokens),
                            output_tokens: usage.output_tokens.unwrap_or(0),
                        }),
                    }],
                    None => vec![],
                }
            }
            AnthropicEvent::MessageStop => vec![StreamChunk::Done {
                stop_reason: self.stop_reason.clone(),
                usage: None,
            }],
            AnthropicEvent::Error { error } => vec![StreamChunk::error(format!(
                "{}: {}",
                error.error_type, error.message
            ))],
            AnthropicEvent::Ping | AnthropicEvent::Unknown => vec![],
        }
    }

    /// Chunks owed when the byte stream ends without `message_stop`.
    fn finish(&mut self) -> Vec<StreamChunk> {
        let mut chunks: Vec<StreamChunk> = self.close_tool().into_iter().collect();
        chunks.push(StreamChunk::Done {
            stop_reason: self.stop_reason.clone(),
            usage: None,
        });
        chunks
    }

    fn close_tool(&mut self) -> Option<StreamChunk> {
        self.current_tool.take().map(|tool| StreamChunk::ToolUseEnd {
            id: tool.id,
            name: tool.name,
            input: tool.input,
        })
    }
}

// ──────────────────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Vec<WireContent>,
}

impl WireMessage {
    fn is_tool_results(&self) -> bool {
        self.role == "user"
            && !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|c| matches!(c, WireContent::ToolResult { .. }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
    Text {
        text: String,
    },
    Image {
        source: WireImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: WireToolResultContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireToolResultContent {
    Text(String),
    Blocks(Vec<WireContent>),
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool | Role::System => "user",
        };
        let content = match &msg.content {
            MessageContent::Text(text) if text.is_empty() => vec![],
            MessageContent::Text(text) => vec![WireContent::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.iter().map(WireContent::from).collect(),
        };
        Self {
            role: role.to_string(),
            content,
        }
    }
}

impl From<&ContentBlock> for WireContent {
    fn from(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => Self::Text { text: text.clone() },
            ContentBlock::Image { source } => Self::Image {
                source: match source.kind {
                    ImageSourceKind::Base64 => WireImageSource::Base64 {
                        media_type: source
                            .media_type
                            .clone()
                            .unwrap_or_else(|| "image/png".to_string()),
                        data: source.data.clone().unwrap_or_default(),
                    },
                    ImageSourceKind::Url => WireImageSource::Url {
                        url: source.url.clone().unwrap_or_default(),
                    },
                },
            },
            ContentBlock::ToolUse { id, name, input } => Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: match content {
                    ToolResultContent::Text(text) => WireToolResultContent::Text(text.clone()),
                    ToolResultContent::Blocks(blocks) => {
                        WireToolResultContent::Blocks(blocks.iter().map(Self::from).collect())
                    }
                },
                is_error: *is_error,
            },
        }
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let role = match wire.role.as_str() {
            "assistant" => Role::Assistant,
            _ if wire.is_tool_results() => Role::Tool,
            _ => Role::User,
        };
        let mut blocks: Vec<ContentBlock> = wire
            .content
            .into_iter()
            .filter_map(WireContent::into_block)
            .collect();
        let content = match blocks.pop() {
            Some(ContentBlock::Text { text }) if blocks.is_empty() => MessageContent::Text(text),
            Some(last) => {
                blocks.push(last);
                MessageContent::Blocks(blocks)
            }
            None => MessageContent::Blocks(blocks),
        };
        Message::new(role, content)
    }
}

impl WireContent {
    fn into_block(self) -> Option<ContentBlock> {
        match self {
            Self::Text { text } => Some(ContentBlock::Text { text }),
            Self::Image { source } => Some(ContentBlock::Image {
                source: match source {
                    WireImageSource::Base64 { media_type, data } => {
                        ImageSource::base64(media_type, data)
                    }
                    WireImageSource::Url { url } => ImageSource::url(url),
                },
            }),
            Self::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(ContentBlock::ToolResult {
                tool_use_id,
                content: match content {
                    WireToolResultContent::Text(text) => ToolResultContent::Text(text),
                    WireToolResultContent::Blocks(blocks) => ToolResultContent::Blocks(
                        blocks.into_iter().filter_map(Self::into_block).collect(),
                    ),
                },
                is_error,
            }),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<WireContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: UsageData,
}

impl From<WireResponse> for ChatResponse {
    fn from(wire: WireResponse) -> Self {
        Self {
            id: wire.id,
            model: wire.model,
            content: wire
                .content
                .into_iter()
                .filter_map(WireContent::into_block)
                .collect(),
            stop_reason: wire
                .stop_reason
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: Usage {
                input_tokens: wire.usage.input_tokens.unwrap_or(0),
                output_tokens: wire.usage.output_tokens.unwrap_or(0),
            },
        }
    }
}

/// Top-level SSE event from the Messages API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {
        #[allow(dead_code)]
        index: usize,
        content_block: ContentBlockInfo,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaData,
        #[serde(default)]
        usage: Option<UsageData>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorData,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageStartData {
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockInfo {
    Text {
        #[allow(dead_code)]
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Delta {
    #[serde(rename = "text_delta")]
    Text { text: String },

    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaData {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageData {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

// ──────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────
