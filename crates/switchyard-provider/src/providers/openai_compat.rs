//! Generic OpenAI-compatible adapter.
//!
//! Handles the chat completions wire format shared by OpenAI, OpenRouter and
//! many self-hosted gateways. Backends differ only in base URL and headers.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::stream::{parse_tool_input, ChunkSender, ChunkStream};
use crate::traits::{
    apply_headers, error_for_status, with_deadline, Capabilities, Provider, ToolCalling,
};
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, ImageSource, ImageSourceKind, Message,
    MessageContent, Role, StopReason, StreamChunk, Usage,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A provider that speaks the OpenAI chat completions protocol.
pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    default_base_url: String,
}

impl OpenAiCompatProvider {
    /// Create an adapter registered under `name`, defaulting to `default_base_url`.
    pub fn new(name: impl Into<String>, default_base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
            default_base_url: default_base_url.into(),
        }
    }

    /// Build the chat completions request body.
    fn build_request_body(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<WireRequest, ProviderError> {
        request.validate_tool_results()?;

        Ok(WireRequest {
            model: config.model_id.clone(),
            messages: convert_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function".to_string(),
                    function: WireFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect(),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        })
    }

    async fn send(
        &self,
        config: &ProviderConfig,
        body: &WireRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = config.api_key().ok_or_else(|| {
            ProviderError::NotConfigured(format!("{} requires an API key", self.name))
        })?;
        let url = format!(
            "{}/chat/completions",
            config.base_url_or(&self.default_base_url)
        );

        debug!(
            provider = %self.name,
            model = %config.model_id,
            stream = body.stream,
            messages = body.messages.len(),
            "sending chat completions request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        if let Some(org) = &config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let response = apply_headers(builder, config).json(body).send().await?;

        error_for_status(response).await
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_calling: ToolCalling::Native,
            images: true,
            system_field: false,
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
                .map_err(|e| ProviderError::Parse(format!("chat completions response: {e}")))?;
            map_response(wire, &config.model_id)
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

/// Convert unified messages to OpenAI format.
///
/// System text becomes the first message; tool results become `role: tool`
/// messages; assistant tool invocations become `tool_calls`.
fn convert_messages(request: &ChatRequest) -> Vec<WireMessage> {
    let mut messages = Vec::new();

    if let Some(system) = request.system_text() {
        messages.push(WireMessage::text("system", system));
    }

    for msg in request.conversation() {
        // Tool results travel as separate role=tool messages, even when the
        // caller embedded them in a user turn.
        for block in msg.blocks() {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                messages.push(WireMessage {
                    role: "tool".to_string(),
                    content: Some(WireContent::Text(content.text())),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
        }

        match msg.role {
            Role::Tool => {}
            Role::Assistant => {
                let tool_calls: Vec<WireToolCall> = msg
                    .blocks()
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolUse { id, name, input } => Some(WireToolCall {
                            id: id.clone(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();

                let text = msg.text();
                let mut wire = WireMessage::text("assistant", text.clone());
                wire.name = msg.name.clone();
                if !tool_calls.is_empty() {
                    wire.content = (!text.is_empty()).then_some(WireContent::Text(text));
                    wire.tool_calls = Some(tool_calls);
                }
                messages.push(wire);
            }
            Role::User | Role::System => {
                let has_results = msg
                    .blocks()
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
                let content = user_content(msg);
                let empty = match &content {
                    WireContent::Text(text) => text.is_empty(),
                    WireContent::Parts(parts) => parts.is_empty(),
                };
                if has_results && empty {
                    continue;
                }
                messages.push(WireMessage {
                    role: "user".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: None,
                    name: msg.name.clone(),
                });
            }
        }
    }

    messages
}

/// Plain text when the turn is text-only, content parts when it has images.
fn user_content(msg: &Message) -> WireContent {
    let has_images = msg
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::Image { .. }));
    if !has_images {
        return WireContent::Text(msg.text());
    }

    let parts = msg
        .blocks()
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(WirePart::Text { text: text.clone() }),
            ContentBlock::Image { source } => Some(WirePart::ImageUrl {
                image_url: WireImageUrl {
                    url: image_url(source),
                },
            }),
            _ => None,
        })
        .collect();
    WireContent::Parts(parts)
}

fn image_url(source: &ImageSource) -> String {
    match source.kind {
        ImageSourceKind::Url => source.url.clone().unwrap_or_default(),
        ImageSourceKind::Base64 => format!(
            "data:{};base64,{}",
            source.media_type.as_deref().unwrap_or("image/png"),
            source.data.as_deref().unwrap_or_default()
        ),
    }
}

/// `tool_calls` maps to `tool_use`; every other finish reason passes through.
fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" => StopReason::ToolUse,
        other => StopReason::from(other),
    }
}

fn map_response(wire: WireResponse, model_id: &str) -> Result<ChatResponse, ProviderError> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(ContentBlock::Text { text });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let input = parse_tool_input(&call.id, &call.function.arguments)?;
        content.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some(reason) => map_finish_reason(reason),
        None if content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. })) =>
        {
            StopReason::ToolUse
        }
        None => StopReason::EndTurn,
    };

    let usage = wire.usage.map(Usage::from).unwrap_or_default();

    Ok(ChatResponse {
        id: if wire.id.is_empty() {
            ulid::Ulid::new().to_string()
        } else {
            wire.id
        },
        model: if wire.model.is_empty() {
            model_id.to_string()
        } else {
            wire.model
        },
        content,
        stop_reason,
        usage,
    })
}

/// Read SSE frames off the response and push normalized chunks.
async fn pump_events(response: reqwest::Response, tx: ChunkSender) {
    let mut events = response.bytes_stream().eventsource();
    let mut state = OpenAiStreamState::default();

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

        match serde_json::from_str::<WireChunk>(data) {
            Ok(chunk) => {
                if !tx.send_all(state.on_chunk(chunk)).await {
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

#[derive(Default)]
struct ToolAccumulator {
    id: String,
    name: String,
    args: String,
    started: bool,
}

/// Tool calls arrive keyed by position, not id: id and name come on the
/// first delta for an index, argument fragments on later ones.
#[derive(Default)]
struct OpenAiStreamState {
    tools: BTreeMap<u32, ToolAccumulator>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
}

impl OpenAiStreamState {
    fn on_chunk(&mut self, chunk: WireChunk) -> Vec<StreamChunk> {
        if let Some(error) = chunk.error {
            return vec![StreamChunk::error(error.message)];
        }

        let mut out = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(StreamChunk::text(text));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.tools.entry(call.index).or_default();
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
                let (name, arguments) = call
                    .function
                    .map(|f| (f.name, f.arguments))
                    .unwrap_or_default();
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    acc.name = name;
                }
                if !acc.started && !acc.name.is_empty() {
                    acc.started = true;
                    out.push(StreamChunk::ToolUseStart {
                        id: acc.id.clone(),
                        name: acc.name.clone(),
                    });
                }
                if let Some(fragment) = arguments.filter(|a| !a.is_empty()) {
                    acc.args.push_str(&fragment);
                    if acc.started {
                        out.push(StreamChunk::ToolUseDelta {
                            id: acc.id.clone(),
                            name: acc.name.clone(),
                            input: fragment,
                        });
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(map_finish_reason(&reason));
            }
        }

        // Usage-only trailer; folded into the terminal chunk.
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        out
    }

    /// Flush open tool calls in index order, then the single `done`.
    fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        for (_, acc) in std::mem::take(&mut self.tools) {
            if !acc.started {
                out.push(StreamChunk::ToolUseStart {
                    id: acc.id.clone(),
                    name: acc.name.clone(),
                });
            }
            out.push(StreamChunk::ToolUseEnd {
                id: acc.id,
                name: acc.name,
                input: acc.args,
            });
        }
        out.push(StreamChunk::Done {
            stop_reason: self.stop_reason.take(),
            usage: self.usage.take(),
        });
        out
    }
}

// ──────────────────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(default)]
    stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl WireMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(WireContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

impl WireContent {
    fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    WirePart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: WireImageUrl,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl TryFrom<WireMessage> for Message {
    type Error = ProviderError;

    fn try_from(wire: WireMessage) -> Result<Self, ProviderError> {
        let text = wire.content.as_ref().map(WireContent::text).unwrap_or_default();
        let message = match wire.role.as_str() {
            "system" => Message::system(text),
            "tool" => Message::tool_result(wire.tool_call_id.unwrap_or_default(), text, false),
            "assistant" => {
                let calls = wire.tool_calls.unwrap_or_default();
                if calls.is_empty() {
                    return Ok(Message::new(Role::Assistant, MessageContent::Text(text)));
                }
                let mut blocks = Vec::new();
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                for call in calls {
                    let input = parse_tool_input(&call.id, &call.function.arguments)?;
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input,
                    });
                }
                Message::assistant(blocks)
            }
            _ => match wire.content {
                Some(WireContent::Parts(parts)) => Message::new(
                    Role::User,
                    MessageContent::Blocks(
                        parts
                            .into_iter()
                            .filter_map(|p| match p {
                                WirePart::Text { text } => Some(ContentBlock::Text { text }),
                                WirePart::ImageUrl { image_url } => Some(ContentBlock::Image {
                                    source: ImageSource::url(image_url.url),
                                }),
                                WirePart::Unknown => None,
                            })
                            .collect(),
                    ),
                ),
                _ => Message::user(text),
            },
        };
        Ok(message)
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireStreamError>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamError {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;
    use serde_json::json;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", "https://api.example.com/v1")
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new("test", "test-model").with_api_key("test-key")
    }

    fn chunk(json: &str) -> WireChunk {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(provider().name(), "test");
        assert!(!provider().capabilities().system_field);
    }

    #[test]
    fn test_is_configured() {
        assert!(provider().is_configured(&config()));
        assert!(!provider().is_configured(&ProviderConfig::new("test", "m")));
    }

    #[test]
    fn test_build_request_body() {
        let request = ChatRequest::new(vec![Message::user("Hello")])
            .with_system_prompt("Be helpful")
            .with_max_tokens(1024);

        let body = provider().build_request_body(&request, &config(), true).unwrap();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "test-model");
        assert_eq!(value["stream"], true);
        assert_eq!(value["stream_options"]["include_usage"], true);
        assert_eq!(value["max_tokens"], 1024);
        let msgs = value["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "Be helpful");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"], "Hello");
    }

    #[test]
    fn test_build_request_with_tools() {
        let request = ChatRequest::new(vec![Message::user("hi")]).with_tools(vec![ToolDefinition {
            name: "read".to_string(),
            description: "Read a file".to_string(),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }]);

        let value =
            serde_json::to_value(provider().build_request_body(&request, &config(), false).unwrap())
                .unwrap();
        let tools = value["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "read");
        assert!(value.get("stream_options").is_none());
    }

    #[test]
    fn test_tool_turns_conversion() {
        let request = ChatRequest::new(vec![
            Message::user("read it"),
            Message::assistant(vec![ContentBlock::tool_use(
                "call_1",
                "read",
                json!({"path": "a.txt"}),
            )]),
            Message::tool_result("call_1", "file body", false),
        ]);

        let msgs = convert_messages(&request);
        assert_eq!(msgs.len(), 3);

        let assistant = serde_json::to_value(&msgs[1]).unwrap();
        assert_eq!(assistant["role"], "assistant");
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"a.txt"}"#
        );

        let tool = serde_json::to_value(&msgs[2]).unwrap();
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert_eq!(tool["content"], "file body");
    }

    #[test]
    fn test_tool_result_in_user_turn_split_out() {
        let request = ChatRequest::new(vec![
            Message::assistant(vec![ContentBlock::tool_use("call_1", "ls", json!({}))]),
            Message::new(
                Role::User,
                vec![
                    ContentBlock::tool_result("call_1", "a b c"),
                    ContentBlock::text("now summarize"),
                ],
            ),
        ]);

        let msgs = convert_messages(&request);
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["assistant", "tool", "user"]);
    }

    #[test]
    fn test_image_becomes_data_url_part() {
        let request = ChatRequest::new(vec![Message::new(
            Role::User,
            vec![
                ContentBlock::text("what is this?"),
                ContentBlock::Image {
                    source: ImageSource::base64("image/jpeg", "QUJD"),
                },
            ],
        )]);
        let value = serde_json::to_value(&convert_messages(&request)[0]).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn test_round_trip_preserves_roles_and_text() {
        let original = vec![
            Message::user("What is 2+2?"),
            Message::assistant(vec![ContentBlock::text("4")]),
            Message::user("And 3+3?"),
        ];
        let request = ChatRequest::new(original.clone());

        let body = provider().build_request_body(&request, &config(), false).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        let back: WireRequest = serde_json::from_value(json).unwrap();
        let restored: Vec<Message> = back.messages.into_iter().map(|m| Message::try_from(m).unwrap()).collect();

        assert_eq!(restored.len(), original.len());
        for (a, b) in original.iter().zip(&restored) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.text(), b.text());
        }
    }

    #[test]
    fn test_response_mapping_tool_calls() {
        let wire: WireResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_1", "type": "function", "function": {"name": "read", "arguments": "{\"path\":\"a\"}"}},
                        {"id": "call_2", "type": "function", "function": {"name": "ls", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        }))
        .unwrap();

        let response = map_response(wire, "fallback").unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.content.len(), 2);
        match &response.content[1] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input, &json!({})),
            other => panic!("expected tool use, got {other:?}"),
        }
        assert_eq!(response.usage.input_tokens, 12);
    }

    #[test]
    fn test_response_finish_reason_passthrough() {
        let wire: WireResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "hi"}, "finish_reason": "length"}]
        }))
        .unwrap();
        let response = map_response(wire, "m").unwrap();
        assert_eq!(response.stop_reason, StopReason::Other("length".to_string()));
        assert_eq!(response.model, "m");
        assert!(!response.id.is_empty());
    }

    #[test]
    fn test_response_without_choices() {
        let wire: WireResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            map_response(wire, "m"),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_response_with_truncated_tool_arguments() {
        let wire: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [
                        {"id": "call_1", "type": "function", "function": {"name": "rm", "arguments": "{\"path\": \"/tmp/x"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        let err = map_response(wire, "m").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(err.to_string().contains("tool call call_1 arguments"));
    }

    #[test]
    fn test_parse_text_delta() {
        let mut state = OpenAiStreamState::default();
        let chunks =
            state.on_chunk(chunk(r#"{"choices":[{"delta":{"content":"Hello"},"index":0}]}"#));
        assert_eq!(chunks, vec![StreamChunk::text("Hello")]);
    }

    #[test]
    fn test_index_based_tool_accumulation() {
        let mut state = OpenAiStreamState::default();
        let mut chunks = Vec::new();
        for frame in [
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"read","arguments":""}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        ] {
            chunks.extend(state.on_chunk(chunk(frame)));
        }
        chunks.extend(state.finish());

        let starts: Vec<_> = chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::ToolUseStart { .. }))
            .collect();
        assert_eq!(starts.len(), 1);
        assert!(matches!(starts[0], StreamChunk::ToolUseStart { id, name } if id == "call_1" && name == "read"));

        let ends: Vec<_> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolUseEnd { id, input, .. } => Some((id.as_str(), input.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![("call_1", r#"{"path":"a.txt"}"#)]);

        // Deltas carry the id learned from the first frame.
        assert!(chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::ToolUseDelta { .. }))
            .all(|c| matches!(c, StreamChunk::ToolUseDelta { id, .. } if id == "call_1")));

        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::Done {
                stop_reason: Some(StopReason::ToolUse),
                usage: None
            })
        );
    }

    #[test]
    fn test_parallel_tool_calls_flush_in_index_order() {
        let mut state = OpenAiStreamState::default();
        state.on_chunk(chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"ls","arguments":"{}"}},{"index":0,"id":"a","function":{"name":"read","arguments":"{}"}}]}}]}"#,
        ));
        let ids: Vec<String> = state
            .finish()
            .into_iter()
            .filter_map(|c| match c {
                StreamChunk::ToolUseEnd { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_usage_trailer_folds_into_done() {
        let mut state = OpenAiStreamState::default();
        state.on_chunk(chunk(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ));
        let trailer = state.on_chunk(chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":9}}"#,
        ));
        assert!(trailer.is_empty());

        assert_eq!(
            state.finish(),
            vec![StreamChunk::Done {
                stop_reason: Some(StopReason::Other("stop".to_string())),
                usage: Some(Usage {
                    input_tokens: 5,
                    output_tokens: 9
                }),
            }]
        );
    }

    #[test]
    fn test_stream_error_frame() {
        let mut state = OpenAiStreamState::default();
        let chunks = state.on_chunk(chunk(r#"{"error":{"message":"upstream overloaded"}}"#));
        assert_eq!(chunks, vec![StreamChunk::error("upstream overloaded")]);
    }
}
