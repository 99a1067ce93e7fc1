//! Ollama provider for local models.
//!
//! Speaks the native `/api/chat` endpoint, which streams newline-delimited
//! JSON. The protocol has no tool calling: when tools are requested they are
//! described in the system prompt and output is constrained to JSON.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::stream::{ChunkSender, ChunkStream};
use crate::traits::{
    apply_headers, error_for_status, with_deadline, Capabilities, Provider, ToolCalling,
};
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, ImageSourceKind, Message, Role, StopReason,
    StreamChunk, ToolDefinition, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Longest NDJSON line buffered while waiting for its newline.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Ollama adapter. No credentials; always configured.
pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn build_request_body(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<WireRequest, ProviderError> {
        request.validate_tool_results()?;

        let mut messages = Vec::new();
        let system = match (request.system_text(), tool_instruction(&request.tools)) {
            (Some(system), Some(tools)) => Some(format!("{system}\n\n{tools}")),
            (system, tools) => system.or(tools),
        };
        if let Some(system) = system {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system,
                images: Vec::new(),
            });
        }
        messages.extend(
            request
                .conversation()
                .map(WireMessage::from)
                .filter(|m| !m.content.is_empty() || !m.images.is_empty()),
        );

        Ok(WireRequest {
            model: config.model_id.clone(),
            messages,
            stream,
            format: (!request.tools.is_empty()).then(|| "json".to_string()),
            options: WireOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                stop: request.stop_sequences.clone(),
            },
        })
    }

    async fn send(
        &self,
        config: &ProviderConfig,
        body: &WireRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", config.base_url_or(OLLAMA_BASE_URL));
        debug!(model = %config.model_id, stream = body.stream, "sending ollama request");

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        let response = apply_headers(builder, config).json(body).send().await?;
        error_for_status(response).await
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_calling: ToolCalling::PromptEmulated,
            images: true,
            system_field: false,
        }
    }

    fn is_configured(&self, _config: &ProviderConfig) -> bool {
        true
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
            let line: WireLine = serde_json::from_str(&text)
                .map_err(|e| ProviderError::Parse(format!("ollama response: {e}")))?;
            if let Some(error) = &line.error {
                return Err(ProviderError::Parse(error.clone()));
            }

            let usage = line.usage();
            let stop_reason = map_done_reason(line.done_reason.as_deref());
            let content = line
                .message
                .map(|m| m.content)
                .filter(|t| !t.is_empty())
                .map(|text| vec![ContentBlock::Text { text }])
                .unwrap_or_default();

            Ok(ChatResponse {
                id: ulid::Ulid::new().to_string(),
                model: line.model.unwrap_or_else(|| config.model_id.clone()),
                content,
                stop_reason,
                usage,
            })
        })
        .await
    }

    async fn chat_stream(&self, request: &ChatRequest, config: &ProviderConfig) -> ChunkStream {
        let body = match self.build_request_body(request, config, true) {
            Ok(body) => body,
            Err(e) => return ChunkStream::error(e.to_string()),
        };

        match with_deadline(config, self.send(config, &body)).await {
            Ok(response) => ChunkStream::spawn(move |tx| pump_lines(response.bytes_stream(), tx)),
            Err(e) => {
                warn!(error = %e, "ollama stream request failed");
                ChunkStream::error(e.to_string())
            }
        }
    }
}

/// Read the body line by line; each complete line is one JSON object.
async fn pump_lines<S, B, E>(bytes: S, tx: ChunkSender)
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(next) = bytes.next().await {
        let data = match next {
            Ok(data) => data,
            Err(e) => {
                tx.send(StreamChunk::error(format!("Network error: {e}")))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(data.as_ref());

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if !forward_line(&line, &tx).await {
                return;
            }
        }

        if buffer.len() > MAX_LINE_BYTES {
            warn!(buffered = buffer.len(), "ndjson line exceeds limit, aborting stream");
            tx.send(StreamChunk::error(format!(
                "Stream error: line exceeds {MAX_LINE_BYTES} bytes without a newline"
            )))
            .await;
            return;
        }
    }

    if !buffer.is_empty() {
        forward_line(&buffer, &tx).await;
    }
}

/// Returns `false` once the stream should stop.
async fn forward_line(raw: &[u8], tx: &ChunkSender) -> bool {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    match serde_json::from_str::<WireLine>(text) {
        Ok(line) => tx.send_all(line_chunks(line)).await,
        Err(e) => {
            debug!(error = %e, "skipping unparseable ndjson line");
            true
        }
    }
}

fn line_chunks(line: WireLine) -> Vec<StreamChunk> {
    if let Some(error) = &line.error {
        return vec![StreamChunk::error(error.clone())];
    }

    let usage = line.usage();
    let mut out = Vec::new();
    if let Some(text) = line.message.as_ref().map(|m| m.content.as_str()) {
        if !text.is_empty() {
            out.push(StreamChunk::text(text));
        }
    }
    if line.done {
        out.push(StreamChunk::Done {
            stop_reason: Some(map_done_reason(line.done_reason.as_deref())),
            usage: Some(usage),
        });
    }
    out
}

fn map_done_reason(reason: Option<&str>) -> StopReason {
    match reason {
        None | Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some(other) => StopReason::from(other),
    }
}

/// System instruction describing the requested tools.
fn tool_instruction(tools: &[ToolDefinition]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut text = String::from(
        "You can use the following tools. To call one, reply with only a JSON object \
         of the form {\"tool\": \"<name>\", \"arguments\": {...}}.\n",
    );
    for tool in tools {
        text.push_str(&format!(
            "\n- {}: {}\n  input schema: {}",
            tool.name, tool.description, tool.input_schema
        ));
    }
    Some(text)
}

/// Text concatenated; tool blocks rendered as bracketed annotations.
fn flatten(message: &Message) -> (String, Vec<String>) {
    let mut parts = Vec::new();
    let mut images = Vec::new();

    for block in message.blocks() {
        match block {
            ContentBlock::Text { text } => parts.push(text.clone()),
            ContentBlock::Image { source } => match source.kind {
                ImageSourceKind::Base64 => {
                    if let Some(data) = &source.data {
                        images.push(data.clone());
                    }
                }
                ImageSourceKind::Url => {
                    parts.push(format!("[image: {}]", source.url.as_deref().unwrap_or("")))
                }
            },
            ContentBlock::ToolUse { id, name, input } => {
                parts.push(format!("[tool_use {name} ({id}): {input}]"))
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let label = if is_error.unwrap_or(false) {
                    "tool_error"
                } else {
                    "tool_result"
                };
                parts.push(format!("[{label} ({tool_use_id}): {}]", content.text()));
            }
        }
    }

    (parts.join("\n"), images)
}

// ──────────────────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: WireOptions,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let (content, images) = flatten(message);
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::System => "system",
            // Tool output is fed back as a user turn.
            Role::User | Role::Tool => "user",
        };
        Self {
            role: role.to_string(),
            content,
            images,
        }
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        match wire.role.as_str() {
            "assistant" => Message::assistant(vec![ContentBlock::text(wire.content)]),
            "system" => Message::system(wire.content),
            _ => Message::user(wire.content),
        }
    }
}

/// One NDJSON line, or the whole non-streaming body.
#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    error: Option<String>,
}

impl WireLine {
    fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.prompt_eval_count,
            output_tokens: self.eval_count,
        }
    }
}
