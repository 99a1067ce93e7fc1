//! Provider adapter trait definition.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::stream::ChunkStream;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Fallback deadline when neither the target nor the router sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How an adapter handles tool definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCalling {
    /// Tool calls come back as `tool_use` blocks / `tool_use_*` chunks.
    Native,
    /// The backend cannot call tools; tools are described in the prompt and
    /// output is constrained to JSON. No `tool_use_*` chunks are produced.
    PromptEmulated,
}

/// What an adapter's wire protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub tool_calling: ToolCalling,
    pub images: bool,
    /// System text travels in a dedicated field rather than as the first turn.
    pub system_field: bool,
}

/// Translates the unified message model to one backend's wire protocol.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Capability metadata for callers and the router.
    fn capabilities(&self) -> Capabilities;

    /// Whether `config` carries what this adapter needs. Pure; no I/O.
    fn is_configured(&self, config: &ProviderConfig) -> bool;

    /// Single request/response round trip, bounded by `config.timeout`.
    async fn chat(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
    ) -> Result<ChatResponse, ProviderError>;

    /// Streaming request. Never fails: errors arrive as a terminal `error` chunk.
    async fn chat_stream(&self, request: &ChatRequest, config: &ProviderConfig) -> ChunkStream;
}

// Compile-time check: Provider must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};

/// Deadline for one call against `config`.
pub fn request_timeout(config: &ProviderConfig) -> Duration {
    config.timeout.unwrap_or(DEFAULT_TIMEOUT)
}

/// Run `fut` under the target's deadline.
pub(crate) async fn with_deadline<T, F>(
    config: &ProviderConfig,
    fut: F,
) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    let timeout = request_timeout(config);
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
}

/// Apply caller headers to a request builder.
pub(crate) fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    config: &ProviderConfig,
) -> reqwest::RequestBuilder {
    for (name, value) in &config.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Turn a non-2xx response into a `Request` error carrying the body text.
pub(crate) async fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(ProviderError::request(status.as_u16(), body))
}
