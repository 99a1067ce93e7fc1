//! OpenRouter provider.
//!
//! Same wire format as OpenAI; adds the routing identification headers
//! OpenRouter uses for attribution.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::providers::openai_compat::OpenAiCompatProvider;
use crate::stream::ChunkStream;
use crate::traits::{Capabilities, Provider};
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_REFERER: &str = "https://github.com/switchyard-rs/switchyard";
const DEFAULT_TITLE: &str = "switchyard";

/// Wraps the OpenAI-compatible adapter with a fixed header injector.
pub struct OpenRouterProvider {
    inner: OpenAiCompatProvider,
    referer: String,
    title: String,
}

impl OpenRouterProvider {
    pub fn new() -> Self {
        Self::with_app(DEFAULT_REFERER, DEFAULT_TITLE)
    }

    /// Identify as a different application.
    pub fn with_app(referer: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            inner: OpenAiCompatProvider::new("openrouter", OPENROUTER_BASE_URL),
            referer: referer.into(),
            title: title.into(),
        }
    }

    /// `config` plus the routing headers. Headers the caller already set win.
    fn with_routing_headers(&self, config: &ProviderConfig) -> ProviderConfig {
        let mut config = config.clone();
        for (name, value) in [("HTTP-Referer", &self.referer), ("X-Title", &self.title)] {
            let present = config.headers.keys().any(|k| k.eq_ignore_ascii_case(name));
            if !present {
                config.headers.insert(name.to_string(), value.clone());
            }
        }
        config
    }
}

impl Default for OpenRouterProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn is_configured(&self, config: &ProviderConfig) -> bool {
        self.inner.is_configured(config)
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        config: &ProviderConfig,
    ) -> Result<ChatResponse, ProviderError> {
        self.inner
            .chat(request, &self.with_routing_headers(config))
            .await
    }

    async fn chat_stream(&self, request: &ChatRequest, config: &ProviderConfig) -> ChunkStream {
        self.inner
            .chat_stream(request, &self.with_routing_headers(config))
            .await
    }
}
