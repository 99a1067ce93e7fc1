//! Router with per-provider retry and ordered failover.

use crate::backoff::{BackoffPolicy, ExponentialBackoff, Sleeper, TokioSleeper};
use crate::config::{RouterConfig, UnsupportedToolsPolicy};
use crate::error::RouterError;
use crate::events::{emit, EventCallback, RouterEvent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use switchyard_provider::{
    ChatRequest, ChatResponse, ChunkSender, ChunkStream, Provider, ProviderConfig,
    ProviderRegistry, StreamChunk, ToolCalling,
};
use tracing::{debug, info, warn};

/// Dispatches requests over a chain of provider configurations.
///
/// Cheap to clone; clones share the registry, policy and callback.
#[derive(Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    registry: Arc<ProviderRegistry>,
    backoff: Arc<dyn BackoffPolicy>,
    sleeper: Arc<dyn Sleeper>,
    callback: Option<EventCallback>,
}

impl Router {
    pub fn new(config: RouterConfig, registry: Arc<ProviderRegistry>) -> Result<Self, RouterError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            registry,
            backoff: Arc::new(ExponentialBackoff::default()),
            sleeper: Arc::new(TokioSleeper),
            callback: None,
        })
    }

    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Install the event observer, replacing any previous one.
    pub fn on_event(&mut self, callback: impl Fn(&RouterEvent) + Send + Sync + 'static) {
        self.callback = Some(Arc::new(callback));
    }

    /// Replace the configuration. Requests already in flight keep the chain
    /// they started with.
    pub fn update_config(&mut self, config: RouterConfig) -> Result<(), RouterError> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(())
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Send a request, retrying each entry and failing over on error.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RouterError> {
        let config = Arc::clone(&self.config);
        let request = prepare(request, &config);
        let chain = config.chain();

        let mut last_error = None;
        let mut attempts = 0u32;

        for (idx, target) in chain.iter().enumerate() {
            let Some(provider) = self.select(target, &request, &config) else {
                continue;
            };

            for attempt in 0..=config.retry_count {
                attempts += 1;
                self.emit(&RouterEvent::attempt(target));
                debug!(
                    provider = %target.provider,
                    model = %target.model_id,
                    attempt = attempt + 1,
                    of = config.retry_count + 1,
                    "dispatching"
                );

                let started = Instant::now();
                match provider.chat(&request, target).await {
                    Ok(response) => {
                        self.emit(&RouterEvent::success(target, started.elapsed()));
                        if idx > 0 {
                            info!(
                                provider = %target.provider,
                                model = %target.model_id,
                                "request succeeded on failover provider"
                            );
                        }
                        return Ok(response);
                    }
                    Err(e) => {
                        let retryable = e.is_retryable();
                        self.emit(&RouterEvent::error(target, &e, started.elapsed()));
                        last_error = Some(e);

                        if !retryable || attempt == config.retry_count {
                            break;
                        }

                        let delay = self.backoff.delay(attempt);
                        debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                        self.sleeper.sleep(delay).await;
                    }
                }
            }

            if let Some(next) = chain.get(idx + 1) {
                self.emit(&RouterEvent::fallback(next));
            }
        }

        Err(match last_error {
            Some(source) => RouterError::Exhausted { attempts, source },
            None => RouterError::NoProviderAvailable,
        })
    }

    /// Stream a request. One attempt per entry; once a non-error chunk has
    /// been forwarded the stream is committed to that entry.
    ///
    /// Never fails: exhaustion ends the stream with an `error` chunk.
    pub fn chat_stream(&self, request: &ChatRequest) -> ChunkStream {
        let router = self.clone();
        let config = Arc::clone(&self.config);
        let request = prepare(request, &config);
        ChunkStream::spawn(move |tx| async move { router.stream_chain(config, request, tx).await })
    }

    async fn stream_chain(self, config: Arc<RouterConfig>, request: ChatRequest, tx: ChunkSender) {
        let chain = config.chain();
        let mut last_error: Option<String> = None;

        for (idx, target) in chain.iter().enumerate() {
            let Some(provider) = self.select(target, &request, &config) else {
                continue;
            };

            self.emit(&RouterEvent::attempt(target));
            let started = Instant::now();
            let mut stream = provider.chat_stream(&request, target).await;
            let first = stream.next().await;

            match first {
                Some(StreamChunk::Error { error }) => {
                    self.emit(&RouterEvent::error(target, &error, started.elapsed()));
                    last_error = Some(error);
                }
                None => {
                    let error = "stream ended without output".to_string();
                    self.emit(&RouterEvent::error(target, &error, started.elapsed()));
                    last_error = Some(error);
                }
                Some(first) => {
                    self.emit(&RouterEvent::success(target, started.elapsed()));
                    self.forward(target, first, stream, &tx, started).await;
                    return;
                }
            }

            if let Some(next) = chain.get(idx + 1) {
                self.emit(&RouterEvent::fallback(next));
            }
        }

        let message = match last_error {
            Some(error) => format!("All providers failed: {error}"),
            None => RouterError::NoProviderAvailable.to_string(),
        };
        tx.send(StreamChunk::error(message)).await;
    }

    /// Pass the committed entry's chunks through until its terminal chunk.
    async fn forward(
        &self,
        target: &ProviderConfig,
        first: StreamChunk,
        mut stream: ChunkStream,
        tx: &ChunkSender,
        started: Instant,
    ) {
        let mut chunk = first;
        loop {
            if let StreamChunk::Error { error } = &chunk {
                warn!(
                    provider = %target.provider,
                    "stream failed after output was delivered, not failing over"
                );
                self.emit(&RouterEvent::error(target, error, started.elapsed()));
            }
            if !tx.send(chunk).await {
                return;
            }
            match stream.next().await {
                Some(next) => chunk = next,
                None => return,
            }
        }
    }

    /// The adapter for `target`, or `None` when the entry must be skipped.
    fn select(
        &self,
        target: &ProviderConfig,
        request: &ChatRequest,
        config: &RouterConfig,
    ) -> Option<Arc<dyn Provider>> {
        let Some(provider) = self.registry.get(&target.provider) else {
            warn!(provider = %target.provider, "unknown provider, skipping chain entry");
            return None;
        };
        if !provider.is_configured(target) {
            warn!(provider = %target.provider, "provider not configured, skipping chain entry");
            return None;
        }
        if config.unsupported_tools == UnsupportedToolsPolicy::Skip
            && !request.tools.is_empty()
            && provider.capabilities().tool_calling != ToolCalling::Native
        {
            warn!(
                provider = %target.provider,
                "provider cannot call tools natively, skipping chain entry"
            );
            return None;
        }
        Some(provider)
    }

    fn emit(&self, event: &RouterEvent) {
        emit(self.callback.as_ref(), event);
    }
}

/// Apply router-level defaults to a caller request.
fn prepare(request: &ChatRequest, config: &RouterConfig) -> ChatRequest {
    let mut request = request.clone();
    if request.max_tokens.is_none() {
        request.max_tokens = config.max_tokens;
    }
    request
}
