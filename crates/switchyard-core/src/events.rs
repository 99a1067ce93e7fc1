//! Router lifecycle events.
//!
//! Events are a side channel for logging and metrics. They never change what
//! the router does, and a misbehaving callback cannot abort a request.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use switchyard_provider::ProviderConfig;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterEventKind {
    ProviderAttempt,
    ProviderSuccess,
    ProviderError,
    Fallback,
}

impl RouterEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderAttempt => "provider_attempt",
            Self::ProviderSuccess => "provider_success",
            Self::ProviderError => "provider_error",
            Self::Fallback => "fallback",
        }
    }
}

/// One lifecycle event. For `Fallback`, `provider`/`model_id` name the entry
/// being failed over to.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterEvent {
    pub kind: RouterEventKind,
    pub provider: String,
    pub model_id: String,
    pub error: Option<String>,
    pub latency: Option<Duration>,
}

impl RouterEvent {
    fn new(kind: RouterEventKind, target: &ProviderConfig) -> Self {
        Self {
            kind,
            provider: target.provider.clone(),
            model_id: target.model_id.clone(),
            error: None,
            latency: None,
        }
    }

    pub fn attempt(target: &ProviderConfig) -> Self {
        Self::new(RouterEventKind::ProviderAttempt, target)
    }

    pub fn success(target: &ProviderConfig, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new(RouterEventKind::ProviderSuccess, target)
        }
    }

    pub fn error(target: &ProviderConfig, error: impl ToString, latency: Duration) -> Self {
        Self {
            error: Some(error.to_string()),
            latency: Some(latency),
            ..Self::new(RouterEventKind::ProviderError, target)
        }
    }

    pub fn fallback(next: &ProviderConfig) -> Self {
        Self::new(RouterEventKind::Fallback, next)
    }

    /// Latency in whole milliseconds, if measured.
    pub fn latency_ms(&self) -> Option<u128> {
        self.latency.map(|l| l.as_millis())
    }
}

/// Observer for router events.
pub type EventCallback = Arc<dyn Fn(&RouterEvent) + Send + Sync>;

/// Log `event` and hand it to `callback`, swallowing panics.
pub(crate) fn emit(callback: Option<&EventCallback>, event: &RouterEvent) {
    match event.kind {
        RouterEventKind::ProviderAttempt => debug!(
            provider = %event.provider,
            model = %event.model_id,
            "provider attempt"
        ),
        RouterEventKind::ProviderSuccess => debug!(
            provider = %event.provider,
            model = %event.model_id,
            latency_ms = ?event.latency_ms(),
            "provider success"
        ),
        RouterEventKind::ProviderError => warn!(
            provider = %event.provider,
            model = %event.model_id,
            error = event.error.as_deref().unwrap_or(""),
            latency_ms = ?event.latency_ms(),
            "provider error"
        ),
        RouterEventKind::Fallback => info!(
            provider = %event.provider,
            model = %event.model_id,
            "failing over"
        ),
    }

    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!(event = event.kind.as_str(), "router event callback panicked");
        }
    }
}
