//! Subcommand implementations.

pub mod chat;
pub mod ping;
pub mod providers;

use serde::Serialize;
use switchyard_core::RouterEvent;

/// Typed error used to propagate deterministic process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExitError {
    pub code: i32,
    pub message: String,
    /// Output was already written (e.g. as JSON); print nothing more.
    pub quiet: bool,
}

impl ExitError {
    pub fn failed(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self {
            code: 1,
            message: message.into(),
            quiet: false,
        })
    }

    pub fn reported() -> anyhow::Error {
        anyhow::Error::new(Self {
            code: 1,
            message: String::new(),
            quiet: true,
        })
    }
}

/// Router event as printed in `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub kind: &'static str,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u128>,
}

impl From<&RouterEvent> for EventRecord {
    fn from(event: &RouterEvent) -> Self {
        Self {
            kind: event.kind.as_str(),
            provider: event.provider.clone(),
            model: event.model_id.clone(),
            error: event.error.clone(),
            latency_ms: event.latency_ms(),
        }
    }
}
