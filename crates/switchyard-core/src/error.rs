//! Error types for the switchyard-core crate.

use switchyard_provider::ProviderError;

/// What a caller of `Router::chat` can get back besides a response.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Every chain entry failed; `source` is the last error observed.
    #[error("All providers failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        source: ProviderError,
    },

    /// Nothing was attempted: every entry was unknown or unconfigured.
    #[error("All providers failed: no configured provider in the chain")]
    NoProviderAvailable,

    /// Invalid router configuration or config file
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RouterError {
    /// The last provider error, when there was an attempt.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}
