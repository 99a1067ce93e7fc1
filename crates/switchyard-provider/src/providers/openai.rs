//! OpenAI provider built on the OpenAI-compatible transport.

use crate::providers::openai_compat::OpenAiCompatProvider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Create the OpenAI adapter.
///
/// Credentials come from the dispatch target (`OPENAI_API_KEY` when resolved
/// from the environment).
pub fn new_openai_provider() -> OpenAiCompatProvider {
    OpenAiCompatProvider::new("openai", OPENAI_BASE_URL)
}
