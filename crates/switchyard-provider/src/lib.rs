//! switchyard-provider: unified message model and backend adapters.

pub mod config;
mod error;
pub mod registry;
pub mod stream;
pub mod traits;
pub mod types;

pub mod providers {
    pub mod anthropic;
    pub mod ollama;
    pub mod openai;
    pub mod openai_compat;
    pub mod openrouter;
}

pub use config::ProviderConfig;
pub use error::{is_retryable_message, ProviderError};
pub use registry::ProviderRegistry;
pub use stream::{ChunkSender, ChunkStream};
pub use traits::{Capabilities, Provider, ToolCalling};
pub use types::{
    ChatRequest, ChatResponse, ContentBlock, ImageSource, ImageSourceKind, Message,
    MessageContent, Role, StopReason, StreamChunk, ToolDefinition, ToolResultContent, Usage,
};
