//! switchyard-core: retrying, failing-over router across chat providers.

pub mod backoff;
pub mod config;
mod error;
pub mod events;
pub mod router;

pub use backoff::{BackoffPolicy, ExponentialBackoff, Sleeper, TokioSleeper};
pub use config::{
    default_model, process_env, ApiFormat, ConfigStore, CustomProvider, FallbackEntry,
    FileConfig, Profile, ProviderSettings, RouterConfig, UnsupportedToolsPolicy,
};
pub use error::RouterError;
pub use events::{EventCallback, RouterEvent, RouterEventKind};
pub use router::Router;
