//! CLI argument and command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use switchyard_core::{default_model, FallbackEntry, FileConfig, RouterConfig, RouterError};

#[derive(Debug, Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Chat with any provider through one retrying, failing-over router"
)]
pub struct Cli {
    /// Config-file profile to use (overrides SWITCHYARD_PROFILE and active_profile).
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Primary provider (overrides config file and SWITCHYARD_PROVIDER).
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Primary model (defaults to the provider's default model).
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Fallback entry, tried in order after the primary. Repeatable.
    #[arg(
        long = "fallback",
        value_name = "PROVIDER:MODEL",
        value_parser = parse_fallback,
        global = true
    )]
    pub fallbacks: Vec<FallbackEntry>,

    /// Retries per chain entry (0-5).
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(0..=5))]
    pub retries: Option<u32>,

    /// Per-request deadline in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Config file (defaults to ~/.switchyard/config.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send one prompt and print the reply.
    Chat {
        /// The prompt to send.
        prompt: String,

        /// System prompt.
        #[arg(long)]
        system: Option<String>,

        /// Print text as it arrives.
        #[arg(long)]
        stream: bool,

        /// Output token limit for this request.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Emit a single JSON object instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// List adapters, their capabilities, and whether they are configured.
    Providers,

    /// Send a one-token request to check connectivity and credentials.
    Ping,
}

impl Cli {
    /// Resolve file + environment, then apply command-line overrides.
    pub fn router_config<F>(&self, file: &FileConfig, env: F) -> Result<RouterConfig, RouterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RouterConfig::resolve_profile(file, self.profile.as_deref(), &env)?;

        // Switching provider rebuilds the entry; a model alone keeps its settings.
        if let Some(provider) = self
            .provider
            .as_ref()
            .filter(|p| **p != config.primary.provider)
        {
            let model = self
                .model
                .clone()
                .unwrap_or_else(|| default_model(provider).to_string());
            config.primary = file.target(provider, &model, &env);
        } else if let Some(model) = &self.model {
            config.primary.model_id = model.clone();
        }
        if !self.fallbacks.is_empty() {
            config.fallbacks = self
                .fallbacks
                .iter()
                .map(|f| file.target(&f.provider, &f.model, &env))
                .collect();
        }
        if let Some(retries) = self.retries {
            config.retry_count = retries;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

/// `provider:model`. Only the first colon splits, so model tags survive.
fn parse_fallback(raw: &str) -> Result<FallbackEntry, String> {
    match raw.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok(FallbackEntry {
                provider: provider.to_string(),
                model: model.to_string(),
            })
        }
        _ => Err(format!("expected PROVIDER:MODEL, got '{raw}'")),
    }
}
