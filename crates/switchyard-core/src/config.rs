use crate::error::RouterError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use switchyard_provider::providers::anthropic::AnthropicProvider;
use switchyard_provider::providers::openai_compat::OpenAiCompatProvider;
use switchyard_provider::traits::DEFAULT_TIMEOUT;
use switchyard_provider::{ProviderConfig, ProviderRegistry};

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_RETRY_COUNT: u32 = 2;
pub const MAX_RETRY_COUNT: u32 = 5;

/// What to do with a chain entry that cannot call tools natively when the
/// request carries tool definitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedToolsPolicy {
    /// Dispatch anyway; the adapter's own degradation applies.
    #[default]
    Degrade,
    /// Skip the entry without counting an attempt.
    Skip,
}

/// The chain a router dispatches over, plus retry and deadline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub primary: ProviderConfig,
    pub fallbacks: Vec<ProviderConfig>,
    pub retry_count: u32,
    pub timeout: Duration,
    pub max_tokens: Option<u32>,
    pub unsupported_tools: UnsupportedToolsPolicy,
}

impl RouterConfig {
    pub fn new(primary: ProviderConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry_count: DEFAULT_RETRY_COUNT,
            timeout: DEFAULT_TIMEOUT,
            max_tokens: None,
            unsupported_tools: UnsupportedToolsPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: ProviderConfig) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_unsupported_tools(mut self, policy: UnsupportedToolsPolicy) -> Self {
        self.unsupported_tools = policy;
        self
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(RouterError::Config(format!(
                "retry_count must be between 0 and {MAX_RETRY_COUNT}, got {}",
                self.retry_count
            )));
        }
        if self.timeout.is_zero() {
            return Err(RouterError::Config("timeout must be positive".to_string()));
        }
        for entry in std::iter::once(&self.primary).chain(&self.fallbacks) {
            if entry.provider.trim().is_empty() {
                return Err(RouterError::Config("provider name is empty".to_string()));
            }
            if entry.model_id.trim().is_empty() {
                return Err(RouterError::Config(format!(
                    "no model id for provider '{}'",
                    entry.provider
                )));
            }
        }
        Ok(())
    }

    /// `[primary, ...fallbacks]`, each with the router timeout filled in.
    pub fn chain(&self) -> Vec<ProviderConfig> {
        std::iter::once(&self.primary)
            .chain(&self.fallbacks)
            .map(|entry| {
                let mut entry = entry.clone();
                entry.timeout.get_or_insert(self.timeout);
                entry
            })
            .collect()
    }

    /// Build from a config file and an environment lookup. Environment values
    /// win over file values. Missing credentials are not an error here.
    pub fn resolve<F>(file: &FileConfig, env: F) -> Result<Self, RouterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve_profile(file, None, env)
    }

    /// Like `resolve`, with the primary taken from a named profile.
    ///
    /// The profile is `profile`, else `SWITCHYARD_PROFILE`, else the file's
    /// `active_profile`. Naming a profile the file does not define is an error.
    pub fn resolve_profile<F>(
        file: &FileConfig,
        profile: Option<&str>,
        env: F,
    ) -> Result<Self, RouterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let profile = match profile
            .map(str::to_string)
            .or_else(|| lookup("SWITCHYARD_PROFILE"))
            .or_else(|| file.active_profile.clone())
        {
            Some(id) => Some(
                file.profile(&id)
                    .ok_or_else(|| RouterError::Config(format!("unknown profile '{id}'")))?,
            ),
            None => None,
        };

        let (base_provider, base_model) = match profile {
            Some(p) => (p.provider.clone(), p.model.clone()),
            None => (
                file.provider
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
                file.model.clone(),
            ),
        };
        let provider = lookup("SWITCHYARD_PROVIDER").unwrap_or_else(|| base_provider.clone());
        // A model configured for one provider never carries over to another.
        let model = lookup("SWITCHYARD_MODEL")
            .or_else(|| base_model.filter(|_| provider == base_provider))
            .unwrap_or_else(|| default_model(&provider).to_string());

        let retry_count = match lookup("SWITCHYARD_RETRY_COUNT") {
            Some(raw) => parse_env("SWITCHYARD_RETRY_COUNT", &raw)?,
            None => file.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
        };
        let timeout = match lookup("SWITCHYARD_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(parse_env("SWITCHYARD_TIMEOUT_MS", &raw)?),
            None => file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
        };

        let overrides = profile
            .filter(|p| p.provider == provider)
            .and_then(|p| p.settings.as_ref());
        let fallbacks = match profile {
            Some(p) if !p.fallbacks.is_empty() => &p.fallbacks,
            _ => &file.fallbacks,
        };

        let config = Self {
            primary: file.target_with(&provider, &model, overrides, &lookup),
            fallbacks: fallbacks
                .iter()
                .map(|f| file.target(&f.provider, &f.model, &lookup))
                .collect(),
            retry_count,
            timeout,
            max_tokens: file.max_tokens,
            unsupported_tools: file.unsupported_tools,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RouterError> {
    raw.trim()
        .parse()
        .map_err(|_| RouterError::Config(format!("{key} is not a valid number: {raw}")))
}

/// Process environment lookup for `RouterConfig::resolve` and
/// `FileConfig::target`. Blank values count as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Model used when only a provider is named.
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "claude-sonnet-4-20250514",
        "openai" => "gpt-4o",
        "openrouter" => "openai/gpt-4o",
        "ollama" => "llama3.2",
        _ => "",
    }
}

/// Prefix for `{PREFIX}_API_KEY` / `{PREFIX}_BASE_URL`.
pub fn env_prefix(provider: &str) -> String {
    provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Serialized settings from ~/.switchyard/config.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub fallbacks: Vec<FallbackEntry>,
    pub retry_count: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_tokens: Option<u32>,
    pub unsupported_tools: UnsupportedToolsPolicy,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub custom: Vec<CustomProvider>,
    pub profiles: Vec<Profile>,
    /// Id of the profile used when none is named explicitly.
    pub active_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub provider: String,
    pub model: String,
}

/// Per-provider credentials and transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl ProviderSettings {
    /// Overlay the values `other` sets.
    fn merge(&mut self, other: &ProviderSettings) {
        if other.api_key.is_some() {
            self.api_key.clone_from(&other.api_key);
        }
        if other.base_url.is_some() {
            self.base_url.clone_from(&other.base_url);
        }
        if other.organization.is_some() {
            self.organization.clone_from(&other.organization);
        }
        self.headers
            .extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    Anthropic,
    Openai,
}

/// A named primary target with its own settings, selectable by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Layered over the `providers` block for this profile's provider.
    #[serde(default)]
    pub settings: Option<ProviderSettings>,
    /// Replaces the file-level fallbacks when non-empty.
    #[serde(default)]
    pub fallbacks: Vec<FallbackEntry>,
    /// Set once a ping through this profile has succeeded.
    #[serde(default)]
    pub verified: bool,
}

/// An extra endpoint speaking one of the built-in wire formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomProvider {
    pub name: String,
    pub api_format: ApiFormat,
    pub base_url: String,
}

impl FileConfig {
    /// Dispatch target for `provider`/`model`: environment first, then the
    /// provider's settings block, then a custom entry's base URL.
    pub fn target<F>(&self, provider: &str, model: &str, lookup: F) -> ProviderConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        self.target_with(provider, model, None, lookup)
    }

    /// `target` with profile settings layered over the provider block.
    pub fn target_with<F>(
        &self,
        provider: &str,
        model: &str,
        overrides: Option<&ProviderSettings>,
        lookup: F,
    ) -> ProviderConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = self.providers.get(provider).cloned().unwrap_or_default();
        if let Some(overrides) = overrides {
            settings.merge(overrides);
        }
        let prefix = env_prefix(provider);

        let mut target = ProviderConfig::new(provider, model);
        target.api_key = lookup(&format!("{prefix}_API_KEY")).or(settings.api_key);
        target.base_url = lookup(&format!("{prefix}_BASE_URL"))
            .or(settings.base_url)
            .or_else(|| {
                self.custom
                    .iter()
                    .find(|c| c.name == provider)
                    .map(|c| c.base_url.clone())
            });
        target.organization = settings.organization;
        target.headers = settings.headers;
        target
    }

    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Built-in adapters plus one per custom entry.
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::with_defaults();
        for custom in &self.custom {
            match custom.api_format {
                ApiFormat::Anthropic => {
                    registry.register(Arc::new(AnthropicProvider::named(custom.name.clone())))
                }
                ApiFormat::Openai => registry.register(Arc::new(OpenAiCompatProvider::new(
                    custom.name.clone(),
                    custom.base_url.clone(),
                ))),
            }
        }
        registry
    }
}

/// Location of the global settings file.
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".switchyard");
        path.push("config.json");
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved config. A missing file yields defaults.
    pub fn load(&self) -> Result<FileConfig, RouterError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileConfig::default()),
            Err(e) => {
                return Err(RouterError::Config(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&content)
            .map_err(|e| RouterError::Config(format!("invalid {}: {e}", self.path.display())))
    }

    pub fn save(&self, config: &FileConfig) -> Result<(), RouterError> {
        let write = || -> io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(config)?;
            fs::write(&self.path, content)
        };
        write().map_err(|e| RouterError::Config(format!("cannot write {}: {e}", self.path.display())))
    }
}
