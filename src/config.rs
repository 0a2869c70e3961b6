//! Relay configuration, read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::conversation::sessions::{DEFAULT_MAX_CACHED_SESSIONS, DEFAULT_SESSION_IDLE};
use crate::llm::instruction::{DEFAULT_INSTRUCTION, load_instruction};

/// Provider credential.
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Provider base URL.
pub const ENV_PROVIDER_URL: &str = "RELAY_PROVIDER_URL";
/// Model identifier.
pub const ENV_MODEL: &str = "RELAY_MODEL";
/// Comma-separated allowed origins.
pub const ENV_ALLOWED_ORIGINS: &str = "RELAY_ALLOWED_ORIGINS";
/// Listener port.
pub const ENV_PORT: &str = "RELAY_PORT";
/// Default conversation mirror.
pub const ENV_CHAT_FILE: &str = "RELAY_CHAT_FILE";
/// Directory for per-session mirrors.
pub const ENV_SESSIONS_DIR: &str = "RELAY_SESSIONS_DIR";
/// Most session conversations kept in memory at once.
pub const ENV_MAX_CACHED_SESSIONS: &str = "RELAY_MAX_CACHED_SESSIONS";
/// Seconds an unused session conversation stays in memory.
pub const ENV_SESSION_IDLE: &str = "RELAY_SESSION_IDLE_SECS";
/// Provider request timeout in seconds.
pub const ENV_PROVIDER_TIMEOUT: &str = "RELAY_PROVIDER_TIMEOUT_SECS";
/// Optional instruction override file.
pub const ENV_INSTRUCTION_FILE: &str = "RELAY_INSTRUCTION_FILE";
/// Execution environment; `production` selects handler mode.
pub const ENV_EXECUTION: &str = "RELAY_ENV";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required setting {0}")]
    Missing(&'static str),
    /// A value is out of range or unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the process serves requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Persistent HTTP listener.
    #[default]
    Listener,
    /// One platform-managed invocation per process.
    Handler,
}

impl DeploymentMode {
    /// Map the execution-environment flag onto a mode.
    #[must_use]
    pub fn from_environment(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(env) if env.eq_ignore_ascii_case("production") => Self::Handler,
            _ => Self::Listener,
        }
    }
}

/// Top-level relay configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Completion provider settings.
    pub provider: ProviderConfig,
    /// Conversation mirror settings.
    pub storage: StorageConfig,
    /// HTTP surface settings.
    pub server: ServerConfig,
    /// Deployment mode.
    pub mode: DeploymentMode,
    /// System instruction prepended to every provider request.
    pub instruction: String,
}

impl RelayConfig {
    /// Create a config with defaults and the built-in instruction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instruction: DEFAULT_INSTRUCTION.to_string(),
            ..Self::default()
        }
    }

    /// Read configuration from process environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or validation fails.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or validation fails.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::new();

        config.provider.api_key = get(ENV_API_KEY).ok_or(ConfigError::Missing(ENV_API_KEY))?;
        if let Some(url) = get(ENV_PROVIDER_URL) {
            config.provider.base_url = url;
        }
        if let Some(model) = get(ENV_MODEL) {
            config.provider.model = model;
        }
        if let Some(secs) = get(ENV_PROVIDER_TIMEOUT) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PROVIDER_TIMEOUT}={secs}")))?;
            config.provider.request_timeout = Duration::from_secs(secs);
        }
        if let Some(port) = get(ENV_PORT) {
            config.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PORT}={port}")))?;
        }
        if let Some(origins) = get(ENV_ALLOWED_ORIGINS) {
            config.server.allowed_origins = parse_origins(&origins);
        }
        if let Some(file) = get(ENV_CHAT_FILE) {
            config.storage.chat_file = PathBuf::from(file);
        }
        if let Some(dir) = get(ENV_SESSIONS_DIR) {
            config.storage.sessions_dir = PathBuf::from(dir);
        }
        if let Some(max) = get(ENV_MAX_CACHED_SESSIONS) {
            config.storage.max_cached_sessions = max
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_MAX_CACHED_SESSIONS}={max}")))?;
        }
        if let Some(secs) = get(ENV_SESSION_IDLE) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_SESSION_IDLE}={secs}")))?;
            config.storage.session_idle = Duration::from_secs(secs);
        }
        if let Some(path) = get(ENV_INSTRUCTION_FILE) {
            config.instruction = load_instruction(Path::new(&path))?;
        }
        config.mode = DeploymentMode::from_environment(get(ENV_EXECUTION).as_deref());

        config.validate()?;
        Ok(config)
    }

    /// Set the provider credential.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.provider.api_key = key.into();
        self
    }

    /// Set the allowed origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.server.allowed_origins = origins;
        self
    }

    /// Set the mirror locations.
    #[must_use]
    pub fn with_storage(mut self, chat_file: impl Into<PathBuf>, sessions_dir: impl Into<PathBuf>) -> Self {
        self.storage.chat_file = chat_file.into();
        self.storage.sessions_dir = sessions_dir.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_API_KEY));
        }

        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model must not be empty".to_string()));
        }

        if self.provider.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "provider.request_timeout must be > 0".to_string(),
            ));
        }

        if self.storage.max_cached_sessions == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_cached_sessions must be > 0".to_string(),
            ));
        }

        if self.storage.session_idle.is_zero() {
            return Err(ConfigError::Invalid("storage.session_idle must be > 0".to_string()));
        }

        if self.instruction.trim().is_empty() {
            return Err(ConfigError::Invalid("instruction must not be empty".to_string()));
        }

        Url::parse(&self.provider.base_url)?;

        for origin in &self.server.allowed_origins {
            if origin != "*" {
                Url::parse(origin)?;
            }
        }

        Ok(())
    }
}

/// Completion provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Bearer credential.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Total request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Conversation mirror settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Mirror of the shared default conversation.
    pub chat_file: PathBuf,
    /// Directory for per-session mirrors.
    pub sessions_dir: PathBuf,
    /// Most session conversations kept in memory; older idle ones are dropped.
    pub max_cached_sessions: usize,
    /// How long an unused session conversation stays in memory.
    #[serde(with = "duration_serde")]
    pub session_idle: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chat_file: PathBuf::from("tempChats.json"),
            sessions_dir: PathBuf::from("sessions"),
            max_cached_sessions: DEFAULT_MAX_CACHED_SESSIONS,
            session_idle: DEFAULT_SESSION_IDLE,
        }
    }
}

/// HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener port (listener mode only).
    pub port: u16,
    /// Allowed CORS origins; empty or `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Whether every origin is allowed.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
