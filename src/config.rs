// ABOUTME: Client configuration from TOML file with environment variable overrides.
// ABOUTME: Validates the credential mode and provides defaults for intervals and timeouts.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_base_url() -> String {
    "https://directline.botframework.com/v3/directline".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

// ~28.5 minutes, comfortably inside the ~30 minute token lifetime
fn default_refresh_interval_ms() -> u64 {
    1_710_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Configuration for a [`ConnectionClient`](crate::ConnectionClient).
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service base URL, without a trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Long-lived app secret. Token refresh is disabled in secret mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Per-conversation token, renewed periodically while Online
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Local account id stamped onto outgoing activities without a sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Delay before re-polling after an empty activity page
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fixed delay before reissuing a request that failed transiently
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Token refresh cadence while Online (token mode only)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret: None,
            token: None,
            user_id: None,
            user_name: None,
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// Custom Debug impl to redact credentials
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("refresh_interval_ms", &self.refresh_interval_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// The credential the client authenticates with.
///
/// A secret is long-lived and never refreshed; a token is per-conversation
/// and rotated by the refresher while the session is Online.
#[derive(Clone)]
pub enum Credential {
    Secret(String),
    Token(String),
}

impl Credential {
    pub fn value(&self) -> &str {
        match self {
            Self::Secret(v) | Self::Token(v) => v,
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token(_))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret(_) => write!(f, "Credential::Secret([REDACTED])"),
            Self::Token(_) => write!(f, "Credential::Token([REDACTED])"),
        }
    }
}

impl ClientConfig {
    /// Resolve the configured credential. Exactly one of `secret`/`token`
    /// must be set.
    pub fn credential(&self) -> Result<Credential> {
        match (&self.secret, &self.token) {
            (Some(_), Some(_)) => bail!("config sets both secret and token; choose one"),
            (Some(s), None) => Ok(Credential::Secret(s.clone())),
            (None, Some(t)) => Ok(Credential::Token(t.clone())),
            (None, None) => bail!("config needs either a secret or a token"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        // CHATLINE_CONFIG_PATH wins (useful for testing and deployment)
        if let Ok(env_path) = std::env::var("CHATLINE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("chatline.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// Load configuration with environment variable overrides.
    /// Searches: CHATLINE_CONFIG_PATH env var, then ./chatline.toml.
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            Self::from_file(&config_path)?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            ClientConfig::default()
        };

        if let Ok(val) = std::env::var("CHATLINE_BASE_URL") {
            config.base_url = val;
        }
        if let Ok(val) = std::env::var("CHATLINE_SECRET") {
            config.secret = Some(val);
        }
        if let Ok(val) = std::env::var("CHATLINE_TOKEN") {
            config.token = Some(val);
        }
        if let Ok(val) = std::env::var("CHATLINE_USER_ID") {
            config.user_id = Some(val);
        }

        config.credential()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
