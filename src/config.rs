//! Deployment and session configuration.
//!
//! [`ClientConfig`] says where the backend lives and is resolved once at startup, from the
//! environment or a YAML file.  [`SessionConfig`] tunes one
//! [`SessionController`](crate::SessionController) and is built with `with_*` methods.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::connection::DEFAULT_RECONNECT_DELAY;
use crate::error::{Error, Result};
use crate::history::DEFAULT_PAGE_SIZE;
use crate::uploads::DEFAULT_ATTACHMENT_CAP;

/// Host used in development when none is configured.
pub const DEVELOPMENT_HOST: &str = "localhost:8000";

/// Path of the API below the deployment's base path.
pub const API_PREFIX: &str = "/api/v1";

/// Path of the streaming endpoint below [`API_PREFIX`].
pub const CHAT_SOCKET_PATH: &str = "/messaging/chat/text_ws";

/// Model asked to answer when none is chosen.
pub const DEFAULT_MODEL: &str = "openrouter/mistralai/devstral-2512:free";

/// Request timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Which deployment the client talks to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// A backend on the developer's machine, over plain HTTP.
    #[default]
    Development,
    /// A deployed backend.
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::validation(
                format!("unknown environment {other:?}"),
                Some("environment".to_string()),
            )),
        }
    }
}

/// Where the backend lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Development or production.
    pub environment: Environment,

    /// `host[:port]` of the backend.  Required in production.
    pub host: Option<String>,

    /// Prefix the deployment is mounted under, e.g. `/chat`.
    pub base_path: String,

    /// Use TLS in production.
    pub secure: bool,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            host: None,
            base_path: String::new(),
            secure: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// A development configuration.
    pub fn development() -> Self {
        Self::default()
    }

    /// A production configuration for `host`.
    pub fn production(host: impl Into<String>) -> Self {
        Self {
            environment: Environment::Production,
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Resolves the configuration from `PARLEY_ENV`, `PARLEY_HOST`, `PARLEY_BASE_PATH`,
    /// `PARLEY_SECURE` and `PARLEY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration from variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(environment) = lookup("PARLEY_ENV") {
            config.environment = environment.parse()?;
        }
        config.host = lookup("PARLEY_HOST").filter(|h| !h.trim().is_empty());
        if let Some(base_path) = lookup("PARLEY_BASE_PATH") {
            config.base_path = base_path;
        }
        if let Some(secure) = lookup("PARLEY_SECURE") {
            config.secure = parse_bool(&secure).ok_or_else(|| {
                Error::validation(
                    format!("PARLEY_SECURE must be true or false, not {secure:?}"),
                    Some("PARLEY_SECURE".to_string()),
                )
            })?;
        }
        if let Some(timeout) = lookup("PARLEY_TIMEOUT_SECS") {
            config.timeout_secs = timeout.trim().parse().map_err(|_| {
                Error::validation(
                    format!("PARLEY_TIMEOUT_SECS must be a number of seconds, not {timeout:?}"),
                    Some("PARLEY_TIMEOUT_SECS".to_string()),
                )
            })?;
        }
        Ok(config)
    }

    /// Parses a YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a YAML configuration file.
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read {path}: {e}"), e))?;
        Self::from_yaml(&yaml)
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The root of the HTTP API, e.g. `http://localhost:8000/api/v1`.
    pub fn api_base(&self) -> Result<Url> {
        let scheme = match (self.environment, self.secure) {
            (Environment::Production, true) => "https",
            _ => "http",
        };
        self.url(scheme, "")
    }

    /// The streaming endpoint, e.g. `ws://localhost:8000/api/v1/messaging/chat/text_ws`.
    pub fn ws_url(&self) -> Result<Url> {
        let scheme = match (self.environment, self.secure) {
            (Environment::Production, true) => "wss",
            _ => "ws",
        };
        self.url(scheme, CHAT_SOCKET_PATH)
    }

    fn host(&self) -> Result<&str> {
        match (self.environment, self.host.as_deref()) {
            (_, Some(host)) => Ok(host),
            (Environment::Development, None) => Ok(DEVELOPMENT_HOST),
            (Environment::Production, None) => Err(Error::validation(
                "production requires a host",
                Some("host".to_string()),
            )),
        }
    }

    fn url(&self, scheme: &str, path: &str) -> Result<Url> {
        let host = self.host()?;
        let base_path = self.base_path.trim().trim_matches('/');
        let url = if base_path.is_empty() {
            format!("{scheme}://{host}{API_PREFIX}{path}")
        } else {
            format!("{scheme}://{host}/{base_path}{API_PREFIX}{path}")
        };
        Ok(Url::parse(&url)?)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// How a new conversation gets its identity.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// The client mints the identity right before the first send.
    #[default]
    ClientMinted,
    /// The backend assigns it with a `chat_created` event.
    ServerAssigned,
}

/// Tuning for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Model asked to answer.
    pub model: String,

    /// How new conversations get their identity.
    pub identity_mode: IdentityMode,

    /// Delay before reconnecting a dropped connection.
    pub reconnect_delay: Duration,

    /// Attachments one message may carry.
    pub attachment_cap: usize,

    /// Chats requested per history page.
    pub page_size: usize,
}

impl SessionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            identity_mode: IdentityMode::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            attachment_cap: DEFAULT_ATTACHMENT_CAP,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the identity mode.
    pub fn with_identity_mode(mut self, identity_mode: IdentityMode) -> Self {
        self.identity_mode = identity_mode;
        self
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Sets the attachment limit.
    pub fn with_attachment_cap(mut self, attachment_cap: usize) -> Self {
        self.attachment_cap = attachment_cap;
        self
    }

    /// Sets the history page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
