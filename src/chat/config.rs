//! Configuration types for the chat application.
//!
//! Command-line arguments are parsed with `arrrg` and resolved, together with the environment,
//! into a [`ChatConfig`].

use arrrg_derive::CommandLine;

use crate::config::{ClientConfig, IdentityMode, SessionConfig};
use crate::error::Result;

/// Environment variable holding the password used with `--username`.
pub const PASSWORD_VAR: &str = "PARLEY_PASSWORD";

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: openrouter/mistralai/devstral-2512:free)", "MODEL")]
    pub model: Option<String>,

    /// YAML file describing the backend deployment.
    #[arrrg(optional, "YAML deployment config (default: PARLEY_* environment)", "FILE")]
    pub config: Option<String>,

    /// Account to log in as before chatting.
    #[arrrg(optional, "Log in as this user (password from PARLEY_PASSWORD)", "USER")]
    pub username: Option<String>,

    /// Let the backend assign identities to new chats.
    #[arrrg(flag, "Let the server assign new chat identities")]
    pub server_assigned: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for the chat application.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Where the backend lives.
    pub client: ClientConfig,

    /// How the session behaves.
    pub session: SessionConfig,

    /// Account to log in as, if any.
    pub username: Option<String>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a configuration for the development deployment.
    pub fn new() -> Self {
        Self {
            client: ClientConfig::development(),
            session: SessionConfig::new(),
            username: None,
            use_color: true,
        }
    }

    /// Resolves arguments against the process environment.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        Self::from_args_with(args, |key| std::env::var(key).ok())
    }

    /// Resolves arguments against variables supplied by `lookup`.
    ///
    /// A `--config` file takes precedence over the environment.
    pub fn from_args_with(
        args: ChatArgs,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let client = match args.config.as_deref() {
            Some(path) => ClientConfig::from_yaml_file(path)?,
            None => ClientConfig::from_lookup(lookup)?,
        };
        let mut session = SessionConfig::new();
        if let Some(model) = args.model {
            session = session.with_model(model);
        }
        if args.server_assigned {
            session = session.with_identity_mode(IdentityMode::ServerAssigned);
        }
        Ok(ChatConfig {
            client,
            session,
            username: args.username,
            use_color: !args.no_color,
        })
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{DEFAULT_MODEL, Environment};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.client, ClientConfig::development());
        assert_eq!(config.session.model, DEFAULT_MODEL);
        assert!(config.use_color);
        assert!(config.username.is_none());
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from_args_with(ChatArgs::default(), lookup(&[])).unwrap();
        assert_eq!(config, ChatConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            model: Some("openai/gpt-4o".to_string()),
            config: None,
            username: Some("ada@example.com".to_string()),
            server_assigned: true,
            no_color: true,
        };
        let config = ChatConfig::from_args_with(
            args,
            lookup(&[("PARLEY_ENV", "production"), ("PARLEY_HOST", "chat.example.com")]),
        )
        .unwrap();
        assert_eq!(config.session.model, "openai/gpt-4o");
        assert_eq!(config.session.identity_mode, IdentityMode::ServerAssigned);
        assert_eq!(config.client.environment, Environment::Production);
        assert_eq!(config.client.host.as_deref(), Some("chat.example.com"));
        assert_eq!(config.username.as_deref(), Some("ada@example.com"));
        assert!(!config.use_color);
    }

    #[test]
    fn bad_environment_is_an_error() {
        let result = ChatConfig::from_args_with(ChatArgs::default(), lookup(&[("PARLEY_ENV", "qa")]));
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = ChatArgs {
            config: Some("/definitely/not/here.yaml".to_string()),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from_args_with(args, lookup(&[])).is_err());
    }

    #[test]
    fn without_color() {
        assert!(!ChatConfig::new().without_color().use_color);
    }
}
