use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub twilio: TwilioConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub messaging_service_sid: Option<String>,
}

impl TwilioConfig {
    /// True when the transport is fully configured; partial configuration is
    /// a validation error.
    pub fn enabled(&self) -> bool {
        self.account_sid.is_some()
            && self.auth_token.is_some()
            && self.messaging_service_sid.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub readback_limit: u32,
    pub max_tool_rounds: u32,
    pub intro_message: String,
    pub base_prompt_file: Option<PathBuf>,
    pub max_active_outreach: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_messaging_service_sid: Option<String>,
    pub readback_limit: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://winback.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            twilio: TwilioConfig {
                account_sid: None,
                auth_token: None,
                messaging_service_sid: None,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.0,
                max_tokens: 300,
                timeout_secs: 30,
            },
            conversation: ConversationConfig {
                readback_limit: 15,
                max_tool_rounds: 8,
                intro_message: "Hey! Quick check-in—are you still seeing any pest activity?"
                    .to_string(),
                base_prompt_file: None,
                max_active_outreach: None,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("winback.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(twilio) = patch.twilio {
            if let Some(account_sid) = twilio.account_sid {
                self.twilio.account_sid = Some(account_sid);
            }
            if let Some(auth_token_value) = twilio.auth_token {
                self.twilio.auth_token = Some(secret_value(auth_token_value));
            }
            if let Some(messaging_service_sid) = twilio.messaging_service_sid {
                self.twilio.messaging_service_sid = Some(messaging_service_sid);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(readback_limit) = conversation.readback_limit {
                self.conversation.readback_limit = readback_limit;
            }
            if let Some(max_tool_rounds) = conversation.max_tool_rounds {
                self.conversation.max_tool_rounds = max_tool_rounds;
            }
            if let Some(intro_message) = conversation.intro_message {
                self.conversation.intro_message = intro_message;
            }
            if let Some(base_prompt_file) = conversation.base_prompt_file {
                self.conversation.base_prompt_file = Some(base_prompt_file);
            }
            if let Some(max_active_outreach) = conversation.max_active_outreach {
                self.conversation.max_active_outreach = Some(max_active_outreach);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WINBACK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("WINBACK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("WINBACK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WINBACK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("WINBACK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WINBACK_TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(value);
        }
        if let Some(value) = read_env("WINBACK_TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("WINBACK_TWILIO_MESSAGING_SERVICE_SID") {
            self.twilio.messaging_service_sid = Some(value);
        }

        if let Some(value) = read_env("WINBACK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("WINBACK_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("WINBACK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("WINBACK_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f64("WINBACK_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("WINBACK_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("WINBACK_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("WINBACK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("WINBACK_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WINBACK_CONVERSATION_READBACK_LIMIT") {
            self.conversation.readback_limit =
                parse_u32("WINBACK_CONVERSATION_READBACK_LIMIT", &value)?;
        }
        if let Some(value) = read_env("WINBACK_CONVERSATION_MAX_TOOL_ROUNDS") {
            self.conversation.max_tool_rounds =
                parse_u32("WINBACK_CONVERSATION_MAX_TOOL_ROUNDS", &value)?;
        }
        if let Some(value) = read_env("WINBACK_CONVERSATION_INTRO_MESSAGE") {
            self.conversation.intro_message = value;
        }
        if let Some(value) = read_env("WINBACK_CONVERSATION_BASE_PROMPT_FILE") {
            self.conversation.base_prompt_file = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("WINBACK_OUTREACH_MAX_ACTIVE") {
            self.conversation.max_active_outreach =
                Some(parse_u64("WINBACK_OUTREACH_MAX_ACTIVE", &value)?);
        }

        if let Some(value) = read_env("WINBACK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("WINBACK_SERVER_PORT") {
            self.server.port = parse_u16("WINBACK_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("WINBACK_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("WINBACK_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_api_key_value) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key_value));
        }
        if let Some(account_sid) = overrides.twilio_account_sid {
            self.twilio.account_sid = Some(account_sid);
        }
        if let Some(auth_token_value) = overrides.twilio_auth_token {
            self.twilio.auth_token = Some(secret_value(auth_token_value));
        }
        if let Some(messaging_service_sid) = overrides.twilio_messaging_service_sid {
            self.twilio.messaging_service_sid = Some(messaging_service_sid);
        }
        if let Some(readback_limit) = overrides.readback_limit {
            self.conversation.readback_limit = readback_limit;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("llm.base_url must not be empty".to_string()));
        }
        if self.conversation.readback_limit == 0 {
            return Err(ConfigError::Validation(
                "conversation.readback_limit must be at least 1".to_string(),
            ));
        }
        if self.conversation.max_tool_rounds == 0 {
            return Err(ConfigError::Validation(
                "conversation.max_tool_rounds must be at least 1".to_string(),
            ));
        }

        let twilio_fields_set = [
            self.twilio.account_sid.is_some(),
            self.twilio.auth_token.is_some(),
            self.twilio.messaging_service_sid.is_some(),
        ];
        if twilio_fields_set.iter().any(|set| *set) && !twilio_fields_set.iter().all(|set| *set) {
            return Err(ConfigError::Validation(
                "twilio configuration is partial: account_sid, auth_token, and \
                 messaging_service_sid must all be set"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    twilio: Option<TwilioPatch>,
    llm: Option<LlmPatch>,
    conversation: Option<ConversationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioPatch {
    account_sid: Option<String>,
    auth_token: Option<String>,
    messaging_service_sid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    readback_limit: Option<u32>,
    max_tool_rounds: Option<u32>,
    intro_message: Option<String>,
    base_prompt_file: Option<PathBuf>,
    max_active_outreach: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("winback.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.into() })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_validate() {
        let config = AppConfig::load(LoadOptions::default()).expect("defaults should load");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.conversation.readback_limit, 15);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(!config.twilio.enabled());
    }

    #[test]
    fn programmatic_overrides_win() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_model: Some("gpt-4o".to_string()),
                readback_limit: Some(5),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("overrides should load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.conversation.readback_limit, 5);
    }

    #[test]
    fn partial_twilio_configuration_is_rejected() {
        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                twilio_account_sid: Some("AC123".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect_err("partial twilio config must fail validation");

        assert!(matches!(error, ConfigError::Validation(_)));
        assert!(error.to_string().contains("twilio"));
    }

    #[test]
    fn full_twilio_configuration_enables_transport() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                twilio_account_sid: Some("AC123".to_string()),
                twilio_auth_token: Some("token".to_string()),
                twilio_messaging_service_sid: Some("MG456".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("full twilio config should load");

        assert!(config.twilio.enabled());
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/winback.toml")),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect_err("required file must exist");

        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn zero_readback_limit_is_rejected() {
        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                readback_limit: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect_err("zero readback window is invalid");

        assert!(matches!(error, ConfigError::Validation(_)));
    }
}
