use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
    #[serde(default)]
    pub tenants: TenantsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_realtime_model")]
    pub realtime_model: String,
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

/// Timing budget for the telephony webhook path.
///
/// The provider drops the call if we miss its response deadline, so the
/// model timeout must leave room to still return a fallback instruction.
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    #[serde(default = "default_gather_timeout_secs")]
    pub gather_timeout_secs: u32,
    #[serde(default = "default_max_reprompts")]
    pub max_reprompts: u32,
    #[serde(default = "default_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout_ms(),
            gather_timeout_secs: default_gather_timeout_secs(),
            max_reprompts: default_max_reprompts(),
            max_history_turns: default_history_turns(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

fn default_model_timeout_ms() -> u64 {
    3500
}

fn default_gather_timeout_secs() -> u32 {
    6
}

fn default_max_reprompts() -> u32 {
    2
}

fn default_history_turns() -> usize {
    12
}

fn default_session_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_session_secs: default_max_session_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_max_session_secs() -> u64 {
    900
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_outbound_queue() -> usize {
    256
}

/// Internal collaborator endpoints the tool executor calls into.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CollaboratorConfig {
    /// Base URL of the appointment service. Empty disables booking.
    #[serde(default)]
    pub appointments_url: String,
    /// Base URL of the SMS sender. Empty disables SMS.
    #[serde(default)]
    pub sms_url: String,
    /// Bearer token for collaborator requests.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantsConfig {
    #[serde(default = "default_tenants_file")]
    pub file: String,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            file: default_tenants_file(),
        }
    }
}

fn default_tenants_file() -> String {
    "tenants.toml".to_string()
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env from the same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        // Allow env var overrides for secrets
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            config.openai.api_key = v;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_COLLABORATOR_TOKEN") {
            config.collaborators.token = v;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_TENANTS_FILE") {
            config.tenants.file = v;
        }

        Ok(config)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("SWITCHBOARD_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".switchboard")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("SWITCHBOARD_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}
