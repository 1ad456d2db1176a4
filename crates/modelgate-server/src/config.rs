use anyhow::{Context, bail};
use modelgate_egress::HttpClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub http_client: HttpClientSettings,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderSettings>,
    pub anthropic: Option<ProviderSettings>,
    pub gemini: Option<ProviderSettings>,
    pub openrouter: Option<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Literal key, or `$VAR` / `${VAR}` to read it from the environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// OpenAI only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// OpenRouter only: sent as `HTTP-Referer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,

    /// OpenRouter only: sent as `X-Title`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: None,
            organization: None,
            site_url: None,
            app_name: None,
            enabled: true,
        }
    }
}

impl ProviderSettings {
    /// API key with `$VAR` references resolved; `None` when unset or empty
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => resolve_env_var(value).map(Some),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            user_agent: None,
        }
    }
}

impl HttpClientSettings {
    pub fn to_http_client_config(&self) -> HttpClientConfig {
        let defaults = HttpClientConfig::default();
        HttpClientConfig {
            timeout_secs: self.timeout_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Event buffer per streaming invocation
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Deadline for each invocation; 0 disables it
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            request_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            providers: ProvidersConfig::default(),
            http_client: HttpClientSettings::default(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Provider API keys and models (no MODELGATE_ prefix for these)
        let providers = [
            ("OPENAI", &mut self.providers.openai),
            ("ANTHROPIC", &mut self.providers.anthropic),
            ("GEMINI", &mut self.providers.gemini),
            ("OPENROUTER", &mut self.providers.openrouter),
        ];
        for (prefix, settings) in providers {
            if let Ok(api_key) = std::env::var(format!("{}_API_KEY", prefix))
                && !api_key.trim().is_empty()
            {
                settings.get_or_insert_with(ProviderSettings::default).api_key = Some(api_key);
            }
            if let Ok(model) = std::env::var(format!("{}_MODEL", prefix))
                && !model.trim().is_empty()
            {
                settings.get_or_insert_with(ProviderSettings::default).default_model = Some(model);
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("MODELGATE_LOG_LEVEL") {
            self.logging.level = val;
        }

        // Server settings
        if let Some(port) = std::env::var("MODELGATE_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|val| val.parse::<u16>().ok())
        {
            self.port = port;
        }

        if let Ok(val) = std::env::var("MODELGATE_HOST") {
            self.host = val;
        }
    }
}

/// Resolve `$VAR` or `${VAR}` to the variable's value; anything else is literal
pub fn resolve_env_var(value: &str) -> anyhow::Result<String> {
    let var_name = if let Some(inner) = value.strip_prefix("${") {
        inner.strip_suffix('}')
    } else {
        value.strip_prefix('$')
    };

    match var_name {
        Some(name) if !name.is_empty() => std::env::var(name)
            .with_context(|| format!("Environment variable not found: {}", name)),
        Some(_) => bail!("Empty environment variable reference '{}'", value),
        None => Ok(value.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

fn default_buffer_size() -> usize {
    modelgate_core::DEFAULT_EVENT_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
