use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::price::cryptocompare::CRYPTOCOMPARE_BASE_URL;
use crate::transport::telegram::TELEGRAM_API_URL;
use crate::watcher;

/// Fallback for `telegram.bot_token` when the file leaves it empty.
pub const BOT_TOKEN_ENV: &str = "XMR_ALERT_BOT_TOKEN";

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_telegram_api_url() -> String {
    TELEGRAM_API_URL.into()
}

fn default_poll_timeout_secs() -> u64 {
    6
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_price_base_url() -> String {
    CRYPTOCOMPARE_BASE_URL.into()
}

fn default_fetch_interval_secs() -> i64 {
    watcher::DEFAULT_FETCH_INTERVAL.as_secs() as i64
}

fn default_retry_delay_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Also append log output to this file; stdout is always written.
    pub log_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
            log_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Bot API base URL; override to use a local or debug endpoint.
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    /// Forward proxy for every outbound request, e.g. `socks5://127.0.0.1:1080`.
    pub proxy: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_price_base_url")]
    pub base_url: String,
    /// Seconds between fetches; non-positive values fall back to the default.
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: i64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_price_base_url(),
            fetch_interval_secs: default_fetch_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    if config.telegram.bot_token.is_empty() {
        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            tracing::warn!(env = BOT_TOKEN_ENV, "using bot token from environment");
            config.telegram.bot_token = token;
        }
    }

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Upper bound the Bot API accepts for a `getUpdates` long poll.
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_telegram(config)?;
    validate_urls(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" must be one of {:?}",
                config.general.log_format, VALID_LOG_FORMATS
            ),
        }));
    }
    Ok(())
}

fn validate_telegram(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.telegram.bot_token.trim().is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: format!("telegram.bot_token is required (or set {BOT_TOKEN_ENV})"),
        }));
    }
    let poll_timeout = config.telegram.poll_timeout_secs;
    if poll_timeout == 0 || poll_timeout > MAX_POLL_TIMEOUT_SECS {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "telegram.poll_timeout_secs {poll_timeout} must be between 1 and {MAX_POLL_TIMEOUT_SECS}"
            ),
        }));
    }
    Ok(())
}

fn validate_urls(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut urls = vec![
        ("telegram.api_url", config.telegram.api_url.as_str()),
        ("price.base_url", config.price.base_url.as_str()),
    ];
    if let Some(proxy) = &config.network.proxy {
        urls.push(("network.proxy", proxy.as_str()));
    }

    for (field, value) in urls {
        reqwest::Url::parse(value)
            .change_context(ConfigError::Validation {
                field: format!("{field} \"{value}\" is not a valid URL"),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "json"
data_dir = "/tmp/data"
log_file = "/tmp/data/xmr-alert.log"

[telegram]
bot_token = "123:abc"
api_url = "http://localhost:8081"
poll_timeout_secs = 10

[network]
proxy = "socks5://127.0.0.1:1080"
request_timeout_secs = 3

[price]
api_key = "secret"
fetch_interval_secs = 30

[dispatch]
retry_delay_ms = 50
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_file.as_deref(), Some("/tmp/data/xmr-alert.log"));
        assert_eq!(config.telegram.poll_timeout_secs, 10);
        assert_eq!(config.network.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.price.api_key.as_deref(), Some("secret"));
        assert_eq!(config.price.fetch_interval_secs, 30);
        assert_eq!(config.dispatch.retry_delay_ms, 50);
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let toml = r#"
[telegram]
bot_token = "123:abc"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.data_dir, "./data");
        assert!(config.general.log_file.is_none());
        assert_eq!(config.telegram.api_url, TELEGRAM_API_URL);
        assert_eq!(config.telegram.poll_timeout_secs, 6);
        assert!(config.network.proxy.is_none());
        assert_eq!(config.network.request_timeout_secs, 5);
        assert_eq!(config.price.base_url, CRYPTOCOMPARE_BASE_URL);
        assert_eq!(config.price.fetch_interval_secs, 10);
        assert_eq!(config.dispatch.retry_delay_ms, 200);
    }

    #[test]
    fn missing_bot_token_rejected() {
        let config = parse("[telegram]\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn invalid_log_format_rejected() {
        let toml = r#"
[general]
log_format = "xml"

[telegram]
bot_token = "123:abc"
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn out_of_range_poll_timeout_rejected() {
        for secs in ["0", "51", "9223372036854775807"] {
            let toml = format!("[telegram]\nbot_token = \"123:abc\"\npoll_timeout_secs = {secs}\n");
            assert!(validate(&parse(&toml)).is_err(), "accepted {secs}");
        }
        let toml = "[telegram]\nbot_token = \"123:abc\"\npoll_timeout_secs = 50\n";
        assert!(validate(&parse(toml)).is_ok());
    }

    #[test]
    fn invalid_proxy_rejected() {
        let toml = r#"
[telegram]
bot_token = "123:abc"

[network]
proxy = "not a url"
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn non_positive_fetch_interval_is_accepted() {
        let toml = r#"
[telegram]
bot_token = "123:abc"

[price]
fetch_interval_secs = -5
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(
            watcher::fetch_interval(config.price.fetch_interval_secs),
            watcher::DEFAULT_FETCH_INTERVAL
        );
    }
}
