use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use tally_job_queue::{BackoffKind, Delay, DEFAULT_BROKER_URL, DEFAULT_KEY_PREFIX};

/// Queue names become broker key segments, so `:` and whitespace are out.
static QUEUE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9_\.]*$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub broker: Option<BrokerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub defaults: Option<DefaultsSection>,
    #[serde(default)]
    pub queues: Option<BTreeMap<String, DefaultsSection>>,
}

#[derive(Debug, Deserialize)]
pub struct BrokerSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

/// Job defaults as written in the file, for the global tier or one queue.
#[derive(Debug, Deserialize)]
pub struct DefaultsSection {
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
    #[serde(default)]
    pub remove_on_complete: Option<u64>,
    #[serde(default)]
    pub remove_on_fail: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
    pub defaults: JobDefaultsConfig,
    pub queues: BTreeMap<String, JobDefaultsConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerConfig {
    pub url: String,
    pub prefix: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Job defaults for one tier. Unset fields fall through to the next tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobDefaultsConfig {
    pub priority: Option<u32>,
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffConfig>,
    pub remove_on_complete: Option<u64>,
    pub remove_on_fail: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    /// Milliseconds or a duration expression such as "30s".
    pub delay: Delay,
}

impl From<DefaultsSection> for JobDefaultsConfig {
    fn from(s: DefaultsSection) -> Self {
        Self {
            priority: s.priority,
            attempts: s.attempts,
            backoff: s.backoff,
            remove_on_complete: s.remove_on_complete,
            remove_on_fail: s.remove_on_fail,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                url: DEFAULT_BROKER_URL.to_string(),
                prefix: DEFAULT_KEY_PREFIX.to_string(),
                connect_timeout_secs: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            defaults: JobDefaultsConfig::default(),
            queues: BTreeMap::new(),
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    let bytes = s.as_bytes();
    match bytes {
        b"1" | b"true" | b"TRUE" | b"True" | b"yes" | b"YES" | b"Yes" | b"y" | b"Y" => Ok(true),
        b"0" | b"false" | b"FALSE" | b"False" | b"no" | b"NO" | b"No" | b"n" | b"N" => Ok(false),
        _ => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(true),
            "false" | "no" | "n" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
}

/// Helper macro to apply option field directly if it has a value
macro_rules! apply_opt_field {
    ($target:expr, $source:expr) => {
        if $source.is_some() {
            $target = $source;
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(broker) = raw.broker {
            apply_opt!(cfg.broker.url, broker.url);
            apply_opt!(cfg.broker.prefix, broker.prefix);
            apply_opt!(cfg.broker.connect_timeout_secs, broker.connect_timeout_secs);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(d) = raw.defaults {
            apply_opt_field!(cfg.defaults.priority, d.priority);
            apply_opt_field!(cfg.defaults.attempts, d.attempts);
            apply_opt_field!(cfg.defaults.backoff, d.backoff);
            apply_opt_field!(cfg.defaults.remove_on_complete, d.remove_on_complete);
            apply_opt_field!(cfg.defaults.remove_on_fail, d.remove_on_fail);
        }
        if let Some(queues) = raw.queues {
            cfg.queues = queues
                .into_iter()
                .map(|(name, section)| (name, section.into()))
                .collect();
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Broker
    if let Some(v) = env_str("TALLY_BROKER_URL") {
        cfg.broker.url = v;
    }
    if let Some(v) = env_str("TALLY_BROKER_PREFIX") {
        cfg.broker.prefix = v;
    }
    if let Some(v) = env_parse::<u64>("TALLY_BROKER_CONNECT_TIMEOUT_SECS")? {
        cfg.broker.connect_timeout_secs = v;
    }

    // Logging
    if let Some(v) = env_str("TALLY_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("TALLY_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Global job defaults
    if let Some(v) = env_parse::<u32>("TALLY_DEFAULT_PRIORITY")? {
        cfg.defaults.priority = Some(v);
    }
    if let Some(v) = env_parse::<u32>("TALLY_DEFAULT_ATTEMPTS")? {
        cfg.defaults.attempts = Some(v);
    }

    Ok(())
}

fn validate_defaults(scope: &str, d: &JobDefaultsConfig) -> Result<(), ConfigError> {
    if d.attempts == Some(0) {
        return Err(ConfigError::Validation(format!(
            "{scope}.attempts must be >= 1"
        )));
    }
    if let Some(backoff) = &d.backoff {
        match backoff.delay.to_millis() {
            Ok(ms) if ms >= 0 => {}
            Ok(ms) => {
                return Err(ConfigError::Validation(format!(
                    "{scope}.backoff.delay must not be negative: {ms}"
                )))
            }
            Err(e) => {
                return Err(ConfigError::Validation(format!(
                    "{scope}.backoff.delay: {e}"
                )))
            }
        }
    }
    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    match url::Url::parse(&cfg.broker.url) {
        Ok(u) => {
            let scheme = u.scheme();
            if !matches!(scheme, "redis" | "rediss" | "memory") {
                return Err(ConfigError::Validation(format!(
                    "broker.url scheme must be redis, rediss or memory: {}",
                    cfg.broker.url
                )));
            }
        }
        Err(_) => {
            return Err(ConfigError::Validation(format!(
                "invalid broker.url: {}",
                cfg.broker.url
            )))
        }
    }

    if cfg.broker.prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "broker.prefix must not be empty".into(),
        ));
    }
    if cfg.broker.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "broker.connect_timeout_secs must be > 0".into(),
        ));
    }

    validate_defaults("defaults", &cfg.defaults)?;
    for (name, queue) in &cfg.queues {
        if !QUEUE_NAME_REGEX.is_match(name) {
            return Err(ConfigError::Validation(format!(
                "invalid queue name: {name:?}"
            )));
        }
        validate_defaults(&format!("queues.{name}"), queue)?;
    }
    Ok(())
}
