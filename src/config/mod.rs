//! Configuration loading for the YDMS service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `YDMS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "YDMS_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `YDMS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Bearer keys accepted by the API
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,
    /// Shared secret callbacks must present in `X-Webhook-Secret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub ndr: NdrConfig,
    #[serde(default)]
    pub prefect: PrefectConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// NDR node/document store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdrConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

/// Prefect scheduler settings. Without a base url the service runs in
/// local-only mode and leaves triggered runs `pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

/// Workflow trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Base url the scheduler calls back on
    pub callback_base_url: String,
    /// Passed to flows as `pdms_base_url`
    pub pdms_base_url: String,
    /// Deployment used when a definition carries no deployment name
    pub default_deployment: String,
    /// Reject generic callbacks on runs that are already terminal
    pub strict_callbacks: bool,
    /// Workflow key of the sync-to-external-db flow
    pub sync_workflow_key: String,
}

/// Batch fan-out limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Default concurrency for scheduler-backed batch workflows
    pub default_concurrency: usize,
    /// Default concurrency for the sync workflow and batch sync
    pub sync_default_concurrency: usize,
    pub max_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            api_keys: Vec::new(),
            webhook_secret: None,
            ndr: NdrConfig::default(),
            prefect: PrefectConfig {
                base_url: None,
                timeout_seconds: default_prefect_timeout_seconds(),
            },
            workflow: WorkflowConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for NdrConfig {
    fn default() -> Self {
        Self {
            base_url: default_ndr_base_url(),
            api_key: None,
            timeout_seconds: default_ndr_timeout_seconds(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            callback_base_url: default_callback_base_url(),
            pdms_base_url: default_callback_base_url(),
            default_deployment: default_workflow_deployment(),
            strict_callbacks: false,
            sync_workflow_key: default_sync_workflow_key(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_batch_concurrency(),
            sync_default_concurrency: default_batch_sync_concurrency(),
            max_concurrency: default_batch_max_concurrency(),
        }
    }
}

impl BatchConfig {
    /// Validate batch concurrency bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 || self.max_concurrency > 100 {
            return Err(ConfigError::InvalidBatchConcurrency {
                field: "BATCH_MAX_CONCURRENCY",
                value: self.max_concurrency,
            });
        }
        for (field, value) in [
            ("BATCH_DEFAULT_CONCURRENCY", self.default_concurrency),
            ("BATCH_SYNC_DEFAULT_CONCURRENCY", self.sync_default_concurrency),
        ] {
            if value == 0 || value > self.max_concurrency {
                return Err(ConfigError::InvalidBatchConcurrency { field, value });
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether a Prefect scheduler is configured.
    pub fn scheduler_enabled(&self) -> bool {
        self.prefect.base_url.is_some()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.api_keys.is_empty() {
            config.api_keys = vec![REDACTED.to_string()];
        }
        if config.webhook_secret.is_some() {
            config.webhook_secret = Some(REDACTED.to_string());
        }
        if config.ndr.api_key.is_some() {
            config.ndr.api_key = Some(REDACTED.to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Local and test profiles may run without API keys; everything else must set one
        if !matches!(self.profile.as_str(), "local" | "test") && self.api_keys.is_empty() {
            return Err(ConfigError::MissingApiKeys);
        }

        validate_url("NDR_BASE_URL", &self.ndr.base_url)?;
        if let Some(base_url) = &self.prefect.base_url {
            validate_url("PREFECT_BASE_URL", base_url)?;
        }
        validate_url("CALLBACK_BASE_URL", &self.workflow.callback_base_url)?;
        validate_url("PDMS_BASE_URL", &self.workflow.pdms_base_url)?;

        if self.workflow.sync_workflow_key.trim().is_empty() {
            return Err(ConfigError::MissingSyncWorkflowKey);
        }

        self.batch.validate()?;

        Ok(())
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(_) => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: "scheme must be http or https".to_string(),
        }),
        Err(err) => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: err.to_string(),
        }),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://ydms.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_ndr_base_url() -> String {
    "http://localhost:9001".to_string()
}

fn default_ndr_timeout_seconds() -> u64 {
    10
}

fn default_prefect_timeout_seconds() -> u64 {
    30
}

fn default_callback_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_workflow_deployment() -> String {
    "default".to_string()
}

fn default_sync_workflow_key() -> String {
    "sync_to_mysql".to_string()
}

fn default_batch_concurrency() -> usize {
    1
}

fn default_batch_sync_concurrency() -> usize {
    10
}

fn default_batch_max_concurrency() -> usize {
    20
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no API keys configured; set YDMS_API_KEY or YDMS_API_KEYS")]
    MissingApiKeys,
    #[error("invalid url for {field} '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid value for {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} must be between 1 and the max batch concurrency, got {value}")]
    InvalidBatchConcurrency { field: &'static str, value: usize },
    #[error("sync workflow key must not be empty")]
    MissingSyncWorkflowKey,
}

/// Loads configuration using layered `.env` files and `YDMS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.trim().is_empty());

        let profile = take("PROFILE").unwrap_or(profile_hint);
        let api_bind_addr = take("API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take("LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take("LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url = take("DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections =
            parse_number(take("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms =
            parse_number(take("DB_ACQUIRE_TIMEOUT_MS"), "DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a comma-separated list and a single key
        let api_keys = if let Some(keys) = take("API_KEYS") {
            keys.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(key) = take("API_KEY") {
            vec![key.trim().to_string()]
        } else {
            Vec::new()
        };
        let webhook_secret = take("WEBHOOK_SECRET");

        let ndr = NdrConfig {
            base_url: take("NDR_BASE_URL").unwrap_or_else(default_ndr_base_url),
            api_key: take("NDR_API_KEY"),
            timeout_seconds: parse_number(take("NDR_TIMEOUT_SECONDS"), "NDR_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_ndr_timeout_seconds),
        };

        let prefect = PrefectConfig {
            base_url: take("PREFECT_BASE_URL"),
            timeout_seconds: parse_number(
                take("PREFECT_TIMEOUT_SECONDS"),
                "PREFECT_TIMEOUT_SECONDS",
            )?
            .unwrap_or_else(default_prefect_timeout_seconds),
        };

        let callback_base_url =
            take("CALLBACK_BASE_URL").unwrap_or_else(default_callback_base_url);
        let strict_callbacks = match take("WORKFLOW_STRICT_CALLBACKS") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue {
                field: "WORKFLOW_STRICT_CALLBACKS",
                value,
            })?,
            None => false,
        };
        let workflow = WorkflowConfig {
            pdms_base_url: take("PDMS_BASE_URL").unwrap_or_else(|| callback_base_url.clone()),
            callback_base_url,
            default_deployment: take("WORKFLOW_DEFAULT_DEPLOYMENT")
                .unwrap_or_else(default_workflow_deployment),
            strict_callbacks,
            sync_workflow_key: take("SYNC_WORKFLOW_KEY").unwrap_or_else(default_sync_workflow_key),
        };

        let batch = BatchConfig {
            default_concurrency: parse_number(
                take("BATCH_DEFAULT_CONCURRENCY"),
                "BATCH_DEFAULT_CONCURRENCY",
            )?
            .unwrap_or_else(default_batch_concurrency),
            sync_default_concurrency: parse_number(
                take("BATCH_SYNC_DEFAULT_CONCURRENCY"),
                "BATCH_SYNC_DEFAULT_CONCURRENCY",
            )?
            .unwrap_or_else(default_batch_sync_concurrency),
            max_concurrency: parse_number(
                take("BATCH_MAX_CONCURRENCY"),
                "BATCH_MAX_CONCURRENCY",
            )?
            .unwrap_or_else(default_batch_max_concurrency),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            api_keys,
            webhook_secret,
            ndr,
            prefect,
            workflow,
            batch,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<T>, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { field, value: raw }),
        None => Ok(None),
    }
}
