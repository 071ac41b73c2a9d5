//! Configuration management for the Chronos engine
//!
//! Settings are layered, lowest precedence first: built-in defaults, an
//! optional TOML file, `CHRONOS_*` environment variables and finally
//! command-line flags. Per-stat threshold flags cannot be validated until
//! the cluster reports its stats, so they are split off before clap runs and
//! travel to the engine as [`ThresholdFlags`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::registry::{
    ThresholdFlags, MAX_CHANGE_SUFFIX, MAX_CHANGE_TIME_SUFFIX, MAX_VAL_SUFFIX, MIN_VAL_SUFFIX,
};
use crate::utils::seconds;

/// Upper bound on the alert TTL, in seconds
pub const MAX_ALERT_TTL_SECS: u64 = 600;
/// Upper bound on the alert data padding, in seconds
pub const MAX_DATA_PADDING_SECS: u64 = 60;

/// Command-line flags understood by the `chronos` binary.
///
/// Anything else on the command line is treated as a per-stat threshold flag
/// (`--<stat>_min_val`, `--<stat>_max_val`, `--<stat>_max_change`,
/// `--<stat>_max_change_time`).
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "chronos")]
#[command(about = "Stream stats from a search cluster and raise threshold alerts")]
#[command(version)]
pub struct CliArgs {
    /// Cluster entry point
    #[arg(long = "connection_string")]
    pub connection_string: Option<String>,

    /// Cluster username
    #[arg(long)]
    pub username: Option<String>,

    /// Cluster password
    #[arg(long)]
    pub password: Option<String>,

    /// Directory alert reports are written to
    #[arg(long = "report")]
    pub report: Option<PathBuf>,

    /// Seconds an alert lives after its last trigger
    #[arg(long = "alert_TTL", allow_negative_numbers = true)]
    pub alert_ttl: Option<i64>,

    /// Seconds of data attached before and after a trigger
    #[arg(long = "alert_data_padding", allow_negative_numbers = true)]
    pub alert_data_padding: Option<i64>,

    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Log file path, `-` for stderr
    #[arg(long = "log-file")]
    pub log_file: Option<String>,

    /// Emit logs as JSON
    #[arg(long = "json-logs")]
    pub json_logs: bool,
}

impl CliArgs {
    /// Long names of every flag clap handles itself
    pub fn known_flags() -> Vec<String> {
        let command = Self::command();
        let mut known: Vec<String> = command
            .get_arguments()
            .filter_map(|arg| arg.get_long())
            .map(str::to_string)
            .collect();
        known.push("help".to_string());
        known.push("version".to_string());
        known
    }
}

/// Main configuration structure for the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cluster connection settings
    pub cluster: ClusterConfig,

    /// Alert lifecycle settings
    pub alerts: AlertConfig,

    /// Per-stat thresholds, keyed by stat name
    pub thresholds: BTreeMap<String, ThresholdConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cluster connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the cluster manager
    pub connection_string: String,

    pub username: String,

    pub password: String,

    /// Port the search service listens on
    pub search_port: u16,

    /// Deadline for one-shot requests, in seconds
    pub request_timeout_secs: u64,
}

/// Alert lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Seconds an alert lives after its last trigger
    pub ttl_secs: u64,

    /// Seconds of data attached before and after a trigger
    pub data_padding_secs: u64,

    /// Directory alert reports are written to
    pub report_dir: PathBuf,
}

/// Threshold values for one stat as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub max_change: Option<f64>,
    pub max_change_time: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log file path; `None` or `-` logs to stderr
    pub file: Option<PathBuf>,

    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            connection_string: "http://localhost:8091".to_string(),
            username: String::new(),
            password: String::new(),
            search_port: 8094,
            request_timeout_secs: 10,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            data_padding_secs: 20,
            report_dir: PathBuf::from("./"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("chronos.log")),
            json: false,
        }
    }
}

impl AlertConfig {
    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_secs)
    }

    pub fn data_padding(&self) -> Duration {
        seconds(self.data_padding_secs)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.to_string_lossy().to_string() })?;

        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override values from `CHRONOS_*` environment variables
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override values from an environment lookup
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup("CHRONOS_USERNAME") {
            self.cluster.username = username;
        }
        if let Some(password) = lookup("CHRONOS_PASSWORD") {
            self.cluster.password = password;
        }
        if let Some(connection_string) = lookup("CHRONOS_CONNECTION_STRING") {
            self.cluster.connection_string = connection_string;
        }
        if let Some(report_dir) = lookup("CHRONOS_REPORT_DIR") {
            self.alerts.report_dir = PathBuf::from(report_dir);
        }
        if let Some(level) = lookup("CHRONOS_LOG_LEVEL") {
            self.logging.level = level;
        }
        self
    }

    /// Load configuration with fallback order: defaults -> file -> env
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let config = match config_path {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        Ok(config.apply_env())
    }

    /// Override values given on the command line
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(connection_string) = &cli.connection_string {
            self.cluster.connection_string = connection_string.clone();
        }
        if let Some(username) = &cli.username {
            self.cluster.username = username.clone();
        }
        if let Some(password) = &cli.password {
            self.cluster.password = password.clone();
        }
        if let Some(report) = &cli.report {
            self.alerts.report_dir = report.clone();
        }
        if let Some(ttl) = cli.alert_ttl {
            self.alerts.ttl_secs = ttl.max(0) as u64;
        }
        if let Some(padding) = cli.alert_data_padding {
            self.alerts.data_padding_secs = padding.max(0) as u64;
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = if file == "-" { None } else { Some(PathBuf::from(file)) };
        }
        if cli.json_logs {
            self.logging.json = true;
        }
    }

    /// Clamp alert settings into their bounds, describing every change made
    pub fn clamp_alerts(&mut self) -> Vec<String> {
        let mut adjustments = Vec::new();

        let ttl = self.alerts.ttl_secs.clamp(1, MAX_ALERT_TTL_SECS);
        if ttl != self.alerts.ttl_secs {
            adjustments.push(format!("alert_TTL {} clamped to {}", self.alerts.ttl_secs, ttl));
            self.alerts.ttl_secs = ttl;
        }

        let padding = self.alerts.data_padding_secs.clamp(1, MAX_DATA_PADDING_SECS);
        if padding != self.alerts.data_padding_secs {
            adjustments.push(format!(
                "alert_data_padding {} clamped to {}",
                self.alerts.data_padding_secs, padding
            ));
            self.alerts.data_padding_secs = padding;
        }

        adjustments
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cluster.connection_string.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cluster.connection_string".to_string(),
                value: String::new(),
            });
        }

        if self.cluster.search_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.search_port".to_string(),
                value: "0".to_string(),
            });
        }

        if self.cluster.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cluster.request_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve the full configuration for a command line
    pub fn resolve(cli: &CliArgs) -> ConfigResult<(Self, Vec<String>)> {
        let path = cli
            .config
            .clone()
            .or_else(|| Self::default_config_path().ok().filter(|path| path.exists()));

        let mut config = Self::load_with_fallback(path)?;
        config.apply_cli(cli);
        let adjustments = config.clamp_alerts();
        config.validate()?;
        Ok((config, adjustments))
    }

    /// Combine file thresholds with command-line threshold flags; the
    /// command line wins where both name the same flag
    pub fn threshold_flags(&self, additional: &BTreeMap<String, String>) -> ThresholdFlags {
        let mut flags = ThresholdFlags::default();
        for (stat, threshold) in &self.thresholds {
            if let Some(min) = threshold.min {
                flags.insert(format!("{stat}{MIN_VAL_SUFFIX}"), min.to_string());
            }
            if let Some(max) = threshold.max {
                flags.insert(format!("{stat}{MAX_VAL_SUFFIX}"), max.to_string());
            }
            if let Some(max_change) = threshold.max_change {
                flags.insert(format!("{stat}{MAX_CHANGE_SUFFIX}"), max_change.to_string());
            }
            if let Some(window) = threshold.max_change_time {
                flags.insert(format!("{stat}{MAX_CHANGE_TIME_SUFFIX}"), window.to_string());
            }
        }
        for (flag, value) in additional {
            flags.insert(flag.clone(), value.clone());
        }
        flags
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("chronos").join("chronos.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }
}

/// Split a raw command line into the arguments clap understands and the
/// additional flags it does not.
///
/// Both `--name=value` and `--name value` forms are accepted, with one or two
/// leading dashes. Known flags written with a single dash are normalised to
/// two. Everything after `--` is passed through untouched.
pub fn split_additional_flags<I>(args: I, known: &[String]) -> ConfigResult<(Vec<String>, BTreeMap<String, String>)>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut passthrough = Vec::new();
    let mut additional = BTreeMap::new();

    if let Some(program) = args.next() {
        passthrough.push(program);
    }

    while let Some(arg) = args.next() {
        if arg == "--" {
            passthrough.push(arg);
            passthrough.extend(args.by_ref());
            break;
        }

        let Some(stripped) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            passthrough.push(arg);
            continue;
        };
        // Empty names and negative numbers are values, not flags
        if stripped.is_empty() || stripped.parse::<f64>().is_ok() {
            passthrough.push(arg);
            continue;
        }

        let (name, inline_value) = match stripped.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (stripped, None),
        };

        if known.iter().any(|flag| flag == name) {
            passthrough.push(match &inline_value {
                Some(value) => format!("--{name}={value}"),
                None => format!("--{name}"),
            });
            continue;
        }

        let value = match inline_value {
            Some(value) => value,
            None => args.next().ok_or_else(|| ConfigError::InvalidValue {
                field: name.to_string(),
                value: "missing value".to_string(),
            })?,
        };
        additional.insert(name.to_string(), value);
    }

    Ok((passthrough, additional))
}
