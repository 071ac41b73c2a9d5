//! Error handling for the Chronos engine
//!
//! This module provides the error types shared by the pollers, the cluster
//! monitor, the alert store and the report writer. Per-node stream failures
//! are recoverable and stay local to a poller; cluster and configuration
//! failures are fatal and terminate the process.

use std::io;

use thiserror::Error;

/// The main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Per-node stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Cluster query errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Report writing errors
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registration errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The node was removed from the cluster while being polled
    #[error("Node not part of cluster anymore: {node}")]
    NodeGone { node: String },

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Errors raised while consuming a node's stats stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("cannot connect to {node}: {reason}")]
    Connect { node: String, reason: String },

    #[error("status code is not OK from {node}: {status}")]
    Status { node: String, status: u16 },

    #[error("invalid message received: {reason}")]
    Malformed { reason: String },

    #[error("server closed connection")]
    Eof,

    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

/// Errors raised while querying the cluster for its search nodes
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("unable to get node configuration from the server: {reason}")]
    Query { reason: String },

    #[error("unexpected status from cluster manager: {status}")]
    Status { status: u16 },

    #[error("unable to detect any active search nodes in the cluster")]
    NoSearchNodes,
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid flag value: {flag} = {value}")]
    InvalidThreshold { flag: String, value: String },

    #[error("Invalid flag(s): {flags}")]
    UnknownFlags { flags: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

/// Report writing errors
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("alert has no data to report")]
    Empty,

    #[error("failed to write report {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

/// A specialized result type for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// A specialized result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for report operations
pub type ReportResult<T> = std::result::Result<T, ReportError>;

impl EngineError {
    /// Check if the poller supervisor should retry after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Stream(_) => true,
            EngineError::Http(_) => true,
            EngineError::Serialization(_) => true,
            EngineError::Io(io_error) => !matches!(io_error.kind(), io::ErrorKind::PermissionDenied),
            EngineError::NodeGone { .. } => false,
            _ => !self.is_fatal(),
        }
    }

    /// Check if this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Cluster(_) | EngineError::Config(_))
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Stream(_) => "stream",
            EngineError::Cluster(_) => "cluster",
            EngineError::Config(_) => "config",
            EngineError::Report(_) => "report",
            EngineError::Http(_) => "http",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
            EngineError::Metrics(_) => "metrics",
            EngineError::NodeGone { .. } => "node_gone",
            EngineError::Generic(_) => "generic",
        }
    }

    /// Process exit code used when this error terminates the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 3,
            EngineError::Cluster(_) => 4,
            // 2 is reserved for a panic inside the main loop
            _ => 1,
        }
    }
}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Generic(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> Self {
        EngineError::Generic(msg.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::ParseError { reason: error.to_string() }
    }
}
