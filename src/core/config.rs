//! Configuration management for tally.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults

use crate::core::retry::RetryPolicy;
use crate::core::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for tally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion server configuration
    pub server: ServerConfig,
    /// Collector batching configuration
    pub collector: CollectorConfig,
    /// Reducing client configuration
    pub client: ClientConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Ingestion server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP receiver
    pub bind_address: IpAddr,
    /// HTTP port for the receiver
    pub http_port: u16,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
    /// Fraction of requests that are inserted (0.0 to 1.0)
    pub sample_rate: f64,
    /// How often accepted-measurement throughput is logged
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    /// Where committed batches are written as JSON lines; logged when unset
    pub output: Option<PathBuf>,
}

/// Collector batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Dimensions that become indexed tags downstream
    pub indexed_dimensions: BTreeSet<String>,
    /// Points per batch before a commit is forced
    pub batch_size: usize,
    /// Longest time a batch may accumulate; unbounded when unset
    #[serde(with = "humantime_serde")]
    pub max_batch_window: Option<Duration>,
    /// Retries after a failed commit before the collector gives up
    pub max_retries: u32,
    /// Delay between commit attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Queue capacity as a multiple of `batch_size`
    pub queue_factor: usize,
}

/// Reducing client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How often buffered measurements are flushed
    #[serde(with = "humantime_serde")]
    pub batch_interval: Duration,
    /// Default distinct keys buffered per registration
    pub max_buffer_size: usize,
    /// Ingestion URL for the HTTP transport
    pub server_url: String,
    /// Optional gRPC endpoint, preferred over HTTP when reachable
    pub rpc_endpoint: Option<String>,
    /// Per-request timeout of the HTTP transport
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include target, thread and line information
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            http_port: 8080,
            max_body_bytes: 10 * 1024 * 1024,
            sample_rate: 1.0,
            report_interval: Duration::from_secs(15),
            output: None,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            indexed_dimensions: BTreeSet::new(),
            batch_size: 1000,
            max_batch_window: None,
            max_retries: 10,
            retry_interval: Duration::from_secs(5),
            queue_factor: 2,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            batch_interval: Duration::from_secs(5 * 60),
            max_buffer_size: 1000,
            server_url: "http://localhost:8080/measurements".to_string(),
            rpc_endpoint: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl CollectorConfig {
    /// Capacity of the collector's inbound queue.
    pub fn queue_capacity(&self) -> usize {
        self.batch_size.saturating_mul(self.queue_factor).max(1)
    }

    /// Commit retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            interval: self.retry_interval,
        }
    }

    /// Validate the collector section.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TallyError::config("batch_size must be greater than 0"));
        }
        if self.queue_factor == 0 {
            return Err(TallyError::config("queue_factor must be greater than 0"));
        }
        if self.max_batch_window == Some(Duration::ZERO) {
            return Err(TallyError::config("max_batch_window must be greater than 0"));
        }
        Ok(())
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.server.sample_rate) {
            return Err(TallyError::InvalidSamplingRate(self.server.sample_rate));
        }

        if self.server.max_body_bytes == 0 {
            return Err(TallyError::config("max_body_bytes must be greater than 0"));
        }

        self.collector.validate()?;

        if self.client.max_buffer_size == 0 {
            return Err(TallyError::config("max_buffer_size must be greater than 0"));
        }

        if self.client.batch_interval.is_zero() {
            return Err(TallyError::config("batch_interval must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set bind address
    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.config.server.bind_address = addr;
        self
    }

    /// Set HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.server.http_port = port;
        self
    }

    /// Set sampling rate
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.server.sample_rate = rate;
        self
    }

    /// Set the JSON-lines output file
    pub fn output(mut self, path: PathBuf) -> Self {
        self.config.server.output = Some(path);
        self
    }

    /// Add an indexed dimension
    pub fn indexed_dimension(mut self, name: impl Into<String>) -> Self {
        self.config.collector.indexed_dimensions.insert(name.into());
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.collector.batch_size = size;
        self
    }

    /// Set max batch window
    pub fn max_batch_window(mut self, window: Duration) -> Self {
        self.config.collector.max_batch_window = Some(window);
        self
    }

    /// Set max retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.collector.max_retries = retries;
        self
    }

    /// Set retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.collector.retry_interval = interval;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
