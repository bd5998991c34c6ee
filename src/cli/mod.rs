//! Command-line interface for the tally server.
//!
//! Run `tally` to accept measurements on port 8080 with sensible defaults.

use crate::application::Application;
use crate::core::config::{ConfigBuilder, LoggingConfig};
use crate::core::{Config, Result, TallyError};
use clap::Parser;
use humantime::Duration as HumanDuration;
use std::net::IpAddr;
use std::path::PathBuf;

/// Measurement collector with batching and retrying commits
#[derive(Parser, Debug, Default)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/tally/config.yaml)
    #[arg(short, long, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP receiver to
    #[arg(long, env = "TALLY_BIND")]
    pub bind: Option<IpAddr>,

    /// HTTP port for the receiver
    #[arg(short, long, env = "TALLY_PORT")]
    pub port: Option<u16>,

    /// Fraction of requests to insert, from 0.0 to 1.0
    #[arg(long, env = "TALLY_SAMPLE_RATE")]
    pub sample_rate: Option<f64>,

    /// Dimension to store as an indexed tag (repeatable)
    #[arg(long = "indexed-dimension", env = "TALLY_INDEXED_DIMENSIONS", value_delimiter = ',')]
    pub indexed_dimensions: Vec<String>,

    /// Points per committed batch
    #[arg(long, env = "TALLY_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Longest time a batch may accumulate, e.g. `30s`
    #[arg(long, env = "TALLY_MAX_BATCH_WINDOW")]
    pub max_batch_window: Option<HumanDuration>,

    /// Append committed points to this file as JSON lines
    #[arg(short, long, env = "TALLY_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "TALLY_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return self.build_config_from_args(builder),
            },
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!("Loaded configuration from: {:?}", config_path);
            },
            Err(e) if self.config.is_some() => {
                return Err(TallyError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => {
                tracing::debug!("No config file found at {:?}, using defaults", config_path);
            },
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(addr) = self.bind {
            builder = builder.bind_address(addr);
        }
        if let Some(port) = self.port {
            builder = builder.http_port(port);
        }
        if let Some(rate) = self.sample_rate {
            builder = builder.sample_rate(rate);
        }
        for dimension in &self.indexed_dimensions {
            builder = builder.indexed_dimension(dimension.as_str());
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }
        if let Some(window) = self.max_batch_window {
            builder = builder.max_batch_window(window.into());
        }
        if let Some(path) = &self.output {
            builder = builder.output(path.clone());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `RUST_LOG` wins when set, then `--debug`, then `TALLY_LOG_LEVEL`, then
    /// the configured level.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("TALLY_LOG_LEVEL")
            .unwrap_or_else(|_| logging.level.as_str().to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };
        let structured = logging.structured;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(structured)
            .with_thread_ids(structured)
            .with_line_number(structured)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TallyError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tally").join("config.yaml"))
}

/// Execute the tally server.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config.logging)?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!(
            "  HTTP receiver: {}:{}",
            config.server.bind_address, config.server.http_port
        );
        println!("  Sample rate: {}", config.server.sample_rate);
        println!("  Batch size: {}", config.collector.batch_size);
        match config.collector.max_batch_window {
            Some(window) => println!("  Max batch window: {:?}", window),
            None => println!("  Max batch window: unbounded"),
        }
        println!("  Max retries: {}", config.collector.max_retries);
        println!("  Indexed dimensions: {:?}", config.collector.indexed_dimensions);
        return Ok(());
    }

    tracing::info!("Starting tally server");
    Application::new(config)?.run().await
}
