use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use drone_world_core::playback::PacingConfig;
use serde::Deserialize;

const DEFAULT_HTTP_BASE: &str = "http://127.0.0.1:8000";
const DEFAULT_STREAM_BASE: &str = "ws://127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(version, about = "Terminal viewer for a remote multi-drone environment", long_about = None)]
pub struct Args {
    /// Optional TOML configuration file
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the simulation server's HTTP API
    #[arg(long, env = "DRONE_WORLD_HTTP_BASE")]
    pub http_base: Option<String>,

    /// Base URL of the simulation server's streaming endpoint
    #[arg(long, env = "DRONE_WORLD_STREAM_BASE")]
    pub stream_base: Option<String>,

    /// Delay between two rendered steps, in milliseconds
    #[arg(long)]
    pub pacing_ms: Option<u64>,

    /// File receiving log output (the terminal is taken by the UI)
    #[arg(long, default_value = "drone_world.log")]
    pub log_file: PathBuf,
}

/// Contents of the optional TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub endpoints: EndpointsSection,
    pub playback: PacingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointsSection {
    pub http_base: Option<String>,
    pub stream_base: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration file")
    }
}

/// Effective client settings after merging defaults, file and command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub http_base: String,
    pub stream_base: String,
    pub request_timeout: Duration,
    pub pacing: PacingConfig,
    pub log_file: PathBuf,
}

impl ClientConfig {
    /// Reads the file named by `--config`, if any, and merges it with `args`.
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                FileConfig::parse(&text)?
            }
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, args))
    }

    /// Command-line values win over file values, which win over defaults.
    pub fn resolve(file: FileConfig, args: &Args) -> Self {
        let mut pacing = file.playback;
        if let Some(ms) = args.pacing_ms {
            pacing.interval = Duration::from_millis(ms);
        }

        ClientConfig {
            http_base: args
                .http_base
                .clone()
                .or(file.endpoints.http_base)
                .unwrap_or_else(|| DEFAULT_HTTP_BASE.to_string()),
            stream_base: args
                .stream_base
                .clone()
                .or(file.endpoints.stream_base)
                .unwrap_or_else(|| DEFAULT_STREAM_BASE.to_string()),
            request_timeout: Duration::from_millis(
                file.endpoints.request_timeout_ms.unwrap_or(10_000),
            ),
            pacing,
            log_file: args.log_file.clone(),
        }
    }
}
