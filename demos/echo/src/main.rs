//! POOL Echo Example
//!
//! Echo server, interactive echo client, telemetry monitor and file
//! transfer over POOL sessions.
//!
//! Environment variables:
//! - POOL_MODE: "server", "client", "monitor", "send" or "receive"
//! - POOL_ADDR: listen address (server and receive, default :9253) or peer
//!   address (client, monitor and send)
//! - POOL_FILE: file to send or to write received data to (send, receive)
//! - POOL_DEVICE: character device (default /dev/pool)
//! - POOL_DIAL_TIMEOUT_MS: handshake timeout, 0 for none (default 0)
//! - POOL_MONITOR_INTERVAL_MS: telemetry period (monitor, default 2000)
//! - POOL_LOG_LEVEL: trace|debug|info|warn|error, used when RUST_LOG is unset

mod client;
mod logging;
mod monitor;
mod server;
mod transfer;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use pool_net::core::constants::DEFAULT_PORT;
use pool_net::endpoint::Endpoint;
use thiserror::Error;
use tracing::error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// POOL_MODE is missing or unknown.
    #[error("POOL_MODE must be server, client, monitor, send or receive (got {0:?})")]
    Mode(String),

    /// POOL_ADDR is required in this mode.
    #[error("POOL_ADDR is required in {0} mode")]
    MissingAddr(&'static str),

    /// POOL_FILE is required in this mode.
    #[error("POOL_FILE is required in {0} mode")]
    MissingFile(&'static str),

    /// A numeric variable did not parse.
    #[error("{name} must be a number of milliseconds (got {value:?})")]
    Millis {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// What the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Server,
    Client,
    Monitor,
    Send,
    Receive,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Server => "server",
            Mode::Client => "client",
            Mode::Monitor => "monitor",
            Mode::Send => "send",
            Mode::Receive => "receive",
        }
    }
}

/// Settings read from the environment.
#[derive(Debug)]
struct Config {
    mode: Mode,
    addr: String,
    device: String,
    dial_timeout: Duration,
    monitor_interval: Duration,
    file: Option<PathBuf>,
}

impl Config {
    fn from_env() -> Result<Self, ConfigError> {
        let mode = match env::var("POOL_MODE").unwrap_or_default().as_str() {
            "server" => Mode::Server,
            "client" => Mode::Client,
            "monitor" => Mode::Monitor,
            "send" => Mode::Send,
            "receive" => Mode::Receive,
            other => return Err(ConfigError::Mode(other.to_string())),
        };

        let addr = match (env::var("POOL_ADDR").ok(), mode) {
            (Some(addr), _) => addr,
            (None, Mode::Server | Mode::Receive) => format!(":{DEFAULT_PORT}"),
            (None, mode) => return Err(ConfigError::MissingAddr(mode.name())),
        };

        let file = env::var_os("POOL_FILE").map(PathBuf::from);
        if file.is_none() && matches!(mode, Mode::Send | Mode::Receive) {
            return Err(ConfigError::MissingFile(mode.name()));
        }

        Ok(Self {
            mode,
            addr,
            device: env::var("POOL_DEVICE").unwrap_or_else(|_| "/dev/pool".to_string()),
            dial_timeout: millis("POOL_DIAL_TIMEOUT_MS", 0)?,
            monitor_interval: millis("POOL_MONITOR_INTERVAL_MS", 2000)?,
            file,
        })
    }
}

fn millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Millis { name, value }),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let endpoint = Endpoint::builder()
        .device_path(&config.device)
        .dial_timeout(config.dial_timeout)
        .build();

    let result: Result<(), transfer::TransferError> = match (config.mode, &config.file) {
        (Mode::Server, _) => server::run(&endpoint, &config.addr).await.map_err(Into::into),
        (Mode::Client, _) => client::run(&endpoint, &config.addr).await.map_err(Into::into),
        (Mode::Monitor, _) => monitor::run(&endpoint, &config.addr, config.monitor_interval)
            .await
            .map_err(Into::into),
        (Mode::Send, Some(file)) => transfer::send(&endpoint, &config.addr, file).await.map(|_| ()),
        (Mode::Receive, Some(file)) => {
            transfer::receive(&endpoint, &config.addr, file).await.map(|_| ())
        }
        (mode, None) => {
            error!("{}", ConfigError::MissingFile(mode.name()));
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exiting");
            ExitCode::FAILURE
        }
    }
}
