//! Command-line configuration, parsed with `clap`'s derive API the way the rest of the
//! pack wires up its binaries. Mirrors the constructor parameters of the original's
//! `WebServer` (port/trigger-mode/timeout/linger/thread-count/log options), minus the
//! SQL pool arguments — the SQL connection pool is a dropped non-goal, not reflected
//! here at all.

use std::path::PathBuf;

use clap::Parser;

/// Runs the epoll-based static file server.
#[derive(Debug, Clone, Parser)]
#[command(name = "evented-httpd", version, about)]
pub struct ServerConfig {
    /// TCP port to listen on. The original rejects anything outside 1024..=65535; this
    /// is enforced again in `validate` since clap's `value_parser` alone can't express
    /// the original's "log and refuse to start" behavior as cleanly as a named check.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Epoll trigger mode flag (spec.md §6): 0 = listen LT / conn LT, 1 = listen LT /
    /// conn ET, 2 = listen ET / conn LT, 3+ = listen ET / conn ET.
    #[arg(short = 'm', long = "trig-mode", default_value_t = 3)]
    pub trigger_mode: u8,

    /// Idle connection timeout in milliseconds. 0 disables the timer heap entirely.
    #[arg(short = 't', long = "timeout-ms", default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Enables SO_LINGER with a 1-second grace period on close, for a more orderly
    /// shutdown under load at the cost of tying up a worker briefly per close.
    #[arg(short = 'l', long = "opt-linger", default_value_t = false)]
    pub opt_linger: bool,

    /// Number of worker threads in the pool.
    #[arg(short = 'd', long = "threads", default_value_t = 4)]
    pub thread_count: usize,

    /// Maximum number of simultaneously open connections before new accepts are sent
    /// "Server busy!" and closed.
    #[arg(long = "max-conn", default_value_t = 65_535)]
    pub max_connections: usize,

    /// Minimum severity that gets logged.
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Size of the async log queue; 0 logs synchronously on the calling thread instead.
    #[arg(long = "log-queue-size", default_value_t = 1024)]
    pub log_queue_size: usize,

    /// Directory backing the log files.
    #[arg(long = "log-dir", default_value = "./log")]
    pub log_dir: PathBuf,

    /// Document root served to clients.
    #[arg(short = 'r', long = "doc-root", default_value = "./ServerPage")]
    pub doc_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("port {0} out of range; must be 1024..=65535")]
    PortOutOfRange(u16),
}

impl ServerConfig {
    /// Reproduces the original's `port_ > 65535 || port_ < 1024` rejection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1024..=65535).contains(&self.port) {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        Ok(())
    }
}
