// Configuration management for radvpn-routed
// Supports CLI arguments, config file (TOML), and environment variables

use clap::Parser;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// radvpn-routed - mirror tunnel routes into the kernel routing table
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "radvpn-routed")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Virtual interface routes are installed on
    #[arg(short, long, env = "RADVPN_INTERFACE")]
    pub interface: Option<String>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "RADVPN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "RADVPN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Timeout for each kernel call in milliseconds
    #[arg(long, env = "RADVPN_KERNEL_TIMEOUT_MS")]
    pub kernel_timeout_ms: Option<u64>,

    /// Reconciliation interval in seconds (0 disables)
    #[arg(long, env = "RADVPN_RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<u64>,

    /// Leave routes in the kernel on exit
    #[arg(long, env = "RADVPN_KEEP_ROUTES")]
    pub keep_routes: bool,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Interface and kernel settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Routes installed at startup
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Virtual interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Timeout for each kernel call in milliseconds
    #[serde(default = "default_kernel_timeout_ms")]
    pub kernel_timeout_ms: u64,

    /// Reconciliation interval in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,

    /// Remove installed routes on shutdown
    #[serde(default = "default_true")]
    pub flush_on_exit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub network: IpNet,
    pub next_hop: IpAddr,
}

// Default value functions
fn default_interface() -> String {
    "radvpn".to_string()
}
fn default_kernel_timeout_ms() -> u64 {
    2000
}
fn default_reconcile_interval() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            interface: default_interface(),
            kernel_timeout_ms: default_kernel_timeout_ms(),
            reconcile_interval_seconds: default_reconcile_interval(),
            flush_on_exit: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub interface: String,
    pub kernel_timeout: Duration,
    /// `None` disables the reconciliation ticker
    pub reconcile_interval: Option<Duration>,
    pub flush_on_exit: bool,
    pub log_level: Level,
    pub routes: Vec<StaticRoute>,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let config_file = match &cli_args.config {
            Some(path) => read_config_file(path)?,
            None => {
                let default_paths = [
                    PathBuf::from("radvpn-routed.toml"),
                    PathBuf::from("/etc/radvpn/routed.toml"),
                ];
                match default_paths.iter().find(|p| p.exists()) {
                    Some(path) => read_config_file(path)?,
                    None => ConfigFile::default(),
                }
            }
        };

        Self::merge(cli_args, config_file)
    }

    /// Merge CLI arguments over a parsed config file
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let interface = cli_args.interface.unwrap_or(config_file.router.interface);
        if interface.is_empty() || interface.len() > 15 {
            anyhow::bail!("Invalid interface name: {:?}", interface);
        }

        let kernel_timeout_ms = cli_args
            .kernel_timeout_ms
            .unwrap_or(config_file.router.kernel_timeout_ms);
        if kernel_timeout_ms == 0 {
            anyhow::bail!("Kernel timeout must be greater than zero");
        }

        let reconcile_seconds = cli_args
            .reconcile_interval
            .unwrap_or(config_file.router.reconcile_interval_seconds);
        let reconcile_interval = (reconcile_seconds > 0).then(|| Duration::from_secs(reconcile_seconds));

        let flush_on_exit = !cli_args.keep_routes && config_file.router.flush_on_exit;

        let log_level = parse_log_level(cli_args.log_level.as_deref().unwrap_or(&config_file.logging.level))?;

        Ok(Config {
            interface,
            kernel_timeout: Duration::from_millis(kernel_timeout_ms),
            reconcile_interval,
            flush_on_exit,
            log_level,
            routes: config_file.routes,
        })
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    tracing::info!("Loading configuration from: {}", path.display());
    let config_content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<ConfigFile>(&config_content)?)
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
