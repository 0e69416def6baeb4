//! Service configuration.
//!
//! Every setting resolves as command-line flag, then environment variable,
//! then built-in default.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

/// Which orchestration provider backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Local Docker daemon.
    #[default]
    Docker,
    /// In-memory provider for local development.
    Mock,
}

/// Game-server orchestrator.
#[derive(Debug, Clone, Parser)]
#[command(name = "orchestrator", version, about)]
pub struct Config {
    /// HTTP listen address.
    #[arg(long = "listen", env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: SocketAddr,

    /// Directory of server templates.
    #[arg(long = "templates", env = "TEMPLATES_DIR", default_value = "./templates")]
    pub templates_dir: PathBuf,

    /// First address of the overlay IP pool.
    #[arg(long, env = "IP_POOL_START", default_value = "10.99.0.10")]
    pub ip_start: Ipv4Addr,

    /// Last address of the overlay IP pool (inclusive).
    #[arg(long, env = "IP_POOL_END", default_value = "10.99.0.250")]
    pub ip_end: Ipv4Addr,

    /// First port of the host port pool.
    #[arg(long, env = "PORT_POOL_START", default_value_t = 5521)]
    pub port_start: u16,

    /// Last port of the host port pool (inclusive).
    #[arg(long, env = "PORT_POOL_END", default_value_t = 5599)]
    pub port_end: u16,

    /// Address reported to clients instead of the provider's.
    #[arg(long, env = "EXTERNAL_HOST")]
    pub external_host: Option<String>,

    /// Timeout for pre-start hook calls, in seconds.
    #[arg(long, env = "HOOK_TIMEOUT_SECS", default_value_t = 10)]
    pub hook_timeout_secs: u64,

    /// Orchestration provider.
    #[arg(long, env = "ARENA_PROVIDER", value_enum, default_value_t = ProviderKind::Docker)]
    pub provider: ProviderKind,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, env = "ARENA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Reject settings that cannot start a working service.
    pub fn validate(&self) -> Result<()> {
        if self.ip_start > self.ip_end {
            bail!(
                "IP pool start {} is after end {}",
                self.ip_start,
                self.ip_end
            );
        }
        if self.port_start > self.port_end {
            bail!(
                "port pool start {} is after end {}",
                self.port_start,
                self.port_end
            );
        }
        if self.port_start == 0 {
            bail!("port pool cannot include port 0");
        }
        if self.hook_timeout_secs == 0 {
            bail!("hook timeout must be at least one second");
        }
        Ok(())
    }

    /// Hook call timeout.
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// External host override, ignoring blank values.
    pub fn external_host(&self) -> Option<String> {
        self.external_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
    }
}
