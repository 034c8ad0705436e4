//! Command-line flags, the optional TOML file beneath them, and their resolution into
//! [`manager::Options`](crate::manager::Options).
use std::fs;
use std::net::{Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::logging::LogFormat;
use crate::manager::Options;

pub const DEFAULT_METRICS_BIND_ADDRESS: &str = ":8080";
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = ":8081";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "manager", version, about = "Runs the apps.wzy.com App controller")]
pub struct Flags {
    /// The address the metric endpoint binds to. `0` disables it [default: :8080]
    #[arg(long, env = "ONEDEMO_METRICS_BIND_ADDRESS", value_name = "ADDR")]
    pub metrics_bind_address: Option<String>,
    /// The address the probe endpoint binds to. `0` disables it [default: :8081]
    #[arg(long, env = "ONEDEMO_HEALTH_PROBE_BIND_ADDRESS", value_name = "ADDR")]
    pub health_probe_bind_address: Option<String>,
    /// Enable leader election for controller manager.
    /// Enabling this will ensure there is only one active controller manager.
    #[arg(long, env = "ONEDEMO_LEADER_ELECT", num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub leader_elect: Option<bool>,
    /// Name of the Lease used for leader election [default: a9ba9dc1.wzy.com]
    #[arg(long, env = "ONEDEMO_LEADER_ELECTION_ID")]
    pub leader_election_id: Option<String>,
    /// Namespace of the leader election Lease [default: the client's namespace]
    #[arg(long, env = "ONEDEMO_LEADER_ELECTION_NAMESPACE")]
    pub leader_election_namespace: Option<String>,
    /// TOML file supplying defaults for any flag not given
    #[arg(long, env = "ONEDEMO_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Log filter directive; overridden by RUST_LOG [default: info]
    #[arg(long, env = "ONEDEMO_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, value_enum, env = "ONEDEMO_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub metrics_bind_address: Option<String>,
    pub health_probe_bind_address: Option<String>,
    pub leader_elect: Option<bool>,
    pub leader_election_id: Option<String>,
    pub leader_election_namespace: Option<String>,
    pub lease_duration_secs: Option<u64>,
    pub renew_deadline_secs: Option<u64>,
    pub retry_period_secs: Option<u64>,
    pub graceful_shutdown_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Config(format!("failed to read config {}: {e}", path.display())))?;
        debug!(path = %path.display(), len = content.len(), "config.read");
        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub options: Options,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl EffectiveConfig {
    pub fn resolve(flags: Flags) -> Result<Self> {
        let file = match &flags.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(flags, file)
    }

    /// Flags take precedence over the file; the file over built-in defaults.
    pub fn merge(flags: Flags, file: FileConfig) -> Result<Self> {
        let defaults = Options::default();
        let metrics = flags.metrics_bind_address.or(file.metrics_bind_address);
        let probe = flags.health_probe_bind_address.or(file.health_probe_bind_address);
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let options = Options {
            metrics_bind_address: parse_bind_address(metrics.as_deref().unwrap_or(DEFAULT_METRICS_BIND_ADDRESS))?,
            health_probe_bind_address: parse_bind_address(probe.as_deref().unwrap_or(DEFAULT_HEALTH_PROBE_BIND_ADDRESS))?,
            leader_election: flags.leader_elect.or(file.leader_elect).unwrap_or(false),
            leader_election_id: flags.leader_election_id.or(file.leader_election_id).unwrap_or(defaults.leader_election_id),
            leader_election_namespace: flags.leader_election_namespace.or(file.leader_election_namespace).filter(|ns| !ns.is_empty()),
            lease_duration: secs(file.lease_duration_secs, defaults.lease_duration),
            renew_deadline: secs(file.renew_deadline_secs, defaults.renew_deadline),
            retry_period: secs(file.retry_period_secs, defaults.retry_period),
            graceful_shutdown_timeout: secs(file.graceful_shutdown_timeout_secs, defaults.graceful_shutdown_timeout),
        };
        options.validate()?;
        Ok(Self {
            options,
            log_level: flags.log_level.or(file.log_level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format: flags.log_format.or(file.log_format).unwrap_or_default(),
        })
    }
}

/// Parses a listen address. `:port` binds every interface (`[::]`, falling back to `0.0.0.0` at bind
/// time where IPv6 is unavailable); `0` or an empty string disables the server.
pub fn parse_bind_address(raw: &str) -> Result<Option<SocketAddr>> {
    let raw = raw.trim();
    let invalid = |reason: String| Error::InvalidBindAddress { address: raw.to_string(), reason };
    if raw.is_empty() || raw == "0" {
        return Ok(None);
    }
    if let Some(port) = raw.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|e| invalid(format!("bad port: {e}")))?;
        return Ok(Some(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))));
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(Some(addr));
    }
    raw.to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .map(Some)
        .ok_or_else(|| invalid("address resolved to nothing".into()))
}
