//! File configuration (`hopchain.toml`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use hopchain_chain::{BypassConfig, ChainConfig, HostsConfig, ResolverConfig};
use hopchain_net::BindOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub bypasses: Vec<BypassConfig>,
    #[serde(default)]
    pub hosts: Vec<HostsConfig>,
    #[serde(default)]
    pub resolvers: Vec<ResolverConfig>,
    #[serde(default)]
    pub forwards: Vec<ForwardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `hopchain_relay=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One reverse forward: bind `bind` on the far end of `chain` and pipe
/// every accepted connection to the local `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub name: String,

    /// `tcp` or `udp`, optionally suffixed with `4`/`6`.
    #[serde(default = "default_network")]
    pub network: String,

    /// Chain to bind through; unset binds locally.
    #[serde(default)]
    pub chain: Option<String>,

    /// Address to listen on at the far end, e.g. `:8080`.
    pub bind: String,

    /// Local address accepted traffic is sent to.
    pub target: String,

    #[serde(default = "default_backlog")]
    pub backlog: usize,
    #[serde(default = "default_udp_queue_size")]
    pub udp_queue_size: usize,
    #[serde(default = "default_udp_buffer_size")]
    pub udp_buffer_size: usize,
    #[serde(default = "default_udp_ttl")]
    pub udp_ttl_secs: u64,

    /// Idle time before a forwarded UDP session is dropped.
    #[serde(default = "default_udp_idle")]
    pub udp_idle_secs: u64,

    /// Wait before binding again after the listener closes.
    #[serde(default = "default_rebind_delay")]
    pub rebind_delay_secs: u64,
}

impl ForwardConfig {
    pub fn bind_options(&self) -> BindOptions {
        BindOptions {
            backlog: self.backlog,
            udp_queue_size: self.udp_queue_size,
            udp_buffer_size: self.udp_buffer_size,
            udp_ttl: Duration::from_secs(self.udp_ttl_secs),
        }
    }

    pub fn is_udp(&self) -> bool {
        self.network.starts_with("udp")
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&data)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut chains = HashSet::new();
    for chain in &config.chains {
        if !chains.insert(chain.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate chain '{}'",
                chain.name
            )));
        }
    }

    let mut forwards = HashSet::new();
    for fwd in &config.forwards {
        if !forwards.insert(fwd.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate forward '{}'",
                fwd.name
            )));
        }
        let valid = ["tcp", "tcp4", "tcp6", "udp", "udp4", "udp6"];
        if !valid.contains(&fwd.network.as_str()) {
            return Err(ConfigError::Validation(format!(
                "forward '{}': network must be one of: {:?}",
                fwd.name, valid
            )));
        }
        if let Some(chain) = &fwd.chain
            && !chains.contains(chain.as_str())
        {
            return Err(ConfigError::Validation(format!(
                "forward '{}': unknown chain '{chain}'",
                fwd.name
            )));
        }
        if fwd.bind.trim().is_empty() || fwd.target.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "forward '{}': bind and target must be set",
                fwd.name
            )));
        }
        if fwd.is_udp() && (fwd.udp_queue_size == 0 || fwd.udp_buffer_size == 0) {
            return Err(ConfigError::Validation(format!(
                "forward '{}': udp_queue_size and udp_buffer_size must be > 0",
                fwd.name
            )));
        }
        if fwd.is_udp() && fwd.udp_buffer_size > hopchain_core::MAX_UDP_PAYLOAD {
            return Err(ConfigError::Validation(format!(
                "forward '{}': udp_buffer_size must be <= {}",
                fwd.name,
                hopchain_core::MAX_UDP_PAYLOAD
            )));
        }
    }
    Ok(())
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_network() -> String {
    "tcp".to_string()
}
fn default_backlog() -> usize {
    hopchain_core::DEFAULT_BACKLOG
}
fn default_udp_queue_size() -> usize {
    hopchain_core::DEFAULT_UDP_QUEUE_SIZE
}
fn default_udp_buffer_size() -> usize {
    hopchain_core::DEFAULT_UDP_BUFFER_SIZE
}
fn default_udp_ttl() -> u64 {
    hopchain_core::DEFAULT_UDP_TTL_SECS
}
fn default_udp_idle() -> u64 {
    hopchain_core::DEFAULT_FORWARD_UDP_IDLE_SECS
}
fn default_rebind_delay() -> u64 {
    hopchain_core::DEFAULT_REBIND_DELAY_SECS
}
