//! Configuration structures for chains and routing policies.
//!
//! A chain is a named, ordered list of hops; each hop holds candidate nodes
//! and optionally a selector overriding the chain's. Bypass, hosts and
//! resolver sections define named policies that nodes refer to.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

// ── Chains ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,

    /// Default selector for hops that do not set their own.
    #[serde(default)]
    pub selector: Option<SelectorConfig>,

    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub name: String,

    #[serde(default)]
    pub selector: Option<SelectorConfig>,

    /// Defaults for nodes that leave these unset.
    #[serde(default)]
    pub bypass: Option<String>,
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub hosts: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    /// Node address (host:port).
    pub addr: String,

    #[serde(default)]
    pub bypass: Option<String>,
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub hosts: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,

    /// Relative weight for the weighted selector.
    #[serde(default = "default_weight")]
    pub weight: u32,

    pub connector: ComponentConfig,
    pub dialer: ComponentConfig,
}

/// A connector or dialer: registry type name plus its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            auth: None,
            tls: None,
            metadata: Metadata::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Client TLS settings. All fields optional; an absent section means an
/// unverified connection without client certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub ca_file: Option<String>,
    /// Verify the server certificate.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub server_name: Option<String>,
}

// ── Selector ──

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    #[serde(alias = "round")]
    RoundRobin,
    #[serde(alias = "rand")]
    Random,
    Weighted,
    Fifo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorConfig {
    #[serde(default)]
    pub strategy: Strategy,

    /// Consecutive failures before the fifo strategy skips a node.
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// Seconds a failing node stays skipped by the fifo strategy.
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout_secs: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_fails: default_max_fails(),
            fail_timeout_secs: default_fail_timeout(),
        }
    }
}

// ── Policies ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassConfig {
    pub name: String,
    /// Only matching addresses use the node.
    #[serde(default)]
    pub whitelist: bool,
    #[serde(default)]
    pub matchers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    pub name: String,
    #[serde(default)]
    pub mappings: Vec<HostMappingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMappingConfig {
    pub hostname: String,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ResolverType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolverType {
    #[default]
    System,
}

fn default_weight() -> u32 {
    1
}
fn default_max_fails() -> u32 {
    hopchain_core::DEFAULT_MAX_FAILS
}
fn default_fail_timeout() -> u64 {
    hopchain_core::DEFAULT_FAIL_TIMEOUT_SECS
}
