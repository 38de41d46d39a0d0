//! Transport configuration and its validation.
//!
//! [`GelfConfig`] is the user-facing, deserialisable description of a
//! transport. [`GelfConfig::validate`] applies defaults and range checks and
//! produces the immutable [`TransportSettings`] the worker pool runs with.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worker count used when the configuration leaves it at zero.
pub const DEFAULT_WORKERS: usize = 4;
/// Largest accepted worker pool.
pub const MAX_WORKERS: i32 = 16;
/// Chunk size used when the configuration leaves it at zero.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1400;
/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: i32 = 100;
/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: i32 = 8192;
/// Depth of the dispatch queue when the configuration leaves it at zero.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Errors rejecting a configuration before the worker pool starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing network family")]
    MissingNetwork,
    #[error("unsupported network family {0:?}; expected udp, udp4 or udp6")]
    UnsupportedNetwork(String),
    #[error("missing address")]
    MissingAddress,
    #[error("bad worker count {0}; expected 1 to 16")]
    InvalidWorkers(i32),
    #[error("bad max chunk size {0}; expected 100 to 8192")]
    InvalidMaxChunkSize(i32),
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{addr} has no {network} address")]
    NoAddressForNetwork { addr: String, network: NetworkFamily },
    #[error("failed to open UDP connection: {0}")]
    Connect(#[source] std::io::Error),
    #[error("failed to determine local hostname: {0}")]
    Hostname(String),
    #[error("failed to start worker thread: {0}")]
    SpawnWorker(#[source] std::io::Error),
}

/// Network family of the destination endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
    /// Either IPv4 or IPv6, whichever the address resolves to first.
    #[default]
    Udp,
    Udp4,
    Udp6,
}

impl NetworkFamily {
    /// Whether `addr` belongs to this family.
    pub fn accepts(self, addr: &std::net::SocketAddr) -> bool {
        match self {
            NetworkFamily::Udp => true,
            NetworkFamily::Udp4 => addr.is_ipv4(),
            NetworkFamily::Udp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for NetworkFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetworkFamily::Udp => "udp",
            NetworkFamily::Udp4 => "udp4",
            NetworkFamily::Udp6 => "udp6",
        })
    }
}

impl FromStr for NetworkFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(ConfigError::MissingNetwork),
            "udp" => Ok(Self::Udp),
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            _ => Err(ConfigError::UnsupportedNetwork(s.to_owned())),
        }
    }
}

/// Transport configuration as supplied by the application.
///
/// Zero values for `workers`, `max_chunk_size` and `queue_capacity` select
/// the defaults; an empty `host` selects the local machine name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GelfConfig {
    pub enabled: bool,
    pub net: String,
    pub addr: String,
    pub workers: i32,
    pub echo: bool,
    pub host: String,
    pub compress: bool,
    pub max_chunk_size: i32,
    pub queue_capacity: usize,
}

impl GelfConfig {
    /// An enabled UDP configuration targeting `addr`.
    pub fn udp(addr: impl Into<String>) -> Self {
        Self {
            enabled: true,
            net: "udp".into(),
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: i32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: i32) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Apply defaults and range checks.
    ///
    /// Returns `Ok(None)` for a disabled configuration; no other field is
    /// inspected in that case.
    pub fn validate(&self) -> Result<Option<TransportSettings>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        let network = self.net.parse::<NetworkFamily>()?;
        if self.addr.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        let workers = resolve_workers(self.workers)?;
        let max_chunk_size = resolve_max_chunk_size(self.max_chunk_size)?;
        let queue_capacity = match self.queue_capacity {
            0 => DEFAULT_QUEUE_CAPACITY,
            n => n,
        };
        let host = if self.host.is_empty() {
            let host = local_hostname()?;
            log::info!("GELF host = {host:?}");
            host
        } else {
            self.host.clone()
        };
        Ok(Some(TransportSettings {
            network,
            addr: self.addr.clone(),
            workers,
            max_chunk_size,
            queue_capacity,
            compress: self.compress,
            echo: self.echo,
            host,
        }))
    }
}

fn resolve_workers(workers: i32) -> Result<usize, ConfigError> {
    match workers {
        0 => Ok(DEFAULT_WORKERS),
        1..=MAX_WORKERS => Ok(workers as usize),
        _ => Err(ConfigError::InvalidWorkers(workers)),
    }
}

fn resolve_max_chunk_size(size: i32) -> Result<usize, ConfigError> {
    match size {
        0 => Ok(DEFAULT_MAX_CHUNK_SIZE),
        MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE => Ok(size as usize),
        _ => Err(ConfigError::InvalidMaxChunkSize(size)),
    }
}

/// Name of the machine the process runs on.
#[cfg(unix)]
fn local_hostname() -> Result<String, ConfigError> {
    let name = nix::unistd::gethostname().map_err(|e| ConfigError::Hostname(e.to_string()))?;
    name.into_string()
        .map_err(|raw| ConfigError::Hostname(format!("hostname is not UTF-8: {raw:?}")))
}

#[cfg(not(unix))]
fn local_hostname() -> Result<String, ConfigError> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map_err(|e| ConfigError::Hostname(e.to_string()))
}

/// Validated, immutable settings shared by every worker of a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    pub network: NetworkFamily,
    pub addr: String,
    pub workers: usize,
    pub max_chunk_size: usize,
    pub queue_capacity: usize,
    pub compress: bool,
    pub echo: bool,
    pub host: String,
}
