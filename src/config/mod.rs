use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, Result};

pub const DEFAULT_RELAY_PORT: u16 = 5899;
pub const DEFAULT_STATUS_PORT: u16 = 10000;

/// Room codes are this many characters long
pub const ROOM_CODE_LEN: usize = 8;

/// Relay reads are bounded to this many bytes per chunk
pub const RELAY_CHUNK_SIZE: usize = 64 * 1024;

/// Largest handshake document accepted before the relay phase
pub const MAX_HANDSHAKE_LEN: usize = 4 * 1024;

pub struct Config {
    pub server: ServerConfig,
    pub status: StatusConfig,
    pub relay: RelayConfig,
    pub log_format: LogFormat,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub struct StatusConfig {
    pub port: u16,
}

/// Timing and sizing knobs for rooms and relays
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a new connection has to send its handshake
    pub handshake_timeout: Duration,
    /// How long a host waits for a viewer before the room is dropped
    pub rendezvous_timeout: Duration,
    /// Read timeout inside a relay pump; a timeout just re-checks the room
    pub read_timeout: Duration,
    pub chunk_size: usize,
    pub reaper_interval: Duration,
    /// Age after which a viewer-less room is reaped
    pub room_ttl: Duration,
    /// Cap on code generation retries (0 = unbounded)
    pub max_code_attempts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            rendezvous_timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(1),
            chunk_size: RELAY_CHUNK_SIZE,
            reaper_interval: Duration::from_secs(60),
            room_ttl: Duration::from_secs(300),
            max_code_attempts: 64,
        }
    }
}

impl RelayConfig {
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn rendezvous_timeout(mut self, timeout: Duration) -> Self {
        self.rendezvous_timeout = timeout;
        self
    }

    pub fn room_ttl(mut self, ttl: Duration) -> Self {
        self.room_ttl = ttl;
        self
    }

    pub fn max_code_attempts(mut self, attempts: usize) -> Self {
        self.max_code_attempts = attempts;
        self
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the config from a variable lookup, so tests don't touch the process env
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("text") | Some("") | None => LogFormat::Text,
            Some(other) => {
                return Err(RelayError::config(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: lookup("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_var(&lookup, "RELAY_PORT", DEFAULT_RELAY_PORT)?,
            },
            status: StatusConfig {
                port: parse_var(&lookup, "PORT", DEFAULT_STATUS_PORT)?,
            },
            relay: RelayConfig {
                handshake_timeout: Duration::from_secs(parse_nonzero(
                    &lookup,
                    "HANDSHAKE_TIMEOUT_SECS",
                    defaults.handshake_timeout.as_secs(),
                )?),
                rendezvous_timeout: Duration::from_secs(parse_nonzero(
                    &lookup,
                    "RENDEZVOUS_TIMEOUT_SECS",
                    defaults.rendezvous_timeout.as_secs(),
                )?),
                read_timeout: Duration::from_millis(parse_nonzero(
                    &lookup,
                    "RELAY_READ_TIMEOUT_MS",
                    defaults.read_timeout.as_millis() as u64,
                )?),
                chunk_size: defaults.chunk_size,
                reaper_interval: Duration::from_secs(parse_nonzero(
                    &lookup,
                    "REAPER_INTERVAL_SECS",
                    defaults.reaper_interval.as_secs(),
                )?),
                room_ttl: Duration::from_secs(parse_nonzero(
                    &lookup,
                    "ROOM_TTL_SECS",
                    defaults.room_ttl.as_secs(),
                )?),
                max_code_attempts: parse_var(
                    &lookup,
                    "MAX_CODE_ATTEMPTS",
                    defaults.max_code_attempts,
                )?,
            },
            log_format,
        })
    }

    /// Address the relay listener binds to
    pub fn relay_address(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.parse_host_to_ipv4()), self.server.port)
    }

    /// Address the status responder binds to; shares the relay host
    pub fn status_address(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.parse_host_to_ipv4()), self.status.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        // Try to parse as IP address first
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" | "0.0.0.0" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}

/// Timeouts and intervals of zero would disable the thing they bound
fn parse_nonzero<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var(lookup, key, default)? {
        0 => Err(RelayError::config(format!("{} must be greater than zero", key))),
        value => Ok(value),
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::config(format!("{} has invalid value '{}'", key, raw))),
        _ => Ok(default),
    }
}
