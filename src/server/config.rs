use crate::common::{DEFAULT_LOG_CAPACITY, ProxyError, ProxyResult};
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PROXY_PORT: u16 = 8080;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;

pub const DEFAULT_HOLD_SECS: u64 = 2;

pub const DEFAULT_CONNECT_TIMEOUT: u64 = 5;

/// Which collaborator receives established CONNECT tunnels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelayMode {
    /// Keep the tunnel open for a fixed period, then close it
    Hold,
    /// Connect straight to the requested target and pipe bytes
    Direct,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Loopback address to listen on
    #[arg(long = "host", short = 'H', default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port browsers and devices are configured to use
    #[arg(long = "port", short = 'P', default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Tunnel relay used for CONNECT requests
    #[arg(long = "relay", short = 'r', value_enum, default_value = "hold")]
    pub relay: RelayMode,

    /// Seconds a held tunnel stays open before it is closed
    #[arg(long = "hold-secs", default_value_t = DEFAULT_HOLD_SECS)]
    pub hold_secs: u64,

    /// Timeout in seconds when the direct relay connects to a target
    #[arg(long = "connect-timeout", short = 't', default_value_t = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: u64,

    /// Largest first read accepted from a client
    #[arg(long = "max-request-bytes", short = 'b', default_value_t = DEFAULT_MAX_REQUEST_BYTES)]
    pub max_request_bytes: usize,

    /// Number of entries kept in the log feed
    #[arg(long = "log-capacity", default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: IpAddr,
    pub port: u16,
    pub relay: RelayMode,
    pub hold_duration: Duration,
    pub connect_timeout: Duration,
    pub max_request_bytes: usize,
    pub log_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PROXY_PORT,
            relay: RelayMode::Hold,
            hold_duration: Duration::from_secs(DEFAULT_HOLD_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if !self.host.is_loopback() {
            return Err(ProxyError::Config(format!(
                "listen address {} is not a loopback address",
                self.host
            )));
        }
        if self.max_request_bytes == 0 {
            return Err(ProxyError::Config(
                "max request bytes must be greater than zero".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ProxyError::Config(
                "log capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<Args> for ProxyConfig {
    type Error = ProxyError;

    fn try_from(args: Args) -> ProxyResult<Self> {
        let config = ProxyConfig {
            host: args.host,
            port: args.port,
            relay: args.relay,
            hold_duration: Duration::from_secs(args.hold_secs),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            max_request_bytes: args.max_request_bytes,
            log_capacity: args.log_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}
