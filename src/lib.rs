pub mod common;
pub mod server;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use common::{
    LogEntry, ParseError, ProxyEndpoint, ProxyError, ProxyMonitor, ProxyResult, ProxyState,
    StatusSnapshot,
};
pub use server::{
    Args, DirectRelay, HoldRelay, ProxyConfig, ProxyController, RelayMode, Tunnel, TunnelHandle,
    TunnelRelay, TunnelTarget,
};

pub mod prelude {
    pub use crate::common::{LogEntry, ProxyError, ProxyResult, ProxyState};
    pub use crate::server::{ProxyConfig, ProxyController, Tunnel, TunnelHandle, TunnelRelay};
}
