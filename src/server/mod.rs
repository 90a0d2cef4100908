pub mod config;
pub mod controller;
pub mod handlers;
pub mod listener;
pub mod parser;
pub mod registry;
pub mod relay;
pub mod response;
pub mod utils;

pub use config::{Args, ProxyConfig, RelayMode};
pub use controller::{ProxyController, relay_for};
pub use handlers::{ConnectionContext, ConnectionOutcome, handle_connection};
pub use listener::Listener;
pub use parser::{Method, ParsedRequest, TunnelTarget, parse_request};
pub use registry::{ConnectionRegistry, Registration};
pub use relay::{
    ClientIo, ClientStream, DirectRelay, HoldRelay, Tunnel, TunnelHandle, TunnelRelay,
};
