use clap::Parser;
use socketzero_proxy::{Args, ProxyConfig, ProxyController, VERSION};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup tracing subscriber for logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match ProxyConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!("Starting SocketZero proxy v{}", VERSION);
    info!(
        "Relay: {:?}, hold: {:?}, connect timeout: {:?}, max request: {} bytes",
        config.relay, config.hold_duration, config.connect_timeout, config.max_request_bytes
    );

    let controller = match ProxyController::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = controller.start().await {
        error!("Proxy did not start: {}", e);
        std::process::exit(1);
    }

    if let Some(endpoint) = controller.proxy_endpoint() {
        info!(
            "Configure the device proxy: Settings -> Wi-Fi -> (i) -> Configure Proxy -> Manual, server {}, port {}",
            endpoint.host, endpoint.port
        );
    }

    wait_for_shutdown().await;

    controller.stop().await;
    info!("Proxy shut down ({} log entries recorded)", controller.logs().len());
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    } else {
        info!("Received Ctrl-C, shutting down gracefully...");
    }
}
