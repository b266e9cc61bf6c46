#![forbid(unsafe_code)]

use std::io::ErrorKind;
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use vrcast_common::helpers::split_list;
use vrcast_relay::{security, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "vrcast-relay")]
#[command(about = "vrcast signaling relay - forwards offers, answers and candidates between peers")]
struct Args {
    /// Listen address for HTTP and WebSocket signaling
    #[arg(long, env = "VRCAST_RELAY_BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Comma separated browser origins allowed to connect, or `*`
    #[arg(long, env = "VRCAST_ALLOWED_ORIGINS")]
    allowed_origins: Option<String>,

    /// Log level
    #[arg(long, default_value = "vrcast_relay=info,tower_http=info")]
    log_level: String,
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    vrcast_common::init_tracing_with_default(&args.log_level);

    let mut config = RelayConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(origins) = args.allowed_origins.as_deref() {
        let values = split_list(origins);
        config.origins = security::OriginPolicy::from_values(
            values.iter().map(String::as_str),
            vrcast_common::helpers::env_bool("VRCAST_WS_ALLOW_MISSING_ORIGIN", true),
        );
    }

    security::check_public_bind_allowed(config.bind_addr, config.allow_public_bind)?;

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(config.bind_addr.ip(), 0);
            warn!(
                "relay bind {} is already in use, falling back to {}",
                config.bind_addr, fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    let bound_addr = listener.local_addr()?;
    info!("relay listening on {}", bound_addr);
    info!("signaling url ws://{}/ws", bound_addr);

    vrcast_relay::serve_with_shutdown(listener, config, shutdown_signal()).await?;
    Ok(())
}
