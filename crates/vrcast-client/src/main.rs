#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use vrcast_client::{spawn_session, ClientConfig, Role, SignalingChannel, WebRtcSession};

#[derive(Parser, Debug)]
#[command(name = "vrcast-client")]
#[command(about = "vrcast client - share a screen or watch one over WebRTC")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(ClapArgs, Debug)]
struct CommonArgs {
    /// Signaling relay WebSocket url
    #[arg(long, global = true, env = "VRCAST_SIGNALING_URL")]
    url: Option<String>,

    /// Paired session to join; the streamer offers once the viewer is present
    #[arg(long, global = true, env = "VRCAST_SESSION")]
    session: Option<String>,

    /// STUN/TURN server url (repeatable)
    #[arg(long = "ice-server", global = true)]
    ice_servers: Vec<String>,

    /// Seconds to wait for negotiation before giving up
    #[arg(long, global = true, env = "VRCAST_NEGOTIATION_TIMEOUT_SECS")]
    negotiation_timeout_secs: Option<u64>,

    /// Log level
    #[arg(long, global = true, default_value = "vrcast_client=info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offer a video track to whoever is on the other end of the relay
    Streamer,

    /// Wait for an offer and receive the streamer's video
    Viewer,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    vrcast_common::init_tracing_with_default(&args.common.log_level);

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.common.url {
        config.signaling_url = url;
    }
    if let Some(session) = args.common.session {
        config.session = Some(session);
    }
    if !args.common.ice_servers.is_empty() {
        config.ice_servers = args.common.ice_servers;
    }
    if let Some(secs) = args.common.negotiation_timeout_secs {
        config.negotiation_timeout = Duration::from_secs(secs);
    }
    config.validate()?;

    let role = match args.command {
        Command::Streamer => Role::Streamer,
        Command::Viewer => Role::Viewer,
    };

    let endpoint = config.endpoint();
    let (channel, inbound) = SignalingChannel::connect(&endpoint)
        .await
        .with_context(|| format!("connecting to {endpoint}"))?;
    let (mut media, media_events) = WebRtcSession::new(role, &config.ice_servers).await?;

    if role == Role::Viewer {
        if let Some(mut tracks) = media.take_remote_tracks() {
            tokio::spawn(async move {
                while let Some(track) = tracks.recv().await {
                    tokio::spawn(async move {
                        let mut packets = 0u64;
                        while let Ok((packet, _)) = track.read_rtp().await {
                            packets += 1;
                            if packets % 500 == 0 {
                                info!(
                                    "track {}: {} packets, last seq {}",
                                    track.id(),
                                    packets,
                                    packet.header.sequence_number
                                );
                            }
                        }
                        info!("track {} ended after {} packets", track.id(), packets);
                    });
                }
            });
        }
    }

    let mut session = spawn_session(
        role,
        media,
        media_events,
        channel,
        inbound,
        config.session_options(),
    );

    if role.is_initiator() {
        session.begin()?;
        info!("offer requested");
    } else {
        info!("waiting for an offer");
    }

    tokio::select! {
        settled = session.wait_settled() => {
            settled.context("negotiation failed")?;
            info!("connected, press ctrl-c to stop");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    session.shutdown().await;
    Ok(())
}
