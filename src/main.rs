use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_mesh::config::MeshConfig;
use webrtc_mesh::media::StaticMediaSource;
use webrtc_mesh::room::LifecycleManager;
use webrtc_mesh::signaling::{ClientMessage, SignalingClient};
use webrtc_mesh::view::TracingView;
use webrtc_mesh::webrtc::RtcConnectionFactory;
use webrtc_mesh::Error;

/// Join a room and hold a direct peer connection to every other member.
#[derive(Parser, Debug)]
#[command(name = "webrtc-mesh", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling server URL (ws:// or wss://)
    #[arg(long, env = "MESH_SERVER")]
    server: Option<String>,

    /// Room to join
    #[arg(long, env = "MESH_ROOM")]
    room: Option<String>,

    /// Participant id; random when omitted
    #[arg(long, env = "MESH_PEER_ID")]
    peer_id: Option<String>,
}

fn load_config(args: &Args) -> Result<MeshConfig> {
    let mut config = match &args.config {
        Some(path) => MeshConfig::load(path)?,
        None => MeshConfig::default(),
    };
    if let Some(server) = &args.server {
        config.signaling_url = server.clone();
    }
    if let Some(room) = &args.room {
        config.room_id = room.clone();
    }
    if let Some(peer_id) = &args.peer_id {
        config.peer_id = Some(peer_id.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let peer_id = config.resolve_peer_id();

    let client = SignalingClient::connect(&config.signaling_url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.signaling_url))?;
    client
        .send(ClientMessage::Join {
            room_id: config.room_id.clone(),
            peer_id: peer_id.clone(),
        })
        .await?;
    info!("Joining room {} as {}", config.room_id, peer_id);

    let (sender, inbound) = client.into_parts();
    let factory = Arc::new(RtcConnectionFactory::new(&config.ice_servers)?);
    let media = Arc::new(StaticMediaSource::new(config.media.clone(), peer_id.clone()));

    let (manager, mut failures) = LifecycleManager::new(
        peer_id.clone(),
        &config,
        factory,
        media,
        Arc::new(TracingView),
        Arc::new(sender.clone()),
    );

    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            warn!("{}", failure);
        }
    });

    let mut status = manager.monitor().subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            info!(
                "Mesh: {} member(s), {} session(s), {} connected",
                snapshot.members.len(),
                snapshot.sessions.len(),
                snapshot.connected()
            );
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = manager.run(inbound, shutdown).await;

    if let Err(e) = sender
        .send(ClientMessage::Leave {
            room_id: config.room_id.clone(),
            peer_id,
        })
        .await
    {
        warn!("Failed to send leave: {}", e);
    }
    drop(sender);
    // Give the writer task a moment to put the leave on the wire.
    tokio::time::sleep(Duration::from_millis(250)).await;

    match result {
        Ok(()) | Err(Error::Closed) => Ok(()),
        Err(e) => Err(e).context("Left the room"),
    }
}
