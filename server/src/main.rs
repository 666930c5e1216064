use clap::Parser;
use log::{error, info};
use server::config::{load_ban_list, LobbyConfig};
use server::lobby::Lobby;
use server::model::BoardModel;
use std::path::PathBuf;

/// Command line arguments. Anything given here overrides the
/// configuration file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// JSON file with banned nickname patterns
    #[clap(short, long)]
    ban_list: Option<PathBuf>,

    /// Interface to bind the lobby and match sockets to
    #[clap(short = 'H', long)]
    host: Option<String>,

    /// UDP port of the lobby socket
    #[clap(short, long)]
    port: Option<u16>,

    /// Directory holding snapshots of interrupted matches
    #[clap(short, long)]
    saved_matches_dir: Option<PathBuf>,
}

/// Parses the configuration, binds the lobby and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LobbyConfig::load(path)?,
        None => LobbyConfig::default(),
    };
    if let Some(path) = &args.ban_list {
        config.banned_patterns = load_ban_list(path)?;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(dir) = args.saved_matches_dir {
        config.saved_matches_dir = dir;
    }

    let lobby = Lobby::<BoardModel>::bind(config).await?;

    let serve_handle = {
        let lobby = lobby.clone();
        tokio::spawn(async move {
            lobby.serve().await;
        })
    };

    tokio::select! {
        result = serve_handle => {
            if let Err(e) = result {
                error!("Lobby task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
