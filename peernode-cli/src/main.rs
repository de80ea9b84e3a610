use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use peernode::{framing, Config, Peer, TrackerClient};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Serve {
            listen_addr,
            tracker_url,
            registry_addr,
            output_dir,
        } => serve(listen_addr, tracker_url, registry_addr, output_dir).await,
        Command::Upload { path, peer_addr } => {
            let response = send_command(peer_addr, &format!("{} upload", path.display())).await?;
            println!("{response}");
            Ok(())
        }
        Command::Download { subpath, peer_addr } => {
            let response = send_command(peer_addr, &format!("{subpath} download")).await?;
            println!("{response}");
            Ok(())
        }
        Command::Construct { subpath, peer_addr } => {
            let response = send_command(peer_addr, &format!("{subpath} construct")).await?;
            println!("{response}");
            Ok(())
        }
        Command::Show { tracker_url } => show(tracker_url).await,
    }
}

/// Runs the piece server in the foreground until `ctrl-c`, following the
/// teacher's tracing-subscriber-then-run shape in its own `main`.
async fn serve(
    listen_addr: Option<SocketAddr>,
    tracker_url: Option<url::Url>,
    registry_addr: Option<SocketAddr>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(addr) = listen_addr {
        config.listen_addr = addr;
    }
    if let Some(url) = tracker_url {
        config.tracker_url = url;
    }
    if let Some(addr) = registry_addr {
        config.registry_addr = addr;
    }
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }

    let peer = Peer::new(config);
    let shutdown = CancellationToken::new();

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, shutting down");
            ctrl_c_token.cancel();
        }
    });

    peer.run(shutdown).await.context("piece server failed")
}

/// Sends one control-channel command and reads back its single-line
/// response (spec §4.2 — this CLI is the loopback-trusted caller).
async fn send_command(peer_addr: SocketAddr, command: &str) -> Result<String> {
    let mut stream = TcpStream::connect(peer_addr)
        .await
        .with_context(|| format!("connecting to peer control channel at {peer_addr}"))?;
    framing::write_line(&mut stream, command).await?;
    Ok(framing::read_line(&mut stream).await?)
}

/// `show` talks to the tracker directly rather than through a local peer's
/// control channel, same as the original's standalone "show files" worker.
async fn show(tracker_url: url::Url) -> Result<()> {
    let tracker = TrackerClient::new(tracker_url);
    let files = tracker.list_files().await?;
    if files.is_empty() {
        println!("(no files known to the registry)");
    } else {
        for file in files {
            println!("{file}");
        }
    }
    Ok(())
}
