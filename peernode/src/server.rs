//! The piece server: the TCP listener side of a peer (spec §4.2).
//!
//! Each accepted connection is handled by its own task and loops reading
//! newline-delimited commands until the peer on the other end closes the
//! connection, mirroring the source's per-client thread. `block`/`length`
//! are served to anyone (they only leak data this peer already chose to
//! hold); `upload`/`download`/`construct` mutate local state or reach out
//! to other collaborators on the caller's behalf, so they are restricted to
//! loopback-originated connections (spec §9 "Trust boundary").

use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};

use bytes::Bytes;
use manifest::BLOCK_SIZE;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::{
    chunker::Chunker,
    config::Config,
    download::DownloadEngine,
    error::PeerError,
    framing::{read_line, write_framed_bytes, write_line, FramingError},
    holdings::Holdings,
    registry::RegistryClient,
    tracker::TrackerClient,
};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything a connection handler needs, cloned once per accepted
/// connection rather than locked behind a shared reference (spec §9: the
/// same "private copy over shared mutable state" preference used for
/// download's candidate-peer lists).
#[derive(Clone)]
struct ConnectionContext {
    holdings: Holdings,
    tracker: TrackerClient,
    registry: RegistryClient,
    download: Arc<DownloadEngine>,
    chunker: Chunker,
    config: Config,
}

pub struct PieceServer {
    listen_addr: SocketAddr,
    ctx: ConnectionContext,
}

impl PieceServer {
    pub fn new(config: Config) -> Self {
        let holdings = Holdings::new();
        let tracker = TrackerClient::new(config.tracker_url.clone());
        let registry = RegistryClient::new(config.registry_addr);
        let download = Arc::new(DownloadEngine::new(
            tracker.clone(),
            registry,
            holdings.clone(),
            config.clone(),
            config.listen_addr,
        ));
        let chunker = Chunker::new(config.tracker_url.to_string());
        let listen_addr = config.listen_addr;
        Self {
            listen_addr,
            ctx: ConnectionContext {
                holdings,
                tracker,
                registry,
                download,
                chunker,
                config,
            },
        }
    }

    pub fn holdings(&self) -> &Holdings {
        &self.ctx.holdings
    }

    pub fn download_engine(&self) -> Arc<DownloadEngine> {
        Arc::clone(&self.ctx.download)
    }

    /// Binds and serves until `shutdown` is cancelled.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!("peer listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("piece server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer_addr) = accepted?;
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, peer_addr, ctx).await {
                            tracing::debug!("connection from {} ended: {}", peer_addr, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), FramingError> {
    loop {
        let line = match read_line(&mut socket).await {
            Ok(line) => line,
            Err(FramingError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let Some((prefix, cmd)) = line.rsplit_once(' ') else {
            write_line(&mut socket, "Response Failed").await?;
            continue;
        };

        match cmd {
            "block" => handle_block(&mut socket, prefix, &ctx).await?,
            "length" => handle_length(&mut socket, prefix, &ctx).await?,
            "upload" => handle_upload(&mut socket, prefix, peer_addr, &ctx).await?,
            "download" => handle_download(&mut socket, prefix, peer_addr, &ctx).await?,
            "construct" => handle_construct(&mut socket, prefix, peer_addr, &ctx).await?,
            _ => write_line(&mut socket, "Response Failed").await?,
        }
    }
}

fn parse_block_request(prefix: &str) -> Option<(usize, usize, String)> {
    let (idx_offset, root) = prefix.split_once(' ')?;
    let (idx, offset) = idx_offset.split_once('-')?;
    Some((idx.parse().ok()?, offset.parse().ok()?, root.to_string()))
}

async fn handle_block(
    socket: &mut TcpStream,
    prefix: &str,
    ctx: &ConnectionContext,
) -> Result<(), FramingError> {
    let bytes = match parse_block_request(prefix) {
        Some((idx, offset, root)) => ctx.holdings.block(&root, idx, offset, BLOCK_SIZE).await,
        None => Bytes::new(),
    };
    write_framed_bytes(socket, &bytes).await
}

async fn handle_length(
    socket: &mut TcpStream,
    prefix: &str,
    ctx: &ConnectionContext,
) -> Result<(), FramingError> {
    let length = match prefix.rsplit_once(' ') {
        Some((root, idx_str)) => match idx_str.parse::<usize>() {
            Ok(idx) => ctx.holdings.piece_len(root, idx).await.unwrap_or(0),
            Err(_) => 0,
        },
        None => 0,
    };
    write_line(socket, &length.to_string()).await
}

/// `upload`, `download` and `construct` reach outside this connection's own
/// request/response (publishing to the registry, fetching from peers,
/// writing to disk) on behalf of whoever is connected, so only the local
/// machine's CLI is allowed to invoke them (spec §9 "Trust boundary").
fn require_loopback(peer_addr: SocketAddr) -> bool {
    peer_addr.ip().is_loopback()
}

async fn handle_upload(
    socket: &mut TcpStream,
    path: &str,
    peer_addr: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<(), FramingError> {
    if !require_loopback(peer_addr) {
        return write_line(socket, "Response Failed").await;
    }
    match upload(path, ctx).await {
        Ok(()) => write_line(socket, "Response OK").await,
        Err(e) => {
            tracing::warn!("upload {} failed: {}", path, e);
            write_line(socket, "Response Failed").await
        }
    }
}

async fn upload(path: &str, ctx: &ConnectionContext) -> Result<(), PeerError> {
    let path = PathBuf::from(path);
    let chunker = ctx.chunker.clone();
    let (manifest, pieces) = tokio::task::spawn_blocking(move || chunker.chunk(&path))
        .await
        .expect("chunk task panicked")?;

    let piece_map: HashMap<usize, Bytes> = pieces
        .into_iter()
        .enumerate()
        .map(|(i, p)| (i, Bytes::from(p)))
        .collect();
    ctx.holdings.insert(manifest.name(), piece_map).await;

    let file_details: Option<Vec<(String, u64)>> = if manifest.is_multi_file() {
        Some(
            manifest
                .files()
                .into_iter()
                .map(|(path, range)| (path.join("/"), range.end_offset - range.start_offset + 1))
                .collect(),
        )
    } else {
        None
    };
    let file_details_refs = file_details
        .as_ref()
        .map(|files| files.iter().map(|(name, len)| (name.as_str(), *len)).collect::<Vec<_>>());

    ctx.tracker
        .announce_upload(ctx.config.listen_addr, manifest.name(), manifest.num_pieces(), file_details_refs)
        .await;
    ctx.registry.publish(&manifest).await?;
    Ok(())
}

async fn handle_download(
    socket: &mut TcpStream,
    subpath: &str,
    peer_addr: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<(), FramingError> {
    if !require_loopback(peer_addr) {
        return write_line(socket, "Response Failed").await;
    }
    match ctx.download.download(subpath).await {
        Ok(()) => write_line(socket, "Response OK").await,
        Err(e) => {
            tracing::warn!("download {} failed: {}", subpath, e);
            write_line(socket, "Response Failed").await
        }
    }
}

/// `construct` re-runs reconstruction for an object this peer already
/// holds in full, without re-fetching anything — useful after a process
/// restart left `Holdings` populated but `output_dir` stale or missing
/// (spec §4.2 `construct`).
async fn handle_construct(
    socket: &mut TcpStream,
    subpath: &str,
    peer_addr: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<(), FramingError> {
    if !require_loopback(peer_addr) {
        return write_line(socket, "Response Failed").await;
    }
    let root = subpath.split('/').next().unwrap_or(subpath);
    let result = async {
        if !ctx.holdings.has_root(root).await {
            return Err(PeerError::Registry(crate::registry::RegistryError::NotFound));
        }
        let manifest = ctx.registry.fetch(root).await?;
        ctx.download.reconstruct(subpath, &manifest).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => write_line(socket, "Response OK").await,
        Err(e) => {
            tracing::warn!("construct {} failed: {}", subpath, e);
            write_line(socket, "Response Failed").await
        }
    }
}
