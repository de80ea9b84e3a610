use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use manifest::{verify_pieces, Manifest, BLOCK_SIZE};
use rand::seq::SliceRandom;
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Semaphore};

use crate::{
    config::Config,
    framing::{read_framed_bytes, read_line, write_line, FramingError},
    holdings::Holdings,
    registry::{RegistryClient, RegistryError},
    tracker::{TrackerClient, TrackerError},
};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("empty subpath")]
    EmptySubpath,

    #[error("{0:?} is not a file of this object")]
    UnknownSubpath(Vec<String>),

    #[error("failed to acquire a peer for piece {0}")]
    PieceFailed(usize),

    #[error("assembled pieces did not match the manifest hash")]
    HashMismatch,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, DownloadError>;

/// Fans piece and block fetches out across candidate peers, verifies the
/// result against the manifest, and reconstructs the requested file(s) on
/// disk (spec §4.5).
pub struct DownloadEngine {
    tracker: TrackerClient,
    registry: RegistryClient,
    holdings: Holdings,
    config: Config,
    self_addr: SocketAddr,
}

impl DownloadEngine {
    pub fn new(
        tracker: TrackerClient,
        registry: RegistryClient,
        holdings: Holdings,
        config: Config,
        self_addr: SocketAddr,
    ) -> Self {
        Self {
            tracker,
            registry,
            holdings,
            config,
            self_addr,
        }
    }

    /// Downloads and reconstructs `subpath` (spec §4.5), e.g. `"hello.bin"`
    /// or `"docs/sub/b.txt"`.
    pub async fn download(&self, subpath: &str) -> Result<()> {
        let components: Vec<String> = subpath.split('/').map(str::to_string).collect();
        let root = components.first().ok_or(DownloadError::EmptySubpath)?.clone();

        let manifest = self.registry.fetch(&root).await?;
        let piece_range = manifest
            .requested_pieces(&components)
            .ok_or_else(|| DownloadError::UnknownSubpath(components.clone()))?;
        let requested: Vec<usize> = piece_range.clone().collect();

        let peer_map = self.tracker.locate_peers(&root, &requested).await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers));
        let mut tasks = Vec::with_capacity(requested.len());
        for idx in requested.iter().copied() {
            let candidates = peer_map.get(&idx).cloned().unwrap_or_default();
            let root = root.clone();
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            tasks.push(tokio::spawn(async move {
                let result = tokio::time::timeout(
                    config.piece_timeout,
                    fetch_piece(idx, candidates, root, semaphore, config),
                )
                .await;
                match result {
                    Ok(r) => r,
                    Err(_) => Err(DownloadError::PieceFailed(idx)),
                }
            }));
        }

        // All piece fetchers run concurrently (spec §4.5 step 4); `join_all`
        // drives them together rather than awaiting one `JoinHandle` at a
        // time, matching the teacher's `futures::future` use for fan-out.
        let mut pieces = HashMap::with_capacity(requested.len());
        for result in futures::future::join_all(tasks).await {
            let (idx, bytes) = result.expect("piece fetch task panicked")?;
            pieces.insert(idx, bytes);
        }

        // Assembly: ascending piece index order (spec §4.5 step 5, invariant 4).
        let mut sorted_indices: Vec<_> = pieces.keys().copied().collect();
        sorted_indices.sort_unstable();
        let piece_refs: Vec<&[u8]> = sorted_indices.iter().map(|i| pieces[i].as_slice()).collect();

        if !verify_pieces(piece_refs.into_iter(), &manifest.info.pieces) {
            tracing::warn!("hash mismatch reconstructing {}", subpath);
            return Err(DownloadError::HashMismatch);
        }

        let holdings_pieces: HashMap<usize, Bytes> =
            pieces.into_iter().map(|(idx, bytes)| (idx, Bytes::from(bytes))).collect();
        self.holdings.insert(&root, holdings_pieces).await;
        self.tracker.announce_download(self.self_addr, &root, requested).await;

        self.reconstruct(subpath, &manifest).await?;
        Ok(())
    }

    /// On-disk reconstruction of a previously-downloaded object (spec
    /// §4.5.2). Directories are always preserved (spec §9 "Reconstruction
    /// path flattening" — resolved, see DESIGN.md).
    pub async fn reconstruct(&self, subpath: &str, manifest: &Manifest) -> Result<()> {
        let root = subpath.split('/').next().unwrap_or(subpath);
        let assembled = self
            .holdings
            .assembled(root)
            .await
            .expect("reconstruct called before pieces were assembled into holdings");

        std::fs::create_dir_all(&self.config.output_dir)?;

        if !manifest.is_multi_file() {
            let dest = self.config.output_dir.join(root);
            write_file(&dest, &assembled).await?;
            return Ok(());
        }

        let requested_components: Vec<String> = subpath.split('/').map(str::to_string).collect();
        let targets_root = requested_components.len() == 1;

        // `assembled` only holds the pieces covering `subpath`, not
        // necessarily the whole object — it may start partway through the
        // stream (spec §4.5 step 2: requested_pieces can be a strict
        // subset of the object's pieces). Byte ranges in the manifest are
        // absolute offsets into the full stream, so they must be rebased
        // onto wherever the fetched piece range actually starts.
        let piece_range = manifest
            .requested_pieces(&requested_components)
            .ok_or_else(|| DownloadError::UnknownSubpath(requested_components.clone()))?;
        let base_offset = (*piece_range.start() as u64) * (manifest.info.piece_length as u64);

        for (path, range) in manifest.files() {
            if !targets_root && path != requested_components {
                continue;
            }
            // Strip the leading root component: it becomes the top-level
            // directory under `output_dir`, matching how `output_dir`
            // itself stands in for "the root" in the single-file case.
            let relative: PathBuf = path.iter().skip(1).collect();
            let dest = self.config.output_dir.join(&relative);
            let start = (range.start_offset - base_offset) as usize;
            let end = ((range.end_offset - base_offset) as usize + 1).min(assembled.len());
            write_file(&dest, &assembled[start..end]).await?;
        }
        Ok(())
    }
}

async fn write_file(dest: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    file.write_all(data).await?;
    Ok(())
}

/// Fetches one piece: a length probe followed by a concurrent fanout of
/// block fetchers (spec §4.5.1).
async fn fetch_piece(
    idx: usize,
    mut candidates: Vec<SocketAddr>,
    root: String,
    semaphore: Arc<Semaphore>,
    config: Config,
) -> Result<(usize, Vec<u8>)> {
    let piece_len = loop {
        if candidates.is_empty() {
            return Err(DownloadError::PieceFailed(idx));
        }
        let peer = *candidates.choose(&mut rand::thread_rng()).unwrap();
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        match probe_length(peer, &root, idx, &config).await {
            Ok(len) => {
                drop(permit);
                break len;
            }
            Err(_) => {
                drop(permit);
                candidates.retain(|c| *c != peer);
            }
        }
    };

    let num_blocks = ((piece_len + BLOCK_SIZE - 1) / BLOCK_SIZE).max(1);
    let mut block_tasks = Vec::with_capacity(num_blocks);
    for b in 0..num_blocks {
        // Each block fetcher gets its own private copy of the candidate
        // set (spec §9: the preferred resolution to the shared-mutable-
        // list hazard, rather than a mutex guarding one shared `Vec`).
        let candidates = candidates.clone();
        let root = root.clone();
        let semaphore = Arc::clone(&semaphore);
        let config = config.clone();
        block_tasks.push(tokio::spawn(async move {
            fetch_block(idx, b, candidates, root, semaphore, config).await
        }));
    }

    let mut blocks = Vec::with_capacity(num_blocks);
    for result in futures::future::join_all(block_tasks).await {
        blocks.push(result.expect("block fetch task panicked")?);
    }

    let mut piece = Vec::with_capacity(piece_len);
    for block in blocks {
        piece.extend_from_slice(&block);
    }
    Ok((idx, piece))
}

async fn fetch_block(
    piece_idx: usize,
    block_idx: usize,
    mut candidates: Vec<SocketAddr>,
    root: String,
    semaphore: Arc<Semaphore>,
    config: Config,
) -> Result<Bytes> {
    loop {
        if candidates.is_empty() {
            return Err(DownloadError::PieceFailed(piece_idx));
        }
        let peer = *candidates.choose(&mut rand::thread_rng()).unwrap();
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let offset = block_idx * BLOCK_SIZE;
        match request_block(peer, &root, piece_idx, offset, &config).await {
            Ok(bytes) => return Ok(bytes),
            Err(_) => candidates.retain(|c| *c != peer),
        }
    }
}

async fn connect(peer: SocketAddr, config: &Config) -> std::result::Result<TcpStream, FramingError> {
    tokio::time::timeout(config.connect_timeout, TcpStream::connect(peer))
        .await
        .map_err(|_| FramingError::ConnectionClosed)?
        .map_err(Into::into)
}

async fn probe_length(
    peer: SocketAddr,
    root: &str,
    piece_idx: usize,
    config: &Config,
) -> std::result::Result<usize, FramingError> {
    let mut stream = connect(peer, config).await?;
    write_line(&mut stream, &format!("{root} {piece_idx} length")).await?;
    let response = tokio::time::timeout(config.block_timeout, read_line(&mut stream))
        .await
        .map_err(|_| FramingError::ConnectionClosed)??;
    response.trim().parse::<usize>().map_err(|_| FramingError::ConnectionClosed)
}

async fn request_block(
    peer: SocketAddr,
    root: &str,
    piece_idx: usize,
    offset: usize,
    config: &Config,
) -> std::result::Result<Bytes, FramingError> {
    let mut stream = connect(peer, config).await?;
    write_line(&mut stream, &format!("{piece_idx}-{offset} {root} block")).await?;
    tokio::time::timeout(config.block_timeout, read_framed_bytes(&mut stream))
        .await
        .map_err(|_| FramingError::ConnectionClosed)?
}
