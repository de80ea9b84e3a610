use crate::{chunker::ChunkError, download::DownloadError, registry::RegistryError, tracker::TrackerError};

/// Top-level error composed from each component's own error enum (spec §7),
/// surfaced at the control-channel/CLI boundary.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
