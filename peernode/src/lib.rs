//! A LAN file-sharing peer node: chunking, a manifest registry client, a
//! tracker client, a piece server, and a download engine, wired together
//! behind one `Peer` handle.

pub mod chunker;
pub mod config;
pub mod download;
pub mod error;
pub mod framing;
pub mod holdings;
pub mod registry;
pub mod server;
pub mod tracker;

pub use config::Config;
pub use download::{DownloadEngine, DownloadError};
pub use error::PeerError;
pub use holdings::Holdings;
pub use registry::{RegistryClient, RegistryError};
pub use server::{PieceServer, ServerError};
pub use tracker::{TrackerClient, TrackerError};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// One running peer: owns the piece server's state and exposes the same
/// operations the control channel dispatches to, for embedding or testing
/// without going through a socket.
pub struct Peer {
    server: PieceServer,
}

impl Peer {
    pub fn new(config: Config) -> Self {
        Self {
            server: PieceServer::new(config),
        }
    }

    /// Runs the piece server until `shutdown` is cancelled. Returns once
    /// the listener has been torn down.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        self.server.serve(shutdown).await
    }

    pub fn holdings(&self) -> &Holdings {
        self.server.holdings()
    }

    pub fn download_engine(&self) -> Arc<DownloadEngine> {
        self.server.download_engine()
    }
}
