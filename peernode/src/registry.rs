use std::net::SocketAddr;

use manifest::Manifest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Response cap for the registry's `get`/`add` replies (spec §9: the
/// original's 1024-byte `recv` is a toy limit that breaks on any
/// manifest with more than a handful of files; read to EOF instead, up to
/// this cap).
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("manifest not found in registry")]
    NotFound,

    #[error("registry response was not valid manifest json: {0}")]
    Malformed(#[from] manifest::ManifestError),

    #[error("registry publish was not acknowledged: {0:?}")]
    NotAcknowledged(String),

    #[error("registry response exceeded {MAX_RESPONSE_BYTES} bytes")]
    ResponseTooLarge,
}

type Result<T> = std::result::Result<T, RegistryError>;

/// Client for the manifest registry collaborator (spec §4.4, §6). One TCP
/// connection per operation, matching the original's `get_torrent` /
/// `update_torrent_server` connect-send-recv-close pattern.
#[derive(Debug, Clone, Copy)]
pub struct RegistryClient {
    addr: SocketAddr,
}

impl RegistryClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Publishes `manifest`, expecting the literal response `"Added"`.
    pub async fn publish(&self, manifest: &Manifest) -> Result<()> {
        let request = format!("{} add", manifest.to_json()?);
        let response = self.roundtrip(request).await?;
        if response == "Added" {
            Ok(())
        } else {
            Err(RegistryError::NotAcknowledged(response))
        }
    }

    /// Fetches the manifest published under `root_name`.
    pub async fn fetch(&self, root_name: &str) -> Result<Manifest> {
        let request = format!("{root_name} get");
        let response = self.roundtrip(request).await?;
        if response == "File not found" {
            return Err(RegistryError::NotFound);
        }
        Ok(Manifest::from_json(response.as_bytes())?)
    }

    async fn roundtrip(&self, request: String) -> Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request.as_bytes()).await?;
        stream.shutdown().await?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_RESPONSE_BYTES {
                return Err(RegistryError::ResponseTooLarge);
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
