use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use serde::Serialize;
use serde_derive::Deserialize;

/// The tracker collaborator's HTTP API (spec §4.3, §6). A thin `reqwest`
/// client, same shape as the teacher's `HttpTracker` minus the BitTorrent
/// announce-params dance — this tracker speaks JSON, not bencode.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: reqwest::Client,
    base_url: url::Url,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid tracker url")]
    InvalidUrl,
}

type Result<T> = std::result::Result<T, TrackerError>;

#[derive(serde_derive::Serialize)]
struct PeerUpdate<'a> {
    peer_ip: IpAddr,
    peer_port: u16,
    file_name: &'a str,
    pieces_indices: Vec<usize>,
    file_details: Option<Vec<FileDetail<'a>>>,
}

#[derive(serde_derive::Serialize)]
struct FileDetail<'a> {
    name: &'a str,
    length: u64,
}

#[derive(serde_derive::Serialize)]
struct PeerUpdateDownload<'a> {
    peer_ip: IpAddr,
    peer_port: u16,
    file_name: &'a str,
    pieces_indices: Vec<usize>,
}

#[derive(Deserialize)]
struct ShowResponse {
    files: Vec<String>,
}

impl TrackerClient {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Announce newly published or newly downloaded pieces. Best-effort:
    /// network failures are logged and swallowed (spec §4.3, §7 — "Transient
    /// peer I/O"/"Tracker unavailable" policy for announcements).
    pub async fn announce_upload(
        &self,
        peer: SocketAddr,
        file_name: &str,
        num_pieces: usize,
        file_details: Option<Vec<(&str, u64)>>,
    ) {
        let body = PeerUpdate {
            peer_ip: peer.ip(),
            peer_port: peer.port(),
            file_name,
            pieces_indices: (0..num_pieces).collect(),
            file_details: file_details
                .map(|files| files.into_iter().map(|(name, length)| FileDetail { name, length }).collect()),
        };
        self.post("/peer-update", &body).await;
    }

    pub async fn announce_download(&self, peer: SocketAddr, file_name: &str, pieces_indices: Vec<usize>) {
        let body = PeerUpdateDownload {
            peer_ip: peer.ip(),
            peer_port: peer.port(),
            file_name,
            pieces_indices,
        };
        self.post("/peer-update-download", &body).await;
    }

    async fn post(&self, path: &str, body: &impl Serialize) {
        let Ok(url) = self.base_url.join(path) else {
            tracing::warn!("invalid tracker announce url: {}{}", self.base_url, path);
            return;
        };
        match self.client.post(url).json(body).send().await {
            Ok(resp) => tracing::debug!("tracker announce {}: {}", path, resp.status()),
            Err(e) => tracing::warn!("tracker announce {} failed (ignored): {}", path, e),
        }
    }

    /// Locates peers holding each of `piece_indices` for `file_name` (spec
    /// §4.3). Unlike announcements, failure here is fatal to the caller's
    /// download (spec §7 "locate is fatal").
    pub async fn locate_peers(
        &self,
        file_name: &str,
        piece_indices: &[usize],
    ) -> Result<HashMap<usize, Vec<SocketAddr>>> {
        let csv = piece_indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self
            .base_url
            .join("/get-peer")
            .map_err(|_| TrackerError::InvalidUrl)?;
        url.query_pairs_mut()
            .append_pair("filename", file_name)
            .append_pair("piece_indices", &csv);

        let raw: HashMap<String, Vec<(IpAddr, u16)>> =
            self.client.get(url).send().await?.json().await?;

        Ok(raw
            .into_iter()
            .filter_map(|(idx, peers)| {
                idx.parse::<usize>().ok().map(|idx| {
                    (
                        idx,
                        peers.into_iter().map(|(ip, port)| SocketAddr::new(ip, port)).collect(),
                    )
                })
            })
            .collect())
    }

    /// `GET /show` — names of every file the registry currently knows
    /// about (spec §6, used by the UI collaborator in the original source).
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let url = self.base_url.join("/show").map_err(|_| TrackerError::InvalidUrl)?;
        let resp: ShowResponse = self.client.get(url).send().await?.json().await?;
        Ok(resp.files)
    }
}
