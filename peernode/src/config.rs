use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    path::PathBuf,
    time::Duration,
};

/// Runtime configuration for a peer node.
///
/// Mirrors the teacher's `TorrentConfig`/`ClientConfig` split, collapsed
/// into one struct since this peer has a single listening socket rather
/// than one per torrent. Tracker and registry addresses were constants in
/// the source (spec §6); here they are configuration, overridable from the
/// CLI or environment (spec §6 "Environment").
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the piece server binds and listens on.
    pub listen_addr: SocketAddr,

    /// Base URL of the tracker collaborator, e.g. `http://192.168.0.102:8000`.
    pub tracker_url: url::Url,

    /// Address of the manifest registry collaborator.
    pub registry_addr: SocketAddr,

    /// Directory reconstructed downloads are written under (spec §4.5.2).
    pub output_dir: PathBuf,

    /// Upper bound on concurrent outbound peer connections for a single
    /// download (spec §5, §9: "avoid unbounded thread fan-out").
    pub max_concurrent_transfers: usize,

    pub connect_timeout: Duration,
    pub block_timeout: Duration,
    pub piece_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(local_ip(), 5005),
            tracker_url: url::Url::parse("http://127.0.0.1:8000").unwrap(),
            registry_addr: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 6000),
            output_dir: PathBuf::from("output"),
            max_concurrent_transfers: 64,
            connect_timeout: Duration::from_secs(5),
            block_timeout: Duration::from_secs(30),
            piece_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    /// Overrides the tracker/registry addresses from the environment when
    /// present, leaving everything else at its default. Variable names:
    /// `PEERNODE_TRACKER_URL`, `PEERNODE_REGISTRY_ADDR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PEERNODE_TRACKER_URL") {
            if let Ok(url) = url::Url::parse(&url) {
                config.tracker_url = url;
            }
        }
        if let Ok(addr) = std::env::var("PEERNODE_REGISTRY_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.registry_addr = addr;
            }
        }
        if let Ok(addr) = std::env::var("PEERNODE_LISTEN_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.listen_addr = addr;
            }
        }
        config
    }
}

/// Best-effort LAN address for this host, mirroring the source's
/// `socket.gethostbyname(socket.gethostname())` (spec §6 "Environment").
/// Connecting a UDP socket performs no handshake; it only asks the kernel
/// to pick the local address it would route through to reach `target`.
/// Falls back to loopback if the host has no route at all (e.g. sandboxed
/// CI), which keeps single-host testing working.
fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(Ipv4Addr::LOCALHOST.into())
}
