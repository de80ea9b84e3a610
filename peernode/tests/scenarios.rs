//! Cross-module scenario tests (spec §8 S1–S6): two in-process peers, a
//! hand-rolled tracker HTTP mock and a hand-rolled registry TCP mock,
//! driven entirely over the real wire protocols — the same way a CLI and
//! another peer would talk to this one. No private APIs are reached into;
//! everything goes through `upload`/`download` on the control channel.

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use manifest::PIECE_SIZE;
use peernode::{framing, Config, Holdings, Peer};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

type TrackerState = Arc<Mutex<HashMap<String, HashMap<usize, Vec<SocketAddr>>>>>;
type RegistryState = Arc<Mutex<HashMap<String, String>>>;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Spawns a peer's piece server on a free loopback port, pointed at the
/// given tracker/registry mocks, and returns its control-channel address
/// plus a handle onto its in-memory holdings (for tests that need to
/// inspect or corrupt them directly, e.g. S5).
async fn spawn_peer(tracker_addr: SocketAddr, registry_addr: SocketAddr, output_dir: PathBuf) -> (SocketAddr, Holdings) {
    let listen_addr = SocketAddr::from(([127, 0, 0, 1], free_port()));
    let config = Config {
        listen_addr,
        tracker_url: url::Url::parse(&format!("http://{tracker_addr}")).unwrap(),
        registry_addr,
        output_dir,
        ..Config::default()
    };
    let peer = Peer::new(config);
    let holdings = peer.holdings().clone();
    let shutdown = CancellationToken::new();
    tokio::spawn(async move {
        let _ = peer.run(shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (listen_addr, holdings)
}

async fn send_command(addr: SocketAddr, cmd: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    framing::write_line(&mut stream, cmd).await.unwrap();
    framing::read_line(&mut stream).await.unwrap()
}

// --- Fake tracker: an HTTP/1.1 responder over raw TCP. reqwest only needs
// a correct status line, Content-Length and a JSON body; hand-rolling this
// avoids pulling in a hyper server body-type dance for a handful of routes. ---

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(head: &str) -> usize {
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.trim().parse::<usize>() {
                    return n;
                }
            }
        }
    }
    0
}

async fn read_http_request(stream: &mut TcpStream) -> (String, String, Vec<u8>) {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = find_subslice(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).into_owned();
            let content_length = parse_content_length(&head);
            if data.len() >= pos + 4 + content_length {
                let request_line = head.lines().next().unwrap_or("");
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or("").to_string();
                let path = parts.next().unwrap_or("").to_string();
                let body = data[pos + 4..pos + 4 + content_length].to_vec();
                return (method, path, body);
            }
        }
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return (String::new(), String::new(), Vec::new());
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

async fn write_http_response(stream: &mut TcpStream, status: u16, body: &str) {
    let resp = format!(
        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(resp.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn record_announce(state: &TrackerState, body: &[u8]) {
    let Ok(v) = serde_json::from_slice::<serde_json::Value>(body) else { return };
    let Some(file_name) = v.get("file_name").and_then(|f| f.as_str()) else { return };
    let Some(ip) = v.get("peer_ip").and_then(|f| f.as_str()) else { return };
    let Some(port) = v.get("peer_port").and_then(|f| f.as_u64()) else { return };
    let Ok(ip) = ip.parse::<std::net::IpAddr>() else { return };
    let addr = SocketAddr::new(ip, port as u16);
    let Some(indices) = v.get("pieces_indices").and_then(|f| f.as_array()) else { return };

    let mut map = state.lock().await;
    let file_map = map.entry(file_name.to_string()).or_default();
    for idx in indices {
        if let Some(idx) = idx.as_u64() {
            let entry = file_map.entry(idx as usize).or_default();
            if !entry.contains(&addr) {
                entry.push(addr);
            }
        }
    }
}

async fn handle_tracker_conn(mut stream: TcpStream, state: TrackerState) {
    let (method, path_and_query, body) = read_http_request(&mut stream).await;
    let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query.as_str(), ""));

    match (method.as_str(), path) {
        ("POST", "/peer-update") | ("POST", "/peer-update-download") => {
            record_announce(&state, &body).await;
            write_http_response(&mut stream, 200, "{}").await;
        }
        ("GET", "/get-peer") => {
            let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();
            let filename = params.get("filename").cloned().unwrap_or_default();
            let indices: Vec<usize> = params
                .get("piece_indices")
                .map(|s| s.split(',').filter_map(|p| p.parse::<usize>().ok()).collect())
                .unwrap_or_default();

            let map = state.lock().await;
            let mut out = serde_json::Map::new();
            if let Some(file_map) = map.get(&filename) {
                for idx in indices {
                    if let Some(peers) = file_map.get(&idx) {
                        let arr: Vec<_> = peers
                            .iter()
                            .map(|a| serde_json::json!([a.ip().to_string(), a.port()]))
                            .collect();
                        out.insert(idx.to_string(), serde_json::Value::Array(arr));
                    }
                }
            }
            write_http_response(&mut stream, 200, &serde_json::Value::Object(out).to_string()).await;
        }
        ("GET", "/show") => {
            let map = state.lock().await;
            let files: Vec<_> = map.keys().cloned().collect();
            write_http_response(&mut stream, 200, &serde_json::json!({"files": files}).to_string()).await;
        }
        _ => write_http_response(&mut stream, 404, "{}").await,
    }
}

async fn spawn_fake_tracker() -> (SocketAddr, TrackerState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state: TrackerState = Arc::new(Mutex::new(HashMap::new()));
    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(handle_tracker_conn(stream, Arc::clone(&state_clone)));
        }
    });
    (addr, state)
}

// --- Fake registry: raw TCP, same `<json> add` / `<root> get` protocol as
// the real one, backed by an in-memory map keyed by manifest name. ---

fn manifest_name(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .ok()
        .and_then(|v| v["info"]["name"].as_str().map(str::to_string))
        .unwrap_or_default()
}

async fn spawn_fake_registry() -> (SocketAddr, RegistryState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state: RegistryState = Arc::new(Mutex::new(HashMap::new()));
    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let state = Arc::clone(&state_clone);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let request = String::from_utf8_lossy(&buf).into_owned();
                if let Some(json) = request.strip_suffix(" add") {
                    state.lock().await.insert(manifest_name(json), json.to_string());
                    let _ = stream.write_all(b"Added").await;
                } else if let Some(name) = request.strip_suffix(" get") {
                    let guard = state.lock().await;
                    match guard.get(name) {
                        Some(json) => {
                            let _ = stream.write_all(json.as_bytes()).await;
                        }
                        None => {
                            let _ = stream.write_all(b"File not found").await;
                        }
                    }
                }
            });
        }
    });
    (addr, state)
}

#[tokio::test]
async fn s1_single_file_round_trip() {
    let (tracker_addr, _tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("hello.bin");
    let data: Vec<u8> = (0..250_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&src_path, &data).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, _holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", src_path.display())).await;
    assert_eq!(resp, "Response OK");

    let out_b = tempfile::tempdir().unwrap();
    let (addr_b, _holdings_b) = spawn_peer(tracker_addr, registry_addr, out_b.path().to_path_buf()).await;
    let resp = send_command(addr_b, "hello.bin download").await;
    assert_eq!(resp, "Response OK");

    let reconstructed = std::fs::read(out_b.path().join("hello.bin")).unwrap();
    assert_eq!(reconstructed, data);
}

#[tokio::test]
async fn s2_multi_file_directory_manifest_shape() {
    let (tracker_addr, _tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let root = src_dir.path().join("docs");
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("a.txt"), vec![1u8; 60_000]).unwrap();
    std::fs::write(root.join("sub").join("b.txt"), vec![2u8; 80_000]).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, _holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", root.display())).await;
    assert_eq!(resp, "Response OK");

    let registry = peernode::RegistryClient::new(registry_addr);
    let manifest = registry.fetch("docs").await.unwrap();
    assert!(manifest.is_multi_file());
    assert_eq!(manifest.total_len(), 140_000);
    assert_eq!(manifest.num_pieces(), 2);
    assert_eq!(manifest.info.pieces.len(), 80);

    let b_range = manifest
        .requested_pieces(&["docs".into(), "sub".into(), "b.txt".into()])
        .unwrap();
    assert_eq!(b_range, 0..=1);

    let files = manifest.files();
    let (_, b_mapping) = files
        .iter()
        .find(|(p, _)| p == &vec!["docs".to_string(), "sub".into(), "b.txt".into()])
        .unwrap();
    assert_eq!(b_mapping.start_offset, 60_000);
    assert_eq!(b_mapping.end_offset, 139_999);
}

#[tokio::test]
async fn s3_subfile_download_fetches_only_covering_pieces() {
    let (tracker_addr, _tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let root = src_dir.path().join("docs");
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("a.txt"), vec![1u8; 60_000]).unwrap();
    let b_data = vec![2u8; 80_000];
    std::fs::write(root.join("sub").join("b.txt"), &b_data).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, _holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", root.display())).await;
    assert_eq!(resp, "Response OK");

    let out_b = tempfile::tempdir().unwrap();
    let (addr_b, _holdings_b) = spawn_peer(tracker_addr, registry_addr, out_b.path().to_path_buf()).await;
    let resp = send_command(addr_b, "docs/sub/b.txt download").await;
    assert_eq!(resp, "Response OK");

    let reconstructed = std::fs::read(out_b.path().join("sub").join("b.txt")).unwrap();
    assert_eq!(reconstructed, b_data);
    assert!(!out_b.path().join("a.txt").exists());
}

#[tokio::test]
async fn s4_peer_failure_falls_back_to_another_candidate() {
    let (tracker_addr, tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("hello.bin");
    let data: Vec<u8> = (0..250_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&src_path, &data).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, _holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", src_path.display())).await;
    assert_eq!(resp, "Response OK");

    // Inject a dead candidate ahead of the real peer for every piece, so
    // the first pick is guaranteed to refuse the connection at least once
    // per piece and the engine must retry via the surviving candidate.
    let dead = SocketAddr::from(([127, 0, 0, 1], 1));
    {
        let mut state = tracker_state.lock().await;
        for file_map in state.values_mut() {
            for peers in file_map.values_mut() {
                peers.insert(0, dead);
            }
        }
    }

    let out_b = tempfile::tempdir().unwrap();
    let (addr_b, _holdings_b) = spawn_peer(tracker_addr, registry_addr, out_b.path().to_path_buf()).await;
    let resp = send_command(addr_b, "hello.bin download").await;
    assert_eq!(resp, "Response OK");

    let reconstructed = std::fs::read(out_b.path().join("hello.bin")).unwrap();
    assert_eq!(reconstructed, data);
}

#[tokio::test]
async fn s5_hash_mismatch_fails_and_does_not_persist() {
    let (tracker_addr, _tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("hello.bin");
    let data = vec![9u8; 150_000];
    std::fs::write(&src_path, &data).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", src_path.display())).await;
    assert_eq!(resp, "Response OK");

    // Corrupt piece 0 in place: same length (so the length probe and block
    // fanout proceed normally), different bytes (so the hash check fails).
    let piece_len = data.len().min(PIECE_SIZE);
    let mut corrupt = HashMap::new();
    corrupt.insert(0, bytes::Bytes::from(vec![0xAAu8; piece_len]));
    holdings_a.insert("hello.bin", corrupt).await;

    let out_b = tempfile::tempdir().unwrap();
    let (addr_b, _holdings_b) = spawn_peer(tracker_addr, registry_addr, out_b.path().to_path_buf()).await;
    let resp = send_command(addr_b, "hello.bin download").await;
    assert_eq!(resp, "Response Failed");
    assert!(!out_b.path().join("hello.bin").exists());
}

#[tokio::test]
async fn s6_missing_piece_mapping_fails_download() {
    let (tracker_addr, tracker_state) = spawn_fake_tracker().await;
    let (registry_addr, _registry_state) = spawn_fake_registry().await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("hello.bin");
    let data = vec![3u8; 150_000];
    std::fs::write(&src_path, &data).unwrap();

    let out_a = tempfile::tempdir().unwrap();
    let (addr_a, _holdings_a) = spawn_peer(tracker_addr, registry_addr, out_a.path().to_path_buf()).await;
    let resp = send_command(addr_a, &format!("{} upload", src_path.display())).await;
    assert_eq!(resp, "Response OK");

    // Drop piece 1's candidate mapping: the tracker now reports no peer at
    // all for that piece, which must fail the whole download.
    {
        let mut state = tracker_state.lock().await;
        if let Some(file_map) = state.get_mut("hello.bin") {
            file_map.remove(&1);
        }
    }

    let out_b = tempfile::tempdir().unwrap();
    let (addr_b, _holdings_b) = spawn_peer(tracker_addr, registry_addr, out_b.path().to_path_buf()).await;
    let resp = send_command(addr_b, "hello.bin download").await;
    assert_eq!(resp, "Response Failed");
    assert!(!out_b.path().join("hello.bin").exists());
}
