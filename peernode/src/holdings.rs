use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::sync::RwLock;

/// The pieces this peer actually holds, for every root it has uploaded or
/// downloaded (spec §3 "Local holdings").
///
/// Keyed by `usize` piece index throughout (spec §9 "Holdings addressing" —
/// the source mixed string and integer keys; this picks one canonical
/// representation). `RwLock` rather than `Mutex` because the piece server
/// reads holdings far more often (every `block`/`length` request) than
/// upload/download completion writes them, the same tradeoff the teacher's
/// `fs::Ctx` makes for its file handles. Pieces are stored as `Bytes`
/// (matching the teacher's use of `bytes::Bytes` for wire payloads in
/// `p2p::message`), so serving a `block` slices the held piece instead of
/// copying it.
#[derive(Debug, Default, Clone)]
pub struct Holdings {
    inner: Arc<RwLock<HashMap<String, HashMap<usize, Bytes>>>>,
}

impl Holdings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `pieces` under `root`, replacing any pieces already held at
    /// the same indices.
    pub async fn insert(&self, root: &str, pieces: HashMap<usize, Bytes>) {
        let mut guard = self.inner.write().await;
        guard.entry(root.to_string()).or_default().extend(pieces);
    }

    /// Length of piece `index` within `root`, or `None` if we don't hold it.
    pub async fn piece_len(&self, root: &str, index: usize) -> Option<usize> {
        let guard = self.inner.read().await;
        guard.get(root)?.get(&index).map(|p| p.len())
    }

    /// Bytes `[offset, offset + block_size)` of piece `index`, clamped to
    /// the piece's length (spec §4.2 `block` semantics). Returns empty
    /// bytes, never an error, when the root or piece is missing or the
    /// offset is out of range — callers normalize both to "respond empty"
    /// per spec §4.2's instruction to avoid crashing workers.
    pub async fn block(&self, root: &str, index: usize, offset: usize, block_size: usize) -> Bytes {
        let guard = self.inner.read().await;
        let Some(piece) = guard.get(root).and_then(|pieces| pieces.get(&index)) else {
            return Bytes::new();
        };
        if offset >= piece.len() {
            return Bytes::new();
        }
        let end = (offset + block_size).min(piece.len());
        piece.slice(offset..end)
    }

    /// Whether we hold `root` at all (used to distinguish "unknown root"
    /// from "known root, missing piece" in server-side logging).
    pub async fn has_root(&self, root: &str) -> bool {
        self.inner.read().await.contains_key(root)
    }

    /// All pieces held for `root`, concatenated in ascending index order.
    /// Used by reconstruction once a download's hash check has passed.
    pub async fn assembled(&self, root: &str) -> Option<Vec<u8>> {
        let guard = self.inner.read().await;
        let pieces = guard.get(root)?;
        let mut indices: Vec<_> = pieces.keys().copied().collect();
        indices.sort_unstable();
        let mut buf = Vec::new();
        for idx in indices {
            buf.extend_from_slice(&pieces[&idx]);
        }
        Some(buf)
    }
}
