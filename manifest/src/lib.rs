//! Manifest ("torrent") data model: the structured record a peer publishes
//! to and fetches from the registry collaborator, plus the piece-hash
//! bookkeeping needed to verify one against assembled bytes.

mod error;
mod hash;
mod info;

pub use error::ManifestError;
pub use hash::{piece_hash_hex, verify_pieces};
pub use info::{ByteRange, FileEntry, Info, ManifestBody};

use serde_derive::{Deserialize, Serialize};

/// Protocol constant: every peer must agree on piece size.
pub const PIECE_SIZE: usize = 102_400;

/// Protocol constant: half a piece.
pub const BLOCK_SIZE: usize = PIECE_SIZE / 2;

type Result<T> = std::result::Result<T, ManifestError>;

/// The manifest ("torrent") for a published object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub announce: String,
    pub info: info::Info,
}

impl Manifest {
    /// Builds a manifest from already-hashed pieces and a body (single file
    /// length, or a multi-file list). `pieces_hex` is the concatenation of
    /// per-piece SHA-1 hex digests, in piece-index order.
    pub fn new(announce: String, name: String, pieces_hex: String, body: ManifestBody) -> Self {
        Self {
            announce,
            info: info::Info {
                name,
                piece_length: PIECE_SIZE as u32,
                pieces: pieces_hex,
                body,
            },
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_multi_file(&self) -> bool {
        matches!(self.info.body, ManifestBody::Multi { .. })
    }

    pub fn total_len(&self) -> u64 {
        match &self.info.body {
            ManifestBody::Single { length } => *length,
            ManifestBody::Multi { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    /// Number of pieces, derived from the length of `info.pieces` (40 hex
    /// chars per SHA-1 digest). Invariant (spec §3): this always equals
    /// `ceil(total_len / PIECE_SIZE)`.
    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len() / 40
    }

    /// Byte length of the piece at `index`. Only the final piece may be
    /// shorter than `PIECE_SIZE`.
    pub fn piece_len(&self, index: usize) -> usize {
        let total = self.total_len() as usize;
        let start = index * PIECE_SIZE;
        (total - start).min(PIECE_SIZE)
    }

    /// The 40-hex-char digest recorded for piece `index`.
    pub fn piece_hash_hex(&self, index: usize) -> Option<&str> {
        let start = index * 40;
        self.info.pieces.get(start..start + 40)
    }

    /// Per-file byte ranges within the concatenated object stream, in the
    /// manifest's declared order. Single-file manifests yield one entry
    /// whose path is just the manifest's name.
    pub fn files(&self) -> Vec<(Vec<String>, ByteRange)> {
        match &self.info.body {
            ManifestBody::Single { length } => vec![(
                vec![self.info.name.clone()],
                ByteRange::new(0, length.saturating_sub(1), *length, PIECE_SIZE),
            )],
            ManifestBody::Multi { files } => files
                .iter()
                .map(|f| (f.path.clone(), f.mapping.clone()))
                .collect(),
        }
    }

    /// Resolves a subpath (root name, or root + inner path components) to
    /// the inclusive range of piece indices that cover it (spec §4.5 step
    /// 2). `subpath` is the full path including the root component.
    pub fn requested_pieces(&self, subpath: &[String]) -> Option<std::ops::RangeInclusive<usize>> {
        if subpath.is_empty() {
            return None;
        }
        if subpath.len() == 1 && subpath[0] == self.info.name {
            return Some(0..=self.num_pieces().saturating_sub(1));
        }
        match &self.info.body {
            ManifestBody::Single { .. } => None,
            ManifestBody::Multi { files } => {
                // Stored paths already include the root component (chunker
                // prefixes every entry with the root name, spec §4.1 step 4).
                files
                    .iter()
                    .find(|f| f.path == subpath)
                    .map(|f| f.mapping.start_piece..=f.mapping.end_piece)
            }
        }
    }
}
