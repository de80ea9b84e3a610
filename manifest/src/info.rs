use serde_derive::{Deserialize, Serialize};

/// The `info` dictionary of a manifest: piece bookkeeping shared by both
/// single-file and multi-file objects, plus the body that distinguishes
/// them.
///
/// Wire shape matches spec §3 exactly: `piece length`, `pieces`, `name`,
/// and either `length` (single-file) or `files` (multi-file) — never both.
/// `ManifestBody` gives callers a tagged-variant view (spec §9's
/// "Polymorphism" note) without changing the JSON shape on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub name: String,

    #[serde(rename = "piece length")]
    pub piece_length: u32,

    /// Concatenation of 40-hex-char SHA-1 digests, one per piece, in order.
    pub pieces: String,

    #[serde(flatten)]
    pub body: ManifestBody,
}

/// Single-file objects carry `length`; multi-file objects carry `files`.
/// `#[serde(untagged)]` plus `#[serde(flatten)]` on the parent reproduces
/// the spec's "one or the other, never both" wire shape while giving the
/// rest of the crate a proper tagged enum to match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestBody {
    Multi { files: Vec<FileEntry> },
    Single { length: u64 },
}

/// One file within a multi-file object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path components, root-prefixed (spec §4.1 step 4).
    pub path: Vec<String>,

    pub length: u64,

    pub mapping: ByteRange,
}

/// A file's position within the concatenated object stream (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start_offset: u64,
    pub end_offset: u64,
    pub start_piece: usize,
    pub end_piece: usize,
}

impl ByteRange {
    /// Computes start/end piece indices from a contiguous `[start, start +
    /// length)` byte span, given `piece_size`. Used both by the chunker
    /// (spec §4.1) and by `Manifest::files` for single-file objects.
    pub fn new(start_offset: u64, end_offset: u64, length: u64, piece_size: usize) -> Self {
        let piece_size = piece_size as u64;
        let start_piece = (start_offset / piece_size) as usize;
        let end_piece = if length == 0 {
            start_piece
        } else {
            (end_offset / piece_size) as usize
        };
        Self {
            start_offset,
            end_offset,
            start_piece,
            end_piece,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_spans_pieces_correctly() {
        // docs/sub/b.txt from spec §8 S2: 80,000 bytes starting at offset
        // 60,000, piece size 102,400 -> pieces 0 and 1.
        let range = ByteRange::new(60_000, 139_999, 80_000, 102_400);
        assert_eq!(range.start_piece, 0);
        assert_eq!(range.end_piece, 1);
    }

    #[test]
    fn manifest_body_serializes_without_a_tag_field() {
        let single = ManifestBody::Single { length: 10 };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json, serde_json::json!({"length": 10}));

        let multi = ManifestBody::Multi { files: vec![] };
        let json = serde_json::to_value(&multi).unwrap();
        assert_eq!(json, serde_json::json!({"files": []}));
    }
}
