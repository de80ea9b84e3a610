use std::path::{Path, PathBuf};

use manifest::{piece_hash_hex, ByteRange, FileEntry, Manifest, ManifestBody, PIECE_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("path is neither a file nor a directory: {0}")]
    NotFileOrDir(PathBuf),

    #[error("file size missing for {0}")]
    MissingFileSize(String),
}

type Result<T> = std::result::Result<T, ChunkError>;

/// One file discovered while walking the source path, relative to the
/// published root.
struct Entry {
    relative_path: Vec<String>,
    data: Vec<u8>,
}

/// Splits a file or directory tree into fixed-size pieces and synthesizes
/// its manifest (spec §4.1).
#[derive(Debug, Clone)]
pub struct Chunker {
    tracker_url: String,
}

impl Chunker {
    pub fn new(tracker_url: String) -> Self {
        Self { tracker_url }
    }

    /// Chunks `path` and returns its manifest alongside the concatenated
    /// piece bytes, in index order — the caller (the piece server's
    /// `upload` handler) is responsible for recording those pieces in
    /// `Holdings`.
    pub fn chunk(&self, path: &Path) -> Result<(Manifest, Vec<Vec<u8>>)> {
        let root = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let entries = if path.is_file() {
            vec![Entry {
                relative_path: vec![root.clone()],
                data: std::fs::read(path)?,
            }]
        } else if path.is_dir() {
            let mut files = Vec::new();
            walk_sorted(path, &[root.clone()], &mut files)?;
            files
        } else {
            return Err(ChunkError::NotFileOrDir(path.to_path_buf()));
        };

        let is_multi_file = entries.len() > 1 || path.is_dir();

        let mut stream = Vec::new();
        let mut file_entries = Vec::new();
        for entry in &entries {
            let length = entry.data.len() as u64;
            let start_offset = stream.len() as u64;
            stream.extend_from_slice(&entry.data);
            let end_offset = if length == 0 {
                start_offset
            } else {
                start_offset + length - 1
            };
            file_entries.push(FileEntry {
                path: entry.relative_path.clone(),
                length,
                mapping: ByteRange::new(start_offset, end_offset, length, PIECE_SIZE),
            });
        }

        let pieces: Vec<Vec<u8>> = stream.chunks(PIECE_SIZE).map(|c| c.to_vec()).collect();
        let pieces_hex: String = pieces.iter().map(|p| piece_hash_hex(p)).collect();

        let body = if is_multi_file {
            ManifestBody::Multi { files: file_entries }
        } else {
            ManifestBody::Single {
                length: stream.len() as u64,
            }
        };

        Ok((Manifest::new(self.tracker_url.clone(), root, pieces_hex, body), pieces))
    }
}

/// Walks `dir` in sorted order at every level so chunking is reproducible
/// across runs and across peers (spec §4.1 step 2 explicitly invites this,
/// since the source's `os.walk` order is platform-dependent).
fn walk_sorted(dir: &Path, prefix: &[String], out: &mut Vec<Entry>) -> Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let name = child.file_name().to_string_lossy().into_owned();
        let mut relative = prefix.to_vec();
        relative.push(name);

        if path.is_dir() {
            walk_sorted(&path, &relative, out)?;
        } else if path.is_file() {
            out.push(Entry {
                relative_path: relative,
                data: std::fs::read(&path)?,
            });
        }
    }
    Ok(())
}
