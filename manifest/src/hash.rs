use sha1::{Digest, Sha1};

/// Hex-encoded SHA-1 digest of `data` (spec §4.1 "Manifest synthesis").
pub fn piece_hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies that the concatenation of per-piece SHA-1 digests of `pieces`
/// (in index order) equals `expected_hex` (spec §4.5 step 5, invariant 4).
pub fn verify_pieces<'a>(pieces: impl Iterator<Item = &'a [u8]>, expected_hex: &str) -> bool {
    let mut computed = String::with_capacity(expected_hex.len());
    for piece in pieces {
        computed.push_str(&piece_hash_hex(piece));
    }
    computed == expected_hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_value() {
        // sha1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        assert_eq!(
            piece_hash_hex(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn verify_concatenates_in_order() {
        let a: &[u8] = b"abc";
        let b: &[u8] = b"def";
        let expected = format!("{}{}", piece_hash_hex(a), piece_hash_hex(b));
        assert!(verify_pieces(vec![a, b].into_iter(), &expected));
        assert!(!verify_pieces(vec![b, a].into_iter(), &expected));
    }
}
