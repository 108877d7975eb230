//! Content hashing for the relay pipeline.
//!
//! Two digests are used end to end: CRC-32/IEEE guards individual frames on
//! the wire, SHA-256 identifies file content in the sideband metadata.

use sha2::{Digest, Sha256};

/// Compute the CRC-32/IEEE checksum of a byte slice.
///
/// Polynomial `0xEDB88320`, initial value `0xFFFFFFFF`, reflected,
/// final XOR `0xFFFFFFFF`. Both ends of the data channel agree on this
/// variant.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incremental SHA-256 hasher for streaming file content.
#[derive(Debug, Default)]
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the 32-byte digest.
    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

/// Render a SHA-256 digest as lowercase hex.
pub fn sha256_hex(digest: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        // The classic CRC-32/IEEE check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn sha256_known_vector() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"abc");
        let digest = hasher.finish();
        assert_eq!(
            sha256_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_incremental_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut whole = StreamingHasher::new();
        whole.update(data);

        let mut pieces = StreamingHasher::new();
        for part in data.chunks(7) {
            pieces.update(part);
        }

        assert_eq!(whole.finish(), pieces.finish());
    }

    #[test]
    fn sha256_empty_vector() {
        let digest = StreamingHasher::new().finish();
        assert_eq!(
            sha256_hex(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
