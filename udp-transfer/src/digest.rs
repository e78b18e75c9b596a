//! Whole-transfer digest used for the end-to-end check after reassembly.

use sha2::{Digest as _, Sha256};

/// Length of the digest in bytes; one HASH control packet is sent per byte.
pub const DIGEST_LEN: usize = 32;

/// Fixed-size fingerprint of a complete file.
pub type FileDigest = [u8; DIGEST_LEN];

/// SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> FileDigest {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_digest() {
        assert_eq!(
            hex::encode(digest(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn differs_on_single_byte() {
        assert_ne!(digest(b"ABCDEFGHIJ"), digest(b"ABCDEFGHIK"));
    }
}
