//! Content fingerprints used for change detection.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of `content`.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::fingerprint;

    #[test]
    fn fingerprint_is_stable_hex() {
        let first = fingerprint("- [ ] Buy milk\n");
        assert_eq!(first.len(), 64);
        assert_eq!(first, fingerprint("- [ ] Buy milk\n"));
        assert_ne!(first, fingerprint("- [x] Buy milk\n"));
    }
}
