//! WORM-integrity helpers: a tamper-evident hash chain over archived log
//! jobs and per-object SHA-256 verification.
//!
//! Each zone carries one chain. A job's chain hash commits to the previous
//! chain hash, the SHA-256 of the archived object, and the job id, so any
//! mutation of a mid-chain archive or any reordering invalidates every
//! downstream link.

use sha2::{Digest, Sha256};

/// Well-known seed for the first job in a zone's chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute the next link in the audit chain:
/// `SHA-256(prev_chain_hash || object_sha256 || job_id)`.
///
/// All three inputs are hashed as their ASCII representations, exactly as
/// they are stored on the job row.
pub fn chain_hash(prev_chain_hash: &str, object_sha256: &str, job_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_chain_hash.as_bytes());
    hasher.update(object_sha256.as_bytes());
    hasher.update(job_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Object verification failure.
#[derive(Debug, thiserror::Error)]
#[error("sha256 mismatch: got {got}, expected {expected}")]
pub struct ShaMismatch {
    /// Digest recomputed from the fetched bytes.
    pub got: String,
    /// Digest recorded on the job row at archive time.
    pub expected: String,
}

/// Confirm that the SHA-256 of `data` matches `expected_hex`.
pub fn verify_object(data: &[u8], expected_hex: &str) -> Result<(), ShaMismatch> {
    let got = sha256_hex(data);
    if got != expected_hex {
        return Err(ShaMismatch {
            got,
            expected: expected_hex.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_64_zero_hex_chars() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert_eq!(GENESIS_HASH, "0".repeat(64));
    }

    #[test]
    fn sha256_hex_known_empty_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn chain_hash_is_deterministic() {
        let obj = "abc123def456abc123def456abc123def456abc123def456abc123def456abc1";
        let job_id = "550e8400-e29b-41d4-a716-446655440000";

        let h1 = chain_hash(GENESIS_HASH, obj, job_id);
        let h2 = chain_hash(GENESIS_HASH, obj, job_id);

        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn chain_hash_unique_per_job_id() {
        let obj = "abc123def456abc123def456abc123def456abc123def456abc123def456abc1";

        let a = chain_hash(GENESIS_HASH, obj, "550e8400-e29b-41d4-a716-446655440000");
        let b = chain_hash(GENESIS_HASH, obj, "660e8400-e29b-41d4-a716-446655440001");

        assert_ne!(a, b);
    }

    #[test]
    fn chain_progression_and_tamper_invalidation() {
        let obj1 = "1".repeat(64);
        let obj2 = "2".repeat(64);
        let obj3 = "3".repeat(64);

        let h1 = chain_hash(GENESIS_HASH, &obj1, "job-1");
        let h2 = chain_hash(&h1, &obj2, "job-2");
        let h3 = chain_hash(&h2, &obj3, "job-3");

        assert_ne!(h1, h2);
        assert_ne!(h2, h3);

        // Tampering mid-chain must invalidate all downstream hashes.
        let h2_tampered = chain_hash(&h1, &"9".repeat(64), "job-2");
        let h3_tampered = chain_hash(&h2_tampered, &obj3, "job-3");
        assert_ne!(h2, h2_tampered);
        assert_ne!(h3, h3_tampered);
    }

    #[test]
    fn verify_object_accepts_matching_digest() {
        let data = b"line1\nline2\n";
        assert!(verify_object(data, &sha256_hex(data)).is_ok());
    }

    #[test]
    fn verify_object_rejects_mismatch() {
        let err = verify_object(b"original", &sha256_hex(b"tampered")).unwrap_err();
        assert_eq!(err.got, sha256_hex(b"original"));
        assert_eq!(err.expected, sha256_hex(b"tampered"));
    }
}
