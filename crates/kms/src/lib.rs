//! AES-256-GCM envelope encryption for secrets at rest (upstream API
//! tokens, export destination configs).
//!
//! Sealed blobs carry the encrypting key id as `<key_id>:<hex(nonce||ct)>`.
//! Blobs written before key rotation existed have no prefix and decrypt
//! under the implicit legacy id `v1`. Encryption always emits the prefixed
//! form using the ring's active key.
//!
//! Master keys are 32-byte values configured as 64-char hex strings. For
//! deployments with stricter requirements, swap this module for a cloud KMS
//! behind the same [`KeyRing`] surface.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Key id assumed for sealed blobs without a `<key_id>:` prefix.
pub const LEGACY_KEY_ID: &str = "v1";

/// Key-management failures. All of these are terminal for the task that
/// hits them: retrying cannot repair a bad key or a malformed blob.
#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    #[error("kms: decode master key '{key_id}': not valid hex")]
    KeyNotHex { key_id: String },

    #[error("kms: master key '{key_id}' must be 32 bytes (got {got})")]
    KeyWrongLength { key_id: String, got: usize },

    #[error("kms: key id '{0}' must not contain ':'")]
    KeyIdInvalid(String),

    #[error("kms: active key '{0}' not present in key ring")]
    ActiveKeyMissing(String),

    #[error("kms: sealed blob references unknown key id '{0}'")]
    UnknownKeyId(String),

    #[error("kms: sealed blob is not valid hex")]
    CiphertextNotHex,

    #[error("kms: sealed blob too short to contain a nonce")]
    CiphertextTooShort,

    #[error("kms: decryption failed (wrong key or tampered ciphertext)")]
    DecryptFailed,

    #[error("kms: encryption failed")]
    EncryptFailed,

    #[error("kms: decrypted secret is not valid UTF-8")]
    NotUtf8,
}

/// A single AES-256-GCM cipher bound to one master key.
struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    fn from_hex_key(key_id: &str, hex_key: &str) -> Result<Self, KmsError> {
        let key = hex::decode(hex_key).map_err(|_| KmsError::KeyNotHex {
            key_id: key_id.to_string(),
        })?;
        if key.len() != 32 {
            return Err(KmsError::KeyWrongLength {
                key_id: key_id.to_string(),
                got: key.len(),
            });
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    /// Encrypt with a fresh random nonce, returning `hex(nonce || ct)`.
    fn encrypt(&self, plaintext: &str) -> Result<String, KmsError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| KmsError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(hex::encode(blob))
    }

    fn decrypt(&self, hex_blob: &str) -> Result<String, KmsError> {
        let data = hex::decode(hex_blob).map_err(|_| KmsError::CiphertextNotHex)?;
        if data.len() < NONCE_LEN {
            return Err(KmsError::CiphertextTooShort);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KmsError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| KmsError::NotUtf8)
    }
}

/// A set of named master keys with one active key for new encryptions.
pub struct KeyRing {
    keys: HashMap<String, Encryptor>,
    active: String,
}

impl KeyRing {
    /// Build a ring from `key_id -> 64-char hex key` plus the active id.
    ///
    /// The active id must be present in the map. Key ids must not contain
    /// `:` since that character delimits the sealed-blob prefix.
    pub fn new(
        hex_keys: &HashMap<String, String>,
        active_key_id: &str,
    ) -> Result<Self, KmsError> {
        let mut keys = HashMap::with_capacity(hex_keys.len());
        for (key_id, hex_key) in hex_keys {
            if key_id.contains(':') {
                return Err(KmsError::KeyIdInvalid(key_id.clone()));
            }
            keys.insert(key_id.clone(), Encryptor::from_hex_key(key_id, hex_key)?);
        }
        if !keys.contains_key(active_key_id) {
            return Err(KmsError::ActiveKeyMissing(active_key_id.to_string()));
        }
        Ok(Self {
            keys,
            active: active_key_id.to_string(),
        })
    }

    /// Convenience constructor for the single-key case: the key becomes
    /// [`LEGACY_KEY_ID`] and is active.
    pub fn single(hex_key: &str) -> Result<Self, KmsError> {
        let mut keys = HashMap::new();
        keys.insert(LEGACY_KEY_ID.to_string(), hex_key.to_string());
        Self::new(&keys, LEGACY_KEY_ID)
    }

    /// Id of the key used for new encryptions.
    pub fn active_key_id(&self) -> &str {
        &self.active
    }

    /// Seal a plaintext under the active key as `<key_id>:<hex(nonce||ct)>`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, KmsError> {
        // The constructor guarantees the active key exists.
        let encryptor = &self.keys[&self.active];
        Ok(format!("{}:{}", self.active, encryptor.encrypt(plaintext)?))
    }

    /// Open a sealed blob produced by any key in the ring.
    ///
    /// Accepts both the prefixed form and bare legacy blobs (treated as
    /// [`LEGACY_KEY_ID`]).
    pub fn decrypt(&self, sealed: &str) -> Result<String, KmsError> {
        let (key_id, hex_blob) = match sealed.split_once(':') {
            Some((id, rest)) => (id, rest),
            None => (LEGACY_KEY_ID, sealed),
        };
        let encryptor = self
            .keys
            .get(key_id)
            .ok_or_else(|| KmsError::UnknownKeyId(key_id.to_string()))?;
        encryptor.decrypt(hex_blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str =
        "0000000000000000000000000000000000000000000000000000000000000000";
    const SECOND_KEY: &str =
        "1111111111111111111111111111111111111111111111111111111111111111";

    fn single_ring() -> KeyRing {
        KeyRing::single(TEST_KEY).unwrap()
    }

    #[test]
    fn rejects_non_hex_key() {
        assert!(matches!(
            KeyRing::single("not-valid-hex"),
            Err(KmsError::KeyNotHex { .. })
        ));
    }

    #[test]
    fn rejects_short_key() {
        // 16 bytes = 32 hex chars, too short for AES-256.
        assert!(matches!(
            KeyRing::single(&"0".repeat(32)),
            Err(KmsError::KeyWrongLength { got: 16, .. })
        ));
    }

    #[test]
    fn rejects_missing_active_key() {
        let mut keys = HashMap::new();
        keys.insert("v1".to_string(), TEST_KEY.to_string());
        assert!(matches!(
            KeyRing::new(&keys, "v2"),
            Err(KmsError::ActiveKeyMissing(_))
        ));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let ring = single_ring();
        let plaintext = "edge-api-token-ABCDEF123456";

        let sealed = ring.encrypt(plaintext).unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_ne!(sealed, plaintext);

        assert_eq!(ring.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn encryption_is_nondeterministic() {
        // GCM uses a random nonce, so two encryptions of the same plaintext
        // must produce different ciphertexts.
        let ring = single_ring();
        let c1 = ring.encrypt("same-secret").unwrap();
        let c2 = ring.encrypt("same-secret").unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn bare_legacy_blob_decrypts_under_v1() {
        let ring = single_ring();
        let sealed = ring.encrypt("legacy-secret").unwrap();
        let bare = sealed.strip_prefix("v1:").unwrap();

        assert_eq!(ring.decrypt(bare).unwrap(), "legacy-secret");
    }

    #[test]
    fn rotated_ring_encrypts_with_active_and_reads_old_blobs() {
        let old_ring = single_ring();
        let old_blob = old_ring.encrypt("pre-rotation").unwrap();

        let mut keys = HashMap::new();
        keys.insert("v1".to_string(), TEST_KEY.to_string());
        keys.insert("v2".to_string(), SECOND_KEY.to_string());
        let ring = KeyRing::new(&keys, "v2").unwrap();

        let new_blob = ring.encrypt("post-rotation").unwrap();
        assert!(new_blob.starts_with("v2:"));

        assert_eq!(ring.decrypt(&old_blob).unwrap(), "pre-rotation");
        assert_eq!(ring.decrypt(&new_blob).unwrap(), "post-rotation");
    }

    #[test]
    fn unknown_key_id_is_rejected() {
        let ring = single_ring();
        let sealed = ring.encrypt("secret").unwrap();
        let moved = format!("v9:{}", sealed.strip_prefix("v1:").unwrap());

        assert!(matches!(
            ring.decrypt(&moved),
            Err(KmsError::UnknownKeyId(_))
        ));
    }

    #[test]
    fn corrupted_blob_is_rejected() {
        let ring = single_ring();
        assert!(matches!(
            ring.decrypt("v1:not-valid-hex!!!"),
            Err(KmsError::CiphertextNotHex)
        ));
        assert!(matches!(
            ring.decrypt(""),
            Err(KmsError::CiphertextTooShort | KmsError::CiphertextNotHex)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let ring = single_ring();
        let sealed = ring.encrypt("sensitive-value").unwrap();

        // Flip one byte in the middle of the ciphertext hex.
        let hex_part = sealed.strip_prefix("v1:").unwrap();
        let tampered = format!("v1:{}ff{}", &hex_part[..10], &hex_part[12..]);

        assert!(matches!(
            ring.decrypt(&tampered),
            Err(KmsError::DecryptFailed)
        ));
    }

    #[test]
    fn empty_and_long_plaintexts_round_trip() {
        let ring = single_ring();

        let sealed = ring.encrypt("").unwrap();
        assert_eq!(ring.decrypt(&sealed).unwrap(), "");

        let long = "a".repeat(4096);
        let sealed = ring.encrypt(&long).unwrap();
        assert_eq!(ring.decrypt(&sealed).unwrap(), long);
    }
}
