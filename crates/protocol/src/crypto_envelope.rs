use crate::{Error, Result};
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

const KEY_LEN: usize = 32;
const TRANSPORT_IV_LEN: usize = 12;
const AT_REST_SALT_LEN: usize = 32;
const AT_REST_IV_LEN: usize = 16;

/// Session-scoped AES-256-GCM envelope.
///
/// Holds a single write-once transport key and guards against
/// recursive use: a thread encrypting or decrypting on this envelope
/// must finish before another call on the same envelope may start.
pub struct CryptoEnvelope {
    key: [u8; KEY_LEN],
    busy: AtomicBool,
}

/// RAII guard released when a transport operation completes, whether
/// it returns `Ok` or `Err`.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CryptoEnvelope {
    /// Build an envelope around a fixed 32-byte transport key.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key, busy: AtomicBool::new(false) }
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(Error::Fatal(
                "recursive encryption call on the same envelope".into(),
            ));
        }
        Ok(BusyGuard(&self.busy))
    }

    /// Encrypt `plaintext` for the wire: a fresh 12-byte IV is drawn,
    /// prepended to the ciphertext+tag, and the result base64-encoded.
    pub fn encrypt_transport(&self, plaintext: &[u8]) -> Result<String> {
        let _guard = self.acquire()?;
        let mut iv = [0u8; TRANSPORT_IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(&iv);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Fatal(format!("transport encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(TRANSPORT_IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a frame produced by [`Self::encrypt_transport`].
    ///
    /// Any failure here is a per-message `InvalidMessage`, never
    /// `Fatal`: the caller drops the frame and keeps the connection.
    pub fn decrypt_transport(&self, encoded: &str) -> Result<Vec<u8>> {
        let _guard = self.acquire()?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| Error::InvalidMessage(format!("bad base64 frame: {e}")))?;
        if raw.len() < TRANSPORT_IV_LEN {
            return Err(Error::InvalidMessage("frame shorter than IV".into()));
        }
        let (iv, ciphertext) = raw.split_at(TRANSPORT_IV_LEN);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(iv);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::InvalidMessage(format!("decryption failed: {e}")))
    }
}

/// Persisted form of an at-rest encrypted payload (keyshare storage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtRestEnvelope {
    /// Envelope schema version.
    pub version: String,
    /// When this envelope was sealed.
    pub timestamp: DateTime<Utc>,
    /// 32-byte random salt, opaque to this engine; tracked for the
    /// caller's own key-derivation bookkeeping.
    #[serde(with = "hex::serde")]
    pub salt: Vec<u8>,
    /// 16-byte random IV.
    #[serde(with = "hex::serde")]
    pub iv: Vec<u8>,
    /// AES-256-GCM ciphertext+tag.
    #[serde(with = "hex::serde")]
    pub encrypted_data: Vec<u8>,
    /// `hex(SHA-256(encrypted_data))`.
    pub checksum: String,
    /// Free-form caller metadata, round-tripped unexamined.
    pub metadata: serde_json::Value,
    /// Always `"AES-256-GCM"`.
    pub algorithm: String,
    /// Caller-chosen key derivation scheme name, round-tripped
    /// unexamined.
    pub key_derivation: String,
    /// Caller-chosen iteration count, round-tripped unexamined.
    pub iterations: u32,
    /// Whether the caller derived the key from a platform passkey.
    pub use_passkey: bool,
}

impl AtRestEnvelope {
    fn validate_structure(&self) -> Result<()> {
        if self.salt.len() != AT_REST_SALT_LEN {
            return Err(Error::CorruptData(format!(
                "salt must be {AT_REST_SALT_LEN} bytes, got {}",
                self.salt.len()
            )));
        }
        if self.iv.len() != AT_REST_IV_LEN {
            return Err(Error::CorruptData(format!(
                "iv must be {AT_REST_IV_LEN} bytes, got {}",
                self.iv.len()
            )));
        }
        if self.encrypted_data.is_empty() {
            return Err(Error::CorruptData("encrypted_data is empty".into()));
        }
        if self.checksum.is_empty() || self.algorithm.is_empty() {
            return Err(Error::CorruptData("envelope is missing required fields".into()));
        }
        let actual = hex::encode(Sha256::digest(&self.encrypted_data));
        if actual != self.checksum {
            return Err(Error::CorruptData("checksum mismatch".into()));
        }
        Ok(())
    }
}

/// Seal `plaintext` into an [`AtRestEnvelope`] under a caller-derived
/// 32-byte key. `salt` is stored verbatim for the caller's own
/// re-derivation; this engine never derives keys itself.
pub fn seal_at_rest(
    key: &[u8; KEY_LEN],
    salt: [u8; AT_REST_SALT_LEN],
    metadata: serde_json::Value,
    key_derivation: impl Into<String>,
    iterations: u32,
    use_passkey: bool,
    plaintext: &[u8],
) -> Result<AtRestEnvelope> {
    let mut iv = [0u8; AT_REST_IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    // aes-gcm's default nonce width is 96 bits; the at-rest envelope's
    // 128-bit IV is truncated to that width for the cipher call and
    // stored in full so the schema in 4.3 round-trips unchanged.
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(&iv[..TRANSPORT_IV_LEN]);
    let encrypted_data = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Fatal(format!("at-rest encryption failed: {e}")))?;
    let checksum = hex::encode(Sha256::digest(&encrypted_data));
    Ok(AtRestEnvelope {
        version: "1.0".to_string(),
        timestamp: Utc::now(),
        salt: salt.to_vec(),
        iv: iv.to_vec(),
        encrypted_data,
        checksum,
        metadata,
        algorithm: "AES-256-GCM".to_string(),
        key_derivation: key_derivation.into(),
        iterations,
        use_passkey,
    })
}

/// Open an [`AtRestEnvelope`] sealed by [`seal_at_rest`] under the
/// same key. Structural or checksum failures return `CorruptData`.
pub fn open_at_rest(key: &[u8; KEY_LEN], envelope: &AtRestEnvelope) -> Result<Vec<u8>> {
    envelope.validate_structure()?;
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(&envelope.iv[..TRANSPORT_IV_LEN]);
    cipher
        .decrypt(nonce, envelope.encrypted_data.as_slice())
        .map_err(|e| Error::CorruptData(format!("at-rest decryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_LEN] {
        [7u8; KEY_LEN]
    }

    #[test]
    fn transport_round_trip() {
        let envelope = CryptoEnvelope::new(key());
        let frame = envelope.encrypt_transport(b"hello").unwrap();
        let back = envelope.decrypt_transport(&frame).unwrap();
        assert_eq!(back, b"hello");
    }

    #[test]
    fn transport_ivs_are_not_reused() {
        let envelope = CryptoEnvelope::new(key());
        let a = envelope.encrypt_transport(b"hello").unwrap();
        let b = envelope.encrypt_transport(b"hello").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn transport_rejects_garbage() {
        let envelope = CryptoEnvelope::new(key());
        assert!(envelope.decrypt_transport("not-base64!!").is_err());
    }

    #[test]
    fn at_rest_round_trip() {
        let k = key();
        let envelope = seal_at_rest(
            &k,
            [1u8; AT_REST_SALT_LEN],
            serde_json::json!({"note": "test"}),
            "pbkdf2",
            100_000,
            false,
            b"keyshare-bytes",
        )
        .unwrap();
        let back = open_at_rest(&k, &envelope).unwrap();
        assert_eq!(back, b"keyshare-bytes");
    }

    #[test]
    fn at_rest_rejects_checksum_mismatch() {
        let k = key();
        let mut envelope = seal_at_rest(
            &k,
            [1u8; AT_REST_SALT_LEN],
            serde_json::Value::Null,
            "pbkdf2",
            1,
            false,
            b"data",
        )
        .unwrap();
        envelope.checksum = "0".repeat(64);
        let err = open_at_rest(&k, &envelope).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }

    #[test]
    fn at_rest_rejects_bad_salt_length() {
        let k = key();
        let mut envelope = seal_at_rest(
            &k,
            [1u8; AT_REST_SALT_LEN],
            serde_json::Value::Null,
            "pbkdf2",
            1,
            false,
            b"data",
        )
        .unwrap();
        envelope.salt = vec![0u8; 4];
        let err = open_at_rest(&k, &envelope).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }
}
