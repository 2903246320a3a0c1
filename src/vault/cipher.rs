//! Envelope encryption for credential records.
//!
//! A random 256-bit session key lives only in process memory. Every envelope
//! carries its own random derivation salt; the per-envelope AES-256-GCM key is
//! HKDF-SHA256(session key, salt). The credential kind is bound in as AAD, so an
//! envelope moved into the other slot fails authentication.

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const SALT_SIZE: usize = 16;
const HKDF_INFO: &[u8] = b"session-guard/credential-envelope/v1";

/// Failures inside the cipher. Callers degrade all of them to "no credential".
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("random number generator failed")]
    Rng,

    #[error("key derivation failed")]
    Derive,

    #[error("sealing failed")]
    Seal,

    #[error("authentication failed (tampered data or wrong key)")]
    Open,

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// At-rest form of a credential record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 of nonce || ciphertext || tag.
    pub ciphertext: String,
    /// Base64 of the per-envelope HKDF salt.
    pub derivation_salt: String,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CipherError> {
        serde_json::to_vec(self).map_err(|e| CipherError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        serde_json::from_slice(bytes).map_err(|e| CipherError::Malformed(e.to_string()))
    }
}

/// The in-memory session key. Wiped on drop.
pub struct SessionKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl SessionKey {
    pub fn generate(rng: &SystemRandom) -> Result<Self, CipherError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rng.fill(&mut bytes[..]).map_err(|_| CipherError::Rng)?;
        Ok(Self { bytes })
    }

    fn derive(&self, salt: &[u8]) -> Result<LessSafeKey, CipherError> {
        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(&self.bytes[..]);
        let info = [HKDF_INFO];
        let okm = prk
            .expand(&info, &AES_256_GCM)
            .map_err(|_| CipherError::Derive)?;
        let unbound: UnboundKey = okm.into();
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext` into a fresh envelope bound to `aad`.
    pub fn seal(&self, rng: &SystemRandom, aad: &[u8], plaintext: &[u8]) -> Result<Envelope, CipherError> {
        let mut salt = [0u8; SALT_SIZE];
        rng.fill(&mut salt).map_err(|_| CipherError::Rng)?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce_bytes).map_err(|_| CipherError::Rng)?;

        let key = self.derive(&salt)?;

        let mut buffer = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
        buffer.extend_from_slice(&nonce_bytes);
        let mut body = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut body,
        )
        .map_err(|_| CipherError::Seal)?;
        buffer.extend_from_slice(&body);

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(Envelope {
            ciphertext: b64.encode(&buffer),
            derivation_salt: b64.encode(salt),
        })
    }

    /// Decrypt an envelope sealed with `seal` under the same `aad`.
    pub fn open(&self, aad: &[u8], envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let salt = b64
            .decode(&envelope.derivation_salt)
            .map_err(|e| CipherError::Malformed(format!("salt: {}", e)))?;
        let raw = b64
            .decode(&envelope.ciphertext)
            .map_err(|e| CipherError::Malformed(format!("ciphertext: {}", e)))?;

        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Malformed("ciphertext too short".to_string()));
        }

        let (nonce_part, sealed) = raw.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce_part);

        let key = self.derive(&salt)?;
        let mut body = Zeroizing::new(sealed.to_vec());
        let plaintext_len = key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut body[..],
            )
            .map_err(|_| CipherError::Open)?
            .len();

        body.truncate(plaintext_len);
        Ok(body)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("bytes", &"[REDACTED]").finish()
    }
}
