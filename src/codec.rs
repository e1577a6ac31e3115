//! Authenticated encryption for frame payloads.
//!
//! AES-256-GCM with an internally serialised nonce counter rather than a
//! random per-call nonce: uniqueness only needs to hold for the key's
//! lifetime, and a counter is simpler to reason about than tracking a
//! collision-probability budget for random 96-bit nonces over a long-lived
//! control channel.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::constants::{AUTH_KEY_SIZE, MAX_MESSAGE_SIZE, NONCE_SIZE};
use crate::errors::CodecError;

/// Domain-separation string for HKDF key derivation. Bumping this value
/// invalidates every previously derived key, which is the intended
/// behaviour for a protocol version bump.
const HKDF_INFO: &[u8] = b"linkcore/auth-key/v1";

/// A 32-byte symmetric key derived from a paired daemon's `master_secret`
/// for the current session. Exclusively owned by a [`Codec`]; zeroed on
/// drop.
#[derive(Clone)]
pub struct AuthKey(Box<[u8; AUTH_KEY_SIZE]>);

impl AuthKey {
    /// Derive a session [`AuthKey`] from a 32-byte `master_secret` using
    /// HKDF-SHA256, salted with `device_id`.
    #[must_use]
    pub fn derive(master_secret: &[u8; 32], device_id: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(device_id.as_bytes()), master_secret);
        let mut out = [0u8; AUTH_KEY_SIZE];
        hk.expand(HKDF_INFO, &mut out)
            .expect("32 is a valid HKDF-SHA256 output length");
        Self(Box::new(out))
    }

    /// Wrap an already-derived 32-byte key verbatim.
    #[must_use]
    pub fn from_bytes(bytes: [u8; AUTH_KEY_SIZE]) -> Self {
        Self(Box::new(bytes))
    }

    fn as_bytes(&self) -> &[u8; AUTH_KEY_SIZE] {
        &self.0
    }

    /// Copy out the raw key bytes, e.g. to hand a strategy a plain array for
    /// a transport-level handshake (LAN HMAC proof, Tailscale auth token)
    /// that isn't itself an AEAD [`Codec`] key.
    #[must_use]
    pub fn to_array(&self) -> [u8; AUTH_KEY_SIZE] {
        *self.0
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthKey").field(&"<redacted>").finish()
    }
}

impl Drop for AuthKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Authenticated encryption over an [`AuthKey`].
///
/// `encode`/`decode` may be called concurrently; the outbound nonce counter
/// is serialised internally via an atomic increment, so no external
/// synchronisation is required.
pub struct Codec {
    key: AuthKey,
    next_nonce: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Codec {
    /// Construct a codec that defensively copies `key`.
    #[must_use]
    pub fn new(key: AuthKey) -> Self {
        Self {
            key,
            next_nonce: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext||tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLarge`] if `plaintext` exceeds
    /// [`MAX_MESSAGE_SIZE`], or [`CodecError::Closed`] if the codec has
    /// already been closed.
    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CodecError::Closed);
        }
        if plaintext.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge {
                size: plaintext.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes())
            .expect("AuthKey is always exactly 32 bytes");

        let counter = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let nonce_bytes = Self::nonce_from_counter(counter);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CodecError::Malformed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob previously produced by [`Codec::encode`] (by any
    /// codec sharing the same key — the nonce travels with the frame).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the blob is shorter than a
    /// nonce, [`CodecError::TooLarge`] if the implied plaintext would
    /// exceed the limit, [`CodecError::AuthenticationFailed`] if AEAD
    /// verification fails, or [`CodecError::Closed`] if the codec has
    /// already been closed.
    pub fn decode(&self, blob: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CodecError::Closed);
        }
        if blob.len() < NONCE_SIZE {
            return Err(CodecError::Malformed);
        }
        if blob.len() > MAX_MESSAGE_SIZE + NONCE_SIZE + 16 {
            return Err(CodecError::TooLarge {
                size: blob.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes())
            .expect("AuthKey is always exactly 32 bytes");

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CodecError::AuthenticationFailed)
    }

    /// Zero the key in place. Idempotent; safe to call more than once.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        // AuthKey zeroes itself on Drop, but closing should be observable
        // immediately rather than only at scope exit.
        let bytes: &mut [u8; AUTH_KEY_SIZE] = &mut self.key.0;
        bytes.zeroize();
    }

    /// Whether the key buffer is currently all-zero (test/invariant hook).
    #[must_use]
    pub fn key_is_zeroed(&self) -> bool {
        self.key.as_bytes().iter().all(|&b| b == 0)
    }

    fn nonce_from_counter(counter: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}
