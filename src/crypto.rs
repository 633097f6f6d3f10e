//! Shared-secret key derivation and the authenticated message envelope.
//!
//! Wire layout of one envelope (the encrypted payload inside a frame):
//! - \[0..8\]:   sequence number (little-endian u64)
//! - \[8..24\]:  random IV
//! - \[24..N\]:  AES-256-CBC ciphertext (PKCS#7 padded)
//! - \[N..N+32\]: HMAC-SHA256 tag over everything before it
//!
//! The tag covers the sequence number and IV as well as the ciphertext, so a
//! forger cannot rewind the replay window or splice IVs between envelopes.
//! Verification happens before any decryption.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AES block / IV size in bytes.
pub const IV_SIZE: usize = 16;

/// HMAC-SHA256 tag size in bytes.
pub const TAG_SIZE: usize = 32;

/// Serialized sequence number size in bytes.
pub const SEQ_SIZE: usize = 8;

/// Fixed envelope overhead; a well-formed envelope is strictly longer.
const MIN_ENVELOPE: usize = SEQ_SIZE + IV_SIZE + TAG_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// A derived symmetric key.
pub type Key = [u8; KEY_SIZE];

/// Derive the encryption and MAC keys from the shared secret.
///
/// Both keys are HMAC-SHA256 outputs keyed by the secret itself with fixed
/// labels, so the derivation is a pure function of the secret: the same
/// secret yields the same key pair on every peer.
pub fn derive_keys(secret: &[u8]) -> (Key, Key) {
    (hmac_label(secret, b"ENC"), hmac_label(secret, b"MAC"))
}

fn hmac_label(secret: &[u8], label: &[u8]) -> Key {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(label);
    mac.finalize().into_bytes().into()
}

/// One direction of an encrypted channel.
///
/// Owns the derived keys plus a monotonically increasing sequence counter.
/// A sender stamps `seq` into each envelope and increments it; a receiver
/// treats `seq` as the smallest acceptable incoming value, so replays and
/// reordered stale envelopes are rejected. Each connection uses two
/// contexts, one per direction, both derived from the same secret.
pub struct CryptoContext {
    enc_key: Key,
    mac_key: Key,
    seq: u64,
}

impl CryptoContext {
    pub fn new(enc_key: Key, mac_key: Key) -> Self {
        Self {
            enc_key,
            mac_key,
            seq: 0,
        }
    }

    /// Build a context directly from the shared secret.
    pub fn from_shared_secret(secret: &[u8]) -> Self {
        let (enc_key, mac_key) = derive_keys(secret);
        Self::new(enc_key, mac_key)
    }

    /// Next outgoing sequence number; for a receiver, the smallest
    /// acceptable incoming one.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Encrypt and authenticate one plaintext message.
    ///
    /// Draws a fresh random IV, stamps the next sequence number, then
    /// appends the tag computed over `seq || iv || ciphertext`.
    pub fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.enc_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let seq = self.seq;
        self.seq += 1;

        let mut envelope = Vec::with_capacity(MIN_ENVELOPE + ciphertext.len());
        envelope.extend_from_slice(&seq.to_le_bytes());
        envelope.extend_from_slice(&iv);
        envelope.extend_from_slice(&ciphertext);

        let tag = self.tag_over(&envelope);
        envelope.extend_from_slice(&tag);
        envelope
    }

    /// Verify and decrypt one envelope.
    ///
    /// The tag is compared in constant time and checked before anything is
    /// decrypted. On success the replay window advances to `seq + 1`:
    /// sequence gaps are accepted, but any skipped-over number is then
    /// permanently rejected.
    pub fn open(&mut self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if envelope.len() < MIN_ENVELOPE {
            return Err(CryptoError::TooShort(envelope.len()));
        }
        if envelope.len() == MIN_ENVELOPE {
            return Err(CryptoError::EmptyCiphertext);
        }

        let (authed, received_tag) = envelope.split_at(envelope.len() - TAG_SIZE);
        let expected_tag = self.tag_over(authed);
        if !bool::from(expected_tag.ct_eq(received_tag)) {
            return Err(CryptoError::BadTag);
        }

        let mut seq_bytes = [0u8; SEQ_SIZE];
        seq_bytes.copy_from_slice(&envelope[..SEQ_SIZE]);
        let seq = u64::from_le_bytes(seq_bytes);
        if seq < self.seq {
            return Err(CryptoError::StaleSequence {
                received: seq,
                expected: self.seq,
            });
        }
        self.seq = seq + 1;

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&envelope[SEQ_SIZE..SEQ_SIZE + IV_SIZE]);
        let ciphertext = &authed[SEQ_SIZE + IV_SIZE..];

        Aes256CbcDec::new(&self.enc_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)
    }

    fn tag_over(&self, data: &[u8]) -> [u8; TAG_SIZE] {
        let mut mac =
            HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

impl std::fmt::Debug for CryptoContext {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext").field("seq", &self.seq).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_shared_secret_32bytes_or_more";
    const PLAINTEXT: &[u8] = b"Hello, World! This is a secret message.";

    fn pair() -> (CryptoContext, CryptoContext) {
        (
            CryptoContext::from_shared_secret(SECRET),
            CryptoContext::from_shared_secret(SECRET),
        )
    }

    #[test]
    fn test_roundtrip() {
        let (mut sender, mut receiver) = pair();

        let envelope = sender.seal(PLAINTEXT);
        let decrypted = receiver.open(&envelope).unwrap();

        assert_eq!(decrypted, PLAINTEXT);
        assert_eq!(receiver.seq(), 1);
    }

    #[test]
    fn test_envelope_layout() {
        let (mut sender, _) = pair();

        // 39 bytes of plaintext pad to 48; total = 8 + 16 + 48 + 32.
        let envelope = sender.seal(PLAINTEXT);
        assert_eq!(envelope.len(), 104);

        // Sequence number is serialized little-endian.
        assert_eq!(&envelope[..SEQ_SIZE], &0u64.to_le_bytes()[..]);
        let second = sender.seal(PLAINTEXT);
        assert_eq!(&second[..SEQ_SIZE], &1u64.to_le_bytes()[..]);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut sender, mut receiver) = pair();

        let envelope = sender.seal(PLAINTEXT);
        receiver.open(&envelope).unwrap();

        let err = receiver.open(&envelope).unwrap_err();
        assert_eq!(
            err,
            CryptoError::StaleSequence {
                received: 0,
                expected: 1
            }
        );
        // The failed attempt must not advance the window.
        assert_eq!(receiver.seq(), 1);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let (mut sender, mut receiver) = pair();

        let frames: Vec<_> = (0..3).map(|_| sender.seal(PLAINTEXT)).collect();

        assert!(receiver.open(&frames[1]).is_ok());
        assert!(receiver.open(&frames[2]).is_ok());
        assert!(receiver.open(&frames[0]).is_err());
    }

    #[test]
    fn test_sequence_gap_allowed() {
        let (mut sender, mut receiver) = pair();

        let first = sender.seal(b"one");
        sender.seal(b"dropped");
        let third = sender.seal(b"three");

        assert!(receiver.open(&first).is_ok());
        assert!(receiver.open(&third).is_ok());
        assert_eq!(receiver.seq(), 3);
    }

    #[test]
    fn test_bit_flip_detected() {
        let (mut sender, _) = pair();
        let envelope = sender.seal(PLAINTEXT);

        // Offsets inside seq, iv, ciphertext, and tag respectively.
        for offset in [0, 10, 40, envelope.len() - 1] {
            let mut receiver = CryptoContext::from_shared_secret(SECRET);
            let mut tampered = envelope.clone();
            tampered[offset] ^= 0x01;
            assert_eq!(receiver.open(&tampered).unwrap_err(), CryptoError::BadTag);
        }
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut receiver = CryptoContext::from_shared_secret(SECRET);
        let err = receiver.open(&[0u8; 20]).unwrap_err();
        assert_eq!(err, CryptoError::TooShort(20));
    }

    #[test]
    fn test_empty_ciphertext_rejected() {
        let mut receiver = CryptoContext::from_shared_secret(SECRET);
        let err = receiver.open(&[0u8; SEQ_SIZE + IV_SIZE + TAG_SIZE]).unwrap_err();
        assert_eq!(err, CryptoError::EmptyCiphertext);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut sender = CryptoContext::from_shared_secret(SECRET);
        let mut receiver = CryptoContext::from_shared_secret(b"a_completely_different_secret");

        let envelope = sender.seal(PLAINTEXT);
        assert_eq!(receiver.open(&envelope).unwrap_err(), CryptoError::BadTag);
    }

    #[test]
    fn test_kdf_deterministic() {
        let (enc1, mac1) = derive_keys(SECRET);
        let (enc2, mac2) = derive_keys(SECRET);
        assert_eq!(enc1, enc2);
        assert_eq!(mac1, mac2);

        // Distinct labels give distinct keys.
        assert_ne!(enc1, mac1);

        let (other_enc, other_mac) = derive_keys(b"another secret");
        assert_ne!(enc1, other_enc);
        assert_ne!(mac1, other_mac);
    }
}
