//! # Snapshot Sealing Primitives
//!
//! Cryptographic helpers for the snapshot persistence collaborator:
//!
//! 1. **Key derivation**: passphrase → 256-bit key (BLAKE3 KDF)
//! 2. **Sealing**: AES-256-GCM with a random per-blob nonce
//! 3. **Checksums**: CRC32 over the framed payload for fast corruption
//!    detection independent of encryption

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// Domain-separation context for snapshot keys. Changing it invalidates
/// every previously written encrypted blob.
const KDF_CONTEXT: &str = "kagura snapshot sealing v1";

/// Derive a 256-bit sealing key from a passphrase.
pub fn derive_key(passphrase: &str) -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT, passphrase.as_bytes())
}

/// Short hex fingerprint of a key, safe to log.
pub fn key_fingerprint(key: &[u8; 32]) -> String {
    let digest = blake3::hash(key);
    hex::encode(&digest.as_bytes()[..8])
}

/// Seal a payload: output is `nonce || ciphertext || tag`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| Error::Snapshot {
        message: "failed to construct sealing key".to_string(),
    })?;
    let sealing_key = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| Error::Snapshot {
            message: "failed to generate nonce".to_string(),
        })?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Snapshot {
            message: "sealing failed".to_string(),
        })?;

    let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&in_out);
    Ok(blob)
}

/// Open a sealed payload produced by [`seal`]. Authentication failure
/// (wrong key or tampered blob) reports corruption.
pub fn open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(Error::Corruption {
            details: "sealed blob shorter than nonce".to_string(),
        });
    }
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| Error::Snapshot {
        message: "failed to construct sealing key".to_string(),
    })?;
    let opening_key = LessSafeKey::new(unbound);

    let nonce_bytes: [u8; NONCE_LEN] = blob[..NONCE_LEN].try_into().expect("length checked");
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = blob[NONCE_LEN..].to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Corruption {
            details: "snapshot authentication failed (wrong passphrase or tampered blob)"
                .to_string(),
        })?;
    Ok(plaintext.to_vec())
}

/// CRC32 checksum over a byte slice.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = derive_key("correct horse");
        let sealed = seal(&key, b"snapshot payload").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"snapshot payload".as_slice());
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, b"snapshot payload");
    }

    #[test]
    fn wrong_passphrase_is_corruption() {
        let sealed = seal(&derive_key("alpha"), b"data").unwrap();
        let err = open(&derive_key("beta"), &sealed).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPTION");
    }

    #[test]
    fn tampered_blob_fails_to_open() {
        let key = derive_key("alpha");
        let mut sealed = seal(&key, b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(derive_key("p"), derive_key("p"));
        assert_ne!(derive_key("p"), derive_key("q"));
        assert_eq!(key_fingerprint(&derive_key("p")).len(), 16);
    }

    #[test]
    fn checksum_detects_flips() {
        let base = checksum(b"hello");
        assert_eq!(base, checksum(b"hello"));
        assert_ne!(base, checksum(b"hellp"));
    }
}
