//! DET: deterministic symmetric encryption for equality queries.
//!
//! Text goes through CMC mode: CBC with a fixed all-zero IV, a block
//! reversal, then CBC again, so every ciphertext block depends on every
//! plaintext block and equal plaintexts collide — which is the point.
//! Integers go through a single Blowfish block over `pt + shift`.
//!
//! The same construction serves both the per-column DET level and the
//! DET-JOIN level; joinability across two columns holds iff they share the
//! join-equivalence key.

use crate::crypto::{
    aes128, bf_cipher, bf_decrypt_u64, bf_encrypt_u64, cbc_decrypt, cbc_encrypt,
    check_block_aligned, pad, unpad, BLOCK_BYTES,
};
use crate::error::Error;

const ZERO_IV: [u8; BLOCK_BYTES] = [0u8; BLOCK_BYTES];

fn reverse_blocks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(BLOCK_BYTES).rev() {
        out.extend_from_slice(chunk);
    }
    out
}

/// Deterministically encrypts a text value.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is wrong.
pub fn encrypt_text(key: &[u8], pt: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = aes128(key)?;
    let first = cbc_encrypt(&cipher, ZERO_IV, &pad(pt));
    Ok(cbc_encrypt(&cipher, ZERO_IV, &reverse_blocks(&first)))
}

/// Inverse of [`encrypt_text`].
///
/// # Errors
///
/// Returns [`Error::Crypto`] on key-size or ciphertext-shape violations.
pub fn decrypt_text(key: &[u8], ct: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = aes128(key)?;
    check_block_aligned(ct)?;
    let first = cbc_decrypt(&cipher, ZERO_IV, ct)?;
    let padded = cbc_decrypt(&cipher, ZERO_IV, &reverse_blocks(&first))?;
    unpad(&padded)
}

/// Deterministically encrypts a 64-bit integer. The engine uses shift 0;
/// the parameter exists because the backend UDF contract carries it.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is out of range.
pub fn encrypt_int(key: &[u8], pt: u64, shift: u64) -> Result<u64, Error> {
    let cipher = bf_cipher(key)?;
    Ok(bf_encrypt_u64(&cipher, pt.wrapping_add(shift)))
}

/// Inverse of [`encrypt_int`].
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is out of range.
pub fn decrypt_int(key: &[u8], ct: u64, shift: u64) -> Result<u64, Error> {
    let cipher = bf_cipher(key)?;
    Ok(bf_decrypt_u64(&cipher, ct).wrapping_sub(shift))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x22; 16];

    #[test]
    fn test_text_is_deterministic() {
        let ct1 = encrypt_text(&KEY, b"alice@example.com").unwrap();
        let ct2 = encrypt_text(&KEY, b"alice@example.com").unwrap();
        assert_eq!(ct1, ct2);
    }

    #[test]
    fn test_text_round_trip_exact() {
        // Quote characters must survive: no stripping anywhere.
        for pt in [&b""[..], b"o'brien", b"multi block plaintext that spans a few"] {
            let ct = encrypt_text(&KEY, pt).unwrap();
            assert_eq!(decrypt_text(&KEY, &ct).unwrap(), pt);
        }
    }

    #[test]
    fn test_text_different_keys_differ() {
        let other = [0x23; 16];
        assert_ne!(
            encrypt_text(&KEY, b"payload").unwrap(),
            encrypt_text(&other, b"payload").unwrap()
        );
    }

    #[test]
    fn test_first_block_diffusion() {
        // CMC makes the first ciphertext block depend on the whole
        // plaintext, unlike plain CBC.
        let ct1 = encrypt_text(&KEY, b"0123456789abcdefX").unwrap();
        let ct2 = encrypt_text(&KEY, b"0123456789abcdefY").unwrap();
        assert_ne!(ct1[..BLOCK_BYTES], ct2[..BLOCK_BYTES]);
    }

    #[test]
    fn test_int_round_trip_with_shift() {
        for shift in [0u64, 5, 1 << 40] {
            let ct = encrypt_int(&KEY, 42, shift).unwrap();
            assert_eq!(decrypt_int(&KEY, ct, shift).unwrap(), 42);
        }
    }

    #[test]
    fn test_int_is_deterministic() {
        assert_eq!(encrypt_int(&KEY, 42, 0).unwrap(), encrypt_int(&KEY, 42, 0).unwrap());
        assert_ne!(encrypt_int(&KEY, 42, 0).unwrap(), encrypt_int(&KEY, 43, 0).unwrap());
    }
}
