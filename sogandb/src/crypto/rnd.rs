//! RND: randomized symmetric encryption, the outermost shell of the DET
//! and OPE onions.
//!
//! Text goes through AES-128-CBC with an IV derived from the per-row salt
//! and pad-always padding, so the ciphertext length is
//! `ceil((len + 1) / 16) * 16`. Integers go through a 64-bit Blowfish
//! block over `pt XOR salt`, so the ciphertext stays one `BIGINT` wide.
//! Two encryptions of the same plaintext under different salts are
//! indistinguishable.

use crate::crypto::{
    aes128, bf_cipher, bf_decrypt_u64, bf_encrypt_u64, cbc_decrypt, cbc_encrypt,
    check_block_aligned, pad, salt_iv, unpad,
};
use crate::error::Error;

/// Encrypts a text value under the per-row salt.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is wrong.
pub fn encrypt_text(key: &[u8], pt: &[u8], salt: u64) -> Result<Vec<u8>, Error> {
    let cipher = aes128(key)?;
    Ok(cbc_encrypt(&cipher, salt_iv(salt), &pad(pt)))
}

/// Decrypts a text value. Fails only when the ciphertext length is not a
/// positive multiple of the block size (or the padding is malformed, which
/// implies a salt or key mismatch).
///
/// # Errors
///
/// Returns [`Error::Crypto`] on key-size or ciphertext-shape violations.
pub fn decrypt_text(key: &[u8], ct: &[u8], salt: u64) -> Result<Vec<u8>, Error> {
    let cipher = aes128(key)?;
    check_block_aligned(ct)?;
    let padded = cbc_decrypt(&cipher, salt_iv(salt), ct)?;
    unpad(&padded)
}

/// Encrypts a 64-bit integer under the per-row salt.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is out of range.
pub fn encrypt_int(key: &[u8], pt: u64, salt: u64) -> Result<u64, Error> {
    let cipher = bf_cipher(key)?;
    Ok(bf_encrypt_u64(&cipher, pt ^ salt))
}

/// Inverse of [`encrypt_int`].
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the key length is out of range.
pub fn decrypt_int(key: &[u8], ct: u64, salt: u64) -> Result<u64, Error> {
    let cipher = bf_cipher(key)?;
    Ok(bf_decrypt_u64(&cipher, ct) ^ salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x11; 16];

    #[test]
    fn test_text_round_trip() {
        for pt in [&b""[..], b"a", b"exactly sixteen!", b"alpha beta gamma delta"] {
            let ct = encrypt_text(&KEY, pt, 77).unwrap();
            assert_eq!(ct.len(), (pt.len() / 16 + 1) * 16);
            assert_eq!(decrypt_text(&KEY, &ct, 77).unwrap(), pt);
        }
    }

    #[test]
    fn test_different_salts_differ() {
        let ct1 = encrypt_text(&KEY, b"same plaintext", 1).unwrap();
        let ct2 = encrypt_text(&KEY, b"same plaintext", 2).unwrap();
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_text_rejects_unaligned_ciphertext() {
        let err = decrypt_text(&KEY, &[0u8; 15], 1).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
        assert!(decrypt_text(&KEY, &[], 1).is_err());
    }

    #[test]
    fn test_int_round_trip() {
        for pt in [0u64, 1, 42, u64::MAX] {
            let ct = encrypt_int(&KEY, pt, 913).unwrap();
            assert_eq!(decrypt_int(&KEY, ct, 913).unwrap(), pt);
        }
    }

    #[test]
    fn test_int_salt_randomizes() {
        assert_ne!(encrypt_int(&KEY, 42, 1).unwrap(), encrypt_int(&KEY, 42, 2).unwrap());
    }
}
