//! Concrete encryption schemes backing the onion layers.
//!
//! All primitives are pure with respect to their explicit key arguments;
//! none keep hidden global state. Shared block-cipher plumbing (CBC
//! chaining, the pad-always padding discipline, salt-derived IVs) lives
//! here; each scheme has its own submodule.

pub mod det;
pub mod ecjoin;
pub mod ope;
pub mod paillier;
pub mod rnd;
pub mod swp;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use blowfish::Blowfish;

use crate::error::Error;

/// AES block size in bytes.
pub const BLOCK_BYTES: usize = 16;

pub(crate) fn aes128(key: &[u8]) -> Result<Aes128, Error> {
    Aes128::new_from_slice(key)
        .map_err(|_| Error::crypto(format!("AES key must be 16 bytes, got {}", key.len())))
}

/// Blowfish carries the 64-bit integer paths: its 8-byte block keeps
/// integer ciphertexts inside one `BIGINT` column.
pub(crate) fn bf_cipher(key: &[u8]) -> Result<Blowfish, Error> {
    Blowfish::new_from_slice(key)
        .map_err(|_| Error::crypto(format!("Blowfish key length {} out of range", key.len())))
}

pub(crate) fn bf_encrypt_u64(cipher: &Blowfish, v: u64) -> u64 {
    let mut ga = GenericArray::from(v.to_be_bytes());
    cipher.encrypt_block(&mut ga);
    u64::from_be_bytes(ga.into())
}

pub(crate) fn bf_decrypt_u64(cipher: &Blowfish, v: u64) -> u64 {
    let mut ga = GenericArray::from(v.to_be_bytes());
    cipher.decrypt_block(&mut ga);
    u64::from_be_bytes(ga.into())
}

/// 16-byte IV from a 64-bit per-row salt: little-endian salt bytes,
/// zero-extended.
pub(crate) fn salt_iv(salt: u64) -> [u8; BLOCK_BYTES] {
    let mut iv = [0u8; BLOCK_BYTES];
    iv[..8].copy_from_slice(&salt.to_le_bytes());
    iv
}

/// Pads to a whole number of `BLOCK_BYTES` blocks, always adding at least
/// one byte: a full extra block when the input is already aligned. Pad
/// bytes are zero except the last, which holds the pad count.
pub(crate) fn pad(data: &[u8]) -> Vec<u8> {
    let rem = data.len() % BLOCK_BYTES;
    let padding = if rem == 0 { BLOCK_BYTES } else { BLOCK_BYTES - rem };
    let mut out = vec![0u8; data.len() + padding];
    out[..data.len()].copy_from_slice(data);
    out[data.len() + padding - 1] = u8::try_from(padding).expect("padding is at most 16");
    out
}

/// Inverse of [`pad`].
pub(crate) fn unpad(data: &[u8]) -> Result<Vec<u8>, Error> {
    let Some(&count) = data.last() else {
        return Err(Error::crypto("cannot unpad empty buffer"));
    };
    let count = count as usize;
    if count == 0 || count > BLOCK_BYTES || count > data.len() {
        return Err(Error::crypto(format!("invalid padding count {count}")));
    }
    Ok(data[..data.len() - count].to_vec())
}

pub(crate) fn check_block_aligned(ct: &[u8]) -> Result<(), Error> {
    if ct.is_empty() || ct.len() % BLOCK_BYTES != 0 {
        return Err(Error::crypto(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_BYTES}",
            ct.len()
        )));
    }
    Ok(())
}

/// CBC encryption over whole blocks. The input must already be padded.
pub(crate) fn cbc_encrypt(cipher: &Aes128, iv: [u8; BLOCK_BYTES], data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() % BLOCK_BYTES == 0);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = iv;
    for chunk in data.chunks_exact(BLOCK_BYTES) {
        let mut block = [0u8; BLOCK_BYTES];
        for (b, (c, p)) in block.iter_mut().zip(chunk.iter().zip(prev.iter())) {
            *b = c ^ p;
        }
        let mut ga = GenericArray::from(block);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        out.extend_from_slice(&ga);
    }
    out
}

/// CBC decryption over whole blocks.
pub(crate) fn cbc_decrypt(
    cipher: &Aes128,
    iv: [u8; BLOCK_BYTES],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    check_block_aligned(data)?;
    let mut out = Vec::with_capacity(data.len());
    let mut prev = iv;
    for chunk in data.chunks_exact(BLOCK_BYTES) {
        let mut ga = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut ga);
        for (b, p) in ga.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        out.extend_from_slice(&ga);
        prev.copy_from_slice(chunk);
    }
    Ok(out)
}
