//! Reference implementations of the backend UDF contract.
//!
//! A deployment loads these as DBMS plugins; here they are plain functions
//! so the engine's peel directives and aggregate rewrites can be exercised
//! end-to-end without a database. Signatures mirror the plugin surface:
//! ciphertext plus explicit key material, never engine state.

use num_bigint::BigUint;

use crate::crypto::swp::{self, SearchToken};
use crate::crypto::{det, rnd};
use crate::error::Error;

/// `decrypt_int_sem(ct, key, salt)`: strips the randomized shell of an
/// integer onion.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on a bad key.
pub fn decrypt_int_sem(ct: u64, key: &[u8], salt: u64) -> Result<u64, Error> {
    rnd::decrypt_int(key, ct, salt)
}

/// `decrypt_int_det(ct, key, shift)`: strips one deterministic integer
/// layer.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on a bad key.
pub fn decrypt_int_det(ct: u64, key: &[u8], shift: u64) -> Result<u64, Error> {
    det::decrypt_int(key, ct, shift)
}

/// `encrypt_int_det(pt, key)`: the inverse direction, used when the
/// rewriter moves a constant up to a column's deterministic level inside
/// SQL.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on a bad key.
pub fn encrypt_int_det(pt: u64, key: &[u8]) -> Result<u64, Error> {
    det::encrypt_int(key, pt, 0)
}

/// `decrypt_text_sem(ct, key, salt)`: strips the randomized shell of a
/// text onion.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on bad key material or ciphertext shape.
pub fn decrypt_text_sem(ct: &[u8], key: &[u8], salt: u64) -> Result<Vec<u8>, Error> {
    rnd::decrypt_text(key, ct, salt)
}

/// `decrypt_text_det(ct, key)`: strips one deterministic text layer.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on bad key material or ciphertext shape.
pub fn decrypt_text_det(ct: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    det::decrypt_text(key, ct)
}

/// `search(word, field)`: length-prefixed word-list scan, the pre-SWP
/// search fallback. `field` is `len ‖ word` repeated; `word` is one
/// `len ‖ body` entry.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on malformed inputs.
pub fn search(word: &[u8], field: &[u8]) -> Result<bool, Error> {
    let (&wlen, body) =
        word.split_first().ok_or_else(|| Error::crypto("search word is empty"))?;
    if body.len() != wlen as usize {
        return Err(Error::crypto("search word length prefix disagrees with its body"));
    }

    let mut i = 0;
    while i < field.len() {
        let cur_len = field[i] as usize;
        let start = i + 1;
        let end = start + cur_len;
        if end > field.len() {
            return Err(Error::crypto("search field is truncated"));
        }
        if cur_len == body.len() && &field[start..end] == body {
            return Ok(true);
        }
        i = end;
    }
    Ok(false)
}

/// `searchSWP(field, ciph, wordKey)`: token-based keyword test over an
/// SWP block list. The token arrives serialized as `x ‖ word key`.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on malformed token or block list.
pub fn search_swp(field: &[u8], token_bytes: &[u8]) -> Result<bool, Error> {
    let token = SearchToken::from_bytes(token_bytes)?;
    swp::search(&token, field)
}

/// The aggregate accumulator behind `agg_init`/`agg_add`/`agg`.
///
/// Multiplies Paillier ciphertexts mod `N²`, which sums their plaintexts.
/// `N²` arrives as an argument of the first `add`, exactly as the SQL
/// aggregate receives it; the accumulator starts at 1, the ciphertext of
/// zero under any randomizer.
#[derive(Debug)]
pub struct PaillierSum {
    sum: BigUint,
    n2: Option<BigUint>,
}

impl Default for PaillierSum {
    fn default() -> Self {
        Self::new()
    }
}

impl PaillierSum {
    /// `agg_init` / `agg_clear`: a fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self { sum: BigUint::from(1u8), n2: None }
    }

    /// `agg_add`: folds one ciphertext in. A missing cell (SQL NULL)
    /// contributes the neutral 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if `n2` changes between rows.
    pub fn add(&mut self, ct: Option<&[u8]>, n2: &[u8]) -> Result<(), Error> {
        let n2_value = BigUint::from_bytes_be(n2);
        match &self.n2 {
            None => self.n2 = Some(n2_value.clone()),
            Some(existing) if *existing == n2_value => {}
            Some(_) => return Err(Error::crypto("aggregate saw two different moduli")),
        }
        if let Some(ct) = ct {
            self.sum = (&self.sum * BigUint::from_bytes_be(ct)) % &n2_value;
        }
        Ok(())
    }

    /// `agg`: the final ciphertext, zero-padded to `|N²|` bytes.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let len = self.n2.as_ref().map_or(0, |n2| (n2.bits() as usize + 7) / 8);
        let raw = self.sum.to_bytes_be();
        if raw.len() >= len {
            return raw;
        }
        let mut out = vec![0u8; len];
        out[len - raw.len()..].copy_from_slice(&raw);
        out
    }
}

/// `func_add_set(field, val, n2)`: multiplies one stored ciphertext by a
/// ciphertext of the increment — the UPDATE-with-increment path.
///
/// # Errors
///
/// Returns [`Error::Crypto`] on malformed inputs.
pub fn add_set(field: &[u8], val: &[u8], n2: &[u8]) -> Result<Vec<u8>, Error> {
    let n2_value = BigUint::from_bytes_be(n2);
    let product = (BigUint::from_bytes_be(field) * BigUint::from_bytes_be(val)) % &n2_value;
    let len = field.len();
    let raw = product.to_bytes_be();
    if raw.len() > len {
        return Err(Error::crypto("aggregate product exceeds the ciphertext width"));
    }
    let mut out = vec![0u8; len];
    out[len - raw.len()..].copy_from_slice(&raw);
    Ok(out)
}
