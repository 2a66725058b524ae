//! EC-join: deterministic joinable encryption with controlled adjustment.
//!
//! A column with scalar key `k_i` stores `enc_i(x) = k_i · H(PRF(x))` on
//! the Ristretto group. To join column `i` against column `j`, the proxy
//! hands the backend a delta `δ = k_j · k_i⁻¹ mod ord(G)`; multiplying a
//! ciphertext of column `i` by `δ` yields exactly the ciphertext column
//! `j` would have stored for the same plaintext. The delta reveals only
//! that the two columns were linked.
//!
//! The PRF mapping plaintexts onto the curve is keyed by the process-wide
//! join-equivalence key: if each column used its own PRF key, adjusted
//! ciphertexts would land on unrelated points and never match.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::error::Error;

/// Serialized ciphertext size: one compressed Ristretto point.
pub const EC_POINT_BYTES: usize = 32;

/// Per-column scalar key.
#[derive(Clone)]
pub struct JoinScalar(Scalar);

impl JoinScalar {
    /// Derives the scalar from per-column key material.
    #[must_use]
    pub fn from_key_material(key: &[u8]) -> Self {
        Self(Scalar::hash_from_bytes::<Sha512>(key))
    }
}

/// The adjustment key from one column to another.
#[derive(Clone)]
pub struct DeltaKey(Scalar);

impl DeltaKey {
    /// Serializes the delta for the backend UDF.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parses a delta serialized by [`DeltaKey::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the bytes are not a canonical scalar.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let arr: [u8; 32] =
            data.try_into().map_err(|_| Error::crypto("delta key must be 32 bytes"))?;
        Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
            .map(Self)
            .ok_or_else(|| Error::crypto("delta key is not a canonical scalar"))
    }
}

/// The joinable-encryption scheme, keyed by the shared plaintext PRF.
pub struct EcJoin {
    prf_key: [u8; 16],
}

impl EcJoin {
    /// Creates the scheme from the 16-byte join-equivalence key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the key length is wrong.
    pub fn new(shared_prf_key: &[u8]) -> Result<Self, Error> {
        let prf_key: [u8; 16] = shared_prf_key
            .try_into()
            .map_err(|_| Error::crypto("EC-join PRF key must be 16 bytes"))?;
        Ok(Self { prf_key })
    }

    /// Encrypts a plaintext under one column's scalar.
    #[must_use]
    pub fn encrypt(&self, key: &JoinScalar, pt: &[u8]) -> [u8; EC_POINT_BYTES] {
        let point = self.hash_to_point(pt);
        (point * key.0).compress().to_bytes()
    }

    fn hash_to_point(&self, pt: &[u8]) -> RistrettoPoint {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.prf_key).expect("HMAC accepts any key length");
        mac.update(pt);
        let digest = mac.finalize().into_bytes();
        RistrettoPoint::hash_from_bytes::<Sha512>(&digest)
    }
}

/// Computes the delta that rewrites `from`-column ciphertexts into
/// `to`-column ciphertexts. Derived from the two keys alone.
#[must_use]
pub fn delta_key(from: &JoinScalar, to: &JoinScalar) -> DeltaKey {
    DeltaKey(to.0 * from.0.invert())
}

/// Applies a delta to one ciphertext. This is what the backend UDF runs
/// over the joined column.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the ciphertext is not a valid compressed
/// point.
pub fn adjust(delta: &DeltaKey, ct: &[u8]) -> Result<[u8; EC_POINT_BYTES], Error> {
    let compressed = CompressedRistretto::from_slice(ct)
        .map_err(|_| Error::crypto("EC-join ciphertext must be 32 bytes"))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| Error::crypto("EC-join ciphertext is not a curve point"))?;
    Ok((point * delta.0).compress().to_bytes())
}
