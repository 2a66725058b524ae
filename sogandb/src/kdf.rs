//! Per-field key derivation from the master secret.
//!
//! Every (column, layer) pair gets its own 128-bit subkey, derived as
//! `AES(master, SHA1(label ‖ level))` where the label is the anonymized
//! onion name (or the literal `"join"` for the cross-column equivalence
//! key). Keys are never stored: holders keep the label and re-derive on
//! demand.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use hkdf::Hkdf;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use secrecy::{ExposeSecret, SecretVec};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::onion::SecLevel;

/// Master key size in bytes (128 bits).
pub const MASTER_KEY_SIZE: usize = 16;

/// Derived layer key size in bytes (128 bits).
pub const LAYER_KEY_SIZE: usize = 16;

/// Label of the process-wide join-equivalence key. Two columns are
/// join-compatible at the DET-JOIN level iff both derive their innermost
/// deterministic key from this label.
pub const JOIN_LABEL: &str = "join";

/// The provisioned master secret.
///
/// Created once at startup from a 16-byte secret with full entropy, owned
/// by the crypto manager, and zeroized on drop (via [`SecretVec`]).
pub struct MasterKey {
    key: SecretVec<u8>,
}

impl MasterKey {
    /// Wraps a provisioned master secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the secret is not exactly
    /// [`MASTER_KEY_SIZE`] bytes.
    pub fn new(key: SecretVec<u8>) -> Result<Self, Error> {
        if key.expose_secret().len() != MASTER_KEY_SIZE {
            return Err(Error::crypto(format!(
                "master key must be {MASTER_KEY_SIZE} bytes, got {}",
                key.expose_secret().len()
            )));
        }
        Ok(Self { key })
    }

    /// Derives the subkey for one (label, level) pair.
    ///
    /// Derivation is `AES(master, SHA1(label ‖ level_tag))`, truncating the
    /// digest to one AES block. Deterministic: the same label and level
    /// always yield the same subkey.
    #[must_use]
    pub fn derive_layer_key(&self, label: &str, level: SecLevel) -> SecretVec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(label.as_bytes());
        hasher.update(level.key_tag().to_string().as_bytes());
        let digest = hasher.finalize();

        let cipher = Aes128::new_from_slice(self.key.expose_secret())
            .expect("master key length checked at construction");
        let mut block = [0u8; LAYER_KEY_SIZE];
        block.copy_from_slice(&digest[..LAYER_KEY_SIZE]);
        let mut ga = aes::cipher::generic_array::GenericArray::from(block);
        cipher.encrypt_block(&mut ga);

        SecretVec::new(ga.to_vec())
    }

    /// Derives a 16-byte subkey for a named purpose via HKDF-SHA256.
    ///
    /// This covers key material outside the (label, level) grid — the
    /// EC-join scalars and the shared plaintext PRF — with the purpose
    /// string as the HKDF info parameter for domain separation.
    #[must_use]
    pub fn derive_subkey(&self, info: &str) -> SecretVec<u8> {
        let hk = Hkdf::<Sha256>::new(None, self.key.expose_secret());
        let mut okm = Zeroizing::new([0u8; LAYER_KEY_SIZE]);
        hk.expand(info.as_bytes(), &mut *okm)
            .expect("16 bytes is a valid HKDF-SHA256 output length");
        SecretVec::new(okm.to_vec())
    }

    /// A deterministic RNG for key generation, seeded from the master
    /// secret and a purpose string via HKDF-SHA256.
    ///
    /// The Paillier keypair (and anything else generated through this) is
    /// therefore a pure function of the master secret, so a restart with
    /// the same secret reproduces the same keys.
    #[must_use]
    pub fn keygen_rng(&self, purpose: &str) -> ChaCha20Rng {
        let hk = Hkdf::<Sha256>::new(None, self.key.expose_secret());
        let mut seed = [0u8; 32];
        hk.expand(purpose.as_bytes(), &mut seed)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        ChaCha20Rng::from_seed(seed)
    }
}
