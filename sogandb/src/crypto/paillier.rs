//! HOM: additively homomorphic encryption (Paillier) for the AGG onion.
//!
//! Key generation picks two primes of a quarter of the nominal bit length,
//! so the nominal length is the size of `N²` — and therefore of every
//! ciphertext. The product of two ciphertexts decrypts to the sum of their
//! plaintexts mod `N`; the backend aggregator only needs `N²`, which is
//! public.
//!
//! The API exposes signed 64-bit integers; negatives live in the top half
//! of the plaintext space `[0, N)`.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::Rng;

use crate::error::Error;

/// Nominal `|N²|` size in bits used by the engine unless configured
/// otherwise.
pub const DEFAULT_MODULUS_BITS: u64 = 1024;

/// Miller–Rabin rounds; 2⁻⁸⁰ error at 40 rounds is far below the key
/// failure rates that matter here.
const MR_ROUNDS: u32 = 40;

/// A Paillier keypair. The private parts (`λ`, `μ`) never leave this
/// struct; `N` and `N²` are public.
pub struct Paillier {
    n: BigUint,
    n2: BigUint,
    g: BigUint,
    lambda: BigUint,
    mu: BigUint,
    ct_len: usize,
}

impl Paillier {
    /// Generates a keypair with primes of `modulus_bits / 4` bits.
    ///
    /// Generation is a pure function of the RNG stream, so a caller seeding
    /// the RNG from the master secret reproduces the same keypair across
    /// restarts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if `modulus_bits` is too small to hold
    /// 64-bit plaintexts with headroom.
    pub fn generate<R: Rng>(modulus_bits: u64, rng: &mut R) -> Result<Self, Error> {
        if modulus_bits < 256 {
            return Err(Error::crypto(format!(
                "Paillier modulus of {modulus_bits} bits cannot hold 64-bit plaintexts"
            )));
        }
        let prime_bits = modulus_bits / 4;
        let p = gen_prime(prime_bits, rng);
        let q = loop {
            let q = gen_prime(prime_bits, rng);
            if q != p {
                break q;
            }
        };

        let n = &p * &q;
        let n2 = &n * &n;
        let one = BigUint::one();
        let lambda = (&p - &one).lcm(&(&q - &one));

        // A generator is any g whose L(g^λ mod N²) is invertible mod N.
        let (g, mu) = loop {
            let g = rng.gen_biguint(modulus_bits) % &n2;
            if g.is_zero() {
                continue;
            }
            let l = l_function(&g.modpow(&lambda, &n2), &n);
            if let Some(mu) = mod_inverse(&l, &n) {
                break (g, mu);
            }
        };

        let ct_len = usize::try_from((n2.bits() + 7) / 8).expect("modulus fits in memory");
        Ok(Self { n, n2, g, lambda, mu, ct_len })
    }

    /// The public modulus `N`.
    #[must_use]
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// The public `N²`, big-endian. The rewriter embeds this in SQL calls
    /// to the backend aggregator.
    #[must_use]
    pub fn modulus_squared_bytes(&self) -> Vec<u8> {
        self.n2.to_bytes_be()
    }

    /// Fixed ciphertext size in bytes (`|N²|`).
    #[must_use]
    pub fn ciphertext_len(&self) -> usize {
        self.ct_len
    }

    /// Encrypts a residue in `[0, N)` with fresh randomness from `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if `m >= N`.
    pub fn encrypt_with<R: Rng>(&self, m: &BigUint, rng: &mut R) -> Result<Vec<u8>, Error> {
        if m >= &self.n {
            return Err(Error::crypto("Paillier plaintext out of range"));
        }
        let r = loop {
            let r = rng.gen_biguint_below(&self.n);
            if !r.is_zero() {
                break r;
            }
        };
        let c = (self.g.modpow(m, &self.n2) * r.modpow(&self.n, &self.n2)) % &self.n2;
        Ok(self.to_fixed_bytes(&c))
    }

    /// Encrypts a signed 64-bit plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on randomness or range failure.
    pub fn encrypt_i64<R: Rng>(&self, m: i64, rng: &mut R) -> Result<Vec<u8>, Error> {
        let residue = if m >= 0 {
            BigUint::from(m.unsigned_abs())
        } else {
            &self.n - BigUint::from(m.unsigned_abs())
        };
        self.encrypt_with(&residue, rng)
    }

    /// Decrypts to a residue in `[0, N)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the ciphertext has the wrong length or
    /// is not a valid residue.
    pub fn decrypt(&self, ct: &[u8]) -> Result<BigUint, Error> {
        if ct.len() != self.ct_len {
            return Err(Error::crypto(format!(
                "Paillier ciphertext must be {} bytes, got {}",
                self.ct_len,
                ct.len()
            )));
        }
        let c = BigUint::from_bytes_be(ct);
        if c >= self.n2 {
            return Err(Error::crypto("Paillier ciphertext exceeds modulus"));
        }
        let l = l_function(&c.modpow(&self.lambda, &self.n2), &self.n);
        Ok((l * &self.mu) % &self.n)
    }

    /// Decrypts to a signed 64-bit plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the decrypted residue does not fit an
    /// `i64` under the signed mapping.
    pub fn decrypt_i64(&self, ct: &[u8]) -> Result<i64, Error> {
        let m = self.decrypt(ct)?;
        let half = &self.n >> 1;
        if m <= half {
            m.to_i64().ok_or_else(|| Error::crypto("Paillier plaintext exceeds i64"))
        } else {
            let neg = &self.n - m;
            let v = neg.to_i64().ok_or_else(|| Error::crypto("Paillier plaintext exceeds i64"))?;
            Ok(-v)
        }
    }

    /// Homomorphic addition: multiplies two ciphertexts mod `N²`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on malformed inputs.
    pub fn add(&self, a: &[u8], b: &[u8]) -> Result<Vec<u8>, Error> {
        if a.len() != self.ct_len || b.len() != self.ct_len {
            return Err(Error::crypto("Paillier ciphertext length mismatch"));
        }
        let product = (BigUint::from_bytes_be(a) * BigUint::from_bytes_be(b)) % &self.n2;
        Ok(self.to_fixed_bytes(&product))
    }

    fn to_fixed_bytes(&self, v: &BigUint) -> Vec<u8> {
        let raw = v.to_bytes_be();
        let mut out = vec![0u8; self.ct_len];
        out[self.ct_len - raw.len()..].copy_from_slice(&raw);
        out
    }
}

fn l_function(u: &BigUint, n: &BigUint) -> BigUint {
    (u - BigUint::one()) / n
}

fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let n_int = BigInt::from(n.clone());
    let ext = a.extended_gcd(&n_int);
    if !ext.gcd.is_one() {
        return None;
    }
    let mut x = ext.x % &n_int;
    if x.is_negative() {
        x += &n_int;
    }
    x.to_biguint()
}

/// Generates a probable prime of exactly `bits` bits.
fn gen_prime<R: Rng>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

fn is_probable_prime<R: Rng>(n: &BigUint, rng: &mut R) -> bool {
    for sp in SMALL_PRIMES {
        let sp = BigUint::from(sp);
        if n == &sp {
            return true;
        }
        if (n % &sp).is_zero() {
            return false;
        }
    }

    // Miller-Rabin: n - 1 = d * 2^s with d odd.
    let one = BigUint::one();
    let two = &one + &one;
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..MR_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    // Small modulus keeps keygen fast; 256 bits still fits i64 plaintexts.
    fn keypair() -> Paillier {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        Paillier::generate(256, &mut rng).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        for m in [0i64, 1, 42, 1_000_000, i64::MAX, -1, -42, i64::MIN + 1] {
            let ct = pk.encrypt_i64(m, &mut rng).unwrap();
            assert_eq!(ct.len(), pk.ciphertext_len());
            assert_eq!(pk.decrypt_i64(&ct).unwrap(), m);
        }
    }

    #[test]
    fn test_encryption_is_randomized() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        let c1 = pk.encrypt_i64(5, &mut rng).unwrap();
        let c2 = pk.encrypt_i64(5, &mut rng).unwrap();
        assert_ne!(c1, c2);
        assert_eq!(pk.decrypt_i64(&c1).unwrap(), pk.decrypt_i64(&c2).unwrap());
    }

    #[test]
    fn test_homomorphic_addition() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        let ca = pk.encrypt_i64(10, &mut rng).unwrap();
        let cb = pk.encrypt_i64(32, &mut rng).unwrap();
        let sum = pk.add(&ca, &cb).unwrap();
        assert_eq!(pk.decrypt_i64(&sum).unwrap(), 42);
    }

    #[test]
    fn test_adding_zero_many_times_is_identity() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        let mut acc = pk.encrypt_i64(7, &mut rng).unwrap();
        for _ in 0..5 {
            let zero = pk.encrypt_i64(0, &mut rng).unwrap();
            acc = pk.add(&acc, &zero).unwrap();
        }
        assert_eq!(pk.decrypt_i64(&acc).unwrap(), 7);
    }

    #[test]
    fn test_negative_sums() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        let ca = pk.encrypt_i64(10, &mut rng).unwrap();
        let cb = pk.encrypt_i64(-32, &mut rng).unwrap();
        let sum = pk.add(&ca, &cb).unwrap();
        assert_eq!(pk.decrypt_i64(&sum).unwrap(), -22);
    }

    #[test]
    fn test_keygen_is_deterministic_per_seed() {
        let mut r1 = ChaCha20Rng::seed_from_u64(99);
        let mut r2 = ChaCha20Rng::seed_from_u64(99);
        let pk1 = Paillier::generate(256, &mut r1).unwrap();
        let pk2 = Paillier::generate(256, &mut r2).unwrap();
        assert_eq!(pk1.modulus(), pk2.modulus());
        assert_eq!(pk1.modulus_squared_bytes(), pk2.modulus_squared_bytes());
    }

    #[test]
    fn test_rejects_wrong_length_ciphertext() {
        let pk = keypair();
        assert!(pk.decrypt(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_rejects_tiny_modulus() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        assert!(Paillier::generate(128, &mut rng).is_err());
    }

    #[test]
    fn test_out_of_range_plaintext_rejected() {
        let pk = keypair();
        let mut rng = rand::thread_rng();
        let too_big = pk.modulus().clone();
        assert!(pk.encrypt_with(&too_big, &mut rng).is_err());
    }
}
