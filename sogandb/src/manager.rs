//! The crypto manager: owns the master secret, resolves per-layer keys,
//! and drives level-to-level transformations.
//!
//! A transformation request names a field type, a key label, and a pair of
//! levels on one onion. Decryption applies each layer's inverse from the
//! top down; encryption wraps layer by layer from just above the starting
//! level. Every step is a table lookup into the per-level layer builders —
//! there is no per-case branching beyond the layer dispatch itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use secrecy::{ExposeSecret, SecretVec};
use tracing::{debug, info};

use crate::crypto::ecjoin::{self, DeltaKey, EcJoin, JoinScalar};
use crate::crypto::paillier::{Paillier, DEFAULT_MODULUS_BITS};
use crate::error::Error;
use crate::kdf::{MasterKey, JOIN_LABEL};
use crate::layer::{EncLayer, LayerStack};
use crate::onion::{next_inner, next_outer, FieldType, SecLevel};
use crate::schema::OnionMeta;
use crate::value::Value;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Nominal Paillier `|N²|` size in bits.
    pub paillier_bits: u64,
    /// Precomputed Paillier encryptions of 1 (the rewriter burns one per
    /// increment-by-one UPDATE).
    pub hom_entries_of_one: usize,
    /// Precomputed Paillier entries per other small value.
    pub hom_entries_per_value: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { paillier_bits: DEFAULT_MODULUS_BITS, hom_entries_of_one: 100, hom_entries_per_value: 5 }
    }
}

#[derive(Default)]
struct EncTables {
    enabled: bool,
    ope: HashMap<String, HashMap<u32, u64>>,
    hom: HashMap<u64, VecDeque<Vec<u8>>>,
}

/// The onion encryption engine.
///
/// Thread-safe: reads share the structure freely, the precompute tables
/// sit behind a mutex, and the master key is immutable after construction
/// (and zeroized on drop).
pub struct CryptoManager {
    master: MasterKey,
    paillier: Arc<Paillier>,
    key_cache: Mutex<HashMap<(String, SecLevel), SecretVec<u8>>>,
    enc_tables: Mutex<EncTables>,
}

impl CryptoManager {
    /// Builds the engine from the provisioned 16-byte master secret.
    ///
    /// Paillier key generation runs here, seeded from the master secret,
    /// so the keypair survives restarts without being stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on a malformed secret or config.
    pub fn new(master_secret: SecretVec<u8>, config: &EngineConfig) -> Result<Self, Error> {
        let master = MasterKey::new(master_secret)?;
        let mut rng = master.keygen_rng("paillier-keygen");
        let paillier = Arc::new(Paillier::generate(config.paillier_bits, &mut rng)?);
        info!(modulus_bits = config.paillier_bits, "crypto manager initialized");
        Ok(Self {
            master,
            paillier,
            key_cache: Mutex::new(HashMap::new()),
            enc_tables: Mutex::new(EncTables::default()),
        })
    }

    /// The engine's Paillier keypair.
    #[must_use]
    pub fn paillier(&self) -> &Arc<Paillier> {
        &self.paillier
    }

    /// Public `N²`, big-endian — the rewriter embeds this in aggregate
    /// calls.
    #[must_use]
    pub fn agg_public_modulus(&self) -> Vec<u8> {
        self.paillier.modulus_squared_bytes()
    }

    /// A fresh per-row salt.
    #[must_use]
    pub fn fresh_salt(&self) -> u64 {
        rand::thread_rng().gen()
    }

    /// The derived key for one (label, level) pair. DET-JOIN always uses
    /// the process-wide join label; that is what makes it an equivalence
    /// level.
    fn layer_key(&self, label: &str, level: SecLevel) -> SecretVec<u8> {
        let effective = if level == SecLevel::DetJoin { JOIN_LABEL } else { label };
        let mut cache = self.key_cache.lock();
        let entry = cache
            .entry((effective.to_string(), level))
            .or_insert_with(|| self.master.derive_layer_key(effective, level));
        SecretVec::new(entry.expose_secret().clone())
    }

    /// Builds one encryption layer for a field.
    ///
    /// # Errors
    ///
    /// See [`EncLayer::build`].
    pub fn build_layer(
        &self,
        level: SecLevel,
        ftype: FieldType,
        label: &str,
    ) -> Result<EncLayer, Error> {
        let key = self.layer_key(label, level);
        EncLayer::build(level, ftype, &key, &self.paillier)
    }

    /// Materializes the full layer stack of one onion.
    ///
    /// # Errors
    ///
    /// See [`EncLayer::build`].
    pub fn build_stack(&self, onion: &OnionMeta, ftype: FieldType) -> Result<LayerStack, Error> {
        let layers = onion
            .levels()
            .iter()
            .map(|&level| self.build_layer(level, ftype, onion.anon_name()))
            .collect::<Result<Vec<_>, _>>()?;
        LayerStack::new(layers)
    }

    /// Transforms `value` from `from` to `to` on one onion.
    ///
    /// Identity when the levels are equal; otherwise each intermediate
    /// layer is applied in order. The salt is consumed only by RND layers.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when the levels sit on different onions;
    /// [`Error::Level`] when the walk falls off the onion; layer errors
    /// propagate unchanged.
    pub fn crypt(
        &self,
        ftype: FieldType,
        label: &str,
        from: SecLevel,
        to: SecLevel,
        value: &Value,
        salt: Option<u64>,
    ) -> Result<Value, Error> {
        if from == to {
            return Ok(value.clone());
        }
        if from.onion() != to.onion() {
            return Err(Error::schema(format!(
                "levels {} and {} are not on the same onion",
                from.tag(),
                to.tag()
            )));
        }
        debug!(from = from.tag(), to = to.tag(), label, "level transition");

        let mut value = value.clone();
        if from > to {
            let mut level = from;
            while level > to {
                let layer = self.build_layer(level, ftype, label)?;
                value = layer.decrypt(&value, salt)?;
                level = next_inner(level, ftype)?;
            }
        } else {
            let mut level = from;
            while level < to {
                let next = next_outer(level, ftype)?;
                value = self.encrypt_step(next, ftype, label, &value, salt)?;
                level = next;
            }
        }
        Ok(value)
    }

    /// Encrypts a plaintext to the onion's current top level.
    ///
    /// # Errors
    ///
    /// See [`CryptoManager::crypt`].
    pub fn encrypt_cell(
        &self,
        onion: &OnionMeta,
        ftype: FieldType,
        plaintext: &Value,
        salt: Option<u64>,
    ) -> Result<Value, Error> {
        self.crypt(
            ftype,
            onion.anon_name(),
            onion.onion().plain_level(),
            onion.current_level(),
            plaintext,
            salt,
        )
    }

    /// Decrypts a top-level ciphertext back to plaintext.
    ///
    /// # Errors
    ///
    /// See [`CryptoManager::crypt`].
    pub fn decrypt_cell(
        &self,
        onion: &OnionMeta,
        ftype: FieldType,
        ciphertext: &Value,
        salt: Option<u64>,
    ) -> Result<Value, Error> {
        self.crypt(
            ftype,
            onion.anon_name(),
            onion.current_level(),
            onion.onion().plain_level(),
            ciphertext,
            salt,
        )
    }

    /// One outward wrap, consulting the precompute tables first.
    fn encrypt_step(
        &self,
        level: SecLevel,
        ftype: FieldType,
        label: &str,
        value: &Value,
        salt: Option<u64>,
    ) -> Result<Value, Error> {
        match level {
            SecLevel::Ope if ftype == FieldType::Integer => {
                if let Ok(pt) = value.as_int() {
                    if let Ok(pt32) = u32::try_from(pt) {
                        if let Some(ct) = self.ope_table_hit(label, pt32) {
                            debug!(label, pt32, "OPE table hit");
                            return Ok(Value::Int(ct));
                        }
                    }
                }
            }
            SecLevel::Hom => {
                if let Ok(pt) = value.as_int() {
                    if let Some(ct) = self.hom_pool_take(pt) {
                        debug!(pt, "HOM pool hit");
                        return Ok(Value::Bytes(ct));
                    }
                }
            }
            _ => {}
        }
        self.build_layer(level, ftype, label)?.encrypt(value, salt)
    }

    fn ope_table_hit(&self, label: &str, pt: u32) -> Option<u64> {
        let tables = self.enc_tables.lock();
        if !tables.enabled {
            return None;
        }
        tables.ope.get(label)?.get(&pt).copied()
    }

    /// Paillier entries are single-use: ciphertexts are randomized, and
    /// handing the same one out twice would link rows.
    fn hom_pool_take(&self, pt: u64) -> Option<Vec<u8>> {
        let mut tables = self.enc_tables.lock();
        if !tables.enabled {
            return None;
        }
        tables.hom.get_mut(&pt)?.pop_front()
    }

    /// Precomputes encryption tables: OPE ciphertexts of `[0, ope_n)` for
    /// each given label, and single-use Paillier pools for `[0, hom_n)`,
    /// with a deeper pool for encryptions of 1.
    ///
    /// # Errors
    ///
    /// Propagates layer-construction failures.
    pub fn create_encryption_tables(
        &self,
        ope_labels: &[&str],
        ope_n: u32,
        hom_n: u64,
        config: &EngineConfig,
    ) -> Result<(), Error> {
        let mut fresh = EncTables { enabled: true, ..EncTables::default() };

        for &label in ope_labels {
            let key = self.layer_key(label, SecLevel::Ope);
            let ope = crate::crypto::ope::Ope::new(key.expose_secret())?;
            let table: HashMap<u32, u64> = (0..ope_n).map(|pt| (pt, ope.encrypt(pt))).collect();
            fresh.ope.insert(label.to_string(), table);
        }

        let mut rng = rand::thread_rng();
        for pt in 0..hom_n {
            let depth =
                if pt == 1 { config.hom_entries_of_one } else { config.hom_entries_per_value };
            let pool: Result<VecDeque<Vec<u8>>, Error> = (0..depth)
                .map(|_| {
                    self.paillier
                        .encrypt_i64(i64::try_from(pt).expect("hom table values fit i64"), &mut rng)
                })
                .collect();
            fresh.hom.insert(pt, pool?);
        }

        info!(
            ope_labels = ope_labels.len(),
            ope_n, hom_n, "precomputed encryption tables installed"
        );
        *self.enc_tables.lock() = fresh;
        Ok(())
    }

    /// Builds the search token for a keyword on one SEARCH onion. The
    /// rewriter passes its serialized form to the backend `searchSWP`
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on key-derivation failure.
    pub fn search_token(
        &self,
        label: &str,
        word: &[u8],
    ) -> Result<crate::crypto::swp::SearchToken, Error> {
        let key = self.layer_key(label, SecLevel::Swp);
        Ok(crate::crypto::swp::Swp::new(key.expose_secret())?.token(word))
    }

    /// The EC-join scheme under the process-wide plaintext PRF.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on key-derivation failure.
    pub fn ec_join(&self) -> Result<EcJoin, Error> {
        let prf = self.master.derive_subkey(&format!("ecjoin|{JOIN_LABEL}"));
        EcJoin::new(prf.expose_secret())
    }

    /// The per-column EC-join scalar for a key label.
    #[must_use]
    pub fn ec_column_key(&self, label: &str) -> JoinScalar {
        let material = self.master.derive_subkey(&format!("ecjoin|{label}"));
        JoinScalar::from_key_material(material.expose_secret())
    }

    /// The delta that adjusts `from_label` ciphertexts onto `to_label`.
    /// Derived from the two column keys alone.
    #[must_use]
    pub fn ec_delta(&self, from_label: &str, to_label: &str) -> DeltaKey {
        ecjoin::delta_key(&self.ec_column_key(from_label), &self.ec_column_key(to_label))
    }
}
