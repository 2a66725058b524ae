//! Encryption layers and the per-onion layer stack.
//!
//! The stack holds heterogeneous layers that share only the
//! encrypt/decrypt/level interface, so they are modeled as a tagged sum
//! rather than a trait-object hierarchy. Layers are stored innermost-first:
//! peeling the outermost layer is a pop.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretVec};

use crate::crypto::ope::Ope;
use crate::crypto::paillier::Paillier;
use crate::crypto::swp::Swp;
use crate::crypto::{det, rnd};
use crate::error::Error;
use crate::onion::{FieldType, Onion, SecLevel};
use crate::value::Value;

/// Cell representation a layer consumes and produces on its inner side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repr {
    /// 64-bit integer cells.
    Int,
    /// Byte-string cells.
    Bytes,
}

/// How the backend executes a one-layer decryption when a peel is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeelAction {
    /// The DBMS runs a UDF over the column, keyed with exposed layer key
    /// material.
    Udf {
        /// UDF name per the backend contract.
        name: &'static str,
        /// Key argument handed to the UDF.
        key: Vec<u8>,
        /// Whether the UDF consumes the per-row salt column.
        uses_salt: bool,
    },
    /// No backend function exists for this scheme; the proxy must rewrite
    /// the column itself.
    ProxyRewrite,
}

/// Everything the SQL rewriter needs to act on a peel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeelDirective {
    /// Onion being peeled.
    pub onion: Onion,
    /// Level removed from the column.
    pub from: SecLevel,
    /// Level the column sits at afterwards.
    pub to: SecLevel,
    /// How the backend computes the one-layer decryption.
    pub action: PeelAction,
}

enum LayerKind {
    Rnd { repr: Repr, key: SecretVec<u8> },
    Det { repr: Repr, key: SecretVec<u8> },
    Ope { ope: Ope, ftype: FieldType },
    OpeJoin,
    Hom { paillier: Arc<Paillier> },
    Swp { swp: Swp },
    Plain,
}

/// One encryption layer: a scheme instance bound to its level and key.
pub struct EncLayer {
    level: SecLevel,
    kind: LayerKind,
}

impl EncLayer {
    /// Builds the layer for `level` over a column of type `ftype`.
    ///
    /// `key` is the derived (label, level) subkey; it is ignored by carrier
    /// levels. `paillier` backs the HOM level and is shared engine-wide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on bad key material, [`Error::Schema`] if
    /// the level does not exist for the field type.
    pub fn build(
        level: SecLevel,
        ftype: FieldType,
        key: &SecretVec<u8>,
        paillier: &Arc<Paillier>,
    ) -> Result<Self, Error> {
        let repr = match ftype {
            FieldType::Integer => Repr::Int,
            FieldType::Text => Repr::Bytes,
        };
        let kind = match level {
            SecLevel::RndDet => {
                LayerKind::Rnd { repr, key: clone_secret(key) }
            }
            // Above the OPE level every cell is a 64-bit ciphertext,
            // whatever the column type.
            SecLevel::RndOpe => LayerKind::Rnd { repr: Repr::Int, key: clone_secret(key) },
            SecLevel::Det | SecLevel::DetJoin => {
                LayerKind::Det { repr, key: clone_secret(key) }
            }
            SecLevel::Ope => {
                LayerKind::Ope { ope: Ope::new(key.expose_secret())?, ftype }
            }
            SecLevel::OpeJoin => {
                if ftype == FieldType::Text {
                    return Err(Error::schema("text columns have no OPE join level"));
                }
                LayerKind::OpeJoin
            }
            SecLevel::Hom => {
                if ftype == FieldType::Text {
                    return Err(Error::schema("text columns have no AGG onion"));
                }
                LayerKind::Hom { paillier: Arc::clone(paillier) }
            }
            SecLevel::Swp => {
                if ftype == FieldType::Integer {
                    return Err(Error::schema("integer columns have no SEARCH onion"));
                }
                LayerKind::Swp { swp: Swp::new(key.expose_secret())? }
            }
            SecLevel::Plain => LayerKind::Plain,
            plain => {
                return Err(Error::schema(format!(
                    "{} is a carrier level, not a layer",
                    plain.tag()
                )))
            }
        };
        Ok(Self { level, kind })
    }

    /// The level this layer provides when it is outermost.
    #[must_use]
    pub fn level(&self) -> SecLevel {
        self.level
    }

    /// Applies the layer's forward function. Salt is consumed only by RND
    /// layers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on representation mismatch or missing
    /// salt.
    pub fn encrypt(&self, value: &Value, salt: Option<u64>) -> Result<Value, Error> {
        match &self.kind {
            LayerKind::Rnd { repr, key } => {
                let salt = require_salt(salt)?;
                match repr {
                    Repr::Int => {
                        Ok(rnd::encrypt_int(key.expose_secret(), value.as_int()?, salt)?.into())
                    }
                    Repr::Bytes => {
                        Ok(rnd::encrypt_text(key.expose_secret(), value.as_bytes()?, salt)?.into())
                    }
                }
            }
            LayerKind::Det { repr, key } => match repr {
                Repr::Int => Ok(det::encrypt_int(key.expose_secret(), value.as_int()?, 0)?.into()),
                Repr::Bytes => Ok(det::encrypt_text(key.expose_secret(), value.as_bytes()?)?.into()),
            },
            LayerKind::Ope { ope, ftype } => match ftype {
                FieldType::Integer => {
                    let pt = value.as_int()?;
                    let pt = u32::try_from(pt).map_err(|_| {
                        Error::crypto("OPE plaintext exceeds the 32-bit width")
                    })?;
                    Ok(ope.encrypt(pt).into())
                }
                FieldType::Text => Ok(ope.encrypt_text(value.as_bytes()?).into()),
            },
            LayerKind::OpeJoin | LayerKind::Plain => Ok(value.clone()),
            LayerKind::Hom { paillier } => {
                let pt = value.as_int()? as i64;
                Ok(paillier.encrypt_i64(pt, &mut rand::thread_rng())?.into())
            }
            LayerKind::Swp { swp } => Ok(swp.encode_document(value.as_bytes()?).into()),
        }
    }

    /// Applies the layer's inverse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on representation or ciphertext-shape
    /// violations, and for text OPE, whose packing is not invertible.
    pub fn decrypt(&self, value: &Value, salt: Option<u64>) -> Result<Value, Error> {
        match &self.kind {
            LayerKind::Rnd { repr, key } => {
                let salt = require_salt(salt)?;
                match repr {
                    Repr::Int => {
                        Ok(rnd::decrypt_int(key.expose_secret(), value.as_int()?, salt)?.into())
                    }
                    Repr::Bytes => {
                        Ok(rnd::decrypt_text(key.expose_secret(), value.as_bytes()?, salt)?.into())
                    }
                }
            }
            LayerKind::Det { repr, key } => match repr {
                Repr::Int => Ok(det::decrypt_int(key.expose_secret(), value.as_int()?, 0)?.into()),
                Repr::Bytes => Ok(det::decrypt_text(key.expose_secret(), value.as_bytes()?)?.into()),
            },
            LayerKind::Ope { ope, ftype } => match ftype {
                FieldType::Integer => Ok(u64::from(ope.decrypt(value.as_int()?)?).into()),
                FieldType::Text => {
                    Err(Error::crypto("text OPE packs a lossy prefix; cannot decrypt"))
                }
            },
            LayerKind::OpeJoin | LayerKind::Plain => Ok(value.clone()),
            LayerKind::Hom { paillier } => {
                let pt = paillier.decrypt_i64(value.as_bytes()?)?;
                Ok(Value::Int(pt as u64))
            }
            LayerKind::Swp { swp } => Ok(swp.decode_document(value.as_bytes()?)?.into()),
        }
    }

    /// The backend action that undoes this layer in SQL.
    #[must_use]
    pub fn peel_action(&self) -> PeelAction {
        match &self.kind {
            LayerKind::Rnd { repr, key } => PeelAction::Udf {
                name: match repr {
                    Repr::Int => "decrypt_int_sem",
                    Repr::Bytes => "decrypt_text_sem",
                },
                key: key.expose_secret().clone(),
                uses_salt: true,
            },
            LayerKind::Det { repr, key } => PeelAction::Udf {
                name: match repr {
                    Repr::Int => "decrypt_int_det",
                    Repr::Bytes => "decrypt_text_det",
                },
                key: key.expose_secret().clone(),
                uses_salt: false,
            },
            LayerKind::Ope { .. }
            | LayerKind::OpeJoin
            | LayerKind::Hom { .. }
            | LayerKind::Swp { .. }
            | LayerKind::Plain => PeelAction::ProxyRewrite,
        }
    }
}

/// The ordered layers of one (column, onion) pair, innermost-first.
pub struct LayerStack {
    layers: Vec<EncLayer>,
}

impl LayerStack {
    /// Wraps a non-empty layer list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on an empty list.
    pub fn new(layers: Vec<EncLayer>) -> Result<Self, Error> {
        if layers.is_empty() {
            return Err(Error::schema("layer stack may not be empty"));
        }
        Ok(Self { layers })
    }

    /// Number of layers still present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false: the stack is non-empty by construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Level of the outermost layer.
    #[must_use]
    pub fn current_level(&self) -> SecLevel {
        self.layers.last().expect("stack is non-empty by construction").level()
    }

    /// Encrypts a plaintext up to the outermost layer, feeding each layer's
    /// output to the next.
    ///
    /// # Errors
    ///
    /// Propagates layer failures; see [`EncLayer::encrypt`].
    pub fn encrypt(&self, plaintext: &Value, salt: Option<u64>) -> Result<Value, Error> {
        let mut value = plaintext.clone();
        for layer in &self.layers {
            value = layer.encrypt(&value, salt)?;
        }
        Ok(value)
    }

    /// Decrypts a top-level ciphertext down to the cleartext carrier.
    ///
    /// # Errors
    ///
    /// Propagates layer failures; see [`EncLayer::decrypt`].
    pub fn decrypt(&self, ciphertext: &Value, salt: Option<u64>) -> Result<Value, Error> {
        let mut value = ciphertext.clone();
        for layer in self.layers.iter().rev() {
            value = layer.decrypt(&value, salt)?;
        }
        Ok(value)
    }

    /// Pops the outermost layer, returning the directive the rewriter
    /// needs to peel the column in SQL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Level`] when only the innermost layer remains:
    /// peeling below it is a caller bug.
    pub fn peel(&mut self) -> Result<PeelDirective, Error> {
        if self.layers.len() == 1 {
            let level = self.current_level();
            return Err(Error::Level {
                onion: level.onion(),
                from: level,
                to: level.onion().plain_level(),
            });
        }
        let top = self.layers.pop().expect("len checked above");
        Ok(PeelDirective {
            onion: top.level().onion(),
            from: top.level(),
            to: self.current_level(),
            action: top.peel_action(),
        })
    }

    /// Swaps the outermost layer (schema migration).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the replacement belongs to a different
    /// onion.
    pub fn replace_top(&mut self, layer: EncLayer) -> Result<(), Error> {
        if layer.level().onion() != self.current_level().onion() {
            return Err(Error::schema("replacement layer belongs to a different onion"));
        }
        self.layers.pop();
        self.layers.push(layer);
        Ok(())
    }

    /// The levels present, innermost-first.
    #[must_use]
    pub fn levels(&self) -> Vec<SecLevel> {
        self.layers.iter().map(EncLayer::level).collect()
    }
}

fn require_salt(salt: Option<u64>) -> Result<u64, Error> {
    salt.ok_or_else(|| Error::crypto("RND layer requires a per-row salt"))
}

fn clone_secret(key: &SecretVec<u8>) -> SecretVec<u8> {
    SecretVec::new(key.expose_secret().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn paillier() -> Arc<Paillier> {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        Arc::new(Paillier::generate(256, &mut rng).unwrap())
    }

    fn key(byte: u8) -> SecretVec<u8> {
        SecretVec::new(vec![byte; 16])
    }

    fn det_stack(ftype: FieldType) -> LayerStack {
        let pk = paillier();
        LayerStack::new(vec![
            EncLayer::build(SecLevel::DetJoin, ftype, &key(1), &pk).unwrap(),
            EncLayer::build(SecLevel::Det, ftype, &key(2), &pk).unwrap(),
            EncLayer::build(SecLevel::RndDet, ftype, &key(3), &pk).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_int_det_onion_round_trip() {
        let stack = det_stack(FieldType::Integer);
        assert_eq!(stack.current_level(), SecLevel::RndDet);
        let ct = stack.encrypt(&Value::Int(42), Some(7)).unwrap();
        assert_ne!(ct, Value::Int(42));
        assert_eq!(stack.decrypt(&ct, Some(7)).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_text_det_onion_round_trip() {
        let stack = det_stack(FieldType::Text);
        let pt = Value::from("o'brien");
        let ct = stack.encrypt(&pt, Some(9)).unwrap();
        assert_eq!(stack.decrypt(&ct, Some(9)).unwrap(), pt);
    }

    #[test]
    fn test_missing_salt_is_fatal() {
        let stack = det_stack(FieldType::Integer);
        assert!(stack.encrypt(&Value::Int(42), None).is_err());
    }

    #[test]
    fn test_peel_pops_outermost_and_reports_action() {
        let mut stack = det_stack(FieldType::Integer);
        let directive = stack.peel().unwrap();
        assert_eq!(directive.from, SecLevel::RndDet);
        assert_eq!(directive.to, SecLevel::Det);
        assert!(matches!(
            directive.action,
            PeelAction::Udf { name: "decrypt_int_sem", uses_salt: true, .. }
        ));
        assert_eq!(stack.current_level(), SecLevel::Det);
    }

    #[test]
    fn test_peel_monotonically_decreases() {
        let mut stack = det_stack(FieldType::Integer);
        let mut prev = stack.current_level();
        while stack.len() > 1 {
            stack.peel().unwrap();
            assert!(stack.current_level() < prev);
            prev = stack.current_level();
        }
    }

    #[test]
    fn test_peeling_last_layer_fails() {
        let mut stack = det_stack(FieldType::Integer);
        stack.peel().unwrap();
        stack.peel().unwrap();
        let err = stack.peel().unwrap_err();
        assert!(matches!(err, Error::Level { .. }));
        assert_eq!(stack.current_level(), SecLevel::DetJoin);
    }

    #[test]
    fn test_replace_top_swaps_in_place() {
        let pk = paillier();
        let mut stack = det_stack(FieldType::Integer);
        let fresh =
            EncLayer::build(SecLevel::RndDet, FieldType::Integer, &key(9), &pk).unwrap();
        stack.replace_top(fresh).unwrap();
        assert_eq!(stack.current_level(), SecLevel::RndDet);
        assert_eq!(stack.len(), 3);

        let wrong = EncLayer::build(SecLevel::Hom, FieldType::Integer, &key(9), &pk).unwrap();
        assert!(stack.replace_top(wrong).is_err());
    }

    #[test]
    fn test_hom_stack_round_trip() {
        let pk = paillier();
        let stack = LayerStack::new(vec![EncLayer::build(
            SecLevel::Hom,
            FieldType::Integer,
            &key(4),
            &pk,
        )
        .unwrap()])
        .unwrap();
        let ct = stack.encrypt(&Value::Int(60), None).unwrap();
        assert_eq!(stack.decrypt(&ct, None).unwrap(), Value::Int(60));
    }

    #[test]
    fn test_ope_rejects_oversized_plaintext() {
        let pk = paillier();
        let layer = EncLayer::build(SecLevel::Ope, FieldType::Integer, &key(5), &pk).unwrap();
        assert!(layer.encrypt(&Value::Int(1 << 40), None).is_err());
    }

    #[test]
    fn test_wrong_field_type_levels_rejected() {
        let pk = paillier();
        assert!(EncLayer::build(SecLevel::OpeJoin, FieldType::Text, &key(5), &pk).is_err());
        assert!(EncLayer::build(SecLevel::Hom, FieldType::Text, &key(5), &pk).is_err());
        assert!(EncLayer::build(SecLevel::Swp, FieldType::Integer, &key(5), &pk).is_err());
    }
}
