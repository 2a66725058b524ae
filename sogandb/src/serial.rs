//! Textual serialization of schema descriptors.
//!
//! Each record is one line: a type tag, an id, and name/value pairs whose
//! values are either decimal integers or base64-encoded byte strings
//! (marked `b64:`). Records never embed pointers — cross-references are
//! ids, and layer order lives in a separate `(onion id, position)` table.
//!
//! `deserialize(serialize(x)) == x` holds for every descriptor type; the
//! restart path depends on it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::Error;
use crate::onion::{FieldType, Onion, SecLevel};
use crate::schema::{self, FieldMeta, OnionMeta, TableMeta};

/// Record type tag for tables.
pub const TABLE_TAG: &str = "tableMeta";
/// Record type tag for fields.
pub const FIELD_TAG: &str = "fieldMeta";
/// Record type tag for onions.
pub const ONION_TAG: &str = "onionMeta";
/// Record type tag for layers (in the layer-position table).
pub const LAYER_TAG: &str = "encLayer";

/// One value in a record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialValue {
    /// Decimal integer.
    Int(u64),
    /// Base64-encoded byte string.
    Bytes(Vec<u8>),
}

/// A parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Type tag; drives deserialization dispatch.
    pub tag: String,
    /// Node id.
    pub id: u32,
    fields: Vec<(String, SerialValue)>,
}

impl Record {
    /// Starts an empty record.
    #[must_use]
    pub fn new(tag: &str, id: u32) -> Self {
        Self { tag: tag.to_string(), id, fields: Vec::new() }
    }

    /// Appends an integer field.
    pub fn push_int(&mut self, name: &str, value: u64) {
        self.fields.push((name.to_string(), SerialValue::Int(value)));
    }

    /// Appends a byte-string field.
    pub fn push_bytes(&mut self, name: &str, value: &[u8]) {
        self.fields.push((name.to_string(), SerialValue::Bytes(value.to_vec())));
    }

    /// Appends a UTF-8 string field.
    pub fn push_str(&mut self, name: &str, value: &str) {
        self.push_bytes(name, value.as_bytes());
    }

    /// Reads an integer field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] when missing or mistyped.
    pub fn get_int(&self, name: &str) -> Result<u64, Error> {
        match self.get(name)? {
            SerialValue::Int(v) => Ok(*v),
            SerialValue::Bytes(_) => {
                Err(Error::corrupt(format!("field `{name}` is not an integer")))
            }
        }
    }

    /// Reads a byte-string field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] when missing or mistyped.
    pub fn get_bytes(&self, name: &str) -> Result<&[u8], Error> {
        match self.get(name)? {
            SerialValue::Bytes(b) => Ok(b),
            SerialValue::Int(_) => {
                Err(Error::corrupt(format!("field `{name}` is not a byte string")))
            }
        }
    }

    /// Reads a UTF-8 string field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] when missing, mistyped, or not UTF-8.
    pub fn get_str(&self, name: &str) -> Result<String, Error> {
        String::from_utf8(self.get_bytes(name)?.to_vec())
            .map_err(|_| Error::corrupt(format!("field `{name}` is not valid UTF-8")))
    }

    fn get(&self, name: &str) -> Result<&SerialValue, Error> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::corrupt(format!("record `{}` lacks field `{name}`", self.tag)))
    }

    /// Renders the record as one line.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = format!("{} {}", self.tag, self.id);
        for (name, value) in &self.fields {
            match value {
                SerialValue::Int(v) => {
                    out.push_str(&format!(" {name}={v}"));
                }
                SerialValue::Bytes(b) => {
                    out.push_str(&format!(" {name}=b64:{}", STANDARD.encode(b)));
                }
            }
        }
        out
    }

    /// Parses a line produced by [`Record::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] on any malformation.
    pub fn decode(line: &str) -> Result<Self, Error> {
        let mut parts = line.split_whitespace();
        let tag = parts
            .next()
            .ok_or_else(|| Error::corrupt("empty record line"))?
            .to_string();
        let id = parts
            .next()
            .ok_or_else(|| Error::corrupt(format!("record `{tag}` lacks an id")))?
            .parse::<u32>()
            .map_err(|_| Error::corrupt(format!("record `{tag}` has a malformed id")))?;

        let mut fields = Vec::new();
        for part in parts {
            let (name, raw) = part
                .split_once('=')
                .ok_or_else(|| Error::corrupt(format!("malformed pair `{part}`")))?;
            let value = if let Some(b64) = raw.strip_prefix("b64:") {
                SerialValue::Bytes(
                    STANDARD
                        .decode(b64)
                        .map_err(|_| Error::corrupt(format!("bad base64 in `{name}`")))?,
                )
            } else {
                SerialValue::Int(
                    raw.parse::<u64>()
                        .map_err(|_| Error::corrupt(format!("bad integer in `{name}`")))?,
                )
            };
            fields.push((name.to_string(), value));
        }
        Ok(Self { tag, id, fields })
    }
}

/// Serializes a table descriptor (without its children).
#[must_use]
pub fn table_record(table: &TableMeta) -> Record {
    let mut rec = Record::new(TABLE_TAG, table.id());
    rec.push_str("name", table.tname());
    rec.push_str("anon", table.anon_name());
    rec.push_str("salt_name", table.salt_name());
    rec.push_int("counter", table.counter());
    rec
}

/// Restores a table descriptor from its record.
///
/// # Errors
///
/// Returns [`Error::Corruption`] on a malformed record.
pub fn table_from_record(rec: &Record) -> Result<TableMeta, Error> {
    expect_tag(rec, TABLE_TAG)?;
    Ok(schema::restored_table(
        rec.id,
        rec.get_str("name")?,
        rec.get_str("anon")?,
        rec.get_str("salt_name")?,
        rec.get_int("counter")?,
    ))
}

/// Serializes a field descriptor (without its onions).
#[must_use]
pub fn field_record(field: &FieldMeta) -> Record {
    let mut rec = Record::new(FIELD_TAG, field.id());
    rec.push_str("name", field.fname());
    rec.push_str("anon", field.anon_name());
    rec.push_str("ftype", ftype_tag(field.ftype()));
    rec.push_int("has_salt", u64::from(field.has_salt()));
    rec.push_str("salt_name", field.salt_name().unwrap_or(""));
    rec.push_int("counter", field.counter());
    rec
}

/// Restores a field descriptor from its record. The field has no onions
/// until the caller attaches them.
///
/// # Errors
///
/// Returns [`Error::Corruption`] on a malformed record.
pub fn field_from_record(rec: &Record) -> Result<FieldMeta, Error> {
    expect_tag(rec, FIELD_TAG)?;
    Ok(schema::restored_field(
        rec.id,
        rec.get_str("name")?,
        rec.get_str("anon")?,
        ftype_from_tag(&rec.get_str("ftype")?)?,
        rec.get_int("has_salt")? != 0,
        rec.get_str("salt_name")?,
        rec.get_int("counter")?,
    ))
}

/// Serializes an onion descriptor (without its layers).
#[must_use]
pub fn onion_record(onion: &OnionMeta) -> Record {
    let mut rec = Record::new(ONION_TAG, onion.id());
    rec.push_str("onion", onion.onion().tag());
    rec.push_str("anon", onion.anon_name());
    rec
}

/// Restores an onion descriptor from its record, with its layer levels
/// taken from the layer-position table, innermost-first.
///
/// # Errors
///
/// Returns [`Error::Corruption`] on malformation or an empty layer list.
pub fn onion_from_record(rec: &Record, levels: Vec<SecLevel>) -> Result<OnionMeta, Error> {
    expect_tag(rec, ONION_TAG)?;
    let onion = Onion::from_tag(&rec.get_str("onion")?)?;
    if levels.is_empty() {
        return Err(Error::corrupt(format!("onion record {} has no layers", rec.id)));
    }
    for &level in &levels {
        if level.onion() != onion {
            return Err(Error::corrupt(format!(
                "layer level {} does not belong to onion {}",
                level.tag(),
                onion.tag()
            )));
        }
    }
    Ok(OnionMeta::new(rec.id, onion, rec.get_str("anon")?, levels))
}

/// Serializes one layer for the layer-position table. The scheme tag is
/// named explicitly so reload is a direct dispatch.
#[must_use]
pub fn layer_serial(level: SecLevel, position: u32) -> String {
    let mut rec = Record::new(LAYER_TAG, position);
    rec.push_str("scheme", scheme_tag(level));
    rec.push_str("level", level.tag());
    rec.encode()
}

/// Restores one layer level from the layer-position table.
///
/// # Errors
///
/// Returns [`Error::Corruption`] on malformation or a scheme/level
/// mismatch.
pub fn layer_from_serial(serial: &str) -> Result<SecLevel, Error> {
    let rec = Record::decode(serial)?;
    expect_tag(&rec, LAYER_TAG)?;
    let level = SecLevel::from_tag(&rec.get_str("level")?)?;
    let scheme = rec.get_str("scheme")?;
    if scheme != scheme_tag(level) {
        return Err(Error::corrupt(format!(
            "scheme `{scheme}` does not match level {}",
            level.tag()
        )));
    }
    Ok(level)
}

/// The scheme identifier of a level's layer.
#[must_use]
pub fn scheme_tag(level: SecLevel) -> &'static str {
    match level {
        SecLevel::RndDet | SecLevel::RndOpe => "RND",
        SecLevel::Det => "DET",
        SecLevel::DetJoin => "DETJOIN",
        SecLevel::Ope => "OPE",
        SecLevel::OpeJoin => "OPEJOIN",
        SecLevel::Hom => "HOM",
        SecLevel::Swp => "SWP",
        SecLevel::Plain
        | SecLevel::PlainDet
        | SecLevel::PlainOpe
        | SecLevel::PlainAgg
        | SecLevel::PlainSearch => "PLAIN",
    }
}

fn ftype_tag(ftype: FieldType) -> &'static str {
    match ftype {
        FieldType::Integer => "int",
        FieldType::Text => "text",
    }
}

fn ftype_from_tag(tag: &str) -> Result<FieldType, Error> {
    match tag {
        "int" => Ok(FieldType::Integer),
        "text" => Ok(FieldType::Text),
        other => Err(Error::corrupt(format!("unknown field type tag `{other}`"))),
    }
}

fn expect_tag(rec: &Record, tag: &str) -> Result<(), Error> {
    if rec.tag != tag {
        return Err(Error::corrupt(format!("expected `{tag}` record, got `{}`", rec.tag)));
    }
    Ok(())
}
