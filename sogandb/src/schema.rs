//! The in-memory schema tree: which onions each column carries, at which
//! levels, under which anonymized names.
//!
//! Ownership is strictly hierarchical — the schema owns tables, tables own
//! fields, fields own onions, onions own their layer lists. Anything that
//! needs to point across the tree does so by logical name plus lookup.
//! Persistence lives elsewhere: this module only mutates memory, and the
//! catalog decides when a mutation may become visible.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;

use crate::error::Error;
use crate::onion::{onion_layout, FieldType, Onion, SecLevel};

/// One onion of one column: its identity in the backend and the layers
/// still present, innermost-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionMeta {
    id: u32,
    onion: Onion,
    anon_name: String,
    levels: Vec<SecLevel>,
}

impl OnionMeta {
    pub(crate) fn new(id: u32, onion: Onion, anon_name: String, levels: Vec<SecLevel>) -> Self {
        debug_assert!(!levels.is_empty());
        Self { id, onion, anon_name, levels }
    }

    /// Stable id; primary key of the persisted record.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Which onion this is.
    #[must_use]
    pub fn onion(&self) -> Onion {
        self.onion
    }

    /// The anonymized ciphertext column name, also used as the key label
    /// for every layer except DET-JOIN.
    #[must_use]
    pub fn anon_name(&self) -> &str {
        &self.anon_name
    }

    /// Levels still present, innermost-first.
    #[must_use]
    pub fn levels(&self) -> &[SecLevel] {
        &self.levels
    }

    /// The current effective level: the outermost surviving layer.
    #[must_use]
    pub fn current_level(&self) -> SecLevel {
        *self.levels.last().expect("onion stack is never empty")
    }

    /// Removes the outermost layer descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Level`] when only the innermost layer remains.
    pub(crate) fn pop_level(&mut self) -> Result<SecLevel, Error> {
        if self.levels.len() == 1 {
            let level = self.current_level();
            return Err(Error::Level {
                onion: self.onion,
                from: level,
                to: self.onion.plain_level(),
            });
        }
        Ok(self.levels.pop().expect("len checked above"))
    }

    pub(crate) fn replace_top_level(&mut self, level: SecLevel) {
        self.levels.pop();
        self.levels.push(level);
    }
}

/// One logical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    id: u32,
    fname: String,
    anon_name: String,
    ftype: FieldType,
    has_salt: bool,
    salt_name: String,
    counter: u64,
    onions: BTreeMap<Onion, OnionMeta>,
}

impl FieldMeta {
    /// Stable id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Logical (plaintext) column name.
    #[must_use]
    pub fn fname(&self) -> &str {
        &self.fname
    }

    /// Anonymized column base name.
    #[must_use]
    pub fn anon_name(&self) -> &str {
        &self.anon_name
    }

    /// Column type.
    #[must_use]
    pub fn ftype(&self) -> FieldType {
        self.ftype
    }

    /// Whether the column carries a per-row salt column.
    #[must_use]
    pub fn has_salt(&self) -> bool {
        self.has_salt
    }

    /// The salt column name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the column has no salt.
    pub fn salt_name(&self) -> Result<&str, Error> {
        if !self.has_salt {
            return Err(Error::schema(format!("field `{}` has no salt column", self.fname)));
        }
        Ok(&self.salt_name)
    }

    /// The onion metadata for `onion`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the column does not carry it.
    pub fn onion(&self, onion: Onion) -> Result<&OnionMeta, Error> {
        self.onions.get(&onion).ok_or_else(|| {
            Error::schema(format!("field `{}` has no {} onion", self.fname, onion.tag()))
        })
    }

    pub(crate) fn onion_mut(&mut self, onion: Onion) -> Result<&mut OnionMeta, Error> {
        let fname = self.fname.clone();
        self.onions.get_mut(&onion).ok_or_else(|| {
            Error::schema(format!("field `{fname}` has no {} onion", onion.tag()))
        })
    }

    /// All onions with their current levels, in fixed onion order.
    #[must_use]
    pub fn onion_levels(&self) -> Vec<(Onion, SecLevel)> {
        self.onions.iter().map(|(&o, m)| (o, m.current_level())).collect()
    }

    /// Iterates the onion metadata in fixed onion order.
    pub fn onions(&self) -> impl Iterator<Item = &OnionMeta> {
        self.onions.values()
    }

    /// Whether any real encryption remains on this column.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.onions.keys().any(|&o| o != Onion::Plain)
    }

    /// Current value of the unique-id lease counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn lease_uniq(&mut self) -> u64 {
        let leased = self.counter;
        self.counter += 1;
        leased
    }

    pub(crate) fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }

    pub(crate) fn insert_onion(&mut self, meta: OnionMeta) {
        self.onions.insert(meta.onion(), meta);
    }
}

/// One logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    id: u32,
    tname: String,
    anon_name: String,
    salt_name: String,
    counter: u64,
    fields: BTreeMap<String, FieldMeta>,
}

impl TableMeta {
    /// Stable id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Logical table name.
    #[must_use]
    pub fn tname(&self) -> &str {
        &self.tname
    }

    /// Anonymized table name used in the backend.
    #[must_use]
    pub fn anon_name(&self) -> &str {
        &self.anon_name
    }

    /// Name of the table-level salt column.
    #[must_use]
    pub fn salt_name(&self) -> &str {
        &self.salt_name
    }

    /// Current value of the table counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Looks up a column by logical name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when it does not exist.
    pub fn field(&self, fname: &str) -> Result<&FieldMeta, Error> {
        self.fields.get(fname).ok_or_else(|| {
            Error::schema(format!("no column `{fname}` in table `{}`", self.tname))
        })
    }

    pub(crate) fn field_mut(&mut self, fname: &str) -> Result<&mut FieldMeta, Error> {
        let tname = self.tname.clone();
        self.fields
            .get_mut(fname)
            .ok_or_else(|| Error::schema(format!("no column `{fname}` in table `{tname}`")))
    }

    /// Iterates columns in logical-name order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.values()
    }

    pub(crate) fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }
}

/// Root of the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    tables: BTreeMap<String, TableMeta>,
    next_id: u32,
    anon_names: HashSet<String>,
}

impl Default for SchemaInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaInfo {
    /// An empty schema. Node ids start at 1; 0 is reserved for the root.
    #[must_use]
    pub fn new() -> Self {
        Self { tables: BTreeMap::new(), next_id: 1, anon_names: HashSet::new() }
    }

    /// Looks up a table by logical name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when it does not exist.
    pub fn table(&self, tname: &str) -> Result<&TableMeta, Error> {
        self.tables.get(tname).ok_or_else(|| Error::schema(format!("no table `{tname}`")))
    }

    pub(crate) fn table_mut(&mut self, tname: &str) -> Result<&mut TableMeta, Error> {
        self.tables.get_mut(tname).ok_or_else(|| Error::schema(format!("no table `{tname}`")))
    }

    /// Looks up a column by logical table and column name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when either does not exist.
    pub fn field(&self, tname: &str, fname: &str) -> Result<&FieldMeta, Error> {
        self.table(tname)?.field(fname)
    }

    /// Iterates tables in logical-name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.values()
    }

    /// Creates a table descriptor. Memory-only; the catalog persists it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on a duplicate logical name.
    pub(crate) fn create_table(&mut self, tname: &str) -> Result<u32, Error> {
        if self.tables.contains_key(tname) {
            return Err(Error::schema(format!("table `{tname}` already exists")));
        }
        let id = self.alloc_id();
        let anon_name = self.fresh_anon_name("table");
        let salt_name = self.fresh_anon_name("tableSalt");
        let table = TableMeta {
            id,
            tname: tname.to_string(),
            anon_name,
            salt_name,
            counter: 0,
            fields: BTreeMap::new(),
        };
        self.tables.insert(tname.to_string(), table);
        Ok(id)
    }

    /// Creates a column descriptor with the initial onion layout for its
    /// type and sensitivity. Memory-only; the catalog persists it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on an unknown table or duplicate column.
    pub(crate) fn create_field(
        &mut self,
        tname: &str,
        fname: &str,
        ftype: FieldType,
        sensitive: bool,
    ) -> Result<u32, Error> {
        if self.table(tname)?.fields.contains_key(fname) {
            return Err(Error::schema(format!(
                "column `{fname}` already exists in table `{tname}`"
            )));
        }
        let id = self.alloc_id();
        let anon_name = self.fresh_anon_name("field");
        let has_salt = sensitive;
        let salt_name = if has_salt { self.fresh_anon_name("salt") } else { String::new() };

        let mut field = FieldMeta {
            id,
            fname: fname.to_string(),
            anon_name,
            ftype,
            has_salt,
            salt_name,
            counter: 0,
            onions: BTreeMap::new(),
        };
        for (onion, levels) in onion_layout(ftype, sensitive) {
            if levels.is_empty() {
                continue;
            }
            let onion_id = self.alloc_id();
            let anon = self.fresh_anon_name(&format!("onion_{}", onion.tag()));
            field.insert_onion(OnionMeta::new(onion_id, onion, anon, levels));
        }
        self.table_mut(tname)?.fields.insert(fname.to_string(), field);
        Ok(id)
    }

    pub(crate) fn drop_table(&mut self, tname: &str) -> Result<TableMeta, Error> {
        let table = self
            .tables
            .remove(tname)
            .ok_or_else(|| Error::schema(format!("no table `{tname}`")))?;
        self.release_table_names(&table);
        Ok(table)
    }

    pub(crate) fn drop_field(&mut self, tname: &str, fname: &str) -> Result<FieldMeta, Error> {
        let table = self.table_mut(tname)?;
        let field = table
            .fields
            .remove(fname)
            .ok_or_else(|| Error::schema(format!("no column `{fname}` in table `{tname}`")))?;
        self.release_field_names(&field);
        Ok(field)
    }

    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn bump_next_id(&mut self, seen: u32) {
        if seen >= self.next_id {
            self.next_id = seen + 1;
        }
    }

    /// Draws an anonymized name that is globally unique; collisions are
    /// rejected and retried.
    pub(crate) fn fresh_anon_name(&mut self, prefix: &str) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: u64 = rng.gen();
            let name = format!("{prefix}_{suffix:012x}");
            if self.anon_names.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Registers a name restored from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] on a duplicate: persisted anonymized
    /// names are unique by construction.
    pub(crate) fn restore_anon_name(&mut self, name: &str) -> Result<(), Error> {
        if !self.anon_names.insert(name.to_string()) {
            return Err(Error::corrupt(format!("anonymized name `{name}` appears twice")));
        }
        Ok(())
    }

    pub(crate) fn insert_restored_table(&mut self, table: TableMeta) {
        self.tables.insert(table.tname.clone(), table);
    }

    fn release_table_names(&mut self, table: &TableMeta) {
        self.anon_names.remove(&table.anon_name);
        self.anon_names.remove(&table.salt_name);
        for field in table.fields.values() {
            self.release_field_names(field);
        }
    }

    fn release_field_names(&mut self, field: &FieldMeta) {
        self.anon_names.remove(&field.anon_name);
        if field.has_salt {
            self.anon_names.remove(&field.salt_name);
        }
        for onion in field.onions.values() {
            self.anon_names.remove(&onion.anon_name);
        }
    }
}

pub(crate) fn restored_table(
    id: u32,
    tname: String,
    anon_name: String,
    salt_name: String,
    counter: u64,
) -> TableMeta {
    TableMeta { id, tname, anon_name, salt_name, counter, fields: BTreeMap::new() }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn restored_field(
    id: u32,
    fname: String,
    anon_name: String,
    ftype: FieldType,
    has_salt: bool,
    salt_name: String,
    counter: u64,
) -> FieldMeta {
    FieldMeta { id, fname, anon_name, ftype, has_salt, salt_name, counter, onions: BTreeMap::new() }
}

pub(crate) fn attach_restored_field(table: &mut TableMeta, field: FieldMeta) {
    table.fields.insert(field.fname.clone(), field);
}
