//! The schema catalog: every mutation is "compute new state → persist the
//! bookkeeping record → install in memory", serialized through one write
//! lock.
//!
//! Reads (lookups, snapshots, encrypt-to-level against a snapshot) run
//! concurrently under the read lock. The persisted record log is the
//! authoritative order; the in-memory tree is always a prefix of it, so a
//! crash between the backend UPDATE of a peel and its bookkeeping write
//! replays the peel on restart instead of losing it.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::Error;
use crate::layer::PeelDirective;
use crate::manager::CryptoManager;
use crate::onion::{choose_onion, FieldType, Onion, SecLevel, SqlOp};
use crate::schema::{self, FieldMeta, SchemaInfo};
use crate::serial;
use crate::store::{LayerRow, MetaStore, RecordRow, RetryPolicy};

/// The catalog. Owns the schema tree exclusively; everything else reads
/// snapshots.
#[derive(Debug)]
pub struct SchemaCatalog<S: MetaStore> {
    schema: RwLock<SchemaInfo>,
    store: S,
    retry: RetryPolicy,
}

impl<S: MetaStore> SchemaCatalog<S> {
    /// An empty catalog over a fresh store.
    #[must_use]
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { schema: RwLock::new(SchemaInfo::new()), store, retry }
    }

    /// Rebuilds the catalog from the bookkeeping store.
    ///
    /// Records are applied in ascending id order, so parents always
    /// precede their children; anything else is corruption.
    ///
    /// # Errors
    ///
    /// [`Error::Backend`] when the store cannot be read,
    /// [`Error::Corruption`] on any structural inconsistency.
    pub fn load(store: S, retry: RetryPolicy) -> Result<Self, Error> {
        let records = retry.run("load records", || store.load_records())?;
        let layer_rows = retry.run("load layers", || store.load_layers())?;

        let mut layers_by_onion: HashMap<u32, Vec<(u32, String)>> = HashMap::new();
        for row in layer_rows {
            layers_by_onion.entry(row.onion_id).or_default().push((row.position, row.serial));
        }

        let mut schema = SchemaInfo::new();
        // id → logical location, for resolving parent references.
        let mut table_names: HashMap<u32, String> = HashMap::new();
        let mut field_names: HashMap<u32, (String, String)> = HashMap::new();

        for row in records {
            let record = serial::Record::decode(&row.serial)?;
            if record.id != row.id {
                return Err(Error::corrupt(format!(
                    "row id {} disagrees with its record id {}",
                    row.id, record.id
                )));
            }
            schema.bump_next_id(record.id);
            match record.tag.as_str() {
                serial::TABLE_TAG => {
                    let table = serial::table_from_record(&record)?;
                    schema.restore_anon_name(table.anon_name())?;
                    schema.restore_anon_name(table.salt_name())?;
                    table_names.insert(table.id(), table.tname().to_string());
                    schema.insert_restored_table(table);
                }
                serial::FIELD_TAG => {
                    let parent = row.parent_id.ok_or_else(|| {
                        Error::corrupt(format!("field record {} has no parent", row.id))
                    })?;
                    let tname = table_names.get(&parent).ok_or_else(|| {
                        Error::corrupt(format!(
                            "field record {} arrived before its table {parent}",
                            row.id
                        ))
                    })?;
                    let field = serial::field_from_record(&record)?;
                    schema.restore_anon_name(field.anon_name())?;
                    if field.has_salt() {
                        schema.restore_anon_name(field.salt_name()?)?;
                    }
                    field_names.insert(field.id(), (tname.clone(), field.fname().to_string()));
                    let table = schema.table_mut(tname)?;
                    schema::attach_restored_field(table, field);
                }
                serial::ONION_TAG => {
                    let parent = row.parent_id.ok_or_else(|| {
                        Error::corrupt(format!("onion record {} has no parent", row.id))
                    })?;
                    let (tname, fname) = field_names.get(&parent).cloned().ok_or_else(|| {
                        Error::corrupt(format!(
                            "onion record {} arrived before its field {parent}",
                            row.id
                        ))
                    })?;
                    let levels = take_levels(&mut layers_by_onion, record.id)?;
                    let onion = serial::onion_from_record(&record, levels)?;
                    schema.restore_anon_name(onion.anon_name())?;
                    schema.table_mut(&tname)?.field_mut(&fname)?.insert_onion(onion);
                }
                other => {
                    return Err(Error::corrupt(format!("unknown record tag `{other}`")));
                }
            }
        }

        if let Some(&orphan) = layers_by_onion.keys().next() {
            return Err(Error::corrupt(format!("layer rows reference unknown onion {orphan}")));
        }

        info!(tables = schema.tables().count(), "schema catalog restored");
        Ok(Self { schema: RwLock::new(schema), store, retry })
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on a duplicate name, [`Error::Backend`] when the
    /// bookkeeping write fails after retries (nothing is installed).
    pub fn create_table(&self, tname: &str) -> Result<(), Error> {
        let mut schema = self.schema.write();
        let mut scratch = schema.clone();
        let id = scratch.create_table(tname)?;
        let row = RecordRow {
            id,
            parent_id: None,
            serial: serial::table_record(scratch.table(tname)?).encode(),
        };
        self.persist(&[row], &[])?;
        *schema = scratch;
        info!(table = tname, "table created");
        Ok(())
    }

    /// Creates a column with the initial onion layout for its type and
    /// sensitivity.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown table or duplicate column,
    /// [`Error::Backend`] when persistence fails (nothing is installed).
    pub fn create_field(
        &self,
        tname: &str,
        fname: &str,
        ftype: FieldType,
        sensitive: bool,
    ) -> Result<(), Error> {
        let mut schema = self.schema.write();
        let mut scratch = schema.clone();
        let field_id = scratch.create_field(tname, fname, ftype, sensitive)?;
        let table_id = scratch.table(tname)?.id();
        let field = scratch.field(tname, fname)?;

        let mut rows = vec![RecordRow {
            id: field_id,
            parent_id: Some(table_id),
            serial: serial::field_record(field).encode(),
        }];
        let mut layer_rows = Vec::new();
        for onion in field.onions() {
            rows.push(RecordRow {
                id: onion.id(),
                parent_id: Some(field_id),
                serial: serial::onion_record(onion).encode(),
            });
            for (position, &level) in onion.levels().iter().enumerate() {
                let position = u32::try_from(position).expect("stacks are tiny");
                layer_rows.push(LayerRow {
                    onion_id: onion.id(),
                    position,
                    serial: serial::layer_serial(level, position),
                });
            }
        }

        self.persist(&rows, &layer_rows)?;
        *schema = scratch;
        info!(table = tname, column = fname, "column created");
        Ok(())
    }

    /// Drops a table and all bookkeeping under it.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown table, [`Error::Backend`] on store
    /// failure (the in-memory tree is untouched).
    pub fn drop_table(&self, tname: &str) -> Result<(), Error> {
        let mut schema = self.schema.write();
        let table = schema.table(tname)?.clone();

        for field in table.fields() {
            for onion in field.onions() {
                for position in 0..onion.levels().len() {
                    let position = u32::try_from(position).expect("stacks are tiny");
                    self.retry
                        .run("delete layer", || self.store.delete_layer(onion.id(), position))?;
                }
                self.retry.run("delete onion", || self.store.delete_record(onion.id()))?;
            }
            self.retry.run("delete field", || self.store.delete_record(field.id()))?;
        }
        self.retry.run("delete table", || self.store.delete_record(table.id()))?;

        schema.drop_table(tname)?;
        info!(table = tname, "table dropped");
        Ok(())
    }

    /// Drops a column and all bookkeeping under it.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown table or column, [`Error::Backend`] on
    /// store failure (the in-memory tree is untouched).
    pub fn drop_field(&self, tname: &str, fname: &str) -> Result<(), Error> {
        let mut schema = self.schema.write();
        let field = schema.field(tname, fname)?.clone();

        for onion in field.onions() {
            for position in 0..onion.levels().len() {
                let position = u32::try_from(position).expect("stacks are tiny");
                self.retry
                    .run("delete layer", || self.store.delete_layer(onion.id(), position))?;
            }
            self.retry.run("delete onion", || self.store.delete_record(onion.id()))?;
        }
        self.retry.run("delete field", || self.store.delete_record(field.id()))?;

        schema.drop_field(tname, fname)?;
        info!(table = tname, column = fname, "column dropped");
        Ok(())
    }

    /// Peels the outermost layer of one onion: computes the directive,
    /// persists the layer removal, then installs the new level. No
    /// partial-peel state is ever observable; a store failure leaves the
    /// pre-peel state everywhere.
    ///
    /// # Errors
    ///
    /// [`Error::Level`] when only the innermost layer remains,
    /// [`Error::Backend`] when persistence fails after retries.
    pub fn peel(
        &self,
        tname: &str,
        fname: &str,
        onion: Onion,
        manager: &CryptoManager,
    ) -> Result<PeelDirective, Error> {
        let mut schema = self.schema.write();
        let field = schema.field(tname, fname)?;
        let ftype = field.ftype();
        let ometa = field.onion(onion)?;
        let levels = ometa.levels();
        if levels.len() == 1 {
            return Err(Error::Level {
                onion,
                from: ometa.current_level(),
                to: onion.plain_level(),
            });
        }
        let from = ometa.current_level();
        let to = levels[levels.len() - 2];
        let top_position = u32::try_from(levels.len() - 1).expect("stacks are tiny");
        let layer = manager.build_layer(from, ftype, ometa.anon_name())?;
        let onion_id = ometa.id();

        self.retry.run("peel layer", || self.store.delete_layer(onion_id, top_position))?;

        schema.table_mut(tname)?.field_mut(fname)?.onion_mut(onion)?.pop_level()?;
        info!(table = tname, column = fname, onion = onion.tag(), from = from.tag(), to = to.tag(), "layer peeled");
        Ok(PeelDirective { onion, from, to, action: layer.peel_action() })
    }

    /// Swaps the outermost layer of one onion for `level` (schema
    /// migration). Atomic with respect to peelers: it holds the same
    /// write lock.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when `level` is not on `onion`,
    /// [`Error::Backend`] on store failure.
    pub fn replace_top(
        &self,
        tname: &str,
        fname: &str,
        onion: Onion,
        level: SecLevel,
    ) -> Result<(), Error> {
        if level.onion() != onion || level.is_plain() {
            return Err(Error::schema(format!(
                "{} cannot be the outermost layer of {}",
                level.tag(),
                onion.tag()
            )));
        }
        let mut schema = self.schema.write();
        let ometa = schema.field(tname, fname)?.onion(onion)?;
        let top_position = u32::try_from(ometa.levels().len() - 1).expect("stacks are tiny");
        let row = LayerRow {
            onion_id: ometa.id(),
            position: top_position,
            serial: serial::layer_serial(level, top_position),
        };
        self.retry.run("replace layer", || self.store.put_layer(&row))?;

        schema.table_mut(tname)?.field_mut(fname)?.onion_mut(onion)?.replace_top_level(level);
        Ok(())
    }

    /// Leases the next unique id from a column's monotone counter. The
    /// bump is persisted before the lease is returned, so restarts never
    /// reuse an id.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown column, [`Error::Backend`] on store
    /// failure (the counter is not advanced).
    pub fn lease_uniq(&self, tname: &str, fname: &str) -> Result<u64, Error> {
        let mut schema = self.schema.write();
        let table_id = schema.table(tname)?.id();
        let field = schema.field(tname, fname)?;
        let leased = field.counter();

        let mut bumped = field.clone();
        bumped.set_counter(leased + 1);
        let row = RecordRow {
            id: bumped.id(),
            parent_id: Some(table_id),
            serial: serial::field_record(&bumped).encode(),
        };
        self.retry.run("lease uniq", || self.store.put_record(&row))?;

        schema.table_mut(tname)?.field_mut(fname)?.lease_uniq();
        debug!(table = tname, column = fname, leased, "unique id leased");
        Ok(leased)
    }

    /// A consistent snapshot of one column's metadata.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown table or column.
    pub fn field_snapshot(&self, tname: &str, fname: &str) -> Result<FieldMeta, Error> {
        Ok(self.schema.read().field(tname, fname)?.clone())
    }

    /// The current level of one onion.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] on unknown table, column, or onion.
    pub fn current_level(&self, tname: &str, fname: &str, onion: Onion) -> Result<SecLevel, Error> {
        Ok(self.schema.read().field(tname, fname)?.onion(onion)?.current_level())
    }

    /// Picks the onion (and target level) that should serve `op` on a
    /// column, minimizing peels with the fixed DET < OPE < AGG < SEARCH
    /// tie-break.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when the column cannot serve the operation at
    /// all.
    pub fn onion_for_op(
        &self,
        tname: &str,
        fname: &str,
        op: SqlOp,
    ) -> Result<(Onion, SecLevel), Error> {
        let schema = self.schema.read();
        let field = schema.field(tname, fname)?;
        choose_onion(op, field.ftype(), &field.onion_levels()).ok_or_else(|| {
            Error::schema(format!("column `{fname}` supports no onion for {op:?}"))
        })
    }

    /// A structural snapshot of the whole tree (restart verification,
    /// debugging).
    #[must_use]
    pub fn snapshot(&self) -> SchemaInfo {
        self.schema.read().clone()
    }

    /// Writes rows with retry; on failure deletes whatever already landed
    /// so the store never holds a half-created subtree.
    fn persist(&self, rows: &[RecordRow], layer_rows: &[LayerRow]) -> Result<(), Error> {
        let mut written_records = Vec::new();
        let mut written_layers = Vec::new();
        let mut failure = None;

        for row in rows {
            match self.retry.run("put record", || self.store.put_record(row)) {
                Ok(()) => written_records.push(row.id),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if failure.is_none() {
            for row in layer_rows {
                match self.retry.run("put layer", || self.store.put_layer(row)) {
                    Ok(()) => written_layers.push((row.onion_id, row.position)),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        let Some(err) = failure else { return Ok(()) };
        for (onion_id, position) in written_layers {
            let _ = self.store.delete_layer(onion_id, position);
        }
        for id in written_records {
            let _ = self.store.delete_record(id);
        }
        Err(err.into())
    }
}

fn take_levels(
    layers_by_onion: &mut HashMap<u32, Vec<(u32, String)>>,
    onion_id: u32,
) -> Result<Vec<SecLevel>, Error> {
    let rows = layers_by_onion
        .remove(&onion_id)
        .ok_or_else(|| Error::corrupt(format!("onion {onion_id} has no layer rows")))?;
    let mut levels = Vec::with_capacity(rows.len());
    for (expected, (position, serial)) in rows.iter().enumerate() {
        if *position != u32::try_from(expected).expect("stacks are tiny") {
            return Err(Error::corrupt(format!(
                "onion {onion_id} layer positions are not contiguous"
            )));
        }
        levels.push(serial::layer_from_serial(serial)?);
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::manager::EngineConfig;
    use crate::store::MemoryMetaStore;
    use secrecy::SecretVec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn manager() -> CryptoManager {
        let config = EngineConfig { paillier_bits: 256, ..EngineConfig::default() };
        CryptoManager::new(SecretVec::new(vec![0x42; 16]), &config).unwrap()
    }

    fn catalog() -> SchemaCatalog<MemoryMetaStore> {
        SchemaCatalog::new(MemoryMetaStore::new(), RetryPolicy::none())
    }

    fn populated() -> SchemaCatalog<MemoryMetaStore> {
        let cat = catalog();
        cat.create_table("users").unwrap();
        cat.create_field("users", "age", FieldType::Integer, true).unwrap();
        cat.create_field("users", "bio", FieldType::Text, true).unwrap();
        cat
    }

    /// Store wrapper that fails writes while the flag is raised.
    struct FlakyStore {
        inner: MemoryMetaStore,
        failing: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::WriteFailed("injected".into()));
            }
            Ok(())
        }
    }

    impl MetaStore for FlakyStore {
        fn put_record(&self, row: &RecordRow) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put_record(row)
        }
        fn delete_record(&self, id: u32) -> Result<(), StoreError> {
            self.inner.delete_record(id)
        }
        fn put_layer(&self, row: &LayerRow) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put_layer(row)
        }
        fn delete_layer(&self, onion_id: u32, position: u32) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete_layer(onion_id, position)
        }
        fn load_records(&self) -> Result<Vec<RecordRow>, StoreError> {
            self.inner.load_records()
        }
        fn load_layers(&self) -> Result<Vec<LayerRow>, StoreError> {
            self.inner.load_layers()
        }
    }

    #[test]
    fn test_create_then_reload_round_trips() {
        let cat = populated();
        let before = cat.snapshot();

        let store = cat.store;
        let reloaded = SchemaCatalog::load(store, RetryPolicy::none()).unwrap();
        assert_eq!(reloaded.snapshot(), before);
    }

    #[test]
    fn test_peel_persists_and_updates_level() {
        let cat = populated();
        let m = manager();
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::RndDet);

        let directive = cat.peel("users", "age", Onion::Det, &m).unwrap();
        assert_eq!(directive.from, SecLevel::RndDet);
        assert_eq!(directive.to, SecLevel::Det);
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::Det);

        // Other onions and fields are untouched.
        assert_eq!(cat.current_level("users", "age", Onion::Ope).unwrap(), SecLevel::RndOpe);
        assert_eq!(cat.current_level("users", "bio", Onion::Det).unwrap(), SecLevel::RndDet);

        // The peel survives a reload.
        let reloaded = SchemaCatalog::load(cat.store, RetryPolicy::none()).unwrap();
        assert_eq!(reloaded.current_level("users", "age", Onion::Det).unwrap(), SecLevel::Det);
    }

    #[test]
    fn test_peel_stops_at_innermost() {
        let cat = populated();
        let m = manager();
        cat.peel("users", "age", Onion::Det, &m).unwrap();
        cat.peel("users", "age", Onion::Det, &m).unwrap();
        let err = cat.peel("users", "age", Onion::Det, &m).unwrap_err();
        assert!(matches!(err, Error::Level { .. }));
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::DetJoin);
    }

    #[test]
    fn test_failed_peel_rolls_back() {
        let failing = Arc::new(AtomicBool::new(false));
        let store = FlakyStore { inner: MemoryMetaStore::new(), failing: Arc::clone(&failing) };
        let cat = SchemaCatalog::new(store, RetryPolicy::none());
        let m = manager();
        cat.create_table("users").unwrap();
        cat.create_field("users", "age", FieldType::Integer, true).unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = cat.peel("users", "age", Onion::Det, &m).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        // Pre-peel state everywhere.
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::RndDet);

        failing.store(false, Ordering::SeqCst);
        cat.peel("users", "age", Onion::Det, &m).unwrap();
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::Det);
    }

    #[test]
    fn test_failed_create_leaves_no_orphan_rows() {
        let failing = Arc::new(AtomicBool::new(false));
        let store = FlakyStore { inner: MemoryMetaStore::new(), failing: Arc::clone(&failing) };
        let cat = SchemaCatalog::new(store, RetryPolicy::none());
        cat.create_table("users").unwrap();

        failing.store(true, Ordering::SeqCst);
        assert!(cat.create_field("users", "age", FieldType::Integer, true).is_err());
        failing.store(false, Ordering::SeqCst);

        assert!(cat.field_snapshot("users", "age").is_err());
        // Reload sees only the table.
        let reloaded = SchemaCatalog::load(cat.store.inner, RetryPolicy::none()).unwrap();
        assert!(reloaded.snapshot().table("users").is_ok());
        assert!(reloaded.field_snapshot("users", "age").is_err());
    }

    #[test]
    fn test_lease_uniq_monotone_across_reload() {
        let cat = populated();
        assert_eq!(cat.lease_uniq("users", "age").unwrap(), 0);
        assert_eq!(cat.lease_uniq("users", "age").unwrap(), 1);

        let reloaded = SchemaCatalog::load(cat.store, RetryPolicy::none()).unwrap();
        assert_eq!(reloaded.lease_uniq("users", "age").unwrap(), 2);
    }

    #[test]
    fn test_drop_table_clears_store() {
        let cat = populated();
        cat.drop_table("users").unwrap();
        assert!(cat.field_snapshot("users", "age").is_err());

        let reloaded = SchemaCatalog::load(cat.store, RetryPolicy::none()).unwrap();
        assert!(reloaded.snapshot().table("users").is_err());
    }

    #[test]
    fn test_drop_field_keeps_siblings() {
        let cat = populated();
        cat.drop_field("users", "age").unwrap();
        assert!(cat.field_snapshot("users", "age").is_err());
        assert!(cat.field_snapshot("users", "bio").is_ok());

        let reloaded = SchemaCatalog::load(cat.store, RetryPolicy::none()).unwrap();
        assert!(reloaded.field_snapshot("users", "bio").is_ok());
    }

    #[test]
    fn test_child_before_parent_is_corruption() {
        let cat = populated();
        let store = cat.store;
        // Orphan every field by deleting the table record.
        let table_id = {
            let rows = store.load_records().unwrap();
            rows.iter()
                .find(|r| r.serial.starts_with(serial::TABLE_TAG))
                .map(|r| r.id)
                .unwrap()
        };
        store.delete_record(table_id).unwrap();
        let err = SchemaCatalog::load(store, RetryPolicy::none()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_replace_top_swaps_level() {
        let cat = populated();
        let m = manager();
        cat.peel("users", "age", Onion::Det, &m).unwrap();
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::Det);

        cat.replace_top("users", "age", Onion::Det, SecLevel::RndDet).unwrap();
        assert_eq!(cat.current_level("users", "age", Onion::Det).unwrap(), SecLevel::RndDet);

        let reloaded = SchemaCatalog::load(cat.store, RetryPolicy::none()).unwrap();
        assert_eq!(reloaded.current_level("users", "age", Onion::Det).unwrap(), SecLevel::RndDet);

        assert!(cat_err_is_schema(
            SchemaCatalog::new(MemoryMetaStore::new(), RetryPolicy::none())
                .replace_top("users", "age", Onion::Det, SecLevel::Hom)
        ));
    }

    fn cat_err_is_schema(result: Result<(), Error>) -> bool {
        matches!(result, Err(Error::Schema(_)))
    }

    #[test]
    fn test_onion_for_op_selection() {
        let cat = populated();
        let m = manager();
        assert_eq!(
            cat.onion_for_op("users", "age", SqlOp::Sum).unwrap(),
            (Onion::Agg, SecLevel::Hom)
        );
        assert_eq!(
            cat.onion_for_op("users", "bio", SqlOp::Search).unwrap(),
            (Onion::Search, SecLevel::Swp)
        );
        // After a peel to DET, equality needs no further peeling.
        cat.peel("users", "age", Onion::Det, &m).unwrap();
        assert_eq!(
            cat.onion_for_op("users", "age", SqlOp::Eq).unwrap(),
            (Onion::Det, SecLevel::Det)
        );
        // Integer columns have no SEARCH onion.
        assert!(cat.onion_for_op("users", "age", SqlOp::Search).is_err());
    }
}
