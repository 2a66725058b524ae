//! End-to-end scenarios: the engine, catalog, and backend UDF reference
//! functions playing the roles of proxy and DBMS.

use secrecy::SecretVec;
use sogandb::catalog::SchemaCatalog;
use sogandb::crypto::ecjoin;
use sogandb::error::Error;
use sogandb::layer::PeelAction;
use sogandb::manager::{CryptoManager, EngineConfig};
use sogandb::onion::{FieldType, Onion, SecLevel, SqlOp};
use sogandb::store::{MemoryMetaStore, RetryPolicy};
use sogandb::udf;
use sogandb::value::Value;
use sogandb_meta_file::FileMetaStore;
use tempfile::TempDir;

fn test_config() -> EngineConfig {
    // A small Paillier modulus keeps the suite fast; it still holds i64.
    EngineConfig { paillier_bits: 256, ..EngineConfig::default() }
}

fn manager() -> CryptoManager {
    CryptoManager::new(SecretVec::new(vec![0x42; 16]), &test_config()).unwrap()
}

fn catalog() -> SchemaCatalog<MemoryMetaStore> {
    SchemaCatalog::new(MemoryMetaStore::new(), RetryPolicy::default())
}

#[test]
fn test_integer_equality_scenario() {
    let m = manager();
    let cat = catalog();
    cat.create_table("orders").unwrap();
    cat.create_field("orders", "qty", FieldType::Integer, true).unwrap();

    // An equality query forces the DET onion down to its deterministic
    // level first.
    let (onion, target) = cat.onion_for_op("orders", "qty", SqlOp::Eq).unwrap();
    assert_eq!((onion, target), (Onion::Det, SecLevel::Det));
    cat.peel("orders", "qty", Onion::Det, &m).unwrap();

    let field = cat.field_snapshot("orders", "qty").unwrap();
    let det = field.onion(Onion::Det).unwrap();

    // Two inserts of 42 store identical DET cells even with fresh salts.
    let first = m.encrypt_cell(det, field.ftype(), &42u64.into(), Some(m.fresh_salt())).unwrap();
    let second = m.encrypt_cell(det, field.ftype(), &42u64.into(), Some(m.fresh_salt())).unwrap();
    assert_eq!(first, second);

    // And the OPE onion of 42 sorts below that of 43.
    cat.peel("orders", "qty", Onion::Ope, &m).unwrap();
    let field = cat.field_snapshot("orders", "qty").unwrap();
    let ope = field.onion(Onion::Ope).unwrap();
    let of_42 = m.encrypt_cell(ope, field.ftype(), &42u64.into(), None).unwrap();
    let of_43 = m.encrypt_cell(ope, field.ftype(), &43u64.into(), None).unwrap();
    assert!(of_42.as_int().unwrap() < of_43.as_int().unwrap());
}

#[test]
fn test_range_and_aggregation_scenario() {
    let m = manager();
    let cat = catalog();
    cat.create_table("sales").unwrap();
    cat.create_field("sales", "amount", FieldType::Integer, true).unwrap();

    let field = cat.field_snapshot("sales", "amount").unwrap();
    let agg = field.onion(Onion::Agg).unwrap();
    let n2 = m.agg_public_modulus();

    // INSERT three rows; the AGG onion is Paillier at the top already.
    let rows: Vec<Value> = [10u64, 20, 30]
        .iter()
        .map(|&v| m.encrypt_cell(agg, field.ftype(), &v.into(), None).unwrap())
        .collect();

    // SUM(amount) becomes the multiplicative aggregate over the cells.
    let mut sum = udf::PaillierSum::new();
    for row in &rows {
        sum.add(Some(row.as_bytes().unwrap()), &n2).unwrap();
    }
    let total = m.paillier().decrypt_i64(&sum.finish()).unwrap();
    assert_eq!(total, 60);

    // amount > 15 compares OPE cells against the encrypted constant.
    cat.peel("sales", "amount", Onion::Ope, &m).unwrap();
    let field = cat.field_snapshot("sales", "amount").unwrap();
    let ope = field.onion(Onion::Ope).unwrap();
    let threshold =
        m.encrypt_cell(ope, field.ftype(), &15u64.into(), None).unwrap().as_int().unwrap();
    let matching: Vec<u64> = [10u64, 20, 30]
        .iter()
        .filter(|&&v| {
            let cell = m.encrypt_cell(ope, field.ftype(), &v.into(), None).unwrap();
            cell.as_int().unwrap() > threshold
        })
        .copied()
        .collect();
    assert_eq!(matching, vec![20, 30]);
}

#[test]
fn test_cross_column_join_scenario() {
    let m = manager();
    let cat = catalog();
    cat.create_table("customers").unwrap();
    cat.create_field("customers", "cid", FieldType::Integer, true).unwrap();
    cat.create_table("orders").unwrap();
    cat.create_field("orders", "customer", FieldType::Integer, true).unwrap();

    let a = cat.field_snapshot("customers", "cid").unwrap();
    let b = cat.field_snapshot("orders", "customer").unwrap();
    let label_a = a.onion(Onion::Det).unwrap().anon_name().to_string();
    let label_b = b.onion(Onion::Det).unwrap().anon_name().to_string();

    let ec = m.ec_join().unwrap();
    let key_a = m.ec_column_key(&label_a);
    let key_b = m.ec_column_key(&label_b);

    let a_cells: Vec<_> = [1u64, 2, 3].iter().map(|v| ec.encrypt(&key_a, &v.to_be_bytes())).collect();
    let b_cells: Vec<_> = [2u64, 3, 4].iter().map(|v| ec.encrypt(&key_b, &v.to_be_bytes())).collect();

    // The proxy derives delta from the two keys alone; the DBMS adjusts
    // B's cells in place and joins on byte equality.
    let delta = m.ec_delta(&label_b, &label_a);
    let adjusted: Vec<_> =
        b_cells.iter().map(|ct| ecjoin::adjust(&delta, ct).unwrap()).collect();

    let matches: Vec<(usize, usize)> = a_cells
        .iter()
        .enumerate()
        .flat_map(|(i, a_cell)| {
            adjusted
                .iter()
                .enumerate()
                .filter(move |(_, b_cell)| a_cell == *b_cell)
                .map(move |(j, _)| (i, j))
        })
        .collect();
    // cid values {1,2,3} vs customer values {2,3,4}: exactly 2=2 and 3=3.
    assert_eq!(matches, vec![(1, 0), (2, 1)]);
}

#[test]
fn test_text_search_scenario() {
    let m = manager();
    let cat = catalog();
    cat.create_table("notes").unwrap();
    cat.create_field("notes", "body", FieldType::Text, true).unwrap();

    let field = cat.field_snapshot("notes", "body").unwrap();
    let search = field.onion(Onion::Search).unwrap();
    let label = search.anon_name();

    let cell =
        m.encrypt_cell(search, field.ftype(), &"alpha beta gamma".into(), None).unwrap();
    let doc = cell.as_bytes().unwrap();

    let tok_beta = m.search_token(label, b"beta").unwrap();
    let tok_delta = m.search_token(label, b"delta").unwrap();
    assert!(udf::search_swp(doc, &tok_beta.to_bytes()).unwrap());
    assert!(!udf::search_swp(doc, &tok_delta.to_bytes()).unwrap());

    // The proxy can still recover the exact document.
    let decrypted = m.decrypt_cell(search, field.ftype(), &cell, None).unwrap();
    assert_eq!(decrypted, Value::from("alpha beta gamma"));
}

#[test]
fn test_peel_on_demand_scenario() {
    let dir = TempDir::new().unwrap();
    let store = FileMetaStore::init(dir.path()).unwrap();
    let m = manager();
    let cat = SchemaCatalog::new(store, RetryPolicy::default());
    cat.create_table("users").unwrap();
    cat.create_field("users", "age", FieldType::Integer, true).unwrap();

    let field = cat.field_snapshot("users", "age").unwrap();
    let det = field.onion(Onion::Det).unwrap();
    let salt = 9_151_u64;
    let stored = m
        .encrypt_cell(det, field.ftype(), &42u64.into(), Some(salt))
        .unwrap()
        .as_int()
        .unwrap();

    // A SELECT needs equality but the column sits at RND_DET: the engine
    // emits the one-layer UPDATE and persists the peel.
    let directive = cat.peel("users", "age", Onion::Det, &m).unwrap();
    assert_eq!(directive.from, SecLevel::RndDet);
    let PeelAction::Udf { name, key, uses_salt } = directive.action else {
        panic!("RND peels through a UDF");
    };
    assert_eq!(name, "decrypt_int_sem");
    assert!(uses_salt);

    // The DBMS executes `UPDATE users SET age = decrypt_int_sem(age, k,
    // salt)`.
    let updated = udf::decrypt_int_sem(stored, &key, salt).unwrap();

    // Re-emitted SELECT: the constant encrypted to the new top level
    // matches the updated cell.
    let field = cat.field_snapshot("users", "age").unwrap();
    let det = field.onion(Onion::Det).unwrap();
    assert_eq!(det.current_level(), SecLevel::Det);
    let constant = m.encrypt_cell(det, field.ftype(), &42u64.into(), None).unwrap();
    assert_eq!(constant.as_int().unwrap(), updated);

    // After the peel record landed, a restart observes the peeled level
    // and does not re-issue the UPDATE.
    drop(cat);
    let reopened = FileMetaStore::new(dir.path()).unwrap();
    let restarted = SchemaCatalog::load(reopened, RetryPolicy::default()).unwrap();
    assert_eq!(
        restarted.current_level("users", "age", Onion::Det).unwrap(),
        SecLevel::Det
    );
}

#[test]
fn test_restart_scenario_rebuilds_identical_tree() {
    let dir = TempDir::new().unwrap();
    let store = FileMetaStore::init(dir.path()).unwrap();
    let m = manager();
    let cat = SchemaCatalog::new(store, RetryPolicy::default());

    cat.create_table("users").unwrap();
    cat.create_field("users", "age", FieldType::Integer, true).unwrap();
    cat.create_field("users", "name", FieldType::Text, true).unwrap();
    cat.create_field("users", "uid", FieldType::Integer, false).unwrap();
    cat.create_table("notes").unwrap();
    cat.create_field("notes", "body", FieldType::Text, true).unwrap();
    cat.create_field("notes", "score", FieldType::Integer, true).unwrap();

    // Mix in some history: peels and counter leases.
    cat.peel("users", "age", Onion::Det, &m).unwrap();
    cat.peel("notes", "score", Onion::Ope, &m).unwrap();
    cat.lease_uniq("users", "age").unwrap();
    cat.lease_uniq("users", "age").unwrap();

    let before = cat.snapshot();
    drop(cat);

    let reopened = FileMetaStore::new(dir.path()).unwrap();
    let restarted = SchemaCatalog::load(reopened, RetryPolicy::default()).unwrap();
    assert_eq!(restarted.snapshot(), before);

    // Counters continue, never repeat.
    assert_eq!(restarted.lease_uniq("users", "age").unwrap(), 2);

    // Keys re-derive from the same master: ciphertexts written before the
    // restart still decrypt.
    let field = restarted.field_snapshot("users", "name").unwrap();
    let det = field.onion(Onion::Det).unwrap();
    let salt = 7_u64;
    let cell = m.encrypt_cell(det, field.ftype(), &"ada".into(), Some(salt)).unwrap();
    let m2 = manager();
    assert_eq!(
        m2.decrypt_cell(det, field.ftype(), &cell, Some(salt)).unwrap(),
        Value::from("ada")
    );
}

#[test]
fn test_round_trip_every_onion_both_types() {
    let m = manager();
    let cat = catalog();
    cat.create_table("t").unwrap();
    cat.create_field("t", "n", FieldType::Integer, true).unwrap();
    cat.create_field("t", "s", FieldType::Text, true).unwrap();

    let salt = Some(31_337_u64);

    let n = cat.field_snapshot("t", "n").unwrap();
    for onion in n.onions() {
        let ct = m.encrypt_cell(onion, n.ftype(), &42u64.into(), salt).unwrap();
        let pt = m.decrypt_cell(onion, n.ftype(), &ct, salt).unwrap();
        assert_eq!(pt, Value::Int(42), "integer round trip on {}", onion.onion().tag());
    }

    let s = cat.field_snapshot("t", "s").unwrap();
    for onion in s.onions() {
        if onion.onion() == Onion::Ope {
            // Text OPE is a lossy prefix by construction.
            continue;
        }
        let pt = Value::from("o'brien, § and spaces");
        let ct = m.encrypt_cell(onion, s.ftype(), &pt, salt).unwrap();
        assert_eq!(
            m.decrypt_cell(onion, s.ftype(), &ct, salt).unwrap(),
            pt,
            "text round trip on {}",
            onion.onion().tag()
        );
    }
}

#[test]
fn test_text_ope_prefix_ordering() {
    let m = manager();
    let cat = catalog();
    cat.create_table("t").unwrap();
    cat.create_field("t", "s", FieldType::Text, true).unwrap();
    cat.peel("t", "s", Onion::Ope, &m).unwrap();

    let field = cat.field_snapshot("t", "s").unwrap();
    let ope = field.onion(Onion::Ope).unwrap();
    let enc = |text: &str| {
        m.encrypt_cell(ope, field.ftype(), &text.into(), None).unwrap().as_int().unwrap()
    };
    assert!(enc("Alpha") < enc("beta"));
    assert!(enc("beta") < enc("GAMMA"));
    assert_eq!(enc("Beta"), enc("beta"));
}

#[test]
fn test_peel_errors_do_not_change_state() {
    let m = manager();
    let cat = catalog();
    cat.create_table("t").unwrap();
    cat.create_field("t", "n", FieldType::Integer, true).unwrap();

    cat.peel("t", "n", Onion::Agg, &m).unwrap_err();
    assert_eq!(cat.current_level("t", "n", Onion::Agg).unwrap(), SecLevel::Hom);

    let err = cat.peel("t", "n", Onion::Search, &m).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}
