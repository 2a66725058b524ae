//! # `SoganDB`
//!
//! Onion encryption engine and schema metadata core for an SQL-aware
//! encrypting proxy. Every sensitive column is stored as a stack of
//! ciphertext columns ("onions"), each specialized for one class of SQL —
//! equality, ranges, aggregation, keyword search, cross-column joins —
//! and each an ordered stack of encryption layers that can be peeled on
//! demand when a query needs more functionality than the current layer
//! allows.
//!
//! ## Features
//!
//! - Layered onion encryption with controlled peeling
//! - Per-(column, layer) key derivation from a single master secret
//! - Deterministic, order-preserving, homomorphic (Paillier), searchable
//!   (SWP), and EC-joinable schemes
//! - Versioned schema metadata persisted through a pluggable bookkeeping
//!   store, reloadable after restart
//! - Reference implementations of the backend UDF contract
//!
//! ## Example
//!
//! ```rust,ignore
//! use sogandb::prelude::*;
//!
//! let manager = CryptoManager::new(master_secret, &EngineConfig::default())?;
//! let catalog = SchemaCatalog::new(MemoryMetaStore::new(), RetryPolicy::default());
//!
//! catalog.create_table("users")?;
//! catalog.create_field("users", "age", FieldType::Integer, true)?;
//!
//! let field = catalog.field_snapshot("users", "age")?;
//! let onion = field.onion(Onion::Det)?;
//! let cell = manager.encrypt_cell(onion, field.ftype(), &42u64.into(), Some(salt))?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod crypto;
pub mod error;
pub mod kdf;
pub mod layer;
pub mod manager;
pub mod onion;
pub mod schema;
pub mod serial;
pub mod store;
pub mod udf;
pub mod value;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::catalog::SchemaCatalog;
    pub use crate::error::{Error, StoreError};
    pub use crate::kdf::{MasterKey, JOIN_LABEL, MASTER_KEY_SIZE};
    pub use crate::layer::{PeelAction, PeelDirective};
    pub use crate::manager::{CryptoManager, EngineConfig};
    pub use crate::onion::{FieldType, Onion, SecLevel, SqlOp};
    pub use crate::store::{MemoryMetaStore, MetaStore, RetryPolicy};
    pub use crate::value::Value;
}
