//! Database module
//!
//! This module provides the embedded record store, organized into:
//!
//! - **core**: Core database infrastructure (SQLite connections, schema management)
//! - **record**: Record and key representation shared by every collection
//! - **collection**: Synchronous CRUD on one collection, one transaction per call
//! - **handle**: Lazily opened shared connection with bounded waits
//! - **store**: Async `CollectionStore` used by applications
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # Collection declarations, versioned creation, catalog
//! │
//! ├── record          # RecordKey, Record, key split/inject
//! ├── collection      # CollectionRepository (blocking)
//! ├── handle          # ConnectionHandle (lazy open, timeout, cancellation)
//! └── store           # CollectionStore (async facade, typed entities)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use hrstore::database::{CollectionSpec, CollectionStore, OpenOptions};
//! use serde_json::json;
//!
//! let specs = vec![
//!     CollectionSpec::natural("users", "username"),
//!     CollectionSpec::auto_increment("Role", "id").with_required(&["value"]),
//! ];
//! let store = CollectionStore::new(OpenOptions::at_path("/tmp/hr.sqlite3", 1, specs))?;
//!
//! let key = store.create("Role", json!({"value": "Manager"})).await?;
//! let role = store.get_one("Role", key).await?;
//! ```

pub mod collection;
pub mod core;
pub mod handle;
pub mod record;
pub mod store;

pub use collection::CollectionRepository;
pub use core::{
    validate_collection_name, validate_specs, CatalogEntry, CollectionSpec, DatabaseConn,
    KeyPolicy, Reference, SchemaDefinitions, SchemaManager, SchemaStatus, UpgradeReport,
};
pub use handle::{ConnectionHandle, OpenOptions, SharedConnection};
pub use record::{into_record, Record, RecordKey};
pub use store::{CollectionStore, Entity};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
