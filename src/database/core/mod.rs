//! Core database infrastructure
//!
//! This module provides the foundational database components used by the store:
//! - `DatabaseConn`: Core SQLite connection wrapper with configuration
//! - `SchemaManager`: Versioned collection creation and catalog access
//! - `CollectionSpec` / `KeyPolicy`: Declarative collection definitions

mod connection;
mod schema;

pub use connection::DatabaseConn;
pub(crate) use schema::quoted_table;
pub use schema::{
    validate_collection_name, validate_specs, CatalogEntry, CollectionSpec, KeyPolicy, Reference,
    SchemaDefinitions, SchemaManager, SchemaStatus, UpgradeReport, MAX_COLLECTION_NAME_LEN,
};
