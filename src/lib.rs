#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! hrstore - Embedded record store for HR administration
//!
//! hrstore persists users, reference data (departments, roles) and employee
//! registrations in a local SQLite database and exposes generic,
//! per-collection CRUD to an application layer.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `logging` | `logging::init` helper for applications without a subscriber | `tracing-subscriber` |
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`database`]**: The record store
//!   - `core`: SQLite connection management, collection declarations and the
//!     versioned schema step
//!   - `collection`: Per-collection CRUD, one transaction per operation
//!   - `handle`: Lazily opened shared connection with timeouts and cancellation
//!   - `store`: Async `CollectionStore` and typed entities
//!
//! - **[`auth`]**: Salted password hashing and credential checks over `users`
//!
//! - **[`hr`]**: HR collections (`users`, `items`, `data`, `Department`,
//!   `Role`, `Registration`) and their typed records
//!
//! - **[`config`]**: Configuration management and store diagnostics
//!
//! # Quick Start Examples
//!
//! ## Opening the HR store
//!
//! ```rust,ignore
//! use hrstore::{open_store, StoreConfig};
//!
//! let config = StoreConfig::new(&None)?;
//! let store = open_store(&config).await?;
//!
//! let department = store.create("Department", json!({"value": "Engineering"})).await?;
//! for record in store.get_all("Department").await? {
//!     println!("{} -> {}", record["id"], record["value"]);
//! }
//! ```
//!
//! ## Checking credentials
//!
//! ```rust,ignore
//! use hrstore::AuthGate;
//!
//! let gate = AuthGate::new(store.clone());
//! if gate.validate_credentials("a", "a").await? {
//!     println!("welcome");
//! }
//! ```
//!
//! ## Bounded operations
//!
//! ```rust,ignore
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let store = store.with_cancellation(token.clone());
//!
//! // cancelling stops the wait and rolls back an uncommitted write
//! token.cancel();
//! ```

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod hr;

#[cfg(feature = "logging")]
pub mod logging;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, get_store_info, open_store, CollectionInfo, StoreConfig, StoreInfo};

// =============================================================================
// Errors
// =============================================================================

pub use error::{StoreError, StoreResult};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

// Core database types
pub use database::{
    CollectionSpec, DatabaseConn, KeyPolicy, Reference, SchemaManager, SchemaStatus, UpgradeReport,
};

// Records and the store
pub use database::{
    CollectionStore, ConnectionHandle, Entity, OpenOptions, Record, RecordKey,
};

// =============================================================================
// Auth and HR domain
// =============================================================================

pub use auth::{
    default_seed_users, hash_password, verify_password, AuthGate, AuthenticatedUser, SeedUser,
};

pub use hr::{
    hr_collections, DataEntry, ReferenceItem, ReferenceKind, Registration, User, HR_DB_NAME,
    HR_SCHEMA_VERSION,
};
