//! Database schema management
//!
//! This module provides collection declarations and the schema manager that
//! brings an opened database up to the version the code expects. Each
//! collection is backed by its own table; a catalog table remembers the key
//! policy every collection was created with.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::connection::table_exists;
use crate::error::{StoreError, StoreResult};

/// Maximum length of a collection name
pub const MAX_COLLECTION_NAME_LEN: usize = 64;

const META_TABLE_NAME: &str = "hrstore_meta";
const CATALOG_TABLE_NAME: &str = "hrstore_collections";
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Rule for identifying the records of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Integer surrogate key assigned by the engine when the record omits it
    AutoIncrement { key_field: String },
    /// Unique string key carried by the record itself
    Natural { key_field: String },
}

impl KeyPolicy {
    pub fn auto_increment(key_field: &str) -> Self {
        KeyPolicy::AutoIncrement {
            key_field: key_field.to_string(),
        }
    }

    pub fn natural(key_field: &str) -> Self {
        KeyPolicy::Natural {
            key_field: key_field.to_string(),
        }
    }

    /// Name of the record field that holds the key
    pub fn key_field(&self) -> &str {
        match self {
            KeyPolicy::AutoIncrement { key_field } | KeyPolicy::Natural { key_field } => key_field,
        }
    }

    pub fn is_auto_increment(&self) -> bool {
        matches!(self, KeyPolicy::AutoIncrement { .. })
    }

    /// Policy name as persisted in the catalog
    pub fn kind(&self) -> &'static str {
        match self {
            KeyPolicy::AutoIncrement { .. } => "auto_increment",
            KeyPolicy::Natural { .. } => "natural",
        }
    }

    fn from_parts(kind: &str, key_field: &str) -> Option<Self> {
        match kind {
            "auto_increment" => Some(Self::auto_increment(key_field)),
            "natural" => Some(Self::natural(key_field)),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.key_field())
    }
}

/// A field that must name an existing record of another auto-increment collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub field: String,
    pub target: String,
}

/// Declaration of one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub key_policy: KeyPolicy,
    /// Fields that must be present and non-empty on every stored record
    pub required_fields: Vec<String>,
    pub references: Vec<Reference>,
}

impl CollectionSpec {
    pub fn new(name: &str, key_policy: KeyPolicy) -> Self {
        Self {
            name: name.to_string(),
            key_policy,
            required_fields: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Collection keyed by an engine-assigned integer
    pub fn auto_increment(name: &str, key_field: &str) -> Self {
        Self::new(name, KeyPolicy::auto_increment(key_field))
    }

    /// Collection keyed by a unique string field of the record
    pub fn natural(name: &str, key_field: &str) -> Self {
        Self::new(name, KeyPolicy::natural(key_field))
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required_fields
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn with_reference(mut self, field: &str, target: &str) -> Self {
        self.references.push(Reference {
            field: field.to_string(),
            target: target.to_string(),
        });
        self
    }

    /// Name of the backing table
    pub fn table_name(&self) -> String {
        table_name(&self.name)
    }
}

pub(crate) fn table_name(collection: &str) -> String {
    format!("coll_{}", collection)
}

/// Quoted table identifier, safe because collection names are validated
pub(crate) fn quoted_table(collection: &str) -> String {
    format!("\"{}\"", table_name(collection))
}

/// Check that a collection name is usable as part of a table identifier
pub fn validate_collection_name(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(StoreError::validation(format!(
            "invalid collection name '{}': expected a letter followed by letters, digits or '_' (max {} chars)",
            name, MAX_COLLECTION_NAME_LEN
        )));
    }
    Ok(())
}

/// Validate a full declaration list before touching the database
pub fn validate_specs(specs: &[CollectionSpec]) -> StoreResult<()> {
    // SQLite table names are case-insensitive
    let mut seen = HashSet::new();
    for spec in specs {
        validate_collection_name(&spec.name)?;
        if spec.key_policy.key_field().is_empty() {
            return Err(StoreError::validation(format!(
                "collection '{}' declares an empty key field",
                spec.name
            )));
        }
        if !seen.insert(spec.name.to_ascii_lowercase()) {
            return Err(StoreError::validation(format!(
                "collection '{}' is declared more than once",
                spec.name
            )));
        }
    }

    for spec in specs {
        for reference in &spec.references {
            let target = specs.iter().find(|s| s.name == reference.target);
            match target {
                Some(t) if t.key_policy.is_auto_increment() => {}
                Some(_) => {
                    return Err(StoreError::validation(format!(
                        "'{}.{}' references '{}', which does not use integer keys",
                        spec.name, reference.field, reference.target
                    )))
                }
                None => {
                    return Err(StoreError::validation(format!(
                        "'{}.{}' references undeclared collection '{}'",
                        spec.name, reference.field, reference.target
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Schema definitions for the engine tables and collection tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the meta table (tracks schema version)
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS hrstore_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
    "#;

    /// SQL for creating the collection catalog
    pub const CATALOG_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS hrstore_collections (
            name TEXT PRIMARY KEY,
            key_policy TEXT NOT NULL,
            key_field TEXT NOT NULL,
            created_version INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
    "#;

    /// SQL for creating the backing table of one collection
    ///
    /// Fails when any schema object already uses the table name; callers check
    /// for an existing table first.
    pub fn collection_table(spec: &CollectionSpec) -> String {
        let table = quoted_table(&spec.name);
        match spec.key_policy {
            KeyPolicy::AutoIncrement { .. } => format!(
                "CREATE TABLE {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    body TEXT NOT NULL
                )",
                table
            ),
            KeyPolicy::Natural { .. } => format!(
                "CREATE TABLE {} (
                    key TEXT PRIMARY KEY NOT NULL,
                    body TEXT NOT NULL
                )",
                table
            ),
        }
    }
}

/// Catalog row describing a created collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub key_policy: KeyPolicy,
    pub created_version: u32,
    /// Unix timestamp
    pub created_at: i64,
}

/// Outcome of [`SchemaManager::ensure_schema`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from: u32,
    pub to: u32,
    /// Collections created by this call
    pub created: Vec<String>,
}

impl UpgradeReport {
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.created.is_empty()
    }
}

/// Status of the database schema relative to a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database is not initialized (fresh database)
    NotInitialized,

    /// Schema version matches and every declared collection exists
    Current,

    /// Stored version is behind the requested one
    NeedsUpgrade { from: u32, to: u32 },

    /// Version matches but declared collections are missing
    Incomplete { missing: Vec<String> },

    /// Database is from a newer version (incompatible)
    Incompatible {
        database_version: u32,
        required_version: u32,
    },
}

/// Schema manager for the record database
///
/// Handles version checking and the one-time collection creation step.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Bring the database to `version` with every collection in `specs` present
    ///
    /// Existing collections are never recreated or truncated, so calling this
    /// again with the same arguments is a no-op. The creation step runs in a
    /// single transaction; on failure nothing from this call is kept and the
    /// next open runs it again.
    pub fn ensure_schema(&self, version: u32, specs: &[CollectionSpec]) -> StoreResult<UpgradeReport> {
        validate_specs(specs)?;

        let stored = self.schema_version()?;
        if stored > version {
            return Err(StoreError::Connection(format!(
                "database schema version {} is newer than requested version {}",
                stored, version
            )));
        }

        self.check_key_policies(specs)?;

        let missing = self.missing_collections(specs)?;
        if stored == version && missing.is_empty() {
            debug!("schema v{} is current", stored);
            return Ok(UpgradeReport {
                from: stored,
                to: stored,
                created: Vec::new(),
            });
        }

        info!(
            "upgrading schema from v{} to v{} ({} collection(s) to create)",
            stored,
            version,
            missing.len()
        );

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoreError::schema_upgrade(META_TABLE_NAME, e))?;

        tx.execute(SchemaDefinitions::META_TABLE, [])
            .map_err(|e| StoreError::schema_upgrade(META_TABLE_NAME, e))?;
        tx.execute(SchemaDefinitions::CATALOG_TABLE, [])
            .map_err(|e| StoreError::schema_upgrade(CATALOG_TABLE_NAME, e))?;

        let now = chrono::Utc::now().timestamp();
        let mut created = Vec::new();

        for spec in specs {
            let exists = table_exists(&tx, &spec.table_name())
                .map_err(|e| StoreError::schema_upgrade(&spec.name, e))?;

            if !exists {
                tx.execute(&SchemaDefinitions::collection_table(spec), [])
                    .map_err(|e| StoreError::schema_upgrade(&spec.name, e))?;
                created.push(spec.name.clone());
            }

            tx.execute(
                "INSERT OR IGNORE INTO hrstore_collections
                    (name, key_policy, key_field, created_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    spec.name,
                    spec.key_policy.kind(),
                    spec.key_policy.key_field(),
                    version,
                    now
                ],
            )
            .map_err(|e| StoreError::schema_upgrade(&spec.name, e))?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO hrstore_meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![SCHEMA_VERSION_KEY, version.to_string(), now],
        )
        .map_err(|e| StoreError::schema_upgrade(META_TABLE_NAME, e))?;

        tx.commit()
            .map_err(|e| StoreError::schema_upgrade(META_TABLE_NAME, e))?;

        for name in &created {
            info!("created collection '{}'", name);
        }

        Ok(UpgradeReport {
            from: stored,
            to: version,
            created,
        })
    }

    /// Check the current schema status against a declaration
    pub fn check_status(&self, version: u32, specs: &[CollectionSpec]) -> StoreResult<SchemaStatus> {
        if !table_exists(self.conn, META_TABLE_NAME)? {
            return Ok(SchemaStatus::NotInitialized);
        }

        let current_version = self.schema_version()?;

        if current_version > version {
            return Ok(SchemaStatus::Incompatible {
                database_version: current_version,
                required_version: version,
            });
        }
        if current_version < version {
            return Ok(SchemaStatus::NeedsUpgrade {
                from: current_version,
                to: version,
            });
        }

        let missing = self.missing_collections(specs)?;
        if missing.is_empty() {
            Ok(SchemaStatus::Current)
        } else {
            Ok(SchemaStatus::Incomplete { missing })
        }
    }

    /// Get the stored schema version, 0 for a fresh database
    pub fn schema_version(&self) -> StoreResult<u32> {
        match self.get_meta(SCHEMA_VERSION_KEY)? {
            Some(v) => v.parse().map_err(|e| {
                StoreError::Connection(format!("invalid stored schema version '{}': {}", v, e))
            }),
            None => Ok(0),
        }
    }

    /// Get a metadata value
    pub fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        if !table_exists(self.conn, META_TABLE_NAME)? {
            return Ok(None);
        }

        self.conn
            .query_row(
                "SELECT value FROM hrstore_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::transaction(META_TABLE_NAME, e))
    }

    /// Set a metadata value
    pub fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn
            .execute(SchemaDefinitions::META_TABLE, [])
            .map_err(|e| StoreError::transaction(META_TABLE_NAME, e))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO hrstore_meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, chrono::Utc::now().timestamp()],
            )
            .map_err(|e| StoreError::transaction(META_TABLE_NAME, e))?;
        Ok(())
    }

    /// Every catalog entry, ordered by name
    pub fn catalog(&self) -> StoreResult<Vec<CatalogEntry>> {
        if !table_exists(self.conn, CATALOG_TABLE_NAME)? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, key_policy, key_field, created_version, created_at
                 FROM hrstore_collections ORDER BY name",
            )
            .map_err(|e| StoreError::transaction(CATALOG_TABLE_NAME, e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|e| StoreError::transaction(CATALOG_TABLE_NAME, e))?;

        let mut entries = Vec::new();
        for row in rows {
            let (name, kind, key_field, created_version, created_at) =
                row.map_err(|e| StoreError::transaction(CATALOG_TABLE_NAME, e))?;
            let key_policy = KeyPolicy::from_parts(&kind, &key_field).ok_or_else(|| {
                StoreError::transaction(
                    CATALOG_TABLE_NAME,
                    format!("unknown key policy '{}' for '{}'", kind, name),
                )
            })?;
            entries.push(CatalogEntry {
                name,
                key_policy,
                created_version,
                created_at,
            });
        }
        Ok(entries)
    }

    /// Look up the catalog entry of one collection
    pub fn catalog_entry(&self, name: &str) -> StoreResult<Option<CatalogEntry>> {
        Ok(self.catalog()?.into_iter().find(|e| e.name == name))
    }

    /// Names of every created collection
    pub fn collection_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.catalog()?.into_iter().map(|e| e.name).collect())
    }

    fn missing_collections(&self, specs: &[CollectionSpec]) -> StoreResult<Vec<String>> {
        let mut missing = Vec::new();
        for spec in specs {
            if !table_exists(self.conn, &spec.table_name())? {
                missing.push(spec.name.clone());
            }
        }
        Ok(missing)
    }

    fn check_key_policies(&self, specs: &[CollectionSpec]) -> StoreResult<()> {
        let catalog = self.catalog()?;
        for spec in specs {
            if let Some(entry) = catalog.iter().find(|e| e.name == spec.name) {
                if entry.key_policy != spec.key_policy {
                    return Err(StoreError::schema_upgrade(
                        &spec.name,
                        format!(
                            "stored key policy {} differs from declared {}",
                            entry.key_policy, spec.key_policy
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
