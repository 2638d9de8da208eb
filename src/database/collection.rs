//! Collection repository
//!
//! Synchronous CRUD operations scoped to one declared collection. Every
//! operation runs inside its own SQLite transaction: either the one-record
//! write commits or nothing from it is visible.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::core::{quoted_table, CollectionSpec, KeyPolicy};
use crate::database::record::{
    check_key_type, check_required, inject_key, into_record, split_key, Record, RecordKey,
};
use crate::error::{is_constraint_violation, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Overwrite on key collision
    Upsert,
    /// Fail on key collision
    Insert,
}

/// Repository for the records of one collection
pub struct CollectionRepository<'a> {
    conn: &'a Connection,
    spec: &'a CollectionSpec,
    cancel: Option<CancellationToken>,
}

impl<'a> CollectionRepository<'a> {
    /// Create a repository over an already-created collection
    pub fn new(conn: &'a Connection, spec: &'a CollectionSpec) -> Self {
        Self {
            conn,
            spec,
            cancel: None,
        }
    }

    /// Observe `token`: a cancelled token aborts the operation before it commits
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Insert or overwrite a record, returning its key
    ///
    /// Auto-increment collections assign the next integer key when the record
    /// carries none.
    pub fn create(&self, record: Value) -> StoreResult<RecordKey> {
        self.write(record, WriteMode::Upsert)
    }

    /// Insert a record, failing with [`StoreError::KeyConflict`] if the key exists
    pub fn insert(&self, record: Value) -> StoreResult<RecordKey> {
        self.write(record, WriteMode::Insert)
    }

    /// Fetch one record by key
    pub fn get_one(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        self.ensure_active("get")?;
        check_key_type(self.spec, key)?;

        let tx = self.begin()?;
        let body = self.load(&tx, key)?;
        drop(tx);

        Ok(body.map(|b| inject_key(&self.spec.key_policy, key, b)))
    }

    /// Fetch every record in ascending key order
    pub fn get_all(&self) -> StoreResult<Vec<Record>> {
        self.ensure_active("get_all")?;

        let tx = self.begin()?;
        let sql = format!(
            "SELECT {col}, body FROM {} ORDER BY {col}",
            quoted_table(&self.spec.name),
            col = self.key_column()
        );
        let mut stmt = tx.prepare(&sql).map_err(|e| self.tx_error(e))?;

        let rows = stmt
            .query_map([], |row| {
                let key = match self.spec.key_policy {
                    KeyPolicy::AutoIncrement { .. } => RecordKey::Int(row.get(0)?),
                    KeyPolicy::Natural { .. } => RecordKey::Text(row.get(0)?),
                };
                Ok((key, row.get::<_, String>(1)?))
            })
            .map_err(|e| self.tx_error(e))?;

        let mut records = Vec::new();
        for row in rows {
            let (key, body) = row.map_err(|e| self.tx_error(e))?;
            let body: Record = serde_json::from_str(&body)?;
            records.push(inject_key(&self.spec.key_policy, &key, body));
        }

        debug!("get_all on '{}' returned {} records", self.spec.name, records.len());
        Ok(records)
    }

    /// Merge `patch` into the record at `key`
    ///
    /// Fields of the patch replace fields of the stored record; other stored
    /// fields are kept. A missing record is an error.
    pub fn update(&self, key: &RecordKey, patch: Value) -> StoreResult<Record> {
        self.ensure_active("update")?;
        check_key_type(self.spec, key)?;

        let mut patch = into_record(patch)?;
        let key_field = self.spec.key_policy.key_field();
        if let Some(patched_key) = patch.remove(key_field) {
            if !patched_key.is_null() && patched_key != key.to_value() {
                return Err(StoreError::validation(format!(
                    "update of {} in '{}' cannot change key field '{}' to {}",
                    key, self.spec.name, key_field, patched_key
                )));
            }
        }

        let tx = self.begin()?;
        let mut current = self.load(&tx, key)?.ok_or_else(|| {
            StoreError::NotFound(format!("no record {} in '{}'", key, self.spec.name))
        })?;

        self.check_references(&tx, &patch)?;
        for (field, value) in patch {
            current.insert(field, value);
        }
        check_required(self.spec, &current)?;

        let body = serde_json::to_string(&current)?;
        tx.execute(
            &format!(
                "UPDATE {} SET body = ?1 WHERE {} = ?2",
                quoted_table(&self.spec.name),
                self.key_column()
            ),
            params![body, key],
        )
        .map_err(|e| self.tx_error(e))?;

        self.commit(tx, "update")?;
        debug!("updated {} in '{}'", key, self.spec.name);
        Ok(inject_key(&self.spec.key_policy, key, current))
    }

    /// Remove the record at `key`
    ///
    /// Returns whether a record was removed; a missing key is not an error.
    pub fn delete(&self, key: &RecordKey) -> StoreResult<bool> {
        self.ensure_active("delete")?;
        check_key_type(self.spec, key)?;

        let tx = self.begin()?;
        let removed = tx
            .execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    quoted_table(&self.spec.name),
                    self.key_column()
                ),
                [key],
            )
            .map_err(|e| self.tx_error(e))?;
        self.commit(tx, "delete")?;

        debug!("delete {} in '{}' removed {} row(s)", key, self.spec.name, removed);
        Ok(removed > 0)
    }

    /// Number of records in the collection
    pub fn count(&self) -> StoreResult<u64> {
        self.ensure_active("count")?;
        self.conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quoted_table(&self.spec.name)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| self.tx_error(e))
    }

    /// Remove every record, keeping the collection itself
    pub fn clear(&self) -> StoreResult<usize> {
        self.ensure_active("clear")?;

        let tx = self.begin()?;
        let removed = tx
            .execute(&format!("DELETE FROM {}", quoted_table(&self.spec.name)), [])
            .map_err(|e| self.tx_error(e))?;
        self.commit(tx, "clear")?;
        Ok(removed)
    }

    fn write(&self, record: Value, mode: WriteMode) -> StoreResult<RecordKey> {
        let operation = match mode {
            WriteMode::Upsert => "create",
            WriteMode::Insert => "insert",
        };
        self.ensure_active(operation)?;

        let mut record = into_record(record)?;
        let key = split_key(&self.spec.key_policy, &mut record)?;
        check_required(self.spec, &record)?;

        let tx = self.begin()?;
        self.check_references(&tx, &record)?;

        let body = serde_json::to_string(&record)?;
        let table = quoted_table(&self.spec.name);
        let verb = match mode {
            WriteMode::Upsert => "INSERT OR REPLACE",
            WriteMode::Insert => "INSERT",
        };

        let key = match key {
            Some(key) => {
                tx.execute(
                    &format!(
                        "{} INTO {} ({}, body) VALUES (?1, ?2)",
                        verb,
                        table,
                        self.key_column()
                    ),
                    params![key, body],
                )
                .map_err(|e| self.write_error(e, &key))?;
                key
            }
            None => {
                tx.execute(&format!("INSERT INTO {} (body) VALUES (?1)", table), [body])
                    .map_err(|e| self.tx_error(e))?;
                RecordKey::Int(tx.last_insert_rowid())
            }
        };

        self.commit(tx, operation)?;
        debug!("{} {} in '{}'", operation, key, self.spec.name);
        Ok(key)
    }

    /// Load the stored body (without key field) inside an open transaction
    fn load(&self, tx: &Transaction<'_>, key: &RecordKey) -> StoreResult<Option<Record>> {
        let body: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT body FROM {} WHERE {} = ?1",
                    quoted_table(&self.spec.name),
                    self.key_column()
                ),
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.tx_error(e))?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Reference fields present in `record` must name existing target records
    fn check_references(&self, tx: &Transaction<'_>, record: &Record) -> StoreResult<()> {
        for reference in &self.spec.references {
            let value = match record.get(&reference.field) {
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };

            let id = value.as_i64().ok_or_else(|| {
                StoreError::validation(format!(
                    "'{}.{}' must be an integer key of '{}', got {}",
                    self.spec.name, reference.field, reference.target, value
                ))
            })?;

            let exists: bool = tx
                .query_row(
                    &format!(
                        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
                        quoted_table(&reference.target)
                    ),
                    [id],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::transaction(&reference.target, e))?;

            if !exists {
                return Err(StoreError::validation(format!(
                    "'{}.{}' references missing '{}' record {}",
                    self.spec.name, reference.field, reference.target, id
                )));
            }
        }
        Ok(())
    }

    fn key_column(&self) -> &'static str {
        match self.spec.key_policy {
            KeyPolicy::AutoIncrement { .. } => "id",
            KeyPolicy::Natural { .. } => "key",
        }
    }

    fn begin(&self) -> StoreResult<Transaction<'a>> {
        self.conn
            .unchecked_transaction()
            .map_err(|e| self.tx_error(e))
    }

    fn commit(&self, tx: Transaction<'_>, operation: &'static str) -> StoreResult<()> {
        // Dropping the transaction rolls it back
        self.ensure_active(operation)?;
        tx.commit().map_err(|e| self.tx_error(e))
    }

    fn ensure_active(&self, operation: &'static str) -> StoreResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StoreError::Cancelled {
                operation,
                collection: self.spec.name.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn tx_error(&self, err: rusqlite::Error) -> StoreError {
        StoreError::transaction(&self.spec.name, err)
    }

    fn write_error(&self, err: rusqlite::Error, key: &RecordKey) -> StoreError {
        if is_constraint_violation(&err) {
            StoreError::KeyConflict {
                collection: self.spec.name.clone(),
                key: key.to_string(),
            }
        } else {
            self.tx_error(err)
        }
    }
}
