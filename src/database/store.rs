//! Async collection store
//!
//! `CollectionStore` is the surface the application talks to. Every operation
//! names its collection, runs in its own SQLite transaction on the blocking
//! pool and resolves to data or a [`StoreError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hrstore::{CollectionStore, OpenOptions, hr_collections, HR_SCHEMA_VERSION};
//! use serde_json::json;
//!
//! let store = CollectionStore::new(OpenOptions::in_memory(HR_SCHEMA_VERSION, hr_collections()))?;
//! store.ensure_schema().await?;
//!
//! let key = store.create("Department", json!({"value": "Engineering"})).await?;
//! let all = store.get_all("Department").await?;
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::database::handle::{ConnectionHandle, OpenOptions};
use crate::database::record::{Record, RecordKey};
use crate::error::{StoreError, StoreResult};

/// A typed record living in one collection
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Name of the collection holding this type
    const COLLECTION: &'static str;
}

/// Generic CRUD over the declared collections
///
/// Cloning is cheap; clones share the same connection handle.
#[derive(Clone)]
pub struct CollectionStore {
    handle: Arc<ConnectionHandle>,
    cancel: Option<CancellationToken>,
}

impl CollectionStore {
    /// Create a store; the database is opened on first use
    pub fn new(options: OpenOptions) -> StoreResult<Self> {
        Ok(Self::from_handle(Arc::new(ConnectionHandle::new(options)?)))
    }

    pub fn from_handle(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            handle,
            cancel: None,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Return a store whose operations stop waiting once `token` is cancelled
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            cancel: Some(token),
        }
    }

    /// Open the database and bring every declared collection into existence
    ///
    /// Calling this is optional since every operation waits on the same step,
    /// but an application usually does it once at startup to surface
    /// connection problems early.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        self.handle.get_connection().await.map(|_| ())
    }

    /// Write a record, overwriting any record with the same key
    ///
    /// Auto-increment collections assign the next id when the record has no
    /// key. Returns the key of the stored record.
    pub async fn create(&self, collection: &str, record: Value) -> StoreResult<RecordKey> {
        self.handle
            .execute("create", collection, self.cancel.as_ref(), move |repo| {
                repo.create(record)
            })
            .await
    }

    /// Write a record that must not exist yet
    pub async fn insert(&self, collection: &str, record: Value) -> StoreResult<RecordKey> {
        self.handle
            .execute("insert", collection, self.cancel.as_ref(), move |repo| {
                repo.insert(record)
            })
            .await
    }

    /// All records of a collection in ascending key order
    pub async fn get_all(&self, collection: &str) -> StoreResult<Vec<Record>> {
        self.handle
            .execute("get_all", collection, self.cancel.as_ref(), |repo| {
                repo.get_all()
            })
            .await
    }

    pub async fn get_one(
        &self,
        collection: &str,
        key: impl Into<RecordKey>,
    ) -> StoreResult<Option<Record>> {
        let key = key.into();
        self.handle
            .execute("get_one", collection, self.cancel.as_ref(), move |repo| {
                repo.get_one(&key)
            })
            .await
    }

    /// Merge `patch` into the record stored under `key`
    ///
    /// Fails with [`StoreError::NotFound`] when no such record exists.
    pub async fn update(
        &self,
        collection: &str,
        key: impl Into<RecordKey>,
        patch: Value,
    ) -> StoreResult<Record> {
        let key = key.into();
        self.handle
            .execute("update", collection, self.cancel.as_ref(), move |repo| {
                repo.update(&key, patch)
            })
            .await
    }

    /// Remove the record under `key`; a missing record is not an error
    pub async fn delete(&self, collection: &str, key: impl Into<RecordKey>) -> StoreResult<()> {
        let key = key.into();
        self.handle
            .execute("delete", collection, self.cancel.as_ref(), move |repo| {
                repo.delete(&key).map(|_| ())
            })
            .await
    }

    pub async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.handle
            .execute("count", collection, self.cancel.as_ref(), |repo| {
                repo.count()
            })
            .await
    }

    /// Delete every record of a collection, returning how many were removed
    pub async fn clear(&self, collection: &str) -> StoreResult<usize> {
        self.handle
            .execute("clear", collection, self.cancel.as_ref(), |repo| {
                repo.clear()
            })
            .await
    }

    pub async fn create_entity<E: Entity>(&self, entity: &E) -> StoreResult<RecordKey> {
        let value = serde_json::to_value(entity)?;
        self.create(E::COLLECTION, value).await
    }

    pub async fn get_entity<E: Entity>(&self, key: impl Into<RecordKey>) -> StoreResult<Option<E>> {
        match self.get_one(E::COLLECTION, key).await? {
            Some(record) => Ok(Some(from_record(record)?)),
            None => Ok(None),
        }
    }

    pub async fn list_entities<E: Entity>(&self) -> StoreResult<Vec<E>> {
        self.get_all(E::COLLECTION)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }
}

fn from_record<E: DeserializeOwned>(record: Record) -> StoreResult<E> {
    serde_json::from_value(Value::Object(record)).map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hr::{hr_collections, Registration, HR_SCHEMA_VERSION};
    use serde_json::json;

    fn store() -> CollectionStore {
        CollectionStore::new(OpenOptions::in_memory(HR_SCHEMA_VERSION, hr_collections())).unwrap()
    }

    fn registration() -> Value {
        json!({
            "employeeId": "E1",
            "name": "Jane",
            "dob": "1990-04-12",
            "gender": "female",
            "email": "jane@example.com",
            "phone": "555-0100",
            "address": "1 Main St",
            "position": "Engineer",
            "dateOfJoining": "2024-01-08",
            "salary": "85000",
            "emergencyContact": "John 555-0101",
            "profilePicture": "",
            "role": 1,
            "department": 1
        })
    }

    #[tokio::test]
    async fn test_department_get_all() {
        let store = store();
        let key = store
            .create("Department", json!({"id": 1, "value": "Engineering"}))
            .await
            .unwrap();
        assert_eq!(key, RecordKey::Int(1));

        let all = store.get_all("Department").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            Value::Object(all[0].clone()),
            json!({"id": 1, "value": "Engineering"})
        );
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let store = store();
        store
            .create("Role", json!({"value": "Manager"}))
            .await
            .unwrap();
        store
            .create("Department", json!({"value": "Engineering"}))
            .await
            .unwrap();

        let key = store.create("Registration", registration()).await.unwrap();
        let stored = store.get_one("Registration", key.clone()).await.unwrap().unwrap();

        let mut expected = registration();
        expected["id"] = key.to_value();
        assert_eq!(Value::Object(stored), expected);
    }

    #[tokio::test]
    async fn test_registration_requires_existing_references() {
        let store = store();
        let result = store.create("Registration", registration()).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(store.count("Registration").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store();
        let key = store
            .create("items", json!({"value": "Laptop"}))
            .await
            .unwrap();

        store.delete("items", key.clone()).await.unwrap();
        assert!(store.get_one("items", key.clone()).await.unwrap().is_none());
        store.delete("items", key).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_update_wins() {
        let store = store();
        let key = store.create("Role", json!({"value": "Intern"})).await.unwrap();

        for value in ["Engineer", "Senior Engineer", "Manager"] {
            store
                .update("Role", key.clone(), json!({"value": value}))
                .await
                .unwrap();
        }

        let role = store.get_one("Role", key).await.unwrap().unwrap();
        assert_eq!(role["value"], json!("Manager"));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = store();
        let result = store.update("Role", 42_i64, json!({"value": "Ghost"})).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.count("Role").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = store();
        store
            .insert("users", json!({"username": "a", "password": "x"}))
            .await
            .unwrap();
        let result = store
            .insert("users", json!({"username": "a", "password": "y"}))
            .await;
        assert!(matches!(result, Err(StoreError::KeyConflict { .. })));
    }

    #[tokio::test]
    async fn test_ensure_schema_twice_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HR_db.sqlite3");

        {
            let store = CollectionStore::new(OpenOptions::at_path(
                &path,
                HR_SCHEMA_VERSION,
                hr_collections(),
            ))
            .unwrap();
            store.ensure_schema().await.unwrap();
            store.ensure_schema().await.unwrap();
            store
                .create("Department", json!({"value": "Engineering"}))
                .await
                .unwrap();
        }

        let store =
            CollectionStore::new(OpenOptions::at_path(&path, HR_SCHEMA_VERSION, hr_collections()))
                .unwrap();
        store.ensure_schema().await.unwrap();

        let departments = store.get_all("Department").await.unwrap();
        assert_eq!(departments.len(), 1);
        assert_eq!(departments[0]["value"], json!("Engineering"));
    }

    #[tokio::test]
    async fn test_concurrent_reads() {
        let store = store();
        store.create("Role", json!({"value": "Manager"})).await.unwrap();
        store.create("Role", json!({"value": "Engineer"})).await.unwrap();

        let other = store.clone();
        let (a, b) = tokio::join!(store.get_all("Role"), other.get_all("Role"));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_store() {
        let store = store();
        let token = CancellationToken::new();
        let cancellable = store.with_cancellation(token.clone());
        token.cancel();

        let result = cancellable.create("Role", json!({"value": "Manager"})).await;
        assert!(matches!(result, Err(StoreError::Cancelled { .. })));
        assert_eq!(store.count("Role").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_typed_entities() {
        let store = store();
        let manager = store.create("Role", json!({"value": "Manager"})).await.unwrap();
        let engineering = store
            .create("Department", json!({"value": "Engineering"}))
            .await
            .unwrap();

        let jane = Registration {
            id: None,
            employee_id: "E1".to_string(),
            name: "Jane".to_string(),
            role: manager.as_int().unwrap(),
            department: engineering.as_int().unwrap(),
            ..Default::default()
        };
        let key = store.create_entity(&jane).await.unwrap();
        assert_eq!(key, RecordKey::Int(1));

        let stored: Registration = store.get_entity(key).await.unwrap().unwrap();
        assert_eq!(stored.id, Some(1));
        assert_eq!(stored.name, "Jane");
        assert_eq!(stored.role, 1);

        let all: Vec<Registration> = store.list_entities().await.unwrap();
        assert_eq!(all, vec![stored]);

        let missing: Option<Registration> = store.get_entity(7_i64).await.unwrap();
        assert!(missing.is_none());
    }
}
