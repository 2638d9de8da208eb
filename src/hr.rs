//! HR administration data
//!
//! Declares the collections of the HR database and typed views of their
//! records. The reference collections (`Department`, `Role`, `items`) all hold
//! `{ id, value }` records; `Registration` holds employee profiles pointing at
//! one role and one department.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::{CollectionSpec, CollectionStore, Entity, RecordKey};
use crate::error::{StoreError, StoreResult};

pub const HR_DB_NAME: &str = "HR_db";
pub const HR_SCHEMA_VERSION: u32 = 1;

pub const USERS: &str = "users";
pub const ITEMS: &str = "items";
pub const DATA: &str = "data";
pub const DEPARTMENT: &str = "Department";
pub const ROLE: &str = "Role";
pub const REGISTRATION: &str = "Registration";

/// Collection declarations of the HR database
pub fn hr_collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::natural(USERS, "username").with_required(&["password"]),
        CollectionSpec::auto_increment(ITEMS, "id").with_required(&["value"]),
        CollectionSpec::auto_increment(DATA, "id"),
        CollectionSpec::auto_increment(DEPARTMENT, "id").with_required(&["value"]),
        CollectionSpec::auto_increment(ROLE, "id").with_required(&["value"]),
        CollectionSpec::auto_increment(REGISTRATION, "id")
            .with_required(&["employeeId", "name", "role", "department"])
            .with_reference("role", ROLE)
            .with_reference("department", DEPARTMENT),
    ]
}

/// The `{ id, value }` collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Department,
    Role,
    Item,
}

impl ReferenceKind {
    pub fn collection(&self) -> &'static str {
        match self {
            ReferenceKind::Department => DEPARTMENT,
            ReferenceKind::Role => ROLE,
            ReferenceKind::Item => ITEMS,
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.collection())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: Option<i64>,
    pub value: String,
}

impl ReferenceItem {
    pub fn new(value: &str) -> Self {
        Self {
            id: None,
            value: value.to_string(),
        }
    }
}

/// Employee profile
///
/// `role` and `department` hold the ids of existing `Role` and `Department`
/// records; the store refuses a registration pointing anywhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Option<i64>,
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub date_of_joining: String,
    #[serde(default)]
    pub salary: String,
    #[serde(default)]
    pub emergency_contact: String,
    /// File name of the uploaded picture, empty when none was given
    #[serde(default)]
    pub profile_picture: String,
    pub role: i64,
    pub department: i64,
}

impl Entity for Registration {
    const COLLECTION: &'static str = REGISTRATION;
}

/// Row of the `users` collection; `password` holds the stored hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
    pub designation: String,
}

impl Entity for User {
    const COLLECTION: &'static str = USERS;
}

/// Free-form payload saved into the `data` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub id: Option<i64>,
    pub data: Value,
}

impl Entity for DataEntry {
    const COLLECTION: &'static str = DATA;
}

impl CollectionStore {
    /// Add a value to a reference collection and return its id
    pub async fn add_reference(&self, kind: ReferenceKind, value: &str) -> StoreResult<RecordKey> {
        self.create(kind.collection(), json!({ "value": value }))
            .await
    }

    /// Entries of a reference collection, ordered by id
    ///
    /// This is the list a form offers when choosing a role or department.
    pub async fn reference_options(&self, kind: ReferenceKind) -> StoreResult<Vec<ReferenceItem>> {
        self.get_all(kind.collection())
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(Value::Object(record)).map_err(StoreError::from))
            .collect()
    }

    /// Store an arbitrary payload as `{ data }` in the `data` collection
    pub async fn save_data(&self, data: Value) -> StoreResult<RecordKey> {
        self.create(DATA, json!({ "data": data })).await
    }
}
