//! Credential checks against the `users` collection
//!
//! Passwords are never stored in clear. The stored form is
//! `sha256$<rounds>$<salt hex>$<digest hex>`, where the digest is SHA-256
//! applied `rounds` times starting from `salt || password`.

use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::database::{CollectionStore, Record};
use crate::error::StoreResult;
use crate::hr::USERS;

pub const DEFAULT_HASH_ROUNDS: u32 = 10_000;
const SALT_LEN: usize = 16;
const SCHEME: &str = "sha256";

/// A user accepted by [`AuthGate::authenticate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub designation: String,
}

/// Bootstrap account written by [`AuthGate::seed_users`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    pub designation: String,
}

impl SeedUser {
    pub fn new(username: &str, password: &str, designation: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            designation: designation.to_string(),
        }
    }
}

/// Accounts created on first run
pub fn default_seed_users() -> Vec<SeedUser> {
    vec![
        SeedUser::new("c", "c", "company"),
        SeedUser::new("a", "a", "hr"),
    ]
}

/// Hash `password` with a fresh random salt
pub fn hash_password(password: &str, rounds: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = derive(&salt, password, rounds);
    format!(
        "{}${}${}${}",
        SCHEME,
        rounds,
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// Check `password` against a stored hash
///
/// A stored value that is not in the expected format never verifies, but is
/// still charged a full [`DEFAULT_HASH_ROUNDS`] derivation.
pub fn verify_password(password: &str, stored: &str) -> bool {
    verify_with_fallback(password, stored, DEFAULT_HASH_ROUNDS)
}

/// Same as [`verify_password`], hashing `fallback_rounds` times when `stored`
/// does not parse so every rejection costs the same
fn verify_with_fallback(password: &str, stored: &str, fallback_rounds: u32) -> bool {
    let (rounds, salt, expected) = parse_stored(stored)
        .unwrap_or_else(|| (fallback_rounds, vec![0u8; SALT_LEN], Vec::new()));
    let actual = derive(&salt, password, rounds);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

/// Login check over the `users` collection
#[derive(Clone)]
pub struct AuthGate {
    store: CollectionStore,
    rounds: u32,
}

impl AuthGate {
    pub fn new(store: CollectionStore) -> Self {
        Self {
            store,
            rounds: DEFAULT_HASH_ROUNDS,
        }
    }

    /// Use a different round count for newly written hashes
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Look up `username` and check `password`
    ///
    /// An unknown user and a wrong password both give `Ok(None)` after the
    /// same amount of hashing work. Storage failures are returned as errors.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> StoreResult<Option<AuthenticatedUser>> {
        let record = if username.is_empty() {
            None
        } else {
            self.store.get_one(USERS, username).await?
        };

        // a missing row is checked against an empty hash to do the same work
        let stored = record
            .as_ref()
            .map(|r| text_field(r, "password"))
            .unwrap_or_default();
        let verified = verify_with_fallback(password, stored, self.rounds);

        match record {
            Some(record) if verified => Ok(Some(AuthenticatedUser {
                username: username.to_string(),
                designation: text_field(&record, "designation").to_string(),
            })),
            _ => {
                warn!("rejected login attempt");
                Ok(None)
            }
        }
    }

    pub async fn validate_credentials(&self, username: &str, password: &str) -> StoreResult<bool> {
        Ok(self.authenticate(username, password).await?.is_some())
    }

    /// Create a new account with a hashed password
    ///
    /// Fails with [`StoreError::KeyConflict`](crate::StoreError::KeyConflict)
    /// when the username is taken.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        designation: &str,
    ) -> StoreResult<()> {
        self.store
            .insert(
                USERS,
                json!({
                    "username": username,
                    "password": hash_password(password, self.rounds),
                    "designation": designation,
                }),
            )
            .await?;
        info!("registered user '{}'", username);
        Ok(())
    }

    /// Replace the password of an existing account
    pub async fn set_password(&self, username: &str, password: &str) -> StoreResult<()> {
        self.store
            .update(
                USERS,
                username,
                json!({ "password": hash_password(password, self.rounds) }),
            )
            .await?;
        Ok(())
    }

    /// Write the given accounts, leaving rows that already match untouched
    ///
    /// Returns how many rows were written.
    pub async fn seed_users(&self, users: &[SeedUser]) -> StoreResult<usize> {
        let mut written = 0;
        for user in users {
            if let Some(existing) = self.store.get_one(USERS, user.username.as_str()).await? {
                if text_field(&existing, "designation") == user.designation
                    && verify_password(&user.password, text_field(&existing, "password"))
                {
                    continue;
                }
            }

            self.store
                .create(
                    USERS,
                    json!({
                        "username": user.username,
                        "password": hash_password(&user.password, self.rounds),
                        "designation": user.designation,
                    }),
                )
                .await?;
            written += 1;
        }

        if written > 0 {
            info!("seeded {} user(s)", written);
        }
        Ok(written)
    }
}

fn text_field<'a>(record: &'a Record, field: &str) -> &'a str {
    record.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn derive(salt: &[u8], password: &str, rounds: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();
    for _ in 1..rounds {
        digest = Sha256::digest(digest).into();
    }
    digest
}

fn parse_stored(stored: &str) -> Option<(u32, Vec<u8>, Vec<u8>)> {
    let mut parts = stored.split('$');
    if parts.next()? != SCHEME {
        return None;
    }
    let rounds: u32 = parts.next()?.parse().ok()?;
    let salt = hex::decode(parts.next()?).ok()?;
    let digest = hex::decode(parts.next()?).ok()?;
    if parts.next().is_some() || rounds == 0 || digest.len() != 32 {
        return None;
    }
    Some((rounds, salt, digest))
}
