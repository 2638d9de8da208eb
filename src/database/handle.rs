//! Shared connection handle
//!
//! The handle opens the database lazily on first use, runs the schema step
//! before anyone can see the connection, and then hands the same connection to
//! every later caller. Store operations run on the blocking pool so awaiting
//! them never blocks an async worker thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::collection::CollectionRepository;
use crate::database::core::{
    validate_collection_name, validate_specs, CollectionSpec, DatabaseConn, SchemaManager,
};
use crate::error::{StoreError, StoreResult};

/// Connection shared by every operation of one handle
pub type SharedConnection = Arc<Mutex<DatabaseConn>>;

/// Everything needed to open a database and bring its schema up to date
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Database file; `None` opens an in-memory database
    pub path: Option<PathBuf>,
    pub schema_version: u32,
    pub collections: Vec<CollectionSpec>,
    /// Upper bound for one store operation; `None` waits indefinitely
    pub op_timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn in_memory(schema_version: u32, collections: Vec<CollectionSpec>) -> Self {
        Self {
            path: None,
            schema_version,
            collections,
            op_timeout: None,
        }
    }

    pub fn at_path(
        path: impl Into<PathBuf>,
        schema_version: u32,
        collections: Vec<CollectionSpec>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            schema_version,
            collections,
            op_timeout: None,
        }
    }

    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }
}

/// Lazily opened, schema-ensured database connection
pub struct ConnectionHandle {
    options: OpenOptions,
    conn: OnceCell<SharedConnection>,
}

impl ConnectionHandle {
    /// Create an unopened handle
    ///
    /// The collection declarations are validated here; nothing touches the
    /// disk until the first call to [`get_connection`](Self::get_connection).
    pub fn new(options: OpenOptions) -> StoreResult<Self> {
        validate_specs(&options.collections)?;
        Ok(Self {
            options,
            conn: OnceCell::new(),
        })
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Whether the database has been opened
    pub fn is_open(&self) -> bool {
        self.conn.initialized()
    }

    /// Return the ready connection, opening it on first use
    ///
    /// Concurrent first callers all wait on the same open. A failed open
    /// leaves the handle unopened; the error goes to the caller and nothing
    /// is retried.
    pub async fn get_connection(&self) -> StoreResult<SharedConnection> {
        self.conn.get_or_try_init(|| self.open()).await.cloned()
    }

    /// Resolve the declaration of a collection by name
    pub fn collection_spec(&self, name: &str) -> StoreResult<&CollectionSpec> {
        validate_collection_name(name)?;
        self.options
            .collections
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| StoreError::NotFound(format!("collection '{}' is not declared", name)))
    }

    /// Run `f` against one collection on the blocking pool
    ///
    /// The wait is bounded by the configured operation timeout and by
    /// `cancel`. When either fires, the operation's own token is cancelled so
    /// a write that has not committed yet rolls back.
    pub(crate) async fn execute<T, F>(
        &self,
        operation: &'static str,
        collection: &str,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(CollectionRepository<'_>) -> StoreResult<T> + Send + 'static,
    {
        let spec = self.collection_spec(collection)?.clone();
        let shared = self.get_connection().await?;

        let op_token = match cancel {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };
        let task_token = op_token.clone();

        debug!("{} on '{}'", operation, collection);
        let task = tokio::task::spawn_blocking(move || {
            let guard = shared.blocking_lock();
            let repo = CollectionRepository::new(&guard.conn, &spec).with_cancel(task_token);
            f(repo)
        });

        let timeout = self.options.op_timeout;
        let deadline = async move {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            joined = task => joined.map_err(|e| {
                StoreError::transaction(collection, format!("worker task failed: {}", e))
            })?,
            _ = op_token.cancelled() => {
                warn!("{} on '{}' cancelled", operation, collection);
                Err(StoreError::Cancelled {
                    operation,
                    collection: collection.to_string(),
                })
            }
            _ = deadline => {
                op_token.cancel();
                let after = timeout.unwrap_or_default();
                warn!("{} on '{}' timed out after {:?}", operation, collection, after);
                Err(StoreError::TimedOut {
                    operation,
                    collection: collection.to_string(),
                    after,
                })
            }
        }
    }

    async fn open(&self) -> StoreResult<SharedConnection> {
        let path = self.options.path.clone();
        let version = self.options.schema_version;
        let specs = self.options.collections.clone();

        let db = tokio::task::spawn_blocking(move || -> StoreResult<DatabaseConn> {
            let path_str = match &path {
                Some(p) => Some(p.to_str().ok_or_else(|| {
                    StoreError::Connection(format!("database path {:?} is not valid UTF-8", p))
                })?),
                None => None,
            };

            info!("opening database at {}", path_str.unwrap_or(":memory:"));
            let db = DatabaseConn::open(path_str)?;
            let report = SchemaManager::new(&db.conn).ensure_schema(version, &specs)?;
            if report.is_noop() {
                info!("database schema v{} ready", report.to);
            } else {
                info!(
                    "database schema upgraded v{} -> v{}, created {:?}",
                    report.from, report.to, report.created
                );
            }
            Ok(db)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("open task failed: {}", e)))??;

        Ok(Arc::new(Mutex::new(db)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::record::RecordKey;
    use serde_json::json;

    fn specs() -> Vec<CollectionSpec> {
        vec![
            CollectionSpec::natural("users", "username"),
            CollectionSpec::auto_increment("Role", "id"),
        ]
    }

    #[tokio::test]
    async fn test_lazy_open() {
        let handle = ConnectionHandle::new(OpenOptions::in_memory(1, specs())).unwrap();
        assert!(!handle.is_open());

        handle.get_connection().await.unwrap();
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn test_same_connection_reused() {
        let handle = ConnectionHandle::new(OpenOptions::in_memory(1, specs())).unwrap();

        let (a, b) = tokio::join!(handle.get_connection(), handle.get_connection());
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = handle.get_connection().await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no").join("such").join("dir.sqlite3");
        let handle = ConnectionHandle::new(OpenOptions::at_path(path, 1, specs())).unwrap();

        let result = handle.get_connection().await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_invalid_declaration_rejected() {
        let bad = vec![CollectionSpec::auto_increment("bad name", "id")];
        assert!(matches!(
            ConnectionHandle::new(OpenOptions::in_memory(1, bad)),
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let handle = ConnectionHandle::new(OpenOptions::in_memory(1, specs())).unwrap();
        let result = handle
            .execute("get_all", "Department", None, |repo| repo.get_all())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_execute() {
        let handle = ConnectionHandle::new(OpenOptions::in_memory(1, specs())).unwrap();
        let key = handle
            .execute("create", "Role", None, |repo| {
                repo.create(json!({"value": "Manager"}))
            })
            .await
            .unwrap();
        assert_eq!(key, RecordKey::Int(1));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let handle = ConnectionHandle::new(OpenOptions::in_memory(1, specs())).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = handle
            .execute("create", "Role", Some(&token), |repo| {
                repo.create(json!({"value": "Manager"}))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled { .. })));

        let count = handle
            .execute("count", "Role", None, |repo| repo.count())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_pending_write() {
        let options = OpenOptions::in_memory(1, specs())
            .with_op_timeout(Some(Duration::from_millis(50)));
        let handle = ConnectionHandle::new(options).unwrap();

        // Hold the connection so the write cannot start before the deadline
        let shared = handle.get_connection().await.unwrap();
        let guard = shared.lock().await;

        let result = handle
            .execute("create", "Role", None, |repo| {
                repo.create(json!({"value": "Manager"}))
            })
            .await;
        assert!(matches!(result, Err(StoreError::TimedOut { .. })));

        drop(guard);
        // give the abandoned worker a chance to observe its cancelled token
        tokio::time::sleep(Duration::from_millis(50)).await;

        let count = handle
            .execute("count", "Role", None, |repo| repo.count())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
