use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::auth::{default_seed_users, AuthGate};
use crate::database::{
    ensure_data_dir, CollectionRepository, CollectionSpec, CollectionStore, DatabaseConn,
    OpenOptions, SchemaManager,
};
use crate::hr::{hr_collections, HR_DB_NAME, HR_SCHEMA_VERSION};

pub struct StoreConfig {
    /// Path to the directory holding the database file
    pub data_dir: String,

    /// Database name; the file is `<data_dir>/<db_name>.sqlite3`
    pub db_name: String,

    /// Schema version the HR collections are ensured at
    pub schema_version: u32,

    /// Upper bound for one store operation in seconds, 0 disables it
    pub op_timeout_secs: u64,

    /// Write the bootstrap accounts when the store is opened
    pub seed_default_users: bool,

    /// Keep everything in memory instead of on disk
    pub in_memory: bool,
}

const EMPTY_CONFIG: &str = r#"### hrstore configuration file

### directory holding the database file
# data_dir = "~/.hrstore"

### database name, stored as <data_dir>/<db_name>.sqlite3
# db_name = "HR_db"

### operation timeout in seconds (0 = wait indefinitely)
# op_timeout_secs = 30

### create the bootstrap accounts on open
# seed_default_users = true

### keep the database in memory (nothing is persisted)
# in_memory = false
"#;

const DEFAULT_OP_TIMEOUT_SECS: u64 = 30;

impl Default for StoreConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.hrstore", home_dir),
            db_name: HR_DB_NAME.to_string(),
            schema_version: HR_SCHEMA_VERSION,
            op_timeout_secs: DEFAULT_OP_TIMEOUT_SECS,
            seed_default_users: true,
            in_memory: false,
        }
    }
}

impl StoreConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<StoreConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.hrstore/hrstore.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let hrstore_dir = format!("{}/.hrstore", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(hrstore_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create hrstore directory: {}", e))?;
                let p = format!("{}/hrstore.toml", hrstore_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of HRSTORE)
        // E.g., `HRSTORE_DB_NAME=test_db` would select another database file
        builder = builder.add_source(config::Environment::with_prefix("HRSTORE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        StoreConfig::from_settings(&config, hrstore_dir)
    }

    fn from_settings(config: &HashMap<String, String>, default_dir: String) -> Result<StoreConfig> {
        let data_dir = config
            .get("data_dir")
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or(default_dir);

        let db_name = match config.get("db_name") {
            Some(name) if name.trim().is_empty() => {
                return Err(anyhow!("db_name must not be empty"));
            }
            Some(name) => name.trim().to_string(),
            None => HR_DB_NAME.to_string(),
        };

        let schema_version = parse_setting(config, "schema_version", HR_SCHEMA_VERSION)?;
        let op_timeout_secs = parse_setting(config, "op_timeout_secs", DEFAULT_OP_TIMEOUT_SECS)?;
        let seed_default_users = parse_setting(config, "seed_default_users", true)?;
        let in_memory = parse_setting(config, "in_memory", false)?;

        Ok(StoreConfig {
            data_dir,
            db_name,
            schema_version,
            op_timeout_secs,
            seed_default_users,
            in_memory,
        })
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}.sqlite3", data_dir, self.db_name)
    }

    /// Get the operation timeout, `None` when disabled
    pub fn op_timeout(&self) -> Option<Duration> {
        match self.op_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Options for opening the HR database described by this configuration
    pub fn open_options(&self) -> OpenOptions {
        let options = if self.in_memory {
            OpenOptions::in_memory(self.schema_version, hr_collections())
        } else {
            OpenOptions::at_path(self.sqlite_path(), self.schema_version, hr_collections())
        };
        options.with_op_timeout(self.op_timeout())
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let timeout = match self.op_timeout_secs {
            0 => "disabled".to_string(),
            secs => format!("{} seconds", secs),
        };
        let storage = if self.in_memory {
            "in memory".to_string()
        } else {
            self.sqlite_path()
        };

        [
            format!("Data Directory:     {}", self.data_dir),
            format!("Database:           {}", storage),
            format!("Schema Version:     {}", self.schema_version),
            format!("Operation Timeout:  {}", timeout),
            format!("Seed Default Users: {}", self.seed_default_users),
        ]
        .join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.hrstore/hrstore.toml", home_dir)
    }
}

/// Parse an optional setting, rejecting values that do not parse
fn parse_setting<T>(config: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match config.get(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {} '{}': {}", key, v, e)),
        None => Ok(default),
    }
}

/// Open the HR store described by `config`
///
/// Creates the data directory, ensures the schema and writes the bootstrap
/// accounts when `seed_default_users` is set.
pub async fn open_store(config: &StoreConfig) -> Result<CollectionStore> {
    if !config.in_memory {
        ensure_data_dir(&config.data_dir)?;
    }

    let store = CollectionStore::new(config.open_options())?;
    store.ensure_schema().await?;

    if config.seed_default_users {
        AuthGate::new(store.clone())
            .seed_users(&default_seed_users())
            .await?;
    }
    Ok(store)
}

// =============================================================================
// Store diagnostics
// =============================================================================

/// Information about one collection
#[derive(Debug, Serialize, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub key_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    pub created_at: String,
}

/// Information about the SQLite database
#[derive(Debug, Serialize, Clone)]
pub struct StoreInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub collections: Vec<CollectionInfo>,
}

/// Get information about the database file described by `config`
///
/// Never creates the database; a missing or unreadable file is reported as
/// such.
pub fn get_store_info(config: &StoreConfig) -> StoreInfo {
    let path = config.sqlite_path();
    let exists = !config.in_memory && Path::new(&path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&path).ok().map(|m| m.len())
    } else {
        None
    };

    let (schema_version, collections) = if exists {
        match DatabaseConn::open_path(&path) {
            Ok(db) => {
                let manager = SchemaManager::new(&db.conn);
                let version = manager.schema_version().ok().filter(|v| *v > 0);
                let collections = manager
                    .catalog()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|entry| {
                        let spec = CollectionSpec::new(&entry.name, entry.key_policy.clone());
                        let record_count = CollectionRepository::new(&db.conn, &spec).count().ok();
                        let created_at = chrono::DateTime::from_timestamp(entry.created_at, 0)
                            .unwrap_or_default()
                            .format("%Y-%m-%d %H:%M:%S UTC")
                            .to_string();
                        CollectionInfo {
                            name: entry.name,
                            key_policy: entry.key_policy.to_string(),
                            record_count,
                            created_at,
                        }
                    })
                    .collect();
                (version, collections)
            }
            Err(_) => (None, Vec::new()),
        }
    } else {
        (None, Vec::new())
    };

    StoreInfo {
        path,
        exists,
        size_bytes,
        schema_version,
        collections,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(data_dir: &str) -> StoreConfig {
        StoreConfig {
            data_dir: data_dir.to_string(),
            db_name: "HR_db".to_string(),
            schema_version: 1,
            op_timeout_secs: 5,
            seed_default_users: true,
            in_memory: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.db_name, "HR_db");
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.op_timeout_secs, 30);
        assert!(config.seed_default_users);
        assert!(!config.in_memory);
    }

    #[test]
    fn test_paths() {
        let config = test_config("/test/dir/");
        assert_eq!(config.sqlite_path(), "/test/dir/HR_db.sqlite3");
    }

    #[test]
    fn test_op_timeout() {
        let mut config = test_config("/test");
        assert_eq!(config.op_timeout(), Some(Duration::from_secs(5)));

        config.op_timeout_secs = 0;
        assert_eq!(config.op_timeout(), None);
        assert!(config.summary().contains("disabled"));
    }

    #[test]
    fn test_open_options() {
        let mut config = test_config("/test");
        let options = config.open_options();
        assert_eq!(
            options.path.as_deref(),
            Some(Path::new("/test/HR_db.sqlite3"))
        );
        assert_eq!(options.collections.len(), 6);
        assert_eq!(options.op_timeout, Some(Duration::from_secs(5)));

        config.in_memory = true;
        assert!(config.open_options().path.is_none());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = HashMap::new();
        settings.insert("data_dir".to_string(), "/srv/hr/".to_string());
        settings.insert("db_name".to_string(), "staging".to_string());
        settings.insert("op_timeout_secs".to_string(), "0".to_string());
        settings.insert("seed_default_users".to_string(), "false".to_string());

        let config = StoreConfig::from_settings(&settings, "/default".to_string()).unwrap();
        assert_eq!(config.data_dir, "/srv/hr");
        assert_eq!(config.sqlite_path(), "/srv/hr/staging.sqlite3");
        assert_eq!(config.op_timeout(), None);
        assert!(!config.seed_default_users);
        assert_eq!(config.schema_version, 1);

        let config = StoreConfig::from_settings(&HashMap::new(), "/default".to_string()).unwrap();
        assert_eq!(config.data_dir, "/default");

        settings.insert("schema_version".to_string(), "two".to_string());
        assert!(StoreConfig::from_settings(&settings, "/default".to_string()).is_err());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        for (key, value) in [
            ("op_timeout_secs", "soon"),
            ("op_timeout_secs", "-5"),
            ("seed_default_users", "yes"),
            ("in_memory", "1"),
        ] {
            let mut settings = HashMap::new();
            settings.insert(key.to_string(), value.to_string());
            let err = StoreConfig::from_settings(&settings, "/default".to_string())
                .err()
                .unwrap();
            assert!(err.to_string().contains(key), "{}", err);
        }
    }

    #[test]
    fn test_new_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hrstore.toml");
        let path_str = path.to_string_lossy().to_string();

        let config = StoreConfig::new(&Some(path_str.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.db_name, "HR_db");

        std::fs::write(&path, "db_name = \"custom\"\nop_timeout_secs = 12\n").unwrap();
        let config = StoreConfig::new(&Some(path_str)).unwrap();
        assert_eq!(config.db_name, "custom");
        assert_eq!(config.op_timeout_secs, 12);
    }

    #[test]
    fn test_store_info_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir.path().to_string_lossy());

        let info = get_store_info(&config);
        assert!(!info.exists);
        assert!(info.size_bytes.is_none());
        assert!(info.collections.is_empty());
    }

    #[tokio::test]
    async fn test_open_store_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = test_config(&data_dir.to_string_lossy());

        let store = open_store(&config).await.unwrap();
        store
            .create("Role", serde_json::json!({"value": "Manager"}))
            .await
            .unwrap();

        let info = get_store_info(&config);
        assert!(info.exists);
        assert_eq!(info.schema_version, Some(1));
        assert_eq!(info.collections.len(), 6);

        let users = info
            .collections
            .iter()
            .find(|c| c.name == "users")
            .unwrap();
        assert_eq!(users.record_count, Some(2));
        let roles = info.collections.iter().find(|c| c.name == "Role").unwrap();
        assert_eq!(roles.record_count, Some(1));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }
}
