//! Configuration for the depot object-store service.

use crate::types::DigestAlgo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Path of the SQLite metadata catalog
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Storage locations seeded into the catalog at startup
    #[serde(default)]
    pub locations: Vec<LocationConfig>,

    /// Storage class tags: single character -> label
    #[serde(default = "default_storage_class_list")]
    pub storage_class_list: BTreeMap<String, String>,

    /// Default storage class for new buckets
    #[serde(default = "default_storage_class")]
    pub default_storage_class: String,

    /// Default quota for new buckets in bytes (None = unlimited)
    #[serde(default)]
    pub default_quota_size: Option<u64>,

    /// Default per-file size cap for new buckets in bytes (None = unlimited)
    #[serde(default)]
    pub default_max_file_size: Option<u64>,

    /// Minimum accepted upload size in bytes (1 rejects empty files)
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,

    /// Digest algorithm for ingest checksums and fixity re-checks
    #[serde(default)]
    pub checksum_algorithm: DigestAlgo,

    /// Minimum multipart part size in bytes
    #[serde(default = "default_multipart_chunksize_min")]
    pub multipart_chunksize_min: u64,

    /// Maximum multipart part size in bytes
    #[serde(default = "default_multipart_chunksize_max")]
    pub multipart_chunksize_max: u64,

    /// Maximum number of parts per multipart upload
    #[serde(default = "default_multipart_max_parts")]
    pub multipart_max_parts: u64,

    /// Seconds after the last update before an incomplete multipart upload
    /// expires
    #[serde(default = "default_multipart_expires_secs")]
    pub multipart_expires_secs: u64,

    /// Maximum object key length
    #[serde(default = "default_object_key_max_len")]
    pub object_key_max_len: usize,

    /// Maximum blob URI length
    #[serde(default = "default_file_uri_max_len")]
    pub file_uri_max_len: usize,

    /// Directory levels created when splitting a file id into a blob path
    #[serde(default = "default_storage_path_dimensions")]
    pub storage_path_dimensions: usize,

    /// Characters per directory level in a blob path
    #[serde(default = "default_storage_path_split_length")]
    pub storage_path_split_length: usize,

    /// Number of concurrent background task workers
    #[serde(default = "default_task_workers")]
    pub task_workers: usize,

    /// Target interval between fixity re-checks of the same file, in seconds
    #[serde(default = "default_fixity_frequency_secs")]
    pub fixity_frequency_secs: u64,

    /// How often the fixity scheduler wakes up and enqueues a batch, in
    /// seconds
    #[serde(default = "default_fixity_batch_interval_secs")]
    pub fixity_batch_interval_secs: u64,

    /// Cap on files enqueued per fixity batch (None = derived from frequency)
    #[serde(default)]
    pub fixity_max_count: Option<u64>,

    /// Cap on total bytes enqueued per fixity batch
    #[serde(default)]
    pub fixity_max_size: Option<u64>,

    /// How often the maintenance sweep (expired multiparts, orphaned files)
    /// runs, in seconds
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

/// A storage location seeded at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Slug name (`^[a-z][a-z0-9-]+$`, max 20 chars)
    pub name: String,

    /// Backend-interpretable root URI (a directory for the `fs` backend)
    pub uri: String,

    /// Whether this is the default location for new buckets
    #[serde(default)]
    pub default: bool,

    /// Backend name resolved through the storage registry
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./depot.db")
}

fn default_storage_class_list() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("S".to_string(), "Standard".to_string()),
        ("A".to_string(), "Archive".to_string()),
    ])
}

fn default_storage_class() -> String {
    "S".to_string()
}

fn default_min_file_size() -> u64 {
    1
}

fn default_multipart_chunksize_min() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_multipart_chunksize_max() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_multipart_max_parts() -> u64 {
    10000
}

fn default_multipart_expires_secs() -> u64 {
    4 * 24 * 3600 // 4 days
}

fn default_object_key_max_len() -> usize {
    255
}

fn default_file_uri_max_len() -> usize {
    255
}

fn default_storage_path_dimensions() -> usize {
    2
}

fn default_storage_path_split_length() -> usize {
    2
}

fn default_task_workers() -> usize {
    4
}

fn default_fixity_frequency_secs() -> u64 {
    30 * 24 * 3600 // every file re-checked once a month
}

fn default_fixity_batch_interval_secs() -> u64 {
    3600
}

fn default_maintenance_interval_secs() -> u64 {
    300
}

fn default_storage_backend() -> String {
    "fs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        // An empty TOML document deserializes to all serde defaults.
        toml::from_str("").expect("default config must deserialize")
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DEPOT_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        // DEPOT_DATA_DIR seeds a single default filesystem location and puts
        // the catalog next to it.
        if let Ok(dir) = std::env::var("DEPOT_DATA_DIR") {
            let dir = PathBuf::from(dir);
            config.db_path = dir.join("depot.db");
            config.locations = vec![LocationConfig {
                name: "default".to_string(),
                uri: dir.join("blobs").to_string_lossy().into_owned(),
                default: true,
                storage_backend: default_storage_backend(),
            }];
        }

        if let Ok(path) = std::env::var("DEPOT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        macro_rules! env_override {
            ($var:literal, $field:ident) => {
                if let Ok(raw) = std::env::var($var) {
                    if let Ok(parsed) = raw.parse() {
                        config.$field = parsed;
                    }
                }
            };
            ($var:literal, $field:ident, option) => {
                if let Ok(raw) = std::env::var($var) {
                    if let Ok(parsed) = raw.parse() {
                        config.$field = Some(parsed);
                    }
                }
            };
        }

        env_override!("DEPOT_MIN_FILE_SIZE", min_file_size);
        env_override!("DEPOT_DEFAULT_QUOTA_SIZE", default_quota_size, option);
        env_override!("DEPOT_DEFAULT_MAX_FILE_SIZE", default_max_file_size, option);
        env_override!("DEPOT_MULTIPART_CHUNKSIZE_MIN", multipart_chunksize_min);
        env_override!("DEPOT_MULTIPART_CHUNKSIZE_MAX", multipart_chunksize_max);
        env_override!("DEPOT_MULTIPART_MAX_PARTS", multipart_max_parts);
        env_override!("DEPOT_MULTIPART_EXPIRES_SECS", multipart_expires_secs);
        env_override!("DEPOT_OBJECT_KEY_MAX_LEN", object_key_max_len);
        env_override!("DEPOT_TASK_WORKERS", task_workers);
        env_override!("DEPOT_FIXITY_FREQUENCY_SECS", fixity_frequency_secs);
        env_override!(
            "DEPOT_FIXITY_BATCH_INTERVAL_SECS",
            fixity_batch_interval_secs
        );
        env_override!("DEPOT_MAINTENANCE_INTERVAL_SECS", maintenance_interval_secs);

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        // Try config file first
        if let Ok(path) = std::env::var("DEPOT_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        // Try default config file locations
        for path in &["depot.toml", "/etc/depot/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        // Fall back to environment variables
        Self::from_env()
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.storage_class_list.contains_key(&self.default_storage_class) {
            return Err(ConfigError::Invalid(format!(
                "default_storage_class {:?} is not in storage_class_list",
                self.default_storage_class
            )));
        }
        if self.multipart_chunksize_min > self.multipart_chunksize_max {
            return Err(ConfigError::Invalid(
                "multipart_chunksize_min exceeds multipart_chunksize_max".to_string(),
            ));
        }
        let defaults = self.locations.iter().filter(|l| l.default).count();
        if self.locations.len() > 1 && defaults != 1 {
            return Err(ConfigError::Invalid(
                "exactly one location must be marked default".to_string(),
            ));
        }
        for loc in &self.locations {
            if !crate::types::is_valid_location_name(&loc.name) {
                return Err(ConfigError::Invalid(format!(
                    "invalid location name {:?} (lower-case alphanumeric + dashes)",
                    loc.name
                )));
            }
        }
        Ok(())
    }

    pub fn multipart_expires(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.multipart_expires_secs as i64)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
