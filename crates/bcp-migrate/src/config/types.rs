//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::chunking::ChunkSettings;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database rows are read from.
    pub source: ConnectionConfig,

    /// Database rows are written to (same schema as the source).
    pub destination: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Bulk-copy tool settings.
    #[serde(default)]
    pub bcp: BcpConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// SQL Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,

    /// Server port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// SQL login (ignored with trusted_connection).
    #[serde(default)]
    pub user: String,

    /// SQL password (ignored with trusted_connection).
    #[serde(default)]
    pub password: String,

    /// Use integrated authentication instead of a SQL login.
    #[serde(default)]
    pub trusted_connection: bool,

    /// Encrypt the connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust the server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("trusted_connection", &self.trusted_connection)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Chunking of large tables into independent units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Split large tables (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tables at or above this size are chunked (default: 500).
    #[serde(default = "default_threshold_mb")]
    pub threshold_mb: f64,

    /// Target size of one chunk (default: 200).
    #[serde(default = "default_max_chunk_mb")]
    pub max_chunk_mb: f64,

    /// Upper bound on chunks per table (default: 8).
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_table: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_mb: default_threshold_mb(),
            max_chunk_mb: default_max_chunk_mb(),
            max_chunks_per_table: default_max_chunks(),
        }
    }
}

impl ChunkingConfig {
    /// Planner settings, or `None` when chunking is disabled.
    pub fn settings(&self) -> Option<ChunkSettings> {
        self.enabled.then(|| ChunkSettings {
            threshold_mb: self.threshold_mb,
            max_chunk_mb: self.max_chunk_mb,
            max_chunks: self.max_chunks_per_table,
        })
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables to include (glob patterns over `schema.table`). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns over `schema.table`).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Units in flight at once. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Empty destination tables before loading (default: true).
    #[serde(default = "default_true")]
    pub truncate_destination_first: bool,

    /// Back up, drop and restore destination foreign keys (default: true).
    #[serde(default = "default_true")]
    pub manage_foreign_keys: bool,

    /// Where FK backup scripts are written (default: fk_backup).
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            max_concurrency: None,
            truncate_destination_first: true,
            manage_foreign_keys: true,
            backup_dir: default_backup_dir(),
            chunking: ChunkingConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.max_concurrency.is_none() {
            // cores - 2, but at least 2 and at most 32
            let workers = resources.cpu_cores.saturating_sub(2).clamp(2, 32);
            self.max_concurrency = Some(workers);
            info!("Auto-tuned config: max_concurrency={}", workers);
        }
        self
    }

    pub fn get_max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(4)
    }
}

/// Settings for the external `bcp` utility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BcpConfig {
    /// bcp executable (default: `bcp` on PATH).
    #[serde(default = "default_bcp_path")]
    pub path: PathBuf,

    /// Directory for intermediate artifacts (default: bcp_work).
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Rows per committed import batch (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Network packet size in bytes (default: 32767).
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,

    /// Per-unit timeout. No timeout when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Ordering used by row-window chunks (default: `%%physloc%%`).
    #[serde(default = "default_row_order")]
    pub row_order: String,
}

impl Default for BcpConfig {
    fn default() -> Self {
        Self {
            path: default_bcp_path(),
            work_dir: default_work_dir(),
            batch_size: default_batch_size(),
            packet_size: default_packet_size(),
            timeout_seconds: None,
            row_order: default_row_order(),
        }
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_true() -> bool {
    true
}

fn default_threshold_mb() -> f64 {
    500.0
}

fn default_max_chunk_mb() -> f64 {
    200.0
}

fn default_max_chunks() -> usize {
    8
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("fk_backup")
}

fn default_bcp_path() -> PathBuf {
    PathBuf::from("bcp")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("bcp_work")
}

fn default_batch_size() -> u32 {
    10_000
}

fn default_packet_size() -> u32 {
    32_767
}

fn default_row_order() -> String {
    "%%physloc%%".to_string()
}
