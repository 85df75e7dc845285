//! Collaborator traits the orchestration engine is written against.
//!
//! - [`MetadataProvider`]: catalog queries (tables, FKs, sizes, key ranges)
//! - [`SqlExecutor`]: runs DDL/DML statements on the destination
//! - [`TransferExecutor`]: moves one unit of work with the native bulk-copy tool
//!
//! Each provider instance is bound to one database, so the source and the
//! destination are simply two instances. `metadata::MssqlDatabase` and
//! `executor::BcpExecutor` are the production implementations; tests use
//! in-memory fakes.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Result;
use crate::pipeline::{Artifact, TransferUnit};

use super::schema::{
    DependencyEdge, ForeignKeyConstraint, KeyColumnInfo, KeyRange, TableDescriptor, TableId,
    TableSize,
};

/// Read-only catalog access for one database.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// List user tables.
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>>;

    /// List every foreign key, with columns in key order.
    async fn list_foreign_keys(&self) -> Result<Vec<ForeignKeyConstraint>>;

    /// List table-level dependencies.
    ///
    /// Default implementation derives one edge per (dependent, referenced)
    /// pair from [`list_foreign_keys`](Self::list_foreign_keys).
    async fn list_table_dependencies(&self) -> Result<Vec<DependencyEdge>> {
        let edges: BTreeSet<DependencyEdge> = self
            .list_foreign_keys()
            .await?
            .iter()
            .map(ForeignKeyConstraint::edge)
            .collect();
        Ok(edges.into_iter().collect())
    }

    /// Row count and used space of a table.
    async fn get_table_size(&self, table: &TableId) -> Result<TableSize>;

    /// The column the table can be chunked on, if any.
    ///
    /// A single-column primary key wins over an identity column.
    async fn get_key_column(&self, table: &TableId) -> Result<Option<KeyColumnInfo>>;

    /// `[min, max]` and count of a numeric key column. `None` for an empty table.
    async fn get_key_range(
        &self,
        table: &TableId,
        column: &KeyColumnInfo,
    ) -> Result<Option<KeyRange>>;

    /// Exact row count, used for post-migration validation.
    ///
    /// Defaults to the (possibly approximate) count from
    /// [`get_table_size`](Self::get_table_size).
    async fn exact_row_count(&self, table: &TableId) -> Result<i64> {
        Ok(self.get_table_size(table).await?.row_count)
    }

    /// Round-trip latency of a trivial catalog call.
    async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        self.list_tables().await?;
        Ok(start.elapsed())
    }
}

/// Statement execution on the destination database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a single statement.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Empty a table.
    ///
    /// Tries `TRUNCATE TABLE` first and falls back to `DELETE FROM` when the
    /// table cannot be truncated (e.g. it is still referenced by a FK that
    /// could not be dropped).
    async fn truncate_table(&self, table: &TableId) -> Result<()> {
        let quoted = table.quoted()?;
        match self.execute(&format!("TRUNCATE TABLE {};", quoted)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("{}: TRUNCATE failed ({}), falling back to DELETE", table, e);
                self.execute(&format!("DELETE FROM {};", quoted)).await
            }
        }
    }
}

/// Moves one [`TransferUnit`] from source to destination.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Extract the unit's rows from the source into an artifact.
    async fn export(&self, unit: &TransferUnit) -> Result<Artifact>;

    /// Load an artifact into the destination. Returns rows imported.
    async fn import(&self, unit: &TransferUnit, artifact: &Artifact) -> Result<i64>;

    /// Where `export` writes the unit's artifact.
    ///
    /// Used to remove the file when a unit is abandoned before its own
    /// cleanup runs.
    fn artifact_path(&self, unit: &TransferUnit) -> PathBuf {
        PathBuf::from(&unit.artifact_name)
    }

    /// Remove the artifact. A missing file is not an error.
    async fn cleanup(&self, artifact: &Artifact) -> Result<()> {
        remove_if_exists(&artifact.path).await
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
