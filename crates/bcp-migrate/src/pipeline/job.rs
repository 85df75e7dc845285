//! Transfer units (Command pattern) and their results.
//!
//! A [`TransferUnit`] carries everything an executor needs to move one table
//! or one chunk of a table: the table, the optional chunk predicate, and the
//! unique name of its intermediate artifact. Units of the same table are
//! disjoint and may run concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::chunking::{ChunkPlan, ChunkPredicate, ChunkSpec};
use crate::core::schema::{TableDescriptor, TableId};
use crate::error::Result;

/// One unit of work: a whole table or one chunk of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferUnit {
    /// Table metadata.
    pub table: TableDescriptor,

    /// Chunk to transfer (None for a whole-table transfer).
    pub chunk: Option<ChunkSpec>,

    /// File name of the intermediate artifact, unique per unit.
    pub artifact_name: String,
}

impl TransferUnit {
    /// Create a unit with a freshly generated artifact name.
    pub fn new(table: TableDescriptor, chunk: Option<ChunkSpec>) -> Self {
        let artifact_name = artifact_name(&table.id, chunk.as_ref().map(|c| c.chunk_id));
        Self {
            table,
            chunk,
            artifact_name,
        }
    }

    /// Expand a table's plan into units (one per chunk, or one for the table).
    pub fn from_plan(table: &TableDescriptor, plan: &ChunkPlan) -> Vec<TransferUnit> {
        match plan {
            ChunkPlan::Unchunked => vec![TransferUnit::new(table.clone(), None)],
            ChunkPlan::Chunked(chunks) => chunks
                .iter()
                .map(|chunk| TransferUnit::new(table.clone(), Some(chunk.clone())))
                .collect(),
        }
    }

    /// Display name: `schema.table` or `schema.table:c<id>`.
    pub fn name(&self) -> String {
        match &self.chunk {
            Some(chunk) => format!("{}:c{}", self.table.id, chunk.chunk_id),
            None => self.table.id.full_name(),
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table.id
    }

    pub fn chunk_id(&self) -> Option<u32> {
        self.chunk.as_ref().map(|c| c.chunk_id)
    }

    pub fn predicate(&self) -> Option<&ChunkPredicate> {
        self.chunk.as_ref().map(|c| &c.predicate)
    }

    pub fn estimated_rows(&self) -> Option<i64> {
        self.chunk.as_ref().map(|c| c.estimated_rows)
    }

    /// SELECT statement extracting this unit's rows from the source.
    pub fn extraction_query(&self, row_order: &str) -> Result<String> {
        match self.predicate() {
            Some(predicate) => predicate.extraction_query(&self.table.id, row_order),
            None => Ok(format!("SELECT * FROM {}", self.table.id.quoted()?)),
        }
    }
}

/// `<schema>_<table>_c<chunk>_<uuid>.bcp` with unsafe characters replaced.
fn artifact_name(table: &TableId, chunk_id: Option<u32>) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    };
    format!(
        "{}_{}_c{}_{}.bcp",
        sanitize(&table.schema),
        sanitize(&table.name),
        chunk_id.unwrap_or(0),
        Uuid::new_v4().simple()
    )
}

/// Intermediate file produced by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Location of the file.
    pub path: PathBuf,

    /// File size in bytes.
    pub bytes: u64,

    /// Rows written by the export, when the tool reports it.
    pub rows: Option<i64>,
}

/// Outcome of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    /// Unit display name (`schema.table` or `schema.table:c<id>`).
    pub unit: String,

    /// Table the unit belongs to.
    pub table: TableId,

    /// Chunk id, if the table was chunked.
    pub chunk_id: Option<u32>,

    /// Whether export and import both succeeded.
    pub success: bool,

    /// Rows exported from the source.
    pub source_rows: Option<i64>,

    /// Rows imported into the destination.
    pub target_rows: Option<i64>,

    /// Artifact size in bytes.
    pub bytes: u64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Elapsed seconds.
    pub duration_seconds: f64,

    /// Error message if the unit failed.
    pub error: Option<String>,
}

impl TransferResult {
    fn base(unit: &TransferUnit, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        Self {
            unit: unit.name(),
            table: unit.table.id.clone(),
            chunk_id: unit.chunk_id(),
            success: false,
            source_rows: None,
            target_rows: None,
            bytes: 0,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: elapsed.as_secs_f64(),
            error: None,
        }
    }

    /// Create a successful result.
    pub fn success(
        unit: &TransferUnit,
        artifact: &Artifact,
        rows_imported: i64,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            source_rows: artifact.rows,
            target_rows: Some(rows_imported),
            bytes: artifact.bytes,
            ..Self::base(unit, started_at, elapsed)
        }
    }

    /// Create a failed result.
    pub fn failure(
        unit: &TransferUnit,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(unit, started_at, elapsed)
        }
    }

    /// Attach whatever the export produced before the failure.
    pub fn with_artifact(mut self, artifact: &Artifact) -> Self {
        self.source_rows = artifact.rows;
        self.bytes = artifact.bytes;
        self
    }

    /// Rows that count towards the migration total.
    pub fn rows(&self) -> i64 {
        if self.success {
            self.target_rows.unwrap_or(0)
        } else {
            0
        }
    }
}
