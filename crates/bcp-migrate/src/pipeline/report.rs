//! Aggregate result of a migration run.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraints::{BackupPaths, ConstraintFailure};
use crate::core::schema::{DependencyEdge, TableId};
use crate::error::Result;

use super::job::TransferResult;

/// Result of a migration run.
///
/// `successful + failed == total_units` always holds; results are sorted
/// by descending duration so the slowest units come first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `partial` or `failed`.
    pub status: String,

    pub total_units: usize,

    pub successful: usize,

    pub failed: usize,

    /// Rows imported by successful units.
    pub total_rows: i64,

    /// Artifact bytes moved by successful units.
    pub total_bytes: u64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,

    /// Highest number of units running at once.
    pub peak_concurrency: usize,

    /// Per-unit results, slowest first.
    pub results: Vec<TransferResult>,

    /// Constraints that could not be dropped or restored.
    pub constraint_failures: Vec<ConstraintFailure>,

    /// Where the FK scripts were written, if constraints were managed.
    pub backup: Option<BackupPaths>,

    /// Dependency edges ignored to break cycles.
    pub broken_edges: Vec<DependencyEdge>,
}

impl MigrationReport {
    /// Build a report from unit results.
    pub fn from_results(
        results: Vec<TransferResult>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let mut report = Self {
            run_id: Uuid::new_v4().to_string(),
            status: String::new(),
            total_units: 0,
            successful: 0,
            failed: 0,
            total_rows: 0,
            total_bytes: 0,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: elapsed.as_secs_f64(),
            peak_concurrency: 0,
            results,
            constraint_failures: Vec::new(),
            backup: None,
            broken_edges: Vec::new(),
        };
        report.recount();
        report
    }

    /// Add results produced outside the scheduler (e.g. units skipped
    /// because their table could not be truncated).
    pub fn add_results(&mut self, results: impl IntoIterator<Item = TransferResult>) {
        self.results.extend(results);
        self.recount();
    }

    fn recount(&mut self) {
        self.results.sort_by(|a, b| {
            b.duration_seconds
                .total_cmp(&a.duration_seconds)
                .then_with(|| a.unit.cmp(&b.unit))
        });
        self.total_units = self.results.len();
        self.successful = self.results.iter().filter(|r| r.success).count();
        self.failed = self.total_units - self.successful;
        self.total_rows = self.results.iter().map(TransferResult::rows).sum();
        self.total_bytes = self
            .results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.bytes)
            .sum();
        self.status = self.status_label().to_string();
    }

    fn status_label(&self) -> &'static str {
        if self.failed == 0 {
            "completed"
        } else if self.successful == 0 {
            "failed"
        } else {
            "partial"
        }
    }

    /// True when every unit succeeded and every constraint was handled.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.constraint_failures.is_empty()
    }

    /// Results that failed.
    pub fn failed_results(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Tables with at least one failed unit.
    pub fn failed_tables(&self) -> BTreeSet<TableId> {
        self.failed_results().map(|r| r.table.clone()).collect()
    }

    /// Average throughput.
    pub fn rows_per_second(&self) -> f64 {
        if self.duration_seconds > 0.0 {
            self.total_rows as f64 / self.duration_seconds
        } else {
            0.0
        }
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Transferred {} rows in {:.1}s ({:.0} rows/sec). Units: {} succeeded, {} failed of {}.",
            self.total_rows,
            self.duration_seconds,
            self.rows_per_second(),
            self.successful,
            self.failed,
            self.total_units
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
