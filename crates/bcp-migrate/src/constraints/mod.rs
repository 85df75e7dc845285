//! Foreign key lifecycle on the destination: backup, drop, restore.
//!
//! The lifecycle is a small state machine:
//!
//! ```text
//! NotStarted --backup--> BackedUp --drop--> Dropped --restore--> Restored
//! ```
//!
//! Backup writes a drop script and a create script before anything is
//! destroyed, so constraints can always be recreated by hand. Drop and
//! restore run each statement independently and collect failures instead of
//! aborting. Only constraints that were actually dropped are restored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::schema::{ForeignKeyConstraint, TableId};
use crate::core::traits::{MetadataProvider, SqlExecutor};
use crate::error::{MigrateError, Result};

/// Position in the constraint lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    BackedUp,
    Dropped,
    Restored,
}

/// Location of the persisted FK scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPaths {
    pub drop_script: PathBuf,
    pub create_script: PathBuf,
}

/// Foreign keys captured by a backup.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    constraints: Vec<ForeignKeyConstraint>,
    paths: BackupPaths,
}

impl ConstraintSet {
    pub fn constraints(&self) -> &[ForeignKeyConstraint] {
        &self.constraints
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// Which step a constraint failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperation {
    Drop,
    Restore,
}

/// A constraint that could not be dropped or restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintFailure {
    pub constraint: String,
    pub table: TableId,
    pub operation: ConstraintOperation,
    pub error: String,
}

/// Drives backup, drop and restore of destination foreign keys.
pub struct ConstraintLifecycle {
    backup_dir: PathBuf,
    state: LifecycleState,
    dropped: Vec<ForeignKeyConstraint>,
}

impl ConstraintLifecycle {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            state: LifecycleState::NotStarted,
            dropped: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Constraints currently dropped and awaiting restore.
    pub fn dropped(&self) -> &[ForeignKeyConstraint] {
        &self.dropped
    }

    fn transition(&self, expected: LifecycleState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(MigrateError::constraint(
                operation,
                format!(
                    "cannot {} in state {:?} (expected {:?})",
                    operation, self.state, expected
                ),
            ));
        }
        Ok(())
    }

    /// Capture every foreign key of the destination and persist the scripts.
    ///
    /// Any error here is fatal: nothing has been destroyed yet.
    pub async fn backup(&mut self, destination: &dyn MetadataProvider) -> Result<ConstraintSet> {
        self.transition(LifecycleState::NotStarted, "backup")?;

        let constraints = destination.list_foreign_keys().await?;
        let paths = write_scripts(&self.backup_dir, &constraints)?;

        info!(
            "Backed up {} foreign keys to {}",
            constraints.len(),
            paths.create_script.display()
        );

        self.state = LifecycleState::BackedUp;
        Ok(ConstraintSet { constraints, paths })
    }

    /// Drop every constraint in `set`, continuing past failures.
    pub async fn drop(
        &mut self,
        destination: &dyn SqlExecutor,
        set: &ConstraintSet,
    ) -> Result<Vec<ConstraintFailure>> {
        self.transition(LifecycleState::BackedUp, "drop")?;

        let mut failures = Vec::new();
        for fk in &set.constraints {
            match run_script(destination, fk.drop_script()).await {
                Ok(()) => self.dropped.push(fk.clone()),
                Err(e) => {
                    warn!("Failed to drop FK {} on {}: {}", fk.name, fk.parent, e);
                    failures.push(failure(fk, ConstraintOperation::Drop, &e));
                }
            }
        }

        info!(
            "Dropped {} of {} foreign keys",
            self.dropped.len(),
            set.constraints.len()
        );
        self.state = LifecycleState::Dropped;
        Ok(failures)
    }

    /// Recreate every constraint that was dropped, continuing past failures.
    ///
    /// Failures are never raised: the create script in the backup directory
    /// is the recovery path.
    pub async fn restore(
        &mut self,
        destination: &dyn SqlExecutor,
    ) -> Result<Vec<ConstraintFailure>> {
        self.transition(LifecycleState::Dropped, "restore")?;

        let mut failures = Vec::new();
        let dropped = std::mem::take(&mut self.dropped);
        for fk in &dropped {
            if let Err(e) = run_script(destination, fk.create_script()).await {
                error!("Failed to restore FK {} on {}: {}", fk.name, fk.parent, e);
                failures.push(failure(fk, ConstraintOperation::Restore, &e));
            }
        }

        if failures.is_empty() {
            info!("Restored {} foreign keys", dropped.len());
        } else {
            error!(
                "{} of {} foreign keys could not be restored",
                failures.len(),
                dropped.len()
            );
        }
        self.state = LifecycleState::Restored;
        Ok(failures)
    }
}

async fn run_script(destination: &dyn SqlExecutor, script: Result<String>) -> Result<()> {
    destination.execute(&script?).await
}

fn failure(
    fk: &ForeignKeyConstraint,
    operation: ConstraintOperation,
    e: &MigrateError,
) -> ConstraintFailure {
    ConstraintFailure {
        constraint: fk.name.clone(),
        table: fk.parent.clone(),
        operation,
        error: e.to_string(),
    }
}

/// Write `drop_foreign_keys_<stamp>.sql` and `create_foreign_keys_<stamp>.sql`.
///
/// Files are created exclusively and never overwritten.
fn write_scripts(dir: &Path, constraints: &[ForeignKeyConstraint]) -> Result<BackupPaths> {
    std::fs::create_dir_all(dir)?;

    let now = Utc::now();
    let stamp = now.format("%Y%m%d_%H%M%S_%3f").to_string();
    let header = format!(
        "-- {} foreign keys captured {}\n",
        constraints.len(),
        now.to_rfc3339()
    );

    let mut drop_script = header.clone();
    let mut create_script = header;
    for fk in constraints {
        drop_script.push_str(&fk.drop_script()?);
        drop_script.push('\n');
        create_script.push_str(&fk.create_script()?);
        create_script.push('\n');
    }

    let paths = BackupPaths {
        drop_script: dir.join(format!("drop_foreign_keys_{}.sql", stamp)),
        create_script: dir.join(format!("create_foreign_keys_{}.sql", stamp)),
    };
    write_new(&paths.drop_script, &drop_script)?;
    write_new(&paths.create_script, &create_script)?;
    Ok(paths)
}

fn write_new(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
