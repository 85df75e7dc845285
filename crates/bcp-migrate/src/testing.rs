//! In-memory fakes for the collaborator traits.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::schema::{
    FkAction, ForeignKeyConstraint, KeyColumnInfo, KeyRange, TableDescriptor, TableId, TableSize,
};
use crate::core::traits::{remove_if_exists, MetadataProvider, SqlExecutor, TransferExecutor};
use crate::error::{MigrateError, Result};
use crate::pipeline::{Artifact, TransferUnit};

/// Ordered log shared between fakes so tests can assert cross-component ordering.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn make_fk(name: &str, parent: &str, referenced: &str) -> ForeignKeyConstraint {
    ForeignKeyConstraint {
        name: name.to_string(),
        parent: TableId::new("dbo", parent),
        parent_columns: vec![format!("{}Id", referenced)],
        referenced: TableId::new("dbo", referenced),
        referenced_columns: vec!["Id".to_string()],
        on_delete: FkAction::NoAction,
        on_update: FkAction::NoAction,
        is_disabled: false,
        is_not_trusted: false,
        not_for_replication: false,
    }
}

/// A database that answers catalog queries from fixtures and records statements.
#[derive(Default)]
pub struct FakeDatabase {
    tables: Vec<TableDescriptor>,
    foreign_keys: Vec<ForeignKeyConstraint>,
    sizes: HashMap<TableId, TableSize>,
    keys: HashMap<TableId, (KeyColumnInfo, Option<KeyRange>)>,
    failing: Vec<String>,
    statements: Mutex<Vec<String>>,
    events: EventLog,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str) -> Self {
        self.tables
            .push(TableDescriptor::new(TableId::new("dbo", name)).with_primary_key(true));
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKeyConstraint) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_size(mut self, name: &str, row_count: i64, used_space_mb: f64) -> Self {
        self.sizes.insert(
            TableId::new("dbo", name),
            TableSize {
                row_count,
                used_space_mb,
            },
        );
        self
    }

    pub fn with_key(mut self, name: &str, key: KeyColumnInfo, range: Option<KeyRange>) -> Self {
        self.keys.insert(TableId::new("dbo", name), (key, range));
        self
    }

    /// Fail every statement containing `fragment`.
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Every statement attempted, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataProvider for FakeDatabase {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        Ok(self.tables.clone())
    }

    async fn list_foreign_keys(&self) -> Result<Vec<ForeignKeyConstraint>> {
        Ok(self.foreign_keys.clone())
    }

    async fn get_table_size(&self, table: &TableId) -> Result<TableSize> {
        Ok(self.sizes.get(table).copied().unwrap_or(TableSize {
            row_count: 0,
            used_space_mb: 0.0,
        }))
    }

    async fn get_key_column(&self, table: &TableId) -> Result<Option<KeyColumnInfo>> {
        Ok(self.keys.get(table).map(|(key, _)| key.clone()))
    }

    async fn get_key_range(
        &self,
        table: &TableId,
        _column: &KeyColumnInfo,
    ) -> Result<Option<KeyRange>> {
        Ok(self.keys.get(table).and_then(|(_, range)| *range))
    }
}

#[async_trait]
impl SqlExecutor for FakeDatabase {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.events.lock().unwrap().push(format!("sql {}", sql));
        if self.failing.iter().any(|f| sql.contains(f.as_str())) {
            return Err(MigrateError::Metadata(format!("statement rejected: {}", sql)));
        }
        Ok(())
    }
}

/// A transfer executor that never touches the filesystem.
pub struct FakeTransfer {
    rows: i64,
    delay: Duration,
    import_delay: Duration,
    work_dir: Option<PathBuf>,
    fail_export: HashSet<String>,
    fail_import: HashSet<String>,
    panic_on: HashSet<String>,
    short_import: HashMap<String, i64>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    exported: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<PathBuf>>,
    events: EventLog,
}

impl Default for FakeTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self {
            rows: 10,
            delay: Duration::ZERO,
            import_delay: Duration::ZERO,
            work_dir: None,
            fail_export: HashSet::new(),
            fail_import: HashSet::new(),
            panic_on: HashSet::new(),
            short_import: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            exported: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
            events: EventLog::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_import_delay(mut self, delay: Duration) -> Self {
        self.import_delay = delay;
        self
    }

    /// Write real artifact files under `dir` and delete them on cleanup.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn failing_export(mut self, unit: &str) -> Self {
        self.fail_export.insert(unit.to_string());
        self
    }

    pub fn failing_import(mut self, unit: &str) -> Self {
        self.fail_import.insert(unit.to_string());
        self
    }

    pub fn panicking(mut self, unit: &str) -> Self {
        self.panic_on.insert(unit.to_string());
        self
    }

    /// Import fewer rows than were exported.
    pub fn short_import(mut self, unit: &str, rows: i64) -> Self {
        self.short_import.insert(unit.to_string(), rows);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn exported(&self) -> Vec<String> {
        self.exported.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<PathBuf> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferExecutor for FakeTransfer {
    async fn export(&self, unit: &TransferUnit) -> Result<Artifact> {
        let name = unit.name();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.contains(&name) {
            panic!("simulated executor panic for {}", name);
        }
        self.events.lock().unwrap().push(format!("export {}", name));
        if self.fail_export.contains(&name) {
            return Err(MigrateError::Executor(format!("export of {} rejected", name)));
        }
        self.exported.lock().unwrap().push(name);

        let path = self.artifact_path(unit);
        if self.work_dir.is_some() {
            tokio::fs::write(&path, vec![0u8; 100]).await?;
        }
        Ok(Artifact {
            path,
            bytes: 100,
            rows: Some(self.rows),
        })
    }

    async fn import(&self, unit: &TransferUnit, artifact: &Artifact) -> Result<i64> {
        let name = unit.name();
        self.events.lock().unwrap().push(format!("import {}", name));
        if !self.import_delay.is_zero() {
            tokio::time::sleep(self.import_delay).await;
        }
        if self.fail_import.contains(&name) {
            return Err(MigrateError::Executor(format!("import of {} rejected", name)));
        }
        Ok(self
            .short_import
            .get(&name)
            .copied()
            .unwrap_or_else(|| artifact.rows.unwrap_or(0)))
    }

    fn artifact_path(&self, unit: &TransferUnit) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.join(&unit.artifact_name),
            None => PathBuf::from(&unit.artifact_name),
        }
    }

    async fn cleanup(&self, artifact: &Artifact) -> Result<()> {
        self.cleaned.lock().unwrap().push(artifact.path.clone());
        if self.work_dir.is_some() {
            remove_if_exists(&artifact.path).await?;
        }
        Ok(())
    }
}
