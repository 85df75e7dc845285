//! Migration orchestrator - main workflow coordinator.
//!
//! A run goes through these phases:
//!
//! 1. Discover and select tables on the source
//! 2. Plan: dependency order from destination FKs, chunking from source sizes
//! 3. Back up and drop destination foreign keys
//! 4. Truncate destination tables, dependents first
//! 5. Transfer all units with bounded concurrency
//! 6. Restore foreign keys (always, once they were dropped)
//!
//! Nothing destructive happens before phase 3, and once constraints are
//! dropped no error escapes before they are restored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunking::{self, ChunkPlan, ChunkSettings};
use crate::config::Config;
use crate::constraints::ConstraintLifecycle;
use crate::core::schema::{
    DependencyEdge, KeyColumnInfo, KeyRange, TableDescriptor, TableId, TableSize,
};
use crate::core::traits::{MetadataProvider, SqlExecutor, TransferExecutor};
use crate::dependency;
use crate::error::{MigrateError, Result};
use crate::executor::BcpExecutor;
use crate::metadata::MssqlDatabase;
use crate::pipeline::{MigrationReport, Scheduler, TransferResult, TransferUnit};

/// Planning outcome for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePlan {
    pub table: TableDescriptor,
    pub size: Option<TableSize>,
    pub key: Option<KeyColumnInfo>,
    pub chunks: ChunkPlan,
}

/// Everything decided before the first destructive step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Tables in load order (referenced tables first).
    pub order: Vec<TableId>,

    /// Edges ignored to break dependency cycles.
    pub broken_edges: Vec<DependencyEdge>,

    /// Per-table plans, in load order.
    pub tables: Vec<TablePlan>,

    /// Units in load order.
    pub units: Vec<TransferUnit>,
}

impl MigrationPlan {
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn chunked_tables(&self) -> usize {
        self.tables.iter().filter(|t| t.chunks.is_chunked()).count()
    }
}

/// Row count comparison for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: TableId,
    pub source_rows: i64,
    pub destination_rows: i64,
    pub matches: bool,
}

/// Connectivity of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl EndpointHealth {
    fn from_result(result: Result<Duration>) -> Self {
        match result {
            Ok(latency) => Self {
                connected: true,
                latency_ms: latency.as_millis() as u64,
                error: None,
            },
            Err(e) => Self {
                connected: false,
                latency_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Health of both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source: EndpointHealth,
    pub destination: EndpointHealth,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn MetadataProvider>,
    destination_catalog: Arc<dyn MetadataProvider>,
    destination: Arc<dyn SqlExecutor>,
    executor: Arc<dyn TransferExecutor>,
    abort: CancellationToken,
}

impl Orchestrator {
    /// Connect to both databases and use the bcp executor.
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(MssqlDatabase::connect(&config.source, "source").await?);
        let destination =
            Arc::new(MssqlDatabase::connect(&config.destination, "destination").await?);
        let executor = Arc::new(BcpExecutor::new(&config));
        Ok(Self::with_components(config, source, destination, executor))
    }

    /// Build from explicit collaborators.
    pub fn with_components<D>(
        config: Config,
        source: Arc<dyn MetadataProvider>,
        destination: Arc<D>,
        executor: Arc<dyn TransferExecutor>,
    ) -> Self
    where
        D: MetadataProvider + SqlExecutor + 'static,
    {
        Self {
            config,
            source,
            destination_catalog: destination.clone(),
            destination,
            executor,
            abort: CancellationToken::new(),
        }
    }

    /// Token that abandons in-flight units during `run`.
    ///
    /// Firing it does not skip the foreign key restore.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Source tables matching the include/exclude patterns.
    pub async fn select_tables(&self) -> Result<Vec<TableDescriptor>> {
        let filter = self.config.migration.table_filter()?;
        let all = self.source.list_tables().await?;
        let total = all.len();
        let selected: Vec<TableDescriptor> = all
            .into_iter()
            .filter(|t| filter.matches(&t.id))
            .collect();

        info!("Selected {} of {} source tables", selected.len(), total);
        Ok(selected)
    }

    /// Resolve load order and split tables into units.
    pub async fn plan(&self, tables: &[TableDescriptor]) -> Result<MigrationPlan> {
        let ids: Vec<TableId> = tables.iter().map(|t| t.id.clone()).collect();
        let edges = self.destination_catalog.list_table_dependencies().await?;
        let resolution = dependency::resolve(&ids, &edges)?;

        let by_id: HashMap<&TableId, &TableDescriptor> =
            tables.iter().map(|t| (&t.id, t)).collect();
        let settings = self.config.migration.chunking.settings();

        let mut plans = Vec::with_capacity(resolution.order.len());
        let mut units = Vec::new();
        for id in &resolution.order {
            let Some(table) = by_id.get(id) else { continue };
            let plan = self.plan_table(table, settings.as_ref()).await;
            units.extend(TransferUnit::from_plan(table, &plan.chunks));
            plans.push(plan);
        }

        let plan = MigrationPlan {
            order: resolution.order,
            broken_edges: resolution.broken_edges,
            tables: plans,
            units,
        };
        info!(
            "Planned {} units for {} tables ({} chunked, {} broken dependency edges)",
            plan.unit_count(),
            plan.tables.len(),
            plan.chunked_tables(),
            plan.broken_edges.len()
        );
        Ok(plan)
    }

    /// Chunk one table. Metadata errors degrade to a single unit.
    async fn plan_table(
        &self,
        table: &TableDescriptor,
        settings: Option<&ChunkSettings>,
    ) -> TablePlan {
        let unchunked = |size, key| TablePlan {
            table: table.clone(),
            size,
            key,
            chunks: ChunkPlan::Unchunked,
        };

        let Some(settings) = settings else {
            return unchunked(None, None);
        };

        let size = match self.source.get_table_size(&table.id).await {
            Ok(size) => size,
            Err(e) => {
                debug!("{}: size lookup failed ({}), not chunking", table.id, e);
                return unchunked(None, None);
            }
        };

        let key = self
            .source
            .get_key_column(&table.id)
            .await
            .unwrap_or_else(|e| {
                debug!("{}: key lookup failed ({}), using row windows", table.id, e);
                None
            });

        let range: Option<KeyRange> = match &key {
            Some(k) if k.key_type.is_numeric() && chunking::desired_chunks(&size, settings) > 1 => {
                self.source
                    .get_key_range(&table.id, k)
                    .await
                    .unwrap_or_else(|e| {
                        debug!(
                            "{}: key range lookup failed ({}), using row windows",
                            table.id, e
                        );
                        None
                    })
            }
            _ => None,
        };

        let chunks = chunking::plan(
            &table.id,
            Some(&size),
            key.as_ref(),
            range.as_ref(),
            settings,
        );
        TablePlan {
            table: table.clone(),
            size: Some(size),
            key,
            chunks,
        }
    }

    /// Run the migration.
    ///
    /// With `dry_run` only discovery and planning happen. `cancel` stops
    /// dispatch of new units and the abort token set by [`Orchestrator::with_abort`]
    /// also interrupts running ones; foreign keys are restored either way.
    pub async fn run(&self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let migration = &self.config.migration;

        info!("Phase 1: Discovering tables");
        let tables = self.select_tables().await?;
        if tables.is_empty() {
            return Err(MigrateError::Config(
                "no tables matched include_tables/exclude_tables".into(),
            ));
        }

        info!("Phase 2: Planning");
        let plan = self.plan(&tables).await?;

        if dry_run {
            info!("Dry run: {} units planned, nothing transferred", plan.unit_count());
            let mut report = MigrationReport::from_results(Vec::new(), started_at, start.elapsed());
            report.broken_edges = plan.broken_edges;
            return Ok(report);
        }

        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let mut lifecycle = None;
        let mut backup = None;
        let mut constraint_failures = Vec::new();
        if migration.manage_foreign_keys {
            info!("Phase 3: Backing up and dropping foreign keys");
            let mut constraints = ConstraintLifecycle::new(&migration.backup_dir);
            let set = constraints.backup(self.destination_catalog.as_ref()).await?;
            backup = Some(set.paths().clone());
            // From here on, every path must reach the restore below.
            match constraints.drop(self.destination.as_ref(), &set).await {
                Ok(failures) => constraint_failures.extend(failures),
                Err(e) => error!("Foreign key drop skipped: {}", e),
            }
            lifecycle = Some(constraints);
        }

        let mut skipped = Vec::new();
        let units = if migration.truncate_destination_first {
            info!("Phase 4: Truncating destination tables");
            let failed = self.truncate_tables(&plan.order).await;
            let (runnable, blocked): (Vec<_>, Vec<_>) = plan
                .units
                .into_iter()
                .partition(|u| !failed.contains_key(u.table_id()));
            for unit in &blocked {
                let reason = failed.get(unit.table_id()).map(String::as_str).unwrap_or("");
                skipped.push(TransferResult::failure(
                    unit,
                    format!("truncate failed: {}", reason),
                    Utc::now(),
                    Duration::ZERO,
                ));
            }
            runnable
        } else {
            plan.units
        };

        info!("Phase 5: Transferring data");
        let mut scheduler =
            Scheduler::new(migration.get_max_concurrency()).with_abort(self.abort.clone());
        if let Some(secs) = self.config.bcp.timeout_seconds {
            scheduler = scheduler.with_unit_timeout(Duration::from_secs(secs));
        }
        let mut report = scheduler
            .execute_until(units, self.executor.clone(), cancel)
            .await;
        report.add_results(skipped);
        if self.abort.is_cancelled() {
            warn!("In-flight units were aborted");
        }

        if let Some(mut constraints) = lifecycle {
            info!("Phase 6: Restoring foreign keys");
            match constraints.restore(self.destination.as_ref()).await {
                Ok(failures) => constraint_failures.extend(failures),
                Err(e) => error!("Foreign key restore skipped: {}", e),
            }
        }

        report.started_at = started_at;
        report.completed_at = Utc::now();
        report.duration_seconds = start.elapsed().as_secs_f64();
        report.constraint_failures = constraint_failures;
        report.backup = backup;
        report.broken_edges = plan.broken_edges;

        for result in report.failed_results() {
            error!(
                "{}: {}",
                result.unit,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        for failure in &report.constraint_failures {
            error!(
                "Constraint {} on {} ({:?}): {}",
                failure.constraint, failure.table, failure.operation, failure.error
            );
        }
        info!("Migration finished: {}", report.summary());
        Ok(report)
    }

    /// Empty tables, dependents first. Returns failures keyed by table.
    async fn truncate_tables(&self, order: &[TableId]) -> HashMap<TableId, String> {
        let mut failed = HashMap::new();
        for table in order.iter().rev() {
            match self.destination.truncate_table(table).await {
                Ok(()) => debug!("{}: truncated", table),
                Err(e) => {
                    error!("{}: could not empty destination table: {}", table, e);
                    failed.insert(table.clone(), e.to_string());
                }
            }
        }
        failed
    }

    /// Compare exact row counts for every selected table.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let tables = self.select_tables().await?;
        let mut results = Vec::with_capacity(tables.len());

        for table in &tables {
            let source_rows = self.source.exact_row_count(&table.id).await?;
            let destination_rows = self.destination_catalog.exact_row_count(&table.id).await?;
            let matches = source_rows == destination_rows;

            if matches {
                info!("{}: {} rows (match)", table.id, source_rows);
            } else {
                warn!(
                    "{}: source={} destination={} (MISMATCH)",
                    table.id, source_rows, destination_rows
                );
            }
            results.push(TableValidation {
                table: table.id.clone(),
                source_rows,
                destination_rows,
                matches,
            });
        }

        Ok(results)
    }

    /// Check connectivity of both databases.
    pub async fn health_check(&self) -> HealthCheckResult {
        let source = EndpointHealth::from_result(self.source.health_check().await);
        let destination =
            EndpointHealth::from_result(self.destination_catalog.health_check().await);
        HealthCheckResult {
            healthy: source.connected && destination.connected,
            source,
            destination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{KeyType, RangeValue};
    use crate::testing::{make_fk, EventLog, FakeDatabase, FakeTransfer};
    use tempfile::TempDir;

    fn make_config(dir: &TempDir) -> Config {
        let yaml = format!(
            r#"
source: {{host: src, database: Sales, user: sa, password: pw}}
destination: {{host: dst, database: Sales, user: sa, password: pw}}
migration:
  max_concurrency: 2
  backup_dir: {}
"#,
            dir.path().join("fk").display()
        );
        Config::from_yaml(&yaml).unwrap()
    }

    fn position(events: &[String], needle: &str) -> usize {
        events
            .iter()
            .position(|e| e.contains(needle))
            .unwrap_or_else(|| panic!("event {:?} not found in {:?}", needle, events))
    }

    fn last_position(events: &[String], needle: &str) -> usize {
        events
            .iter()
            .rposition(|e| e.contains(needle))
            .unwrap_or_else(|| panic!("event {:?} not found in {:?}", needle, events))
    }

    struct Harness {
        orchestrator: Orchestrator,
        destination: Arc<FakeDatabase>,
        executor: Arc<FakeTransfer>,
        events: EventLog,
    }

    fn harness(
        config: Config,
        source: FakeDatabase,
        destination: FakeDatabase,
        executor: FakeTransfer,
    ) -> Harness {
        let events = EventLog::default();
        let destination = Arc::new(destination.with_events(events.clone()));
        let executor = Arc::new(executor.with_events(events.clone()));
        let orchestrator = Orchestrator::with_components(
            config,
            Arc::new(source),
            destination.clone(),
            executor.clone(),
        );
        Harness {
            orchestrator,
            destination,
            executor,
            events,
        }
    }

    fn three_tables() -> FakeDatabase {
        FakeDatabase::new()
            .with_table("OrderLines")
            .with_table("Orders")
            .with_table("Customers")
    }

    fn chain_fks() -> FakeDatabase {
        FakeDatabase::new()
            .with_foreign_key(make_fk("FK_Orders_Customers", "Orders", "Customers"))
            .with_foreign_key(make_fk("FK_Lines_Orders", "OrderLines", "Orders"))
    }

    #[tokio::test]
    async fn test_plan_orders_referenced_tables_first() {
        let dir = TempDir::new().unwrap();
        let h = harness(make_config(&dir), three_tables(), chain_fks(), FakeTransfer::new());

        let tables = h.orchestrator.select_tables().await.unwrap();
        let plan = h.orchestrator.plan(&tables).await.unwrap();

        let order: Vec<String> = plan.order.iter().map(|t| t.name.clone()).collect();
        assert_eq!(order, vec!["Customers", "Orders", "OrderLines"]);
        assert!(plan.broken_edges.is_empty());
        assert_eq!(plan.unit_count(), 3);
    }

    #[tokio::test]
    async fn test_full_run_ordering() {
        let dir = TempDir::new().unwrap();
        let h = harness(make_config(&dir), three_tables(), chain_fks(), FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.total_units, 3);
        assert_eq!(report.successful, 3);
        assert_eq!(report.total_rows, 30);
        assert!(report.is_success());
        let backup = report.backup.as_ref().unwrap();
        assert!(backup.create_script.exists());

        let events = h.events.lock().unwrap().clone();
        // All drops before any truncate, truncates dependents first.
        assert!(last_position(&events, "DROP CONSTRAINT") < position(&events, "TRUNCATE"));
        assert!(
            position(&events, "TRUNCATE TABLE [dbo].[OrderLines]")
                < position(&events, "TRUNCATE TABLE [dbo].[Customers]")
        );
        // All transfers between truncation and restore.
        assert!(last_position(&events, "TRUNCATE") < position(&events, "export"));
        assert!(last_position(&events, "import") < position(&events, "ADD CONSTRAINT"));
        assert_eq!(
            events.iter().filter(|e| e.contains("ADD CONSTRAINT")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_cycle_is_broken_and_reported() {
        let dir = TempDir::new().unwrap();
        let destination = FakeDatabase::new()
            .with_foreign_key(make_fk("FK_A_B", "A", "B"))
            .with_foreign_key(make_fk("FK_B_A", "B", "A"));
        let source = FakeDatabase::new().with_table("A").with_table("B");
        let h = harness(make_config(&dir), source, destination, FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.broken_edges.len(), 1);
        assert_eq!(report.successful, 2);
        assert!(report.constraint_failures.is_empty());
    }

    #[tokio::test]
    async fn test_unit_failure_still_restores_constraints() {
        let dir = TempDir::new().unwrap();
        let h = harness(
            make_config(&dir),
            three_tables(),
            chain_fks(),
            FakeTransfer::new().failing_import("dbo.Orders"),
        );

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.total_units, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.successful + report.failed, report.total_units);
        assert_eq!(report.status, "partial");
        let failed: Vec<String> = report.failed_tables().iter().map(|t| t.to_string()).collect();
        assert_eq!(failed, vec!["dbo.Orders"]);

        let creates = h
            .destination
            .statements()
            .iter()
            .filter(|s| s.contains("ADD CONSTRAINT"))
            .count();
        assert_eq!(creates, 2);
    }

    #[tokio::test]
    async fn test_abort_still_restores_constraints() {
        let dir = TempDir::new().unwrap();
        let h = harness(
            make_config(&dir),
            three_tables(),
            chain_fks(),
            FakeTransfer::new().with_import_delay(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();
        let abort = CancellationToken::new();
        {
            let cancel = cancel.clone();
            let abort = abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
                abort.cancel();
            });
        }

        let orchestrator = h.orchestrator.with_abort(abort);
        let report = orchestrator.run(cancel, false).await.unwrap();

        assert_eq!(report.total_units, 3);
        assert_eq!(report.failed, 3);
        assert!(report
            .results
            .iter()
            .any(|r| r.error.as_deref() == Some("aborted")));

        let creates = h
            .destination
            .statements()
            .iter()
            .filter(|s| s.contains("ADD CONSTRAINT"))
            .count();
        assert_eq!(creates, 2);
        let events = h.events.lock().unwrap().clone();
        assert!(last_position(&events, "import") < last_position(&events, "ADD CONSTRAINT"));
    }

    #[tokio::test]
    async fn test_truncate_failure_skips_table_units() {
        let dir = TempDir::new().unwrap();
        let destination = chain_fks()
            .failing_on("TRUNCATE TABLE [dbo].[Orders]")
            .failing_on("DELETE FROM [dbo].[Orders]");
        let h = harness(make_config(&dir), three_tables(), destination, FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.total_units, 3);
        assert_eq!(report.failed, 1);
        let orders = report.results.iter().find(|r| r.unit == "dbo.Orders").unwrap();
        assert!(orders.error.as_deref().unwrap().starts_with("truncate failed"));
        assert!(!h.executor.exported().contains(&"dbo.Orders".to_string()));
    }

    #[tokio::test]
    async fn test_large_table_is_chunked() {
        let dir = TempDir::new().unwrap();
        let mut key = KeyColumnInfo::new("Id", KeyType::Integer);
        key.is_primary_key = true;
        let source = FakeDatabase::new()
            .with_table("Big")
            .with_size("Big", 1_000_000, 1000.0)
            .with_key(
                "Big",
                key,
                Some(KeyRange {
                    min: RangeValue::Int(1),
                    max: RangeValue::Int(1_000_000),
                    count: 1_000_000,
                }),
            );
        let h = harness(make_config(&dir), source, FakeDatabase::new(), FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.total_units, 5);
        assert_eq!(report.successful, 5);
        let mut exported = h.executor.exported();
        exported.sort();
        assert_eq!(exported[0], "dbo.Big:c1");
        assert_eq!(exported[4], "dbo.Big:c5");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let h = harness(make_config(&dir), three_tables(), chain_fks(), FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), true)
            .await
            .unwrap();

        assert_eq!(report.total_units, 0);
        assert!(h.destination.statements().is_empty());
        assert!(h.executor.exported().is_empty());
        assert!(!dir.path().join("fk").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let h = harness(make_config(&dir), three_tables(), chain_fks(), FakeTransfer::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.orchestrator.run(cancel, false).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert!(h.destination.statements().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_tables_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = make_config(&dir);
        config.migration.include_tables = vec!["nothing.*".into()];
        let h = harness(config, three_tables(), chain_fks(), FakeTransfer::new());

        let err = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_unmanaged_constraints_and_no_truncate() {
        let dir = TempDir::new().unwrap();
        let mut config = make_config(&dir);
        config.migration.manage_foreign_keys = false;
        config.migration.truncate_destination_first = false;
        let h = harness(config, three_tables(), chain_fks(), FakeTransfer::new());

        let report = h
            .orchestrator
            .run(CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.successful, 3);
        assert!(report.backup.is_none());
        assert!(h.destination.statements().is_empty());
    }

    #[tokio::test]
    async fn test_validate_compares_counts() {
        let dir = TempDir::new().unwrap();
        let source = FakeDatabase::new()
            .with_table("A")
            .with_table("B")
            .with_size("A", 10, 1.0)
            .with_size("B", 5, 1.0);
        let destination = FakeDatabase::new().with_size("A", 10, 1.0).with_size("B", 4, 1.0);
        let h = harness(make_config(&dir), source, destination, FakeTransfer::new());

        let results = h.orchestrator.validate().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].matches);
        assert!(!results[1].matches);
        assert_eq!(results[1].destination_rows, 4);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = TempDir::new().unwrap();
        let h = harness(make_config(&dir), three_tables(), chain_fks(), FakeTransfer::new());
        let health = h.orchestrator.health_check().await;
        assert!(health.healthy);
        assert!(health.source.error.is_none());
    }
}
