//! Bounded-concurrency scheduler for transfer units.
//!
//! Units are fed in order into a bounded work queue drained by a fixed pool
//! of workers. Every unit reaches a terminal state (success or failure) and
//! is reported on a result channel; a failing or panicking unit never stops
//! its worker.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::traits::TransferExecutor;

use super::job::{Artifact, TransferResult, TransferUnit};
use super::report::MigrationReport;

/// Thread-safe progress tracker for scheduler execution.
///
/// Workers update it with atomic operations, so it can be read at any time
/// without locking.
#[derive(Debug)]
pub struct ProgressTracker {
    total: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    rows: AtomicI64,
    bytes: AtomicU64,
    start_time: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            rows: AtomicI64::new(0),
            bytes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// A worker picked up a unit.
    pub fn unit_started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    /// A worker finished a unit (in any terminal state).
    pub fn unit_finished(&self, result: &TransferResult) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(result);
    }

    /// Count a terminal result.
    fn record(&self, result: &TransferResult) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
            self.rows.fetch_add(result.rows(), Ordering::Relaxed);
            self.bytes.fetch_add(result.bytes, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of units ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> usize {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn rows(&self) -> i64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Current throughput in rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Runs transfer units with at most `max_concurrency` in flight.
pub struct Scheduler {
    max_concurrency: usize,
    unit_timeout: Option<Duration>,
    abort: CancellationToken,
    progress: Arc<ProgressTracker>,
}

impl Scheduler {
    /// Create a scheduler. A concurrency of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            unit_timeout: None,
            abort: CancellationToken::new(),
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    /// Fail any unit that runs longer than `timeout`.
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    /// Abandon running units when `abort` fires.
    ///
    /// Aborted units are recorded as failed with `aborted` and their
    /// artifacts are removed. Dispatch stops as well.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Shared handle to the live progress counters.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Execute every unit and return the aggregate report.
    pub async fn execute(
        &self,
        units: Vec<TransferUnit>,
        executor: Arc<dyn TransferExecutor>,
    ) -> MigrationReport {
        self.execute_until(units, executor, CancellationToken::new())
            .await
    }

    /// Execute units until `cancel` fires.
    ///
    /// Cancellation only stops dispatch: units already running finish, units
    /// still queued are recorded as failed with `cancelled`. Running units are
    /// only interrupted by the abort token (see [`Scheduler::with_abort`]).
    pub async fn execute_until(
        &self,
        units: Vec<TransferUnit>,
        executor: Arc<dyn TransferExecutor>,
        cancel: CancellationToken,
    ) -> MigrationReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = units.len();
        self.progress.set_total(total);

        info!(
            "Scheduling {} units with {} workers",
            total, self.max_concurrency
        );

        let (work_tx, work_rx) = mpsc::channel::<TransferUnit>(self.max_concurrency);
        let (result_tx, mut result_rx) = mpsc::channel::<TransferResult>(self.max_concurrency);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = Vec::with_capacity(self.max_concurrency);
        for worker_id in 0..self.max_concurrency {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let executor = executor.clone();
            let progress = self.progress.clone();
            let timeout = self.unit_timeout;
            let abort = self.abort.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    // Lock is held only while waiting for the next unit.
                    let next = work_rx.lock().await.recv().await;
                    let Some(unit) = next else { break };

                    let result = if abort.is_cancelled() {
                        let result =
                            TransferResult::failure(&unit, "cancelled", Utc::now(), Duration::ZERO);
                        progress.record(&result);
                        result
                    } else {
                        progress.unit_started();
                        let result = run_isolated(unit, executor.clone(), timeout, &abort).await;
                        progress.unit_finished(&result);
                        result
                    };

                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
        }

        let feeder = {
            let result_tx = result_tx.clone();
            let progress = self.progress.clone();
            let abort = self.abort.clone();
            tokio::spawn(async move {
                let mut pending = units.into_iter();
                while let Some(unit) = pending.next() {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        _ = abort.cancelled() => None,
                        permit = work_tx.reserve() => permit.ok(),
                    };
                    if let Some(permit) = permit {
                        permit.send(unit);
                        continue;
                    }

                    warn!("Dispatch stopped, marking remaining units as cancelled");
                    for unit in std::iter::once(unit).chain(pending.by_ref()) {
                        let result =
                            TransferResult::failure(&unit, "cancelled", Utc::now(), Duration::ZERO);
                        progress.record(&result);
                        if result_tx.send(result).await.is_err() {
                            return;
                        }
                    }
                }
                // Dropping work_tx closes the queue and lets workers exit.
            })
        };
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            let done = results.len() + 1;
            if result.success {
                info!(
                    "[{}/{}] {}: {} rows in {:.1}s",
                    done,
                    total,
                    result.unit,
                    result.rows(),
                    result.duration_seconds
                );
            } else {
                warn!(
                    "[{}/{}] {}: failed: {}",
                    done,
                    total,
                    result.unit,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        if let Err(e) = feeder.await {
            warn!("Unit feeder task failed: {}", e);
        }
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task failed: {}", e);
            }
        }

        let mut report = MigrationReport::from_results(results, started_at, start.elapsed());
        report.peak_concurrency = self.progress.peak_in_flight();
        info!("{}", report.summary());
        report
    }
}

/// Run one unit on its own task so a panic is contained to that unit.
async fn run_isolated(
    unit: TransferUnit,
    executor: Arc<dyn TransferExecutor>,
    timeout: Option<Duration>,
    abort: &CancellationToken,
) -> TransferResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let task_unit = unit.clone();
    let task_executor = executor.clone();
    let mut handle =
        tokio::spawn(async move { run_unit(&task_unit, task_executor.as_ref()).await });

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let abandoned = tokio::select! {
        joined = &mut handle => {
            return match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => TransferResult::failure(
                    &unit,
                    "executor panicked",
                    started_at,
                    start.elapsed(),
                ),
                Err(e) => {
                    TransferResult::failure(&unit, e.to_string(), started_at, start.elapsed())
                }
            };
        }
        _ = deadline => format!(
            "timed out after {}s",
            timeout.map(|limit| limit.as_secs()).unwrap_or_default()
        ),
        _ = abort.cancelled() => "aborted".to_string(),
    };

    // Aborting drops the executor future, which kills any child process.
    handle.abort();
    let _ = handle.await;

    let artifact = Artifact {
        path: executor.artifact_path(&unit),
        bytes: 0,
        rows: None,
    };
    if let Err(e) = executor.cleanup(&artifact).await {
        warn!(
            "{}: failed to remove {}: {}",
            unit.name(),
            artifact.path.display(),
            e
        );
    }

    TransferResult::failure(&unit, abandoned, started_at, start.elapsed())
}

/// Export, import, then clean up the artifact.
async fn run_unit(unit: &TransferUnit, executor: &dyn TransferExecutor) -> TransferResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let name = unit.name();
    debug!("{}: exporting", name);

    let artifact = match executor.export(unit).await {
        Ok(artifact) => artifact,
        Err(e) => {
            return TransferResult::failure(
                unit,
                format!("export failed: {}", e),
                started_at,
                start.elapsed(),
            )
        }
    };

    debug!("{}: importing {} bytes", name, artifact.bytes);
    let imported = executor.import(unit, &artifact).await;

    if let Err(e) = executor.cleanup(&artifact).await {
        warn!("{}: failed to remove {}: {}", name, artifact.path.display(), e);
    }

    match imported {
        Ok(rows) => match artifact.rows {
            Some(exported) if exported != rows => TransferResult::failure(
                unit,
                format!("exported {} rows but imported {}", exported, rows),
                started_at,
                start.elapsed(),
            )
            .with_artifact(&artifact),
            _ => TransferResult::success(unit, &artifact, rows, started_at, start.elapsed()),
        },
        Err(e) => TransferResult::failure(
            unit,
            format!("import failed: {}", e),
            started_at,
            start.elapsed(),
        )
        .with_artifact(&artifact),
    }
}
