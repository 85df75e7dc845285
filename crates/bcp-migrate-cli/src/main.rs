//! bcp-migrate CLI - parallel SQL Server to SQL Server table copy.

use bcp_migrate::{Config, MigrateError, Orchestrator};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "bcp-migrate")]
#[command(about = "Parallel SQL Server to SQL Server table copy using bcp")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    verbosity: String,

    /// Seconds to wait after a signal before aborting in-flight units (default: 60)
    #[arg(long, global = true, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy all selected tables from source to destination
    Run {
        /// Override number of concurrent units
        #[arg(long)]
        workers: Option<usize>,

        /// Keep existing destination rows instead of emptying tables first
        #[arg(long)]
        no_truncate: bool,

        /// Dry run: resolve order and plan units without touching the destination
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare row counts between source and destination
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    // SIGINT and SIGTERM stop dispatch; constraints are still restored
    let shutdown =
        setup_signal_handler(cli.shutdown_timeout, config.migration.backup_dir.clone())?;

    match cli.command {
        Commands::Run {
            workers,
            no_truncate,
            dry_run,
        } => {
            if let Some(w) = workers {
                if w == 0 {
                    return Err(MigrateError::Config("--workers must be at least 1".into()));
                }
                config.migration.max_concurrency = Some(w);
            }
            if no_truncate {
                config.migration.truncate_destination_first = false;
            }

            let orchestrator = Orchestrator::new(config)
                .await?
                .with_abort(shutdown.abort.clone());
            let report = orchestrator.run(shutdown.cancel.clone(), dry_run).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = if dry_run {
                    "Dry run completed!"
                } else {
                    "Migration completed!"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                println!("  Status: {}", report.status);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Units: {}/{}", report.successful, report.total_units);
                println!("  Rows: {}", report.total_rows);
                println!("  Throughput: {:.0} rows/sec", report.rows_per_second());
                println!("  Peak concurrency: {}", report.peak_concurrency);
                if !report.broken_edges.is_empty() {
                    println!("  Broken dependency edges:");
                    for edge in &report.broken_edges {
                        println!("    {} -> {}", edge.dependent, edge.referenced);
                    }
                }
                let failed = report.failed_tables();
                if !failed.is_empty() {
                    let names: Vec<String> = failed.iter().map(|t| t.to_string()).collect();
                    println!("  Failed tables: {}", names.join(", "));
                }
                if !report.constraint_failures.is_empty() {
                    println!("  Constraint failures:");
                    for f in &report.constraint_failures {
                        println!("    {} on {}: {}", f.constraint, f.table, f.error);
                    }
                }
                if let Some(ref backup) = report.backup {
                    println!("  FK restore script: {}", backup.create_script.display());
                }
            }

            if report.failed > 0 {
                return Err(MigrateError::transfer(
                    format!("{} unit(s)", report.failed),
                    "see the failed tables above",
                ));
            }
            if !report.constraint_failures.is_empty() {
                return Err(MigrateError::constraint(
                    format!("{} constraint(s)", report.constraint_failures.len()),
                    "apply the FK restore script manually",
                ));
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;
            let mismatched = results.iter().filter(|r| !r.matches).count();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for r in &results {
                    println!(
                        "  {} {}: source={} destination={}",
                        if r.matches { "OK      " } else { "MISMATCH" },
                        r.table,
                        r.source_rows,
                        r.destination_rows
                    );
                }
                println!("\n{} of {} tables match", results.len() - mismatched, results.len());
            }

            if mismatched > 0 {
                return Err(MigrateError::transfer(
                    format!("{} table(s)", mismatched),
                    "row counts differ",
                ));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for (label, endpoint) in [("Source", &result.source), ("Destination", &result.destination)] {
                    println!(
                        "  {}: {} ({}ms)",
                        label,
                        if endpoint.connected { "OK" } else { "FAILED" },
                        endpoint.latency_ms
                    );
                    if let Some(ref err) = endpoint.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("health check failed", "health-check"));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Tokens fired by the signal handler.
struct Shutdown {
    /// Stop dispatching new units.
    cancel: CancellationToken,
    /// Abandon units that are still running.
    abort: CancellationToken,
}

/// First SIGINT/SIGTERM stops dispatch; after `shutdown_timeout` seconds the
/// running units are aborted so the foreign key restore can start. Only a
/// second signal exits without restoring.
#[cfg(unix)]
fn setup_signal_handler(
    shutdown_timeout: u64,
    backup_dir: PathBuf,
) -> Result<Shutdown, MigrateError> {
    let shutdown = Shutdown {
        cancel: CancellationToken::new(),
        abort: CancellationToken::new(),
    };
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let cancel = shutdown.cancel.clone();
    let abort = shutdown.abort.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing in-flight units and restoring constraints (timeout: {}s)...",
            name, shutdown_timeout
        );
        cancel.cancel();

        let forced = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(shutdown_timeout)) => false,
            _ = sigint.recv() => true,
            _ = sigterm.recv() => true,
        };
        if !forced {
            eprintln!(
                "Shutdown timeout reached. Aborting in-flight units, then restoring constraints..."
            );
            abort.cancel();
            tokio::select! {
                _ = sigint.recv() => {},
                _ = sigterm.recv() => {},
            }
        }

        exit_without_restore(&backup_dir);
    });

    Ok(shutdown)
}

/// Same as the unix handler, driven by Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler(
    shutdown_timeout: u64,
    backup_dir: PathBuf,
) -> Result<Shutdown, MigrateError> {
    let shutdown = Shutdown {
        cancel: CancellationToken::new(),
        abort: CancellationToken::new(),
    };

    let cancel = shutdown.cancel.clone();
    let abort = shutdown.abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!(
            "\nReceived Ctrl-C. Finishing in-flight units and restoring constraints (timeout: {}s)...",
            shutdown_timeout
        );
        cancel.cancel();

        let forced = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(shutdown_timeout)) => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        if !forced {
            eprintln!(
                "Shutdown timeout reached. Aborting in-flight units, then restoring constraints..."
            );
            abort.cancel();
            let _ = tokio::signal::ctrl_c().await;
        }

        exit_without_restore(&backup_dir);
    });

    Ok(shutdown)
}

fn exit_without_restore(backup_dir: &Path) -> ! {
    warn!(
        "Exiting on second signal; foreign keys may still be dropped. Restore scripts are in {}",
        backup_dir.display()
    );
    eprintln!(
        "Exiting without restoring foreign keys. Run the latest create_foreign_keys_*.sql in {}",
        backup_dir.display()
    );
    std::process::exit(130);
}
