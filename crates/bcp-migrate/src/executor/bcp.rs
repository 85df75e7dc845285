//! [`TransferExecutor`] backed by the SQL Server `bcp` utility.
//!
//! Export runs `bcp "<query>" queryout <file>` against the source; import
//! runs `bcp [schema].[table] in <file>` against the destination. Both use
//! native format (`-n`) so no type conversion happens in between. Each
//! invocation opens its own connection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::config::{BcpConfig, Config, ConnectionConfig};
use crate::core::traits::TransferExecutor;
use crate::error::{MigrateError, Result};
use crate::pipeline::{Artifact, TransferUnit};

/// Lines of tool output kept in error messages.
const OUTPUT_TAIL_LINES: usize = 20;

/// Runs one bcp process per export and per import.
pub struct BcpExecutor {
    bcp: BcpConfig,
    source: ConnectionConfig,
    destination: ConnectionConfig,
}

impl BcpExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            bcp: config.bcp.clone(),
            source: config.source.clone(),
            destination: config.destination.clone(),
        }
    }

    /// Directory holding the artifacts.
    pub fn work_dir(&self) -> &Path {
        &self.bcp.work_dir
    }

    /// Arguments for `bcp "<query>" queryout <file> ...`.
    pub fn export_args(&self, unit: &TransferUnit, file: &Path) -> Result<Vec<String>> {
        let mut args = vec![
            unit.extraction_query(&self.bcp.row_order)?,
            "queryout".to_string(),
            file.display().to_string(),
            "-n".to_string(),
        ];
        args.extend(connection_args(&self.source));
        args.extend(["-a".to_string(), self.bcp.packet_size.to_string()]);
        Ok(args)
    }

    /// Arguments for `bcp [schema].[table] in <file> ...`.
    pub fn import_args(&self, unit: &TransferUnit, file: &Path) -> Result<Vec<String>> {
        let mut args = vec![
            unit.table.id.quoted()?,
            "in".to_string(),
            file.display().to_string(),
            "-n".to_string(),
        ];
        args.extend(connection_args(&self.destination));
        args.extend([
            "-b".to_string(),
            self.bcp.batch_size.to_string(),
            "-h".to_string(),
            "TABLOCK".to_string(),
            "-a".to_string(),
            self.bcp.packet_size.to_string(),
        ]);
        if unit.table.has_identity {
            args.push("-E".to_string());
        }
        Ok(args)
    }

    /// Run bcp and return the number of rows it reports copying.
    async fn run(&self, unit: &TransferUnit, direction: &str, args: Vec<String>) -> Result<i64> {
        debug!(
            "{}: {} {} {}",
            unit.name(),
            self.bcp.path.display(),
            direction,
            redact_args(&args).join(" ")
        );

        let output = Command::new(&self.bcp.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                MigrateError::Executor(format!(
                    "failed to start {}: {}",
                    self.bcp.path.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(MigrateError::Executor(format!(
                "{} exited with {}: {}",
                direction,
                output.status,
                output_tail(&stdout, &stderr)
            )));
        }

        parse_rows_copied(&stdout).ok_or_else(|| {
            MigrateError::Executor(format!(
                "{} did not report a row count: {}",
                direction,
                output_tail(&stdout, &stderr)
            ))
        })
    }
}

#[async_trait]
impl TransferExecutor for BcpExecutor {
    async fn export(&self, unit: &TransferUnit) -> Result<Artifact> {
        tokio::fs::create_dir_all(&self.bcp.work_dir).await?;
        let path = self.artifact_path(unit);
        let args = self.export_args(unit, &path)?;

        let rows = match self.run(unit, "export", args).await {
            Ok(rows) => rows,
            Err(e) => {
                // Partial output is never imported.
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };
        let bytes = tokio::fs::metadata(&path).await?.len();

        Ok(Artifact {
            path,
            bytes,
            rows: Some(rows),
        })
    }

    async fn import(&self, unit: &TransferUnit, artifact: &Artifact) -> Result<i64> {
        let args = self.import_args(unit, &artifact.path)?;
        self.run(unit, "import", args).await
    }

    fn artifact_path(&self, unit: &TransferUnit) -> PathBuf {
        self.bcp.work_dir.join(&unit.artifact_name)
    }
}

/// `-S host,port -d db` plus `-T` or `-U user -P password`.
fn connection_args(conn: &ConnectionConfig) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        conn.server(),
        "-d".to_string(),
        conn.database.clone(),
    ];
    if conn.trusted_connection {
        args.push("-T".to_string());
    } else {
        args.extend([
            "-U".to_string(),
            conn.user.clone(),
            "-P".to_string(),
            conn.password.clone(),
        ]);
    }
    if conn.trust_server_cert {
        args.push("-u".to_string());
    }
    args
}

/// Copy of `args` with the value after `-P` masked.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            redacted.push("[REDACTED]".to_string());
            mask_next = false;
        } else {
            mask_next = arg == "-P";
            redacted.push(arg.clone());
        }
    }
    redacted
}

/// Extract `N` from bcp's `N rows copied.` summary line.
pub fn parse_rows_copied(output: &str) -> Option<i64> {
    static ROWS_COPIED: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ROWS_COPIED
        .get_or_init(|| Regex::new(r"(?m)^\s*(\d+) rows? copied").ok())
        .as_ref()?;

    re.captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    if lines.is_empty() {
        "no output".to_string()
    } else {
        lines[start..].join(" | ")
    }
}
