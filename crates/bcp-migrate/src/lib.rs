//! # bcp-migrate
//!
//! Copies tables between two SQL Server databases with identical schemas,
//! driving the native `bcp` utility.
//!
//! The library is organized around a few independent pieces:
//!
//! - **Dependency resolution**: FK-respecting load order, with cycles broken
//! - **Chunk planning**: large tables split into key-range or row-window units
//! - **Scheduling**: units transferred with bounded concurrency, failures isolated
//! - **Constraint lifecycle**: FKs backed up, dropped and always restored
//!
//! ## Example
//!
//! ```rust,no_run
//! use bcp_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> bcp_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Migrated {} rows", report.total_rows);
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod constraints;
pub mod core;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use chunking::{ChunkPlan, ChunkSettings, ChunkSpec};
pub use config::{BcpConfig, Config, ConnectionConfig, MigrationConfig};
pub use constraints::{ConstraintFailure, ConstraintLifecycle};
pub use crate::core::schema::{DependencyEdge, ForeignKeyConstraint, TableDescriptor, TableId};
pub use crate::core::traits::{MetadataProvider, SqlExecutor, TransferExecutor};
pub use dependency::{resolve, Resolution};
pub use error::{MigrateError, Result};
pub use executor::BcpExecutor;
pub use metadata::MssqlDatabase;
pub use orchestrator::{HealthCheckResult, MigrationPlan, Orchestrator, TableValidation};
pub use pipeline::{MigrationReport, Scheduler, TransferResult, TransferUnit};
