//! Transfer pipeline: work units, the parallel scheduler and the run report.
//!
//! - [`TransferUnit`]: Command pattern encapsulating one table or chunk
//! - [`Scheduler`]: bounded worker pool executing units
//! - [`MigrationReport`]: aggregate outcome of a run
//!
//! The pipeline separates **what** to transfer (units) from **how** it is
//! transferred (a [`TransferExecutor`](crate::core::TransferExecutor)).

mod job;
mod report;
mod scheduler;

pub use job::{Artifact, TransferResult, TransferUnit};
pub use report::MigrationReport;
pub use scheduler::{ProgressTracker, Scheduler};
