//! Transfer executors.

mod bcp;

pub use bcp::{parse_rows_copied, redact_args, BcpExecutor};
