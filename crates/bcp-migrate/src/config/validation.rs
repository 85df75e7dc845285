//! Configuration validation.

use super::{Config, ConnectionConfig, TableFilter};
use crate::core::identifier::validate_order_expression;
use crate::error::{MigrateError, Result};

fn validate_connection(name: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", name)));
    }
    if conn.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", name)));
    }
    if !conn.trusted_connection && conn.user.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.user is required unless trusted_connection is set",
            name
        )));
    }
    if conn.port == 0 {
        return Err(MigrateError::Config(format!("{}.port must be non-zero", name)));
    }
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("destination", &config.destination)?;

    // Cannot migrate a database onto itself
    if config.source.host.eq_ignore_ascii_case(&config.destination.host)
        && config.source.port == config.destination.port
        && config
            .source
            .database
            .eq_ignore_ascii_case(&config.destination.database)
    {
        return Err(MigrateError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if let Some(0) = migration.max_concurrency {
        return Err(MigrateError::Config(
            "migration.max_concurrency must be at least 1".into(),
        ));
    }

    let chunking = &migration.chunking;
    if chunking.threshold_mb <= 0.0 {
        return Err(MigrateError::Config(
            "migration.chunking.threshold_mb must be positive".into(),
        ));
    }
    if chunking.max_chunk_mb <= 0.0 {
        return Err(MigrateError::Config(
            "migration.chunking.max_chunk_mb must be positive".into(),
        ));
    }
    if chunking.max_chunks_per_table == 0 {
        return Err(MigrateError::Config(
            "migration.chunking.max_chunks_per_table must be at least 1".into(),
        ));
    }

    TableFilter::new(&migration.include_tables, &migration.exclude_tables)?;

    if config.bcp.batch_size == 0 {
        return Err(MigrateError::Config("bcp.batch_size must be at least 1".into()));
    }
    if !(512..=65_535).contains(&config.bcp.packet_size) {
        return Err(MigrateError::Config(
            "bcp.packet_size must be between 512 and 65535".into(),
        ));
    }
    if let Some(0) = config.bcp.timeout_seconds {
        return Err(MigrateError::Config(
            "bcp.timeout_seconds must be at least 1".into(),
        ));
    }
    validate_order_expression(&config.bcp.row_order)?;

    Ok(())
}
