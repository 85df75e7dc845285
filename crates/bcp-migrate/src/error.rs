//! Error types for the migration library.

use thiserror::Error;

/// Process exit codes reported by the CLI.
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_DATABASE_ERROR: u8 = 2;
pub const EXIT_TRANSFER_FAILED: u8 = 3;
pub const EXIT_CONSTRAINT_ERROR: u8 = 4;
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, empty or duplicate table selection, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog query returned something unusable
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A single foreign key drop/create statement failed
    #[error("Constraint {name}: {message}")]
    Constraint { name: String, message: String },

    /// Data transfer failed for a specific unit
    #[error("Transfer failed for {unit}: {message}")]
    Transfer { unit: String, message: String },

    /// The bulk-copy process could not be started or reported failure
    #[error("bcp failed: {0}")]
    Executor(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(unit: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create a Constraint error
    pub fn constraint(name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Constraint {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Database(_) | MigrateError::Pool { .. } | MigrateError::Metadata(_) => {
                EXIT_DATABASE_ERROR
            }
            MigrateError::Transfer { .. } | MigrateError::Executor(_) | MigrateError::Cancelled => {
                EXIT_TRANSFER_FAILED
            }
            MigrateError::Constraint { .. } => EXIT_CONSTRAINT_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
