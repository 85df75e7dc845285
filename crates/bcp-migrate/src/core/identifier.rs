//! Identifier validation and quoting for generated T-SQL.
//!
//! SQL identifiers (schema, table, column and constraint names) cannot be
//! passed as query parameters, yet every script this crate produces (FK
//! drop/create statements, bcp extraction queries, TRUNCATE statements) is
//! built from catalog names. All of them go through [`quote_mssql`], which
//! rejects suspicious names and escapes closing brackets.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted by SQL Server (`sysname`).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.chars().count(),
            name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema, e.g. `[dbo].[Users]`.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote a comma-separated column list, e.g. `[A], [B]`.
pub fn quote_column_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_mssql(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Validate a free-form ORDER BY expression taken from configuration.
///
/// The row-window extraction query splices this expression verbatim, so it
/// must be a single expression: no statement separators, comments or EXEC.
pub fn validate_order_expression(expr: &str) -> Result<()> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(MigrateError::Config(
            "bcp.row_order cannot be empty".to_string(),
        ));
    }

    if trimmed.contains(';') {
        return Err(MigrateError::Config(format!(
            "SECURITY: bcp.row_order contains semicolon (possible injection): {:?}",
            expr
        )));
    }

    if trimmed.contains("--") || trimmed.contains("/*") || trimmed.contains("*/") {
        return Err(MigrateError::Config(format!(
            "SECURITY: bcp.row_order contains SQL comment markers (possible injection): {:?}",
            expr
        )));
    }

    let lower = trimmed.to_lowercase();
    if lower.split_whitespace().any(|word| {
        word == "exec" || word == "execute" || word.starts_with("exec(") || word.starts_with("execute(")
    }) {
        return Err(MigrateError::Config(format!(
            "SECURITY: bcp.row_order contains EXEC/EXECUTE keyword (possible injection): {:?}",
            expr
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("Order Details").is_ok());
        assert!(validate_identifier("schema_1").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let err = validate_identifier("users\0; DROP TABLE x").unwrap_err();
        assert!(err.to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(128)).is_ok());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_quote_mssql_escapes_bracket() {
        assert_eq!(quote_mssql("users").unwrap(), "[users]");
        assert_eq!(quote_mssql("table]name").unwrap(), "[table]]name]");
    }

    #[test]
    fn test_quote_mssql_sql_injection_safely_quoted() {
        let quoted = quote_mssql("x]; DROP TABLE users; --").unwrap();
        assert_eq!(quoted, "[x]]; DROP TABLE users; --]");
    }

    #[test]
    fn test_qualify_mssql() {
        assert_eq!(qualify_mssql("dbo", "Users").unwrap(), "[dbo].[Users]");
        assert!(qualify_mssql("", "Users").is_err());
    }

    #[test]
    fn test_quote_column_list() {
        let cols = vec!["Id".to_string(), "Tenant]Id".to_string()];
        assert_eq!(quote_column_list(&cols).unwrap(), "[Id], [Tenant]]Id]");
    }

    #[test]
    fn test_order_expression() {
        assert!(validate_order_expression("%%physloc%%").is_ok());
        assert!(validate_order_expression("(SELECT NULL)").is_ok());
        assert!(validate_order_expression("").is_err());
        assert!(validate_order_expression("1; DROP TABLE x").is_err());
        assert!(validate_order_expression("1 -- x").is_err());
        assert!(validate_order_expression("1 EXEC sp_who").is_err());
    }
}
