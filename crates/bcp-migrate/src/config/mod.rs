//! Configuration loading, validation and table selection.

mod types;
mod validation;

pub use types::*;

use regex::Regex;
use std::path::Path;

use crate::core::schema::TableId;
use crate::error::{MigrateError, Result};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ConnectionConfig {
    /// Build an ADO connection string for tiberius.
    pub fn connection_string(&self) -> String {
        let auth = if self.trusted_connection {
            "IntegratedSecurity=true".to_string()
        } else {
            format!("User Id={};Password={}", self.user, self.password)
        };

        format!(
            "Server=tcp:{},{};Database={};{};Encrypt={};TrustServerCertificate={}",
            self.host, self.port, self.database, auth, self.encrypt, self.trust_server_cert
        )
    }

    /// `host,port` as bcp and sqlcmd expect it.
    pub fn server(&self) -> String {
        format!("{},{}", self.host, self.port)
    }
}

impl MigrationConfig {
    /// Compile the include/exclude patterns.
    pub fn table_filter(&self) -> Result<TableFilter> {
        TableFilter::new(&self.include_tables, &self.exclude_tables)
    }

    /// Whether a table is part of the migration.
    pub fn selects(&self, table: &TableId) -> bool {
        self.table_filter()
            .map(|filter| filter.matches(table))
            .unwrap_or(false)
    }
}

/// Compiled include/exclude glob patterns.
///
/// A pattern containing a dot is matched against `schema.table`; one without
/// is matched against the table name alone. Matching is case-insensitive,
/// like SQL Server's default collation.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: Vec<(Regex, bool)>,
    exclude: Vec<(Regex, bool)>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<(Regex, bool)>> {
            patterns
                .iter()
                .map(|p| Ok((glob_to_regex(p)?, p.contains('.'))))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn matches(&self, table: &TableId) -> bool {
        let full = table.full_name();
        let hit = |(re, qualified): &(Regex, bool)| {
            if *qualified {
                re.is_match(&full)
            } else {
                re.is_match(&table.name)
            }
        };

        let included = self.include.is_empty() || self.include.iter().any(hit);
        included && !self.exclude.iter().any(hit)
    }
}

/// Translate a `*`/`?` glob into an anchored, case-insensitive regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(MigrateError::Config("table pattern cannot be empty".into()));
    }

    let mut re = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re)
        .map_err(|e| MigrateError::Config(format!("invalid table pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: src-host
  database: Sales
  user: sa
  password: secret
destination:
  host: dst-host
  database: Sales
  user: sa
  password: secret
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 1433);
        assert!(config.source.encrypt);
        assert!(config.migration.truncate_destination_first);
        assert!(config.migration.manage_foreign_keys);
        assert_eq!(config.migration.max_concurrency, None);
        assert_eq!(config.migration.get_max_concurrency(), 4);
        assert_eq!(config.migration.chunking.threshold_mb, 500.0);
        assert_eq!(config.migration.chunking.max_chunk_mb, 200.0);
        assert_eq!(config.migration.chunking.max_chunks_per_table, 8);
        assert_eq!(config.bcp.batch_size, 10_000);
        assert_eq!(config.bcp.packet_size, 32_767);
        assert_eq!(config.bcp.row_order, "%%physloc%%");
        assert_eq!(config.bcp.timeout_seconds, None);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
source:
  host: src-host
  port: 14330
  database: Sales
  trusted_connection: true
destination:
  host: dst-host
  database: Sales
  user: loader
  password: secret
  trust_server_cert: true
migration:
  include_tables: ["sales.*"]
  exclude_tables: ["*_archive"]
  max_concurrency: 6
  truncate_destination_first: false
  backup_dir: /var/backups/fk
  chunking:
    enabled: false
bcp:
  path: /opt/mssql-tools/bin/bcp
  timeout_seconds: 3600
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.port, 14330);
        assert!(config.source.trusted_connection);
        assert_eq!(config.migration.get_max_concurrency(), 6);
        assert!(!config.migration.truncate_destination_first);
        assert!(config.migration.chunking.settings().is_none());
        assert_eq!(config.bcp.timeout_seconds, Some(3600));
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 64,
        };
        let tuned = MigrationConfig::default().with_auto_tuning(&resources);
        assert_eq!(tuned.max_concurrency, Some(32));

        let small = SystemResources {
            total_memory_gb: 4.0,
            cpu_cores: 2,
        };
        assert_eq!(
            MigrationConfig::default()
                .with_auto_tuning(&small)
                .max_concurrency,
            Some(2)
        );

        let explicit = MigrationConfig {
            max_concurrency: Some(3),
            ..Default::default()
        };
        assert_eq!(explicit.with_auto_tuning(&resources).max_concurrency, Some(3));
    }

    #[test]
    fn test_connection_string() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let conn = config.source.connection_string();
        assert!(conn.starts_with("Server=tcp:src-host,1433;Database=Sales;"));
        assert!(conn.contains("User Id=sa;Password=secret"));
        assert_eq!(config.source.server(), "src-host,1433");
    }

    #[test]
    fn test_table_selection() {
        let migration = MigrationConfig {
            include_tables: vec!["sales.*".into(), "Customers".into()],
            exclude_tables: vec!["*_Archive".into()],
            ..Default::default()
        };

        assert!(migration.selects(&TableId::new("sales", "Orders")));
        assert!(migration.selects(&TableId::new("SALES", "orders")));
        assert!(migration.selects(&TableId::new("dbo", "Customers")));
        assert!(!migration.selects(&TableId::new("sales", "Orders_archive")));
        assert!(!migration.selects(&TableId::new("dbo", "Products")));
    }

    #[test]
    fn test_empty_include_selects_everything() {
        let migration = MigrationConfig::default();
        assert!(migration.selects(&TableId::new("dbo", "Anything")));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("dbo.Order(s)?").unwrap();
        assert!(re.is_match("dbo.Order(s)X"));
        assert!(!re.is_match("dboXOrders"));
        assert!(glob_to_regex("  ").is_err());
    }
}
