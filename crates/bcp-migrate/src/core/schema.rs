//! Table, key and constraint metadata used throughout the migration.
//!
//! These types are produced by a [`MetadataProvider`](super::traits::MetadataProvider)
//! and are immutable once discovered.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::identifier::{qualify_mssql, quote_column_list, quote_mssql};
use crate::error::Result;

/// Identity of a table: the (schema, name) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableId {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Get the fully qualified table name (`schema.name`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Bracket-quoted `[schema].[name]`.
    pub fn quoted(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.name)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A table selected for migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table identity.
    pub id: TableId,

    /// Whether the table has a primary key.
    pub has_primary_key: bool,

    /// Whether the table has an identity column (bcp needs `-E` to keep values).
    pub has_identity: bool,
}

impl TableDescriptor {
    pub fn new(id: TableId) -> Self {
        Self {
            id,
            has_primary_key: false,
            has_identity: false,
        }
    }

    pub fn with_primary_key(mut self, has_pk: bool) -> Self {
        self.has_primary_key = has_pk;
        self
    }

    pub fn with_identity(mut self, has_identity: bool) -> Self {
        self.has_identity = has_identity;
        self
    }

    pub fn full_name(&self) -> String {
        self.id.full_name()
    }
}

/// "`dependent` references `referenced`", derived from a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Table holding the foreign key.
    pub dependent: TableId,

    /// Table the foreign key points at.
    pub referenced: TableId,
}

impl DependencyEdge {
    pub fn new(dependent: TableId, referenced: TableId) -> Self {
        Self {
            dependent,
            referenced,
        }
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.dependent, self.referenced)
    }
}

/// Data type category of a key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// int, bigint, smallint, tinyint.
    Integer,
    /// decimal, numeric, money.
    Decimal,
    /// date and time types.
    Temporal,
    /// uniqueidentifier and character keys.
    Identifier,
    Other,
}

impl KeyType {
    /// Classify a SQL Server type name.
    pub fn from_sql_type(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "int" | "bigint" | "smallint" | "tinyint" => KeyType::Integer,
            "decimal" | "numeric" | "money" | "smallmoney" => KeyType::Decimal,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time" => {
                KeyType::Temporal
            }
            "uniqueidentifier" | "char" | "varchar" | "nchar" | "nvarchar" => KeyType::Identifier,
            _ => KeyType::Other,
        }
    }

    /// Whether `[min, max]` of this type can be split arithmetically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, KeyType::Integer | KeyType::Decimal)
    }
}

/// The single column a table may be chunked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumnInfo {
    /// Column name.
    pub name: String,

    /// Data type category.
    pub key_type: KeyType,

    /// Whether the column is (the only column of) the primary key.
    pub is_primary_key: bool,

    /// Whether the column is an identity column.
    pub is_identity: bool,
}

impl KeyColumnInfo {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
            is_primary_key: false,
            is_identity: false,
        }
    }
}

/// Size statistics for a table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableSize {
    /// Row count (from partition stats, may be approximate).
    pub row_count: i64,

    /// Used space in MB (data + indexes).
    pub used_space_mb: f64,
}

/// A key value used as a chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub enum RangeValue {
    Int(i64),
    Decimal(Decimal),
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Int(v) => write!(f, "{}", v),
            RangeValue::Decimal(v) => write!(f, "{}", v),
        }
    }
}

/// Observed `[min, max]` of a key column plus the non-null row count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub min: RangeValue,
    pub max: RangeValue,
    pub count: i64,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FkAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    /// Parse `sys.foreign_keys.*_referential_action_desc` (`NO_ACTION`, `SET_NULL`, ...).
    pub fn from_catalog(desc: &str) -> Self {
        match desc.trim().to_uppercase().replace(' ', "_").as_str() {
            "CASCADE" => FkAction::Cascade,
            "SET_NULL" => FkAction::SetNull,
            "SET_DEFAULT" => FkAction::SetDefault,
            _ => FkAction::NoAction,
        }
    }

    /// T-SQL keyword(s) for this action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Foreign key metadata captured from the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    /// Constraint name.
    pub name: String,

    /// Table holding the constraint.
    pub parent: TableId,

    /// Constrained columns, in key order.
    pub parent_columns: Vec<String>,

    /// Referenced table.
    pub referenced: TableId,

    /// Referenced columns, in key order.
    pub referenced_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: FkAction,

    /// ON UPDATE action.
    pub on_update: FkAction,

    /// Constraint was disabled (`NOCHECK CONSTRAINT`) before the run.
    #[serde(default)]
    pub is_disabled: bool,

    /// Constraint was created or re-enabled without validating existing rows.
    #[serde(default)]
    pub is_not_trusted: bool,

    /// Constraint is not enforced for replication agents.
    #[serde(default)]
    pub not_for_replication: bool,
}

impl ForeignKeyConstraint {
    /// The dependency this constraint implies.
    pub fn edge(&self) -> DependencyEdge {
        DependencyEdge::new(self.parent.clone(), self.referenced.clone())
    }

    /// `ALTER TABLE ... DROP CONSTRAINT ...;`
    pub fn drop_script(&self) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.parent.quoted()?,
            quote_mssql(&self.name)?
        ))
    }

    /// `ALTER TABLE ... WITH CHECK|NOCHECK ADD CONSTRAINT ... FOREIGN KEY ...;`
    ///
    /// The constraint comes back in the state it was captured in: trusted
    /// constraints are re-validated, untrusted ones are added `WITH NOCHECK`,
    /// and a disabled one is disabled again by a second statement.
    pub fn create_script(&self) -> Result<String> {
        let parent = self.parent.quoted()?;
        let name = quote_mssql(&self.name)?;
        let check = if self.is_not_trusted || self.is_disabled {
            "NOCHECK"
        } else {
            "CHECK"
        };

        let mut script = format!(
            "ALTER TABLE {} WITH {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            parent,
            check,
            name,
            quote_column_list(&self.parent_columns)?,
            self.referenced.quoted()?,
            quote_column_list(&self.referenced_columns)?,
            self.on_delete.as_sql(),
            self.on_update.as_sql()
        );
        if self.not_for_replication {
            script.push_str(" NOT FOR REPLICATION");
        }
        script.push(';');
        if self.is_disabled {
            script.push_str(&format!(" ALTER TABLE {} NOCHECK CONSTRAINT {};", parent, name));
        }
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fk() -> ForeignKeyConstraint {
        ForeignKeyConstraint {
            name: "FK_Orders_Customers".to_string(),
            parent: TableId::new("sales", "Orders"),
            parent_columns: vec!["CustomerId".to_string(), "TenantId".to_string()],
            referenced: TableId::new("sales", "Customers"),
            referenced_columns: vec!["Id".to_string(), "TenantId".to_string()],
            on_delete: FkAction::Cascade,
            on_update: FkAction::NoAction,
            is_disabled: false,
            is_not_trusted: false,
            not_for_replication: false,
        }
    }

    #[test]
    fn test_table_id_display_and_ordering() {
        let a = TableId::new("dbo", "A");
        let b = TableId::new("dbo", "B");
        assert_eq!(a.to_string(), "dbo.A");
        assert_eq!(a.full_name(), "dbo.A");
        assert!(a < b);
        assert_eq!(a.quoted().unwrap(), "[dbo].[A]");
    }

    #[test]
    fn test_key_type_classification() {
        assert_eq!(KeyType::from_sql_type("BIGINT"), KeyType::Integer);
        assert_eq!(KeyType::from_sql_type("numeric"), KeyType::Decimal);
        assert_eq!(KeyType::from_sql_type("datetime2"), KeyType::Temporal);
        assert_eq!(KeyType::from_sql_type("uniqueidentifier"), KeyType::Identifier);
        assert_eq!(KeyType::from_sql_type("varbinary"), KeyType::Other);
        assert!(KeyType::Integer.is_numeric());
        assert!(KeyType::Decimal.is_numeric());
        assert!(!KeyType::Temporal.is_numeric());
    }

    #[test]
    fn test_fk_action_parsing() {
        assert_eq!(FkAction::from_catalog("NO_ACTION"), FkAction::NoAction);
        assert_eq!(FkAction::from_catalog("CASCADE"), FkAction::Cascade);
        assert_eq!(FkAction::from_catalog("set_null"), FkAction::SetNull);
        assert_eq!(FkAction::from_catalog("SET DEFAULT"), FkAction::SetDefault);
        assert_eq!(FkAction::SetNull.as_sql(), "SET NULL");
    }

    #[test]
    fn test_fk_scripts() {
        let fk = make_fk();
        assert_eq!(
            fk.drop_script().unwrap(),
            "ALTER TABLE [sales].[Orders] DROP CONSTRAINT [FK_Orders_Customers];"
        );
        assert_eq!(
            fk.create_script().unwrap(),
            "ALTER TABLE [sales].[Orders] WITH CHECK ADD CONSTRAINT [FK_Orders_Customers] \
             FOREIGN KEY ([CustomerId], [TenantId]) REFERENCES [sales].[Customers] ([Id], [TenantId]) \
             ON DELETE CASCADE ON UPDATE NO ACTION;"
        );
    }

    #[test]
    fn test_fk_create_script_untrusted() {
        let fk = ForeignKeyConstraint {
            is_not_trusted: true,
            ..make_fk()
        };
        assert_eq!(
            fk.create_script().unwrap(),
            "ALTER TABLE [sales].[Orders] WITH NOCHECK ADD CONSTRAINT [FK_Orders_Customers] \
             FOREIGN KEY ([CustomerId], [TenantId]) REFERENCES [sales].[Customers] ([Id], [TenantId]) \
             ON DELETE CASCADE ON UPDATE NO ACTION;"
        );
    }

    #[test]
    fn test_fk_create_script_not_for_replication() {
        let fk = ForeignKeyConstraint {
            not_for_replication: true,
            ..make_fk()
        };
        assert_eq!(
            fk.create_script().unwrap(),
            "ALTER TABLE [sales].[Orders] WITH CHECK ADD CONSTRAINT [FK_Orders_Customers] \
             FOREIGN KEY ([CustomerId], [TenantId]) REFERENCES [sales].[Customers] ([Id], [TenantId]) \
             ON DELETE CASCADE ON UPDATE NO ACTION NOT FOR REPLICATION;"
        );
    }

    #[test]
    fn test_fk_create_script_disabled() {
        let fk = ForeignKeyConstraint {
            is_disabled: true,
            is_not_trusted: true,
            ..make_fk()
        };
        assert_eq!(
            fk.create_script().unwrap(),
            "ALTER TABLE [sales].[Orders] WITH NOCHECK ADD CONSTRAINT [FK_Orders_Customers] \
             FOREIGN KEY ([CustomerId], [TenantId]) REFERENCES [sales].[Customers] ([Id], [TenantId]) \
             ON DELETE CASCADE ON UPDATE NO ACTION; \
             ALTER TABLE [sales].[Orders] NOCHECK CONSTRAINT [FK_Orders_Customers];"
        );
    }

    #[test]
    fn test_fk_flags_default_when_missing() {
        let json = r#"{"name":"FK_A_B","parent":{"schema":"dbo","name":"A"},
            "parent_columns":["BId"],"referenced":{"schema":"dbo","name":"B"},
            "referenced_columns":["Id"],"on_delete":"no_action","on_update":"no_action"}"#;
        let fk: ForeignKeyConstraint = serde_json::from_str(json).unwrap();
        assert!(!fk.is_disabled && !fk.is_not_trusted && !fk.not_for_replication);
        assert!(fk.create_script().unwrap().contains("WITH CHECK ADD"));
    }

    #[test]
    fn test_fk_edge() {
        let edge = make_fk().edge();
        assert_eq!(edge.dependent, TableId::new("sales", "Orders"));
        assert_eq!(edge.referenced, TableId::new("sales", "Customers"));
        assert_eq!(edge.to_string(), "sales.Orders -> sales.Customers");
    }

    #[test]
    fn test_range_value_display() {
        assert_eq!(RangeValue::Int(42).to_string(), "42");
        assert_eq!(RangeValue::Decimal(Decimal::new(12345, 2)).to_string(), "123.45");
    }
}
