//! SQL Server catalog access and statement execution over a bb8/tiberius pool.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::identifier::quote_mssql;
use crate::core::schema::{
    FkAction, ForeignKeyConstraint, KeyColumnInfo, KeyRange, KeyType, RangeValue,
    TableDescriptor, TableId, TableSize,
};
use crate::core::traits::{MetadataProvider, SqlExecutor};
use crate::error::{MigrateError, Result};

/// Default pool size. Catalog queries and DDL run sequentially, so a
/// handful of connections is plenty.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> std::result::Result<Config, tiberius::error::Error> {
        // Integrated authentication is resolved by tiberius from the ADO string.
        if self.config.trusted_connection {
            return Config::from_ado_string(&self.config.connection_string());
        }

        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        Ok(config)
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config()?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// One SQL Server database (source or destination).
pub struct MssqlDatabase {
    pool: Pool<TiberiusConnectionManager>,
    label: String,
}

impl MssqlDatabase {
    /// Connect with the default pool size.
    pub async fn connect(config: &ConnectionConfig, label: &str) -> Result<Self> {
        Self::with_max_connections(config, label, DEFAULT_POOL_SIZE).await
    }

    /// Connect with a specific pool size and verify the connection.
    pub async fn with_max_connections(
        config: &ConnectionConfig,
        label: &str,
        max_size: u32,
    ) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), format!("creating {} pool", label)))?;

        let database = Self {
            pool,
            label: label.to_string(),
        };
        database.ping().await?;

        info!(
            "Connected to {}: {}:{}/{} (pool_size={})",
            label, config.host, config.port, config.database, max_size
        );
        Ok(database)
    }

    /// Label used in logs and errors (`source` or `destination`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get a pooled connection.
    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool.get().await.map_err(|e| {
            MigrateError::pool(e.to_string(), format!("getting {} connection", self.label))
        })
    }

    /// Round-trip latency of `SELECT 1`.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut client = self.get_client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        let latency = start.elapsed();
        debug!("{} health check: {:?}", self.label, latency);
        Ok(latency)
    }

    async fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
        let mut client = self.get_client().await?;
        let mut query = Query::new(sql);
        for param in params {
            query.bind(*param);
        }
        let stream = query.query(&mut client).await?;
        Ok(stream.into_first_result().await?)
    }

    async fn query_row(&self, sql: &str, params: &[&str]) -> Result<Option<Row>> {
        Ok(self.query_rows(sql, params).await?.into_iter().next())
    }
}

fn get_string(row: &Row, idx: usize) -> Result<String> {
    row.try_get::<&str, _>(idx)?
        .map(str::to_string)
        .ok_or_else(|| MigrateError::Metadata(format!("unexpected NULL in column {}", idx)))
}

fn get_flag(row: &Row, idx: usize) -> Result<bool> {
    Ok(row.try_get::<i32, _>(idx)?.unwrap_or(0) != 0)
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text.trim())
        .map_err(|e| MigrateError::Metadata(format!("invalid key boundary '{}': {}", text, e)))
}

#[async_trait]
impl MetadataProvider for MssqlDatabase {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let sql = r#"
            SELECT
                s.name,
                t.name,
                CAST(CASE WHEN EXISTS (
                    SELECT 1 FROM sys.indexes i
                    WHERE i.object_id = t.object_id AND i.is_primary_key = 1
                ) THEN 1 ELSE 0 END AS INT),
                CAST(OBJECTPROPERTY(t.object_id, 'TableHasIdentity') AS INT)
            FROM sys.tables t
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE t.is_ms_shipped = 0
            ORDER BY s.name, t.name
        "#;

        let rows = self.query_rows(sql, &[]).await?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            tables.push(
                TableDescriptor::new(TableId::new(get_string(row, 0)?, get_string(row, 1)?))
                    .with_primary_key(get_flag(row, 2)?)
                    .with_identity(get_flag(row, 3)?),
            );
        }

        debug!("{}: found {} tables", self.label, tables.len());
        Ok(tables)
    }

    async fn list_foreign_keys(&self) -> Result<Vec<ForeignKeyConstraint>> {
        // One row per key column, grouped below.
        let sql = r#"
            SELECT
                fk.name,
                ps.name, pt.name, pc.name,
                rs.name, rt.name, rc.name,
                fk.delete_referential_action_desc,
                fk.update_referential_action_desc,
                CAST(fk.is_disabled AS INT),
                CAST(fk.is_not_trusted AS INT),
                CAST(fk.is_not_for_replication AS INT)
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables pt ON fk.parent_object_id = pt.object_id
            JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
            JOIN sys.columns pc ON fkc.parent_object_id = pc.object_id
                AND fkc.parent_column_id = pc.column_id
            JOIN sys.tables rt ON fk.referenced_object_id = rt.object_id
            JOIN sys.schemas rs ON rt.schema_id = rs.schema_id
            JOIN sys.columns rc ON fkc.referenced_object_id = rc.object_id
                AND fkc.referenced_column_id = rc.column_id
            ORDER BY ps.name, pt.name, fk.name, fkc.constraint_column_id
        "#;

        let rows = self.query_rows(sql, &[]).await?;
        let mut constraints: Vec<ForeignKeyConstraint> = Vec::new();
        for row in &rows {
            let name = get_string(row, 0)?;
            let parent = TableId::new(get_string(row, 1)?, get_string(row, 2)?);
            let parent_column = get_string(row, 3)?;
            let referenced_column = get_string(row, 6)?;

            match constraints.last_mut() {
                Some(fk) if fk.name == name && fk.parent == parent => {
                    fk.parent_columns.push(parent_column);
                    fk.referenced_columns.push(referenced_column);
                }
                _ => constraints.push(ForeignKeyConstraint {
                    name,
                    parent,
                    parent_columns: vec![parent_column],
                    referenced: TableId::new(get_string(row, 4)?, get_string(row, 5)?),
                    referenced_columns: vec![referenced_column],
                    on_delete: FkAction::from_catalog(&get_string(row, 7)?),
                    on_update: FkAction::from_catalog(&get_string(row, 8)?),
                    is_disabled: get_flag(row, 9)?,
                    is_not_trusted: get_flag(row, 10)?,
                    not_for_replication: get_flag(row, 11)?,
                }),
            }
        }

        debug!("{}: found {} foreign keys", self.label, constraints.len());
        Ok(constraints)
    }

    async fn get_table_size(&self, table: &TableId) -> Result<TableSize> {
        let sql = r#"
            SELECT
                CAST(ISNULL(SUM(CASE WHEN ps.index_id IN (0, 1) THEN ps.row_count ELSE 0 END), 0) AS BIGINT),
                CAST(ISNULL(SUM(ps.used_page_count), 0) * 8 / 1024.0 AS FLOAT)
            FROM sys.dm_db_partition_stats ps
            WHERE ps.object_id = OBJECT_ID(@P1)
        "#;

        let quoted = table.quoted()?;
        let row = self.query_row(sql, &[quoted.as_str()]).await?;
        let size = match row {
            Some(row) => TableSize {
                row_count: row.try_get::<i64, _>(0)?.unwrap_or(0),
                used_space_mb: row.try_get::<f64, _>(1)?.unwrap_or(0.0),
            },
            None => TableSize {
                row_count: 0,
                used_space_mb: 0.0,
            },
        };

        debug!(
            "{}: {} rows, {:.1} MB",
            table, size.row_count, size.used_space_mb
        );
        Ok(size)
    }

    async fn get_key_column(&self, table: &TableId) -> Result<Option<KeyColumnInfo>> {
        let quoted = table.quoted()?;

        // Single-column primary key first.
        let pk_sql = r#"
            SELECT c.name, TYPE_NAME(c.system_type_id), CAST(c.is_identity AS INT)
            FROM sys.indexes i
            JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
            JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.is_primary_key = 1
            ORDER BY ic.key_ordinal
        "#;
        let pk_rows = self.query_rows(pk_sql, &[quoted.as_str()]).await?;
        if let [row] = pk_rows.as_slice() {
            let mut key = KeyColumnInfo::new(
                get_string(row, 0)?,
                KeyType::from_sql_type(&get_string(row, 1)?),
            );
            key.is_primary_key = true;
            key.is_identity = get_flag(row, 2)?;
            return Ok(Some(key));
        }

        let identity_sql = r#"
            SELECT c.name, TYPE_NAME(c.system_type_id)
            FROM sys.identity_columns c
            WHERE c.object_id = OBJECT_ID(@P1)
        "#;
        let key = match self.query_row(identity_sql, &[quoted.as_str()]).await? {
            Some(row) => {
                let mut key = KeyColumnInfo::new(
                    get_string(&row, 0)?,
                    KeyType::from_sql_type(&get_string(&row, 1)?),
                );
                key.is_identity = true;
                Some(key)
            }
            None => None,
        };
        Ok(key)
    }

    async fn get_key_range(
        &self,
        table: &TableId,
        column: &KeyColumnInfo,
    ) -> Result<Option<KeyRange>> {
        let col = quote_mssql(&column.name)?;
        let quoted = table.quoted()?;

        // Boundaries come back as text so integer and decimal keys share one path.
        let sql = format!(
            "SELECT CONVERT(NVARCHAR(64), MIN({col})), CONVERT(NVARCHAR(64), MAX({col})), COUNT_BIG({col}) FROM {quoted}",
            col = col,
            quoted = quoted
        );

        let Some(row) = self.query_row(&sql, &[]).await? else {
            return Ok(None);
        };
        let (Some(min), Some(max)) = (row.try_get::<&str, _>(0)?, row.try_get::<&str, _>(1)?)
        else {
            return Ok(None);
        };
        let count = row.try_get::<i64, _>(2)?.unwrap_or(0);

        let (min, max) = match column.key_type {
            KeyType::Integer => {
                let parse = |s: &str| {
                    s.trim().parse::<i64>().map_err(|e| {
                        MigrateError::Metadata(format!("invalid key boundary '{}': {}", s, e))
                    })
                };
                (RangeValue::Int(parse(min)?), RangeValue::Int(parse(max)?))
            }
            KeyType::Decimal => (
                RangeValue::Decimal(parse_decimal(min)?),
                RangeValue::Decimal(parse_decimal(max)?),
            ),
            _ => return Ok(None),
        };

        Ok(Some(KeyRange { min, max, count }))
    }

    async fn exact_row_count(&self, table: &TableId) -> Result<i64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", table.quoted()?);
        let row = self.query_row(&sql, &[]).await?;
        Ok(match row {
            Some(row) => row.try_get::<i64, _>(0)?.unwrap_or(0),
            None => 0,
        })
    }

    async fn health_check(&self) -> Result<Duration> {
        self.ping().await
    }
}

#[async_trait]
impl SqlExecutor for MssqlDatabase {
    async fn execute(&self, sql: &str) -> Result<()> {
        let mut client = self.get_client().await?;
        debug!("{}: {}", self.label, sql);
        client.execute(sql, &[]).await?;
        Ok(())
    }
}
