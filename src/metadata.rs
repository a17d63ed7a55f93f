//! Metadata engine: table and column listings through per-dialect
//! introspection queries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::Row as _;

use crate::auth::Scope;
use crate::connector::service::ConnectorService;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListTablesInput {
    pub connector: String,
    pub catalog: String,
    pub schema: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListColumnsInput {
    pub connector: String,
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(rename = "type")]
    pub table_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TablesOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<TableMeta>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnsOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ColumnMeta>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

const MYSQL_TABLES: &str = "SELECT table_name, table_schema, table_type \
     FROM information_schema.tables \
     WHERE table_schema = COALESCE(NULLIF(?, ''), DATABASE()) \
     ORDER BY table_name";

const MYSQL_COLUMNS: &str = "SELECT column_name, data_type, is_nullable, column_default, ordinal_position \
     FROM information_schema.columns \
     WHERE table_schema = COALESCE(NULLIF(?, ''), DATABASE()) AND table_name = ? \
     ORDER BY ordinal_position";

const POSTGRES_TABLES: &str = "SELECT table_name, table_schema, table_type \
     FROM information_schema.tables \
     WHERE table_schema = COALESCE(NULLIF($1, ''), 'public') \
     ORDER BY table_name";

const POSTGRES_COLUMNS: &str = "SELECT column_name, data_type, is_nullable, column_default, ordinal_position \
     FROM information_schema.columns \
     WHERE table_schema = COALESCE(NULLIF($1, ''), 'public') AND table_name = $2 \
     ORDER BY ordinal_position";

const SQLITE_TABLES: &str =
    "SELECT name, type FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name";

const SQLITE_COLUMNS: &str =
    "SELECT name, type, \"notnull\", dflt_value, cid FROM pragma_table_info(?)";

pub struct MetadataService {
    connectors: Arc<ConnectorService>,
}

impl MetadataService {
    pub fn new(connectors: Arc<ConnectorService>) -> Self {
        Self { connectors }
    }

    pub async fn list_tables(&self, scope: &Scope, input: &ListTablesInput) -> TablesOutput {
        let mut output = TablesOutput {
            status: "ok".to_string(),
            connector: Some(input.connector.clone()),
            ..Default::default()
        };
        if let Err(err) = self.run_tables(scope, input, &mut output).await {
            output.status = "error".to_string();
            output.error = Some(err.to_string());
        }
        output
    }

    pub async fn list_columns(&self, scope: &Scope, input: &ListColumnsInput) -> ColumnsOutput {
        let mut output = ColumnsOutput {
            status: "ok".to_string(),
            connector: Some(input.connector.clone()),
            ..Default::default()
        };
        if let Err(err) = self.run_columns(scope, input, &mut output).await {
            output.status = "error".to_string();
            output.error = Some(err.to_string());
        }
        output
    }

    async fn run_tables(
        &self,
        scope: &Scope,
        input: &ListTablesInput,
        output: &mut TablesOutput,
    ) -> Result<()> {
        let connector = self.connectors.connection(scope, &input.connector).await?;
        let pool = connector.db().await?;
        let schema = effective_schema(&input.schema, &connector.dsn());

        let tables = match connector.driver() {
            "sqlite" => sqlx::query(SQLITE_TABLES)
                .fetch_all(&pool)
                .await?
                .iter()
                .map(|row| TableMeta {
                    name: col_str(row, 0),
                    schema: None,
                    table_type: col_str(row, 1),
                })
                .collect(),
            "mysql" => fetch_tables(&pool, MYSQL_TABLES, &schema).await?,
            "postgres" => fetch_tables(&pool, POSTGRES_TABLES, &schema).await?,
            other => return Err(Error::UnsupportedDriver(other.to_string())),
        };
        output.data = if tables.is_empty() {
            None
        } else {
            Some(tables)
        };
        Ok(())
    }

    async fn run_columns(
        &self,
        scope: &Scope,
        input: &ListColumnsInput,
        output: &mut ColumnsOutput,
    ) -> Result<()> {
        if input.table.is_empty() {
            return Err(Error::Validation("table cannot be empty".to_string()));
        }
        let connector = self.connectors.connection(scope, &input.connector).await?;
        let pool = connector.db().await?;
        let schema = effective_schema(&input.schema, &connector.dsn());

        let columns = match connector.driver() {
            "sqlite" => sqlx::query(SQLITE_COLUMNS)
                .bind(&input.table)
                .fetch_all(&pool)
                .await?
                .iter()
                .map(|row| ColumnMeta {
                    name: col_str(row, 0),
                    data_type: col_str(row, 1),
                    nullable: row.try_get::<i64, _>(2).unwrap_or(0) == 0,
                    default: row.try_get::<Option<String>, _>(3).ok().flatten(),
                    position: row.try_get::<i64, _>(4).unwrap_or(0) + 1,
                })
                .collect(),
            "mysql" => fetch_columns(&pool, MYSQL_COLUMNS, &schema, &input.table).await?,
            "postgres" => fetch_columns(&pool, POSTGRES_COLUMNS, &schema, &input.table).await?,
            other => return Err(Error::UnsupportedDriver(other.to_string())),
        };
        output.data = if columns.is_empty() {
            None
        } else {
            Some(columns)
        };
        Ok(())
    }
}

async fn fetch_tables(
    pool: &sqlx::AnyPool,
    sql: &str,
    schema: &str,
) -> Result<Vec<TableMeta>, sqlx::Error> {
    let rows = sqlx::query(sql).bind(schema).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| TableMeta {
            name: col_str(row, 0),
            schema: Some(col_str(row, 1)),
            table_type: col_str(row, 2),
        })
        .collect())
}

async fn fetch_columns(
    pool: &sqlx::AnyPool,
    sql: &str,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnMeta>, sqlx::Error> {
    let rows = sqlx::query(sql)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ColumnMeta {
            name: col_str(row, 0),
            data_type: col_str(row, 1),
            nullable: col_str(row, 2).eq_ignore_ascii_case("yes"),
            default: row.try_get::<Option<String>, _>(3).ok().flatten(),
            position: row.try_get::<i64, _>(4).unwrap_or(0),
        })
        .collect())
}

/// information_schema string columns are sometimes surfaced as binary by
/// the driver; try text first, then UTF-8 bytes.
fn col_str(row: &AnyRow, index: usize) -> String {
    row.try_get::<String, _>(index).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(index)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    })
}

/// When the caller does not name a schema, derive it from the DSN trailing
/// path.
fn effective_schema(schema: &str, dsn: &str) -> String {
    if !schema.is_empty() {
        return schema.to_string();
    }
    url::Url::parse(dsn)
        .ok()
        .map(|u| u.path().trim_matches('/').to_string())
        .unwrap_or_default()
}
