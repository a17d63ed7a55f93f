//! Query engine: resolves a connector, derives (and caches) the row shape
//! for the projection, and streams rows into a JSON payload.

use std::sync::Arc;

use futures::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;
use sqlx::{Column as _, Executor as _, TypeInfo as _};

use crate::auth::Scope;
use crate::connector::service::ConnectorService;
use crate::error::{Error, Result};
use crate::query::cache::{fingerprint, RecordSchemaCache};
use crate::query::record::RecordSchema;

pub mod cache;
pub mod record;

/// Default capacity of the record shape cache.
const RECORD_CACHE_CAPACITY: usize = 10;

/// Maximum SQL statement length (1 MB), shared with the exec engine.
pub(crate) const MAX_SQL_LEN: usize = 1_000_000;

pub(crate) fn check_sql_length(sql: &str) -> Result<()> {
    if sql.len() > MAX_SQL_LEN {
        return Err(Error::Validation(format!(
            "SQL too large: {} bytes (max {} bytes / 1 MB)",
            sql.len(),
            MAX_SQL_LEN
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryInput {
    pub query: String,
    pub connector: String,
    pub parameters: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

pub struct QueryService {
    connectors: Arc<ConnectorService>,
    cache: RecordSchemaCache,
}

impl QueryService {
    pub fn new(connectors: Arc<ConnectorService>) -> Self {
        Self {
            connectors,
            cache: RecordSchemaCache::new(RECORD_CACHE_CAPACITY),
        }
    }

    pub fn cache(&self) -> &RecordSchemaCache {
        &self.cache
    }

    pub async fn query(&self, scope: &Scope, input: &QueryInput) -> QueryOutput {
        let mut output = QueryOutput {
            status: "ok".to_string(),
            connector: Some(input.connector.clone()),
            ..Default::default()
        };
        if let Err(err) = self.run(scope, input, &mut output).await {
            output.status = "error".to_string();
            output.error = Some(err.to_string());
        }
        output
    }

    async fn run(&self, scope: &Scope, input: &QueryInput, output: &mut QueryOutput) -> Result<()> {
        check_sql_length(&input.query)?;
        let connector = self.connectors.connection(scope, &input.connector).await?;
        output.connector = Some(connector.name());
        let pool = connector.db().await?;

        let namespace = self.connectors.namespace(scope)?;
        let key = fingerprint(&namespace, &connector.name(), &input.query);
        let schema = match self.cache.get(&key) {
            Some(schema) => schema,
            None => {
                let described = (&pool).describe(input.query.as_str()).await?;
                let columns = described.columns().iter().enumerate().map(|(i, column)| {
                    (
                        column.name().to_string(),
                        column.type_info().name().to_string(),
                        described.nullable(i).unwrap_or(true),
                    )
                });
                let schema = Arc::new(RecordSchema::from_columns(columns));
                self.cache.put(key, Arc::clone(&schema));
                schema
            }
        };

        let query = bind_parameters(sqlx::query(&input.query), &input.parameters);
        let mut rows = query.fetch(&pool);
        let mut data = Vec::new();
        while let Some(row) = rows.try_next().await? {
            data.push(Value::Object(schema.decode(&row)?));
        }
        if !data.is_empty() {
            output.data = Some(data);
        }
        Ok(())
    }
}

/// Bind positional JSON parameters onto a query.
pub(crate) fn bind_parameters<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    parameters: &'q [Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for parameter in parameters {
        query = match parameter {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::{ConnectorConfig, Policy};
    use crate::connector::input::ConnectionInput;
    use crate::connector::manager::Manager;
    use crate::secret::SecretStore;

    async fn service_with_connector(db: &str) -> (QueryService, Scope) {
        sqlx::any::install_default_drivers();
        let auth = Arc::new(AuthService::new(Policy::default()));
        let manager = Arc::new(
            Manager::new(
                Arc::new(ConnectorConfig::default()),
                auth,
                Arc::new(SecretStore::new()),
            )
            .await,
        );
        let connectors = Arc::new(ConnectorService::new(manager));
        let scope = Scope::default();
        connectors
            .add_connection(
                &scope,
                &ConnectionInput {
                    name: "dev".to_string(),
                    driver: "sqlite".to_string(),
                    db: format!("{db}?mode=memory&cache=shared"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (QueryService::new(connectors), scope)
    }

    async fn seed_users(service: &QueryService, scope: &Scope) {
        let connector = service.connectors.connection(scope, "dev").await.unwrap();
        let pool = connector.db().await.unwrap();
        sqlx::query("CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT, note TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users(id, name, note) VALUES (1, 'ada', NULL), (2, 'grace', 'x')")
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_decodes_rows_with_derived_field_names() {
        let (service, scope) = service_with_connector("q_decode").await;
        seed_users(&service, &scope).await;

        let out = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT id, name, note FROM users ORDER BY id".to_string(),
                    connector: "dev".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(out.status, "ok", "error: {:?}", out.error);
        let rows = out.data.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], serde_json::json!(1));
        assert_eq!(rows[0]["Name"], serde_json::json!("ada"));
        assert_eq!(rows[0]["Note"], serde_json::Value::Null);
        assert_eq!(rows[1]["Note"], serde_json::json!("x"));
    }

    #[tokio::test]
    async fn where_variation_reuses_cached_record_shape() {
        let (service, scope) = service_with_connector("q_cache").await;
        seed_users(&service, &scope).await;

        let first = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT id, name FROM users".to_string(),
                    connector: "dev".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(first.status, "ok", "error: {:?}", first.error);
        assert_eq!(service.cache().misses(), 1);
        assert_eq!(service.cache().hits(), 0);

        let second = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT id, name FROM users WHERE id > 1".to_string(),
                    connector: "dev".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(second.status, "ok", "error: {:?}", second.error);
        // Same shape: no second column detection.
        assert_eq!(service.cache().misses(), 1);
        assert_eq!(service.cache().hits(), 1);
        assert_eq!(second.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parameters_are_bound_positionally() {
        let (service, scope) = service_with_connector("q_params").await;
        seed_users(&service, &scope).await;

        let out = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT name FROM users WHERE id = ?".to_string(),
                    connector: "dev".to_string(),
                    parameters: vec![serde_json::json!(2)],
                },
            )
            .await;
        assert_eq!(out.status, "ok", "error: {:?}", out.error);
        let rows = out.data.unwrap();
        assert_eq!(rows[0]["Name"], serde_json::json!("grace"));
    }

    #[tokio::test]
    async fn empty_result_omits_data() {
        let (service, scope) = service_with_connector("q_empty").await;
        seed_users(&service, &scope).await;
        let out = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT id FROM users WHERE id > 100".to_string(),
                    connector: "dev".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(out.status, "ok");
        assert!(out.data.is_none());
    }

    #[tokio::test]
    async fn missing_connector_is_error_envelope() {
        let (service, scope) = service_with_connector("q_missing").await;
        let out = service
            .query(
                &scope,
                &QueryInput {
                    query: "SELECT 1".to_string(),
                    connector: "ghost".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(out.status, "error");
        assert_eq!(out.error.as_deref(), Some("connector not found"));
    }

    #[tokio::test]
    async fn oversized_sql_is_rejected() {
        let (service, scope) = service_with_connector("q_len").await;
        let out = service
            .query(
                &scope,
                &QueryInput {
                    query: format!("SELECT '{}'", "x".repeat(MAX_SQL_LEN + 1)),
                    connector: "dev".to_string(),
                    parameters: vec![],
                },
            )
            .await;
        assert_eq!(out.status, "error");
        assert!(out.error.unwrap().contains("SQL too large"));
    }
}
