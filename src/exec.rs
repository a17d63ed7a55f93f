//! Exec engine: DML/DDL statements with rows-affected / last-insert-id
//! reporting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Scope;
use crate::connector::service::ConnectorService;
use crate::error::Result;
use crate::query::{bind_parameters, check_sql_length};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecInput {
    pub query: String,
    pub connector: String,
    pub parameters: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub rows_affected: u64,
    pub last_insert_id: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

pub struct ExecService {
    connectors: Arc<ConnectorService>,
}

impl ExecService {
    pub fn new(connectors: Arc<ConnectorService>) -> Self {
        Self { connectors }
    }

    pub async fn execute(&self, scope: &Scope, input: &ExecInput) -> ExecOutput {
        let mut output = ExecOutput {
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

    async fn run(&self, scope: &Scope, input: &ExecInput, output: &mut ExecOutput) -> Result<()> {
        check_sql_length(&input.query)?;
        let connector = self.connectors.connection(scope, &input.connector).await?;
        output.connector = Some(connector.name());
        let pool = connector.db().await?;

        let query = bind_parameters(sqlx::query(&input.query), &input.parameters);
        let result = query.execute(&pool).await?;
        output.rows_affected = result.rows_affected();
        output.last_insert_id = result.last_insert_id().unwrap_or_default();
        Ok(())
    }
}
