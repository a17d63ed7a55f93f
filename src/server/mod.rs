//! MCP tool dispatch: binds the typed tool handlers onto the
//! namespace-aware services and wraps results in the uniform envelope.

use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode, Implementation,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool,
    },
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{AuthToken, Scope};
use crate::config::Config;
use crate::connector::input::ConnectionInput;
use crate::connector::manager::Manager;
use crate::connector::service::{ConnectorService, ListInput};
use crate::exec::{ExecInput, ExecService};
use crate::metadata::{ListColumnsInput, ListTablesInput, MetadataService};
use crate::query::{QueryInput, QueryService};

mod tools;

use tools::*;

#[derive(Clone)]
pub struct McpServer {
    config: Arc<Config>,
    connectors: Arc<ConnectorService>,
    query: Arc<QueryService>,
    exec: Arc<ExecService>,
    metadata: Arc<MetadataService>,
}

impl McpServer {
    pub fn new(config: Arc<Config>, manager: Arc<Manager>) -> Self {
        let connectors = Arc::new(ConnectorService::new(manager));
        Self {
            config,
            query: Arc::new(QueryService::new(Arc::clone(&connectors))),
            exec: Arc::new(ExecService::new(Arc::clone(&connectors))),
            metadata: Arc::new(MetadataService::new(Arc::clone(&connectors))),
            connectors,
        }
    }

    /// Extract the per-request scope: the bearer token (typed extension
    /// value, or the Authorization header forwarded by the HTTP transport)
    /// plus the peer handle for elicitation.
    fn scope(context: &RequestContext<RoleServer>) -> Scope {
        let mut token = context
            .extensions
            .get::<AuthToken>()
            .map(|t| t.0.clone());
        if token.is_none() {
            if let Some(parts) = context.extensions.get::<axum::http::request::Parts>() {
                token = parts
                    .headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(|value| value.to_string());
            }
        }
        Scope {
            token,
            peer: Some(context.peer.clone()),
        }
    }

    /// Serialize a payload into the configured result field: a text item
    /// (default) or the structured content.
    fn respond<T: Serialize>(&self, payload: &T) -> CallToolResult {
        match serde_json::to_value(payload) {
            Ok(value) => {
                if self.config.use_text_field() {
                    CallToolResult::success(vec![Content::text(value.to_string())])
                } else {
                    CallToolResult::structured(value)
                }
            }
            Err(err) => {
                tracing::error!("failed to serialize tool response: {err}");
                error_result(format!("Internal error: failed to serialize response: {err}"))
            }
        }
    }
}

fn parse_input<T: DeserializeOwned>(
    args: serde_json::Map<String, serde_json::Value>,
) -> Result<T, CallToolResult> {
    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|err| error_result(format!("Invalid arguments: {err}")))
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "dbkit-mcp".to_string(),
                title: Some("Database Toolbox MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use dbSetConnection to register a database connector, then dbQuery/dbExec \
                 to run SQL against it. dbListTables and dbListColumns browse schema metadata."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = vec![
            Tool::new(
                "dbQuery",
                "Execute a SQL query and return the result set as a JSON array. \
                 Rows are decoded through a cached record shape derived from the projection, \
                 so arbitrary ad-hoc queries work without prior registration.",
                db_query_schema(),
            ),
            Tool::new(
                "dbExec",
                "Execute a SQL DML/DDL statement and return rowsAffected and lastInsertId.",
                db_exec_schema(),
            ),
            Tool::new(
                "dbListConnections",
                "List database connectors registered in the caller's namespace, \
                 optionally filtered by a name substring.",
                db_list_connections_schema(),
            ),
            Tool::new(
                "dbSetConnection",
                "Register or update a database connector. Credentials are never passed here: \
                 the server may elicit missing parameters and returns a callbackURL to open in \
                 a browser for secret entry.",
                db_set_connection_schema(),
            ),
            Tool::new(
                "dbListTables",
                "List tables for the specified catalog/schema.",
                db_list_tables_schema(),
            ),
            Tool::new(
                "dbListColumns",
                "List columns for the specified table.",
                db_list_columns_schema(),
            ),
        ];

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let scope = Self::scope(&context);
        let args = request.arguments.unwrap_or_default();
        match request.name.as_ref() {
            "dbQuery" => {
                let input: QueryInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                let output = self.query.query(&scope, &input).await;
                if output.status == "error" {
                    return Ok(error_result(output.error.unwrap_or_default()));
                }
                Ok(self.respond(&output))
            }
            "dbExec" => {
                let input: ExecInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                let output = self.exec.execute(&scope, &input).await;
                if output.status == "error" {
                    return Ok(error_result(output.error.unwrap_or_default()));
                }
                // Compact execution summary, without the envelope status.
                Ok(self.respond(&serde_json::json!({
                    "rowsAffected": output.rows_affected,
                    "lastInsertId": output.last_insert_id,
                })))
            }
            "dbListConnections" => {
                let input: ListInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                let output = self.connectors.list_connectors(&scope, &input).await;
                Ok(self.respond(&output))
            }
            "dbSetConnection" => {
                let input: ConnectionInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                match self.connectors.add_connection(&scope, &input).await {
                    Ok(output) => Ok(self.respond(&output)),
                    Err(err) => Ok(error_result(err.to_string())),
                }
            }
            "dbListTables" => {
                let input: ListTablesInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                let output = self.metadata.list_tables(&scope, &input).await;
                if output.status == "error" {
                    return Ok(error_result(output.error.unwrap_or_default()));
                }
                Ok(self.respond(&output))
            }
            "dbListColumns" => {
                let input: ListColumnsInput = match parse_input(args) {
                    Ok(input) => input,
                    Err(result) => return Ok(result),
                };
                let output = self.metadata.list_columns(&scope, &input).await;
                if output.status == "error" {
                    return Ok(error_result(output.error.unwrap_or_default()));
                }
                Ok(self.respond(&output))
            }
            name => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", name),
                None,
            )),
        }
    }
}
