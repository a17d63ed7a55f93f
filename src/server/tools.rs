use rmcp::model::Content;
use serde_json::json;
use std::sync::Arc;

use crate::connector::meta::DRIVER_CHOICES;

// ============================================================
// Tool input schemas
// Each function builds and returns the JSON schema for its tool.
// ============================================================

pub(crate) fn db_query_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The SQL query to execute"
            },
            "connector": {
                "type": "string",
                "description": "Connector name registered via dbSetConnection (or seeded from configuration)"
            },
            "parameters": {
                "type": "array",
                "description": "Positional query parameters (optional)",
                "items": {}
            }
        },
        "required": ["query", "connector"]
    })))
}

pub(crate) fn db_exec_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The SQL DML/DDL statement to execute"
            },
            "connector": {
                "type": "string",
                "description": "Connector name to execute the statement against"
            },
            "parameters": {
                "type": "array",
                "description": "Positional statement parameters (optional)",
                "items": {}
            }
        },
        "required": ["query", "connector"]
    })))
}

pub(crate) fn db_list_connections_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "pattern": {
                "type": "string",
                "description": "Substring filter on connector names (optional)"
            }
        },
        "required": []
    })))
}

pub(crate) fn db_set_connection_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Connector name" },
            "driver": {
                "type": "string",
                "enum": DRIVER_CHOICES,
                "description": "Connector driver"
            },
            "host": { "type": "string", "description": "Host (defaults per driver)" },
            "port": { "type": "integer", "description": "Port (defaults per driver)", "minimum": 0, "maximum": 65535 },
            "project": { "type": "string", "description": "Project (BigQuery)" },
            "db": { "type": "string", "description": "Database or dataset name" },
            "options": { "type": "string", "description": "Driver-specific DSN options" }
        },
        "required": ["name", "driver"]
    })))
}

pub(crate) fn db_list_tables_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "connector": { "type": "string", "description": "Connector name" },
            "catalog": { "type": "string", "description": "Catalog/database name (optional)" },
            "schema": { "type": "string", "description": "Schema name (optional, derived from the DSN when omitted)" }
        },
        "required": ["connector"]
    })))
}

pub(crate) fn db_list_columns_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
    Arc::new(rmcp::model::object(json!({
        "type": "object",
        "properties": {
            "connector": { "type": "string", "description": "Connector name" },
            "catalog": { "type": "string", "description": "Catalog/database name (optional)" },
            "schema": { "type": "string", "description": "Schema name (optional, derived from the DSN when omitted)" },
            "table": { "type": "string", "description": "Table whose columns should be listed" }
        },
        "required": ["connector", "table"]
    })))
}

/// Build an error result with the message in the text field
/// (client-friendly).
pub(crate) fn error_result(message: impl Into<String>) -> rmcp::model::CallToolResult {
    rmcp::model::CallToolResult::error(vec![Content::text(message.into())])
}
