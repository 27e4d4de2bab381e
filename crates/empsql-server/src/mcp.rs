//! MCP (Model Context Protocol) tool surface over the pipeline

use async_trait::async_trait;
use empsql_duck::DuckExecutor;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::pipeline::{Pipeline, QueryOutcome, ReportOutcome};

pub struct EmpsqlServerHandler {
    pipeline: Arc<Pipeline>,
    catalog: Arc<DuckExecutor>,
}

impl EmpsqlServerHandler {
    pub fn new(pipeline: Arc<Pipeline>, catalog: Arc<DuckExecutor>) -> Self {
        Self { pipeline, catalog }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "empsql-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Employees Database Natural Language Query Server".to_string()),
            },
            instructions: Some(
                "Ask questions about the employees database in plain English with 'ask', \
                 or run read-only SQL with 'execute_sql'. Anything that could modify the \
                 database is rejected before it runs."
                    .to_string(),
            ),
            meta: None,
        }
    }

    fn tools() -> Vec<Tool> {
        vec![
            tool(
                "ask",
                "Translate a natural language question about the employees database into \
                 SQL, validate it as read-only and execute it. Returns the status, the \
                 generated SQL and the result rows.",
                &[(
                    "question",
                    "string",
                    "Question about employees, departments, salaries or titles \
                     (e.g., 'How many employees are there?')",
                )],
            ),
            tool(
                "execute_sql",
                "Validate and execute a SQL statement exactly as written. Statements that \
                 could modify the database are rejected.",
                &[("sql", "string", "A single read-only SQL statement")],
            ),
            tool(
                "overview",
                "Run the overview reports: total employees, department head-count and \
                 current salary statistics.",
                &[],
            ),
            tool(
                "hired_in",
                "List employees hired in a given year, oldest hire first.",
                &[("year", "integer", "Hire year (e.g., 1990)")],
            ),
            tool(
                "describe_schema",
                "Show the schema the model is prompted with and the tables the database \
                 actually serves.",
                &[],
            ),
            tool(
                "metrics",
                "Pipeline metrics in Prometheus text format.",
                &[],
            ),
        ]
    }
}

/// Tool whose listed properties are all required.
fn tool(name: &str, description: &str, properties: &[(&str, &str, &str)]) -> Tool {
    let mut schema_properties = HashMap::new();
    for (prop, kind, prop_description) in properties {
        let mut prop_schema = Map::new();
        prop_schema.insert("type".to_string(), Value::String(kind.to_string()));
        prop_schema.insert(
            "description".to_string(),
            Value::String(prop_description.to_string()),
        );
        schema_properties.insert(prop.to_string(), prop_schema);
    }

    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema::new(
            properties.iter().map(|(prop, _, _)| prop.to_string()).collect(),
            Some(schema_properties),
        ),
        title: None,
        annotations: None,
        meta: None,
        output_schema: None,
    }
}

fn text_result(text: String, is_error: bool) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: is_error.then_some(true),
        meta: None,
        structured_content: None,
    }
}

fn required_str<'a>(args: &'a Option<Value>, key: &str) -> Result<&'a str, CallToolError> {
    args.as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
        .ok_or_else(|| CallToolError::from_message(format!("Missing required argument: {}", key)))
}

fn required_year(args: &Option<Value>) -> Result<i32, CallToolError> {
    args.as_ref()
        .and_then(|a| a.get("year"))
        .and_then(|v| v.as_i64())
        .and_then(|y| i32::try_from(y).ok())
        .ok_or_else(|| CallToolError::from_message("Missing or invalid argument: year"))
}

fn render_outcome(outcome: &QueryOutcome) -> String {
    format!(
        "Status: {}\n\nSQL:\n{}\n\nResults ({} rows):\n{}",
        outcome.status,
        outcome.statement,
        outcome.result.row_count,
        render_rows(&outcome.result.rows)
    )
}

fn render_rows<T: Serialize + ?Sized>(rows: &T) -> String {
    match serde_json::to_string_pretty(rows) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize result rows: {}", e);
            format!("<rows could not be rendered: {}>", e)
        }
    }
}

fn render_reports(reports: &[ReportOutcome]) -> String {
    reports
        .iter()
        .map(|r| format!("## {}\n\n{}", r.title, render_outcome(&r.outcome)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ServerHandler for EmpsqlServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        info!("Tool called: {}", request.params.name);
        let args = request.params.arguments.map(Value::Object);

        match request.params.name.as_str() {
            "ask" => {
                let question = required_str(&args, "question")?;
                let outcome = self.pipeline.ask(question).await;
                Ok(text_result(render_outcome(&outcome), !outcome.is_success()))
            }
            "execute_sql" => {
                let sql = required_str(&args, "sql")?;
                let outcome = self.pipeline.execute_sql(sql).await;
                Ok(text_result(render_outcome(&outcome), !outcome.is_success()))
            }
            "overview" => {
                let reports = self.pipeline.overview().await;
                let failed = reports.iter().any(|r| !r.outcome.is_success());
                Ok(text_result(render_reports(&reports), failed))
            }
            "hired_in" => {
                let year = required_year(&args)?;
                let outcome = self.pipeline.hired_in(year).await;
                Ok(text_result(render_outcome(&outcome), !outcome.is_success()))
            }
            "describe_schema" => self.handle_describe_schema().await,
            "metrics" => {
                let text = self.pipeline.metrics().render().map_err(|e| {
                    error!("Failed to render metrics: {}", e);
                    CallToolError::from_message(format!("Failed to render metrics: {}", e))
                })?;
                Ok(text_result(text, false))
            }
            _ => Err(CallToolError::unknown_tool(request.params.name.clone())),
        }
    }
}

impl EmpsqlServerHandler {
    async fn handle_describe_schema(&self) -> std::result::Result<CallToolResult, CallToolError> {
        let catalog = Arc::clone(&self.catalog);
        let tables = tokio::task::spawn_blocking(move || catalog.describe_tables())
            .await
            .map_err(|e| CallToolError::from_message(format!("Schema task failed: {}", e)))?
            .map_err(|e| {
                error!("Failed to describe tables: {}", e);
                CallToolError::from_message(format!("Failed to describe tables: {}", e))
            })?;

        let served = tables
            .iter()
            .map(|t| {
                let columns = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", t.name, columns)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let text = format!(
            "Prompted schema:\n\n{}\n\nServed tables ({}):\n{}",
            self.pipeline.schema_text(),
            tables.len(),
            served
        );

        Ok(text_result(text, false))
    }
}
