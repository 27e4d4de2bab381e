//! empsql MCP server
//!
//! Model Context Protocol server that answers natural language questions
//! about the employees database: the model writes SQL, a read-only gate
//! checks it, and DuckDB executes it.

use std::sync::Arc;

use empsql_duck::{DuckExecutor, ExecutionBudget};
use empsql_schema::{PromptBuilder, SchemaRegistry};
use empsql_sql::{FormatOptions, Validator};
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use tracing::{info, warn};

mod config;
mod llm;
mod logging;
mod mcp;
mod metrics;
mod pipeline;

use config::Config;
use llm::{GenerationRuntime, OpenAiRuntime};
use pipeline::Pipeline;

const CONFIG_PATH_VAR: &str = "EMPSQL_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?;
    config.apply_logging_env();
    logging::init()?;

    info!(config = %config_path, "Configuration loaded");
    info!(
        database = %config.database.path,
        read_only = config.database.read_only,
        model = %config.llm.model,
        "Pipeline settings"
    );

    let executor = Arc::new(
        DuckExecutor::open(&config.database.path, config.database.read_only).with_budget(
            ExecutionBudget {
                max_memory_mb: config.database.max_memory_mb,
                max_rows: config.database.max_rows,
            },
        ),
    );

    let runtime = Arc::new(OpenAiRuntime::new(config.llm.clone()));
    if let Err(e) = runtime.warm_up().await {
        warn!("Generation runtime not ready, will retry on first question: {}", e);
    }

    let format = if config.pipeline.reindent {
        FormatOptions::reindent()
    } else {
        FormatOptions::default()
    };

    let pipeline = Arc::new(
        Pipeline::new(runtime.clone(), executor.clone())?
            .with_prompts(
                PromptBuilder::new(&SchemaRegistry::employees())
                    .with_dialect(config.llm.dialect.as_str()),
            )
            .with_validator(
                Validator::new().require_query_root(config.pipeline.require_query_root),
            )
            .with_format(format),
    );

    let handler = mcp::EmpsqlServerHandler::new(pipeline.clone(), executor);
    let server_info = mcp::EmpsqlServerHandler::server_info();

    info!(
        "Starting empsql MCP server on {}:{}",
        config.server.host, config.server.port
    );

    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            sse_support: true,
            ..Default::default()
        },
    );

    let served = server.start().await;
    pipeline.runtime().shutdown().await;
    served?;

    Ok(())
}
