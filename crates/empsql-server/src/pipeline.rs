//! Question to result set: prompt, generate, extract, validate, execute
//!
//! Every entry point funnels into [`Pipeline::run`], so generated SQL and
//! caller-supplied SQL meet the same validator and the same executor.

use std::sync::Arc;
use std::time::Instant;

use empsql_duck::{ExecutionError, QueryExecutor, QueryResult};
use empsql_schema::{reports, PromptBuilder, Report, SchemaRegistry, ANCHOR};
use empsql_sql::{extract_sql, format_sql, FormatOptions, Rejection, Validator};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::llm::{GenerationError, GenerationRuntime};
use crate::log_event;
use crate::metrics::{Entry, Outcome, PipelineMetrics};

pub const SUCCESS_STATUS: &str = "Query executed successfully";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(#[from] GenerationError),

    #[error("Invalid SQL: {0}")]
    SyntaxInvalid(Rejection),

    #[error("Invalid SQL: {0}")]
    UnsafeOperation(Rejection),

    #[error("Execution failed: {0}")]
    ExecutionFailed(#[from] ExecutionError),
}

impl From<Rejection> for PipelineError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::SyntaxInvalid(_) => PipelineError::SyntaxInvalid(rejection),
            Rejection::UnsafeOperation(_) | Rejection::NonQuery(_) => {
                PipelineError::UnsafeOperation(rejection)
            }
        }
    }
}

impl PipelineError {
    fn outcome(&self) -> Outcome {
        match self {
            PipelineError::GenerationUnavailable(_) => Outcome::GenerationUnavailable,
            PipelineError::SyntaxInvalid(_) => Outcome::SyntaxInvalid,
            PipelineError::UnsafeOperation(_) => Outcome::UnsafeOperation,
            PipelineError::ExecutionFailed(_) => Outcome::ExecutionFailed,
        }
    }
}

/// What every entry point returns. Status, rows and statement always travel
/// together; `result` is empty whenever `error` is set.
#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub status: String,
    pub result: QueryResult,
    pub statement: String,
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct ReportOutcome {
    pub name: &'static str,
    pub title: &'static str,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

pub struct Pipeline {
    runtime: Arc<dyn GenerationRuntime>,
    executor: Arc<dyn QueryExecutor>,
    prompts: PromptBuilder,
    validator: Validator,
    format: FormatOptions,
    metrics: PipelineMetrics,
}

impl Pipeline {
    /// Pipeline over the employees schema with default validation and
    /// single-line formatting.
    pub fn new(
        runtime: Arc<dyn GenerationRuntime>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            runtime,
            executor,
            prompts: PromptBuilder::new(&SchemaRegistry::employees()),
            validator: Validator::new(),
            format: FormatOptions::default(),
            metrics: PipelineMetrics::new()?,
        })
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn runtime(&self) -> &Arc<dyn GenerationRuntime> {
        &self.runtime
    }

    pub fn schema_text(&self) -> &str {
        self.prompts.schema_text()
    }

    /// Translate a question into SQL and run it.
    pub async fn ask(&self, question: &str) -> QueryOutcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", %request_id);

        async {
            tracing::info!(question_len = question.len(), "Received question");

            let prompt = self.prompts.build(question);
            let started = Instant::now();
            let completion = self.runtime.complete(&prompt).await;
            self.metrics.record_generation(started.elapsed());

            let completion = match completion {
                Ok(completion) => completion,
                Err(e) => return self.finish(Entry::Ask, String::new(), Err(e.into())),
            };

            let candidate = format_sql(&extract_sql(&completion, ANCHOR), self.format);
            tracing::debug!(candidate = %candidate, "Extracted candidate statement");

            let result = self.run(&candidate).await;
            self.finish(Entry::Ask, candidate, result)
        }
        .instrument(span)
        .await
    }

    /// Validate and run caller-supplied SQL exactly as written.
    pub async fn execute_sql(&self, sql: &str) -> QueryOutcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("execute_sql", %request_id);

        async {
            let result = self.run(sql).await;
            self.finish(Entry::ExecuteSql, sql.to_string(), result)
        }
        .instrument(span)
        .await
    }

    /// The dashboard reports: employee count, department head-count and
    /// current salary statistics, in that order.
    pub async fn overview(&self) -> Vec<ReportOutcome> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("overview", %request_id);

        async {
            let mut outcomes = Vec::new();
            for report in reports::overview() {
                outcomes.push(self.report(report).await);
            }
            outcomes
        }
        .instrument(span)
        .await
    }

    /// Employees hired in `year`, oldest hire first.
    pub async fn hired_in(&self, year: i32) -> QueryOutcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("hired_in", %request_id, year);

        async {
            let sql = reports::hired_in(year);
            let result = self.run(&sql).await;
            self.finish(Entry::Report, sql, result)
        }
        .instrument(span)
        .await
    }

    async fn report(&self, report: Report) -> ReportOutcome {
        let span = tracing::info_span!("report", name = report.name);

        async {
            let result = self.run(report.sql).await;
            ReportOutcome {
                name: report.name,
                title: report.title,
                outcome: self.finish(Entry::Report, report.sql.to_string(), result),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, sql: &str) -> Result<QueryResult, PipelineError> {
        let statement = self.validator.check(sql)?;

        let executor = Arc::clone(&self.executor);
        let result = tokio::task::spawn_blocking(move || executor.execute(&statement))
            .await
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))??;

        Ok(result)
    }

    fn finish(
        &self,
        entry: Entry,
        statement: String,
        result: Result<QueryResult, PipelineError>,
    ) -> QueryOutcome {
        match result {
            Ok(result) => {
                self.metrics.record_outcome(entry, Outcome::Success);
                log_event!(
                    level: tracing::Level::INFO,
                    event: "pipeline_outcome",
                    entry: entry.as_str(),
                    outcome: Outcome::Success.as_str(),
                    rows: result.row_count
                );

                QueryOutcome {
                    status: SUCCESS_STATUS.to_string(),
                    result,
                    statement,
                    error: None,
                }
            }
            Err(error) => {
                let outcome = error.outcome();
                self.metrics.record_outcome(entry, outcome);
                log_event!(
                    level: tracing::Level::WARN,
                    event: "pipeline_outcome",
                    entry: entry.as_str(),
                    outcome: outcome.as_str(),
                    error: error.to_string()
                );

                QueryOutcome {
                    status: error.to_string(),
                    result: QueryResult::empty(),
                    statement,
                    error: Some(error),
                }
            }
        }
    }
}
