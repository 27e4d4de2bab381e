//! Prometheus metrics for the pipeline
//!
//! - `empsql_pipeline_outcomes_total{entry, outcome}`: one increment per finished request
//! - `empsql_generation_seconds`: wall time of each model call

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Which entry point a request came through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Ask,
    ExecuteSql,
    /// Canned reports: the overview set and hires by year
    Report,
}

impl Entry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entry::Ask => "ask",
            Entry::ExecuteSql => "execute_sql",
            Entry::Report => "report",
        }
    }
}

/// Terminal state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    GenerationUnavailable,
    SyntaxInvalid,
    UnsafeOperation,
    ExecutionFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::GenerationUnavailable => "generation_unavailable",
            Outcome::SyntaxInvalid => "syntax_invalid",
            Outcome::UnsafeOperation => "unsafe_operation",
            Outcome::ExecutionFailed => "execution_failed",
        }
    }
}

/// Registry plus the handles the pipeline records into.
pub struct PipelineMetrics {
    registry: Registry,
    outcomes: IntCounterVec,
    generation: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let outcomes = IntCounterVec::new(
            Opts::new(
                "empsql_pipeline_outcomes_total",
                "Finished pipeline requests by entry point and outcome",
            ),
            &["entry", "outcome"],
        )?;
        let generation = Histogram::with_opts(
            HistogramOpts::new("empsql_generation_seconds", "Time spent in model generation")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(generation.clone()))?;

        Ok(Self {
            registry,
            outcomes,
            generation,
        })
    }

    pub fn record_outcome(&self, entry: Entry, outcome: Outcome) {
        self.outcomes
            .with_label_values(&[entry.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_generation(&self, elapsed: Duration) {
        self.generation.observe(elapsed.as_secs_f64());
    }

    #[cfg(test)]
    pub fn outcome_count(&self, entry: Entry, outcome: Outcome) -> u64 {
        self.outcomes
            .with_label_values(&[entry.as_str(), outcome.as_str()])
            .get()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted_per_label() {
        let metrics = PipelineMetrics::new().unwrap();

        metrics.record_outcome(Entry::Ask, Outcome::Success);
        metrics.record_outcome(Entry::Ask, Outcome::Success);
        metrics.record_outcome(Entry::ExecuteSql, Outcome::UnsafeOperation);

        assert_eq!(metrics.outcome_count(Entry::Ask, Outcome::Success), 2);
        assert_eq!(metrics.outcome_count(Entry::ExecuteSql, Outcome::UnsafeOperation), 1);
        assert_eq!(metrics.outcome_count(Entry::Ask, Outcome::UnsafeOperation), 0);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_outcome(Entry::Report, Outcome::ExecutionFailed);
        metrics.record_generation(Duration::from_millis(300));

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"empsql_pipeline_outcomes_total{entry="report",outcome="execution_failed"} 1"#
        ));
        assert!(text.contains("empsql_generation_seconds_count 1"));
    }
}
