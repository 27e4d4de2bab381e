//! DuckDB executor for validated statements
//!
//! Every call opens its own connection and drops it before returning, on the
//! success path and on every error path alike.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{AccessMode, Config, Connection};
use empsql_sql::ValidatedStatement;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Expected a single statement, got {0}")]
    MultipleStatements(usize),

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

/// Runs a validated statement against the relational store.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, statement: &ValidatedStatement) -> Result<QueryResult, ExecutionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionBudget {
    pub max_memory_mb: Option<u64>,
    pub max_rows: Option<u64>,
}

/// Tabular result: ordered column names and one column -> value map per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

enum Target {
    File { path: PathBuf, read_only: bool },
    /// Source of per-call connections to one shared database instance.
    Shared(Mutex<Connection>),
}

pub struct DuckExecutor {
    target: Target,
    budget: ExecutionBudget,
}

impl DuckExecutor {
    /// Execute against a database file. Nothing is opened until the first
    /// call.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Self {
        Self {
            target: Target::File {
                path: path.as_ref().to_path_buf(),
                read_only,
            },
            budget: ExecutionBudget::default(),
        }
    }

    /// Execute against a fresh in-memory database shared by all calls.
    pub fn in_memory() -> Result<Self, ExecutionError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Each call runs on a clone of `conn`, so it sees the same database.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            target: Target::Shared(Mutex::new(conn)),
            budget: ExecutionBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: ExecutionBudget) -> Self {
        self.budget = budget;
        self
    }

    fn connect(&self) -> Result<Connection, ExecutionError> {
        let conn = match &self.target {
            Target::File { path, read_only } => {
                tracing::debug!(path = %path.display(), read_only, "opening database");
                if *read_only {
                    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
                    Connection::open_with_flags(path, config)?
                } else {
                    Connection::open(path)?
                }
            }
            Target::Shared(shared) => shared
                .lock()
                .map_err(|_| ExecutionError::Unavailable("connection lock poisoned".to_string()))?
                .try_clone()?,
        };

        self.apply_budget(&conn)?;
        Ok(conn)
    }

    fn apply_budget(&self, conn: &Connection) -> Result<(), ExecutionError> {
        if let Some(max_memory_mb) = self.budget.max_memory_mb {
            let pragma = format!("PRAGMA memory_limit='{}MB'", max_memory_mb);
            conn.execute_batch(&pragma)?;
        }
        Ok(())
    }

    fn run(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let columns: Vec<String> = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut result_rows = Vec::new();

        while let Some(row) = rows.next()? {
            let mut record = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), value_to_json(row, idx)?);
            }
            result_rows.push(record);

            if let Some(max_rows) = self.budget.max_rows {
                if result_rows.len() as u64 > max_rows {
                    return Err(ExecutionError::BudgetExceeded(format!(
                        "Max rows ({}) exceeded",
                        max_rows
                    )));
                }
            }
        }

        Ok(QueryResult {
            columns,
            row_count: result_rows.len(),
            rows: result_rows,
        })
    }

    /// Tables and columns of the `main` schema, from `information_schema`.
    pub fn describe_tables(&self) -> Result<Vec<TableDescription>, ExecutionError> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(
            "SELECT table_name, column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'main' \
             ORDER BY table_name, ordinal_position",
        )?;

        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ColumnDescription {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                        is_nullable: row.get::<_, String>(3)? == "YES",
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables: Vec<TableDescription> = Vec::new();
        for (table_name, column) in columns {
            match tables.last_mut() {
                Some(table) if table.name == table_name => table.columns.push(column),
                _ => tables.push(TableDescription {
                    name: table_name,
                    columns: vec![column],
                }),
            }
        }

        Ok(tables)
    }
}

impl QueryExecutor for DuckExecutor {
    fn execute(&self, statement: &ValidatedStatement) -> Result<QueryResult, ExecutionError> {
        if statement.statement_count() != 1 {
            return Err(ExecutionError::MultipleStatements(statement.statement_count()));
        }

        tracing::debug!(fingerprint = %statement.fingerprint(), "executing statement");
        let result = self.run(statement.as_str())?;
        tracing::debug!(rows = result.row_count, "statement executed");

        Ok(result)
    }
}

fn value_to_json(row: &duckdb::Row, idx: usize) -> Result<Value, ExecutionError> {
    let value = match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => number(f64::from(f)),
        ValueRef::Double(f) => number(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            text.parse::<f64>().map(number).unwrap_or(Value::String(text))
        }
        ValueRef::Date32(days) => date_from_days(days),
        ValueRef::Timestamp(unit, value) => timestamp(unit, value),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        _ => row
            .get::<_, String>(idx)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String("<unsupported>".to_string())),
    };
    Ok(value)
}

fn number(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn date_from_days(days: i32) -> Value {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))))
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn timestamp(unit: TimeUnit, value: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => value.checked_mul(1_000_000),
        TimeUnit::Millisecond => value.checked_mul(1_000),
        TimeUnit::Microsecond => Some(value),
        TimeUnit::Nanosecond => Some(value / 1_000),
    };

    micros
        .and_then(DateTime::from_timestamp_micros)
        .map(|ts| Value::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use empsql_sql::Validator;

    fn executor() -> DuckExecutor {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE employees (emp_no INTEGER, first_name VARCHAR, hire_date DATE);
             INSERT INTO employees VALUES
               (10001, 'Georgi', DATE '1986-06-26'),
               (10002, 'Bezalel', DATE '1985-11-21');",
        )
        .unwrap();
        DuckExecutor::from_connection(conn)
    }

    fn validated(sql: &str) -> ValidatedStatement {
        Validator::new().check(sql).unwrap()
    }

    #[test]
    fn test_count_query() {
        let result = executor()
            .execute(&validated("SELECT COUNT(*) AS total_employees FROM employees;"))
            .unwrap();

        assert_eq!(result.columns, vec!["total_employees"]);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["total_employees"], serde_json::json!(2));
    }

    #[test]
    fn test_dates_render_as_iso() {
        let result = executor()
            .execute(&validated(
                "SELECT first_name, hire_date FROM employees ORDER BY emp_no",
            ))
            .unwrap();

        assert_eq!(result.rows[0]["hire_date"], serde_json::json!("1986-06-26"));
        assert_eq!(result.rows[1]["first_name"], serde_json::json!("Bezalel"));
    }

    #[test]
    fn test_empty_result_keeps_columns() {
        let result = executor()
            .execute(&validated("SELECT emp_no FROM employees WHERE emp_no < 0"))
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["emp_no"]);
    }

    #[test]
    fn test_database_rejects_unknown_table() {
        let err = executor()
            .execute(&validated("SELECT * FROM payroll"))
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Database(_)));
    }

    #[test]
    fn test_multiple_statements_refused() {
        let err = executor()
            .execute(&validated("SELECT 1; SELECT 2"))
            .unwrap_err();

        assert!(matches!(err, ExecutionError::MultipleStatements(2)));
    }

    #[test]
    fn test_row_budget() {
        let executor = executor().with_budget(ExecutionBudget {
            max_memory_mb: None,
            max_rows: Some(1),
        });

        let err = executor
            .execute(&validated("SELECT * FROM employees"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::BudgetExceeded(_)));

        assert!(executor
            .execute(&validated("SELECT * FROM employees LIMIT 1"))
            .is_ok());
    }

    #[test]
    fn test_describe_tables() {
        let tables = executor().describe_tables().unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "employees");
        let names: Vec<_> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["emp_no", "first_name", "hire_date"]);
    }

    #[test]
    fn test_date_conversion() {
        assert_eq!(date_from_days(0), serde_json::json!("1970-01-01"));
        assert_eq!(date_from_days(7305), serde_json::json!("1990-01-01"));
        assert_eq!(
            timestamp(TimeUnit::Second, 86_400),
            serde_json::json!("1970-01-02T00:00:00")
        );
    }
}
