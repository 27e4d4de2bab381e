//! Read-only safety gate
//!
//! A candidate passes when it parses as at least one statement and no
//! denylisted keyword appears anywhere in its raw text. The scan covers
//! subqueries, comments and string literals alike, so a literal containing
//! `'DELETE'` is rejected too.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::Statement;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::parse_statements;

/// Keywords whose presence anywhere in a candidate forces rejection.
pub const DENYLIST: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "GRANT",
    "REVOKE", "MERGE", "RENAME", "UPSERT", "ATTACH", "DETACH", "COPY", "EXPORT", "IMPORT",
    "INSTALL", "LOAD", "PRAGMA", "CALL", "SET", "RESET", "VACUUM", "CHECKPOINT",
];

static DENYLIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b(?:{})\b", DENYLIST.join("|"))).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid syntax: {0}")]
    SyntaxInvalid(String),

    #[error("dangerous operation detected: {0}")]
    UnsafeOperation(String),

    #[error("non-query statement rejected: {0}")]
    NonQuery(String),
}

/// Outcome of validation, produced on both the accepting and rejecting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

impl From<&Result<ValidatedStatement, Rejection>> for Verdict {
    fn from(result: &Result<ValidatedStatement, Rejection>) -> Self {
        match result {
            Ok(_) => Verdict {
                accepted: true,
                reason: "valid".to_string(),
            },
            Err(rejection) => Verdict {
                accepted: false,
                reason: rejection.to_string(),
            },
        }
    }
}

/// A statement that passed the gate. Only [`Validator::check`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
    statement_count: usize,
}

impl ValidatedStatement {
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    pub fn statement_count(&self) -> usize {
        self.statement_count
    }

    /// SHA-256 of the statement text, for log correlation.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for ValidatedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    require_query_root: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject statements whose root is not a query. Off by default.
    pub fn require_query_root(mut self, enabled: bool) -> Self {
        self.require_query_root = enabled;
        self
    }

    /// Run the gate. Pure: the same text always yields the same result.
    pub fn check(&self, sql: &str) -> Result<ValidatedStatement, Rejection> {
        let statements = parse_statements(sql)
            .map_err(|e| Rejection::SyntaxInvalid(e.to_string()))?;

        if statements.is_empty() {
            return Err(Rejection::SyntaxInvalid("no statement found".to_string()));
        }

        if let Some(found) = DENYLIST_REGEX.find(sql) {
            return Err(Rejection::UnsafeOperation(found.as_str().to_ascii_uppercase()));
        }

        if self.require_query_root {
            if let Some(other) = statements.iter().find(|s| !matches!(s, Statement::Query(_))) {
                let verb = other
                    .to_string()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                return Err(Rejection::NonQuery(verb));
            }
        }

        Ok(ValidatedStatement {
            sql: sql.to_string(),
            statement_count: statements.len(),
        })
    }

    pub fn verdict(&self, sql: &str) -> Verdict {
        Verdict::from(&self.check(sql))
    }
}
