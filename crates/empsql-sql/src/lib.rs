//! SQL handling between the model and the database
//!
//! - `extract`: isolate a candidate statement from a raw completion
//! - `format`: normalize keyword casing and whitespace
//! - `validate`: the read-only safety gate producing `ValidatedStatement`

pub mod extract;
pub mod format;
pub mod validate;

pub use extract::extract_sql;
pub use format::{format_sql, FormatOptions};
pub use validate::{Rejection, ValidatedStatement, Validator, Verdict, DENYLIST};

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, DuckDbDialect, GenericDialect, MySqlDialect};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

/// Tokenize without unescaping literals, so every token displays exactly as
/// it was written.
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    Tokenizer::new(&GenericDialect {}, sql)
        .with_unescape(false)
        .tokenize()
}

/// Upper-cased text of an unquoted word token.
pub(crate) fn bare_word(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// Words that open a statement. Mutating verbs are included so the extractor
/// never hides them from the validator.
pub(crate) const STATEMENT_STARTERS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN", "VALUES",
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE",
    "GRANT", "REVOKE", "MERGE", "RENAME", "UPSERT", "ATTACH", "DETACH", "COPY",
    "EXPORT", "IMPORT", "INSTALL", "LOAD", "PRAGMA", "CALL", "SET", "RESET",
    "VACUUM", "CHECKPOINT",
];

pub(crate) fn is_statement_starter(word: &str) -> bool {
    STATEMENT_STARTERS.iter().any(|s| s.eq_ignore_ascii_case(word))
}

/// Parse with the MySQL dialect first (the model is most fluent in it),
/// then DuckDB, then the generic dialect.
pub(crate) fn parse_statements(sql: &str) -> Result<Vec<Statement>, ParserError> {
    let dialects: [&dyn Dialect; 3] = [&MySqlDialect {}, &DuckDbDialect {}, &GenericDialect {}];

    let mut last_error = None;
    for dialect in dialects {
        match Parser::parse_sql(dialect, sql) {
            Ok(statements) => return Ok(statements),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| ParserError::ParserError("no dialect available".to_string())))
}
