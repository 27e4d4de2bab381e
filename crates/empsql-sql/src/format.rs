//! SQL text normalization
//!
//! Works on the token stream, so string literals, quoted identifiers and
//! comments keep their exact text.

use sqlparser::tokenizer::{Token, Whitespace};

use crate::{bare_word, tokenize, STATEMENT_STARTERS};

/// Keywords written in upper case. Identifiers are left untouched, which is
/// why this is a fixed list rather than the tokenizer's full keyword set
/// (that one contains words like NAME and YEAR used as column names).
const KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "AS", "ASC", "AVG", "BETWEEN", "BY", "CASE", "CAST", "COALESCE",
    "COUNT", "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DESC", "DISTINCT",
    "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FILTER", "FIRST", "FROM", "FULL", "GROUP",
    "HAVING", "ILIKE", "IN", "INNER", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN", "LAST",
    "LEFT", "LIKE", "LIMIT", "MAX", "MIN", "NATURAL", "NOT", "NULL", "NULLS", "OFFSET", "ON",
    "OR", "ORDER", "OUTER", "OVER", "PARTITION", "QUALIFY", "RECURSIVE", "RIGHT", "ROUND", "SUM",
    "TABLE", "THEN", "TRUE", "UNION", "USING", "WHEN", "WHERE", "WINDOW",
];

/// Function names, upper-cased only in call position so columns such as
/// `year` keep their spelling.
const FUNCTIONS: &[&str] = &[
    "ABS", "CEIL", "CEILING", "CONCAT", "DATE", "DATEDIFF", "DATE_DIFF", "DATE_FORMAT",
    "DATE_PART", "DATE_TRUNC", "DAY", "DENSE_RANK", "EXTRACT", "FLOOR", "GROUP_CONCAT", "IFNULL",
    "LAG", "LEAD", "LENGTH", "LOWER", "LTRIM", "MONTH", "NOW", "NULLIF", "RANK", "ROW_NUMBER",
    "RTRIM", "STRFTIME", "STRING_AGG", "SUBSTR", "SUBSTRING", "TIMESTAMPDIFF", "TRIM", "UPPER",
    "YEAR",
];

/// Type names written before a string literal: `DATE '1990-01-01'`.
const TYPED_LITERALS: &[&str] = &["DATE", "TIME", "TIMESTAMP"];

/// Top-level clauses that start a new line when reindenting.
const CLAUSE_STARTS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "EXCEPT",
    "INTERSECT", "WINDOW", "JOIN", "LEFT", "RIGHT", "INNER", "FULL", "CROSS", "NATURAL",
];

const JOIN_MODIFIERS: &[&str] = &["LEFT", "RIGHT", "INNER", "FULL", "CROSS", "NATURAL", "OUTER"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Put each top-level clause and each statement on its own line.
    pub reindent: bool,
}

impl FormatOptions {
    pub fn reindent() -> Self {
        Self { reindent: true }
    }
}

fn is_keyword(word: &str, next: Option<&Token>) -> bool {
    if KEYWORDS.contains(&word) || STATEMENT_STARTERS.contains(&word) {
        return true;
    }
    match next {
        Some(Token::LParen) => FUNCTIONS.contains(&word),
        Some(Token::SingleQuotedString(_)) => TYPED_LITERALS.contains(&word),
        _ => false,
    }
}

/// First token after `idx` that is not whitespace or a comment.
fn next_significant(tokens: &[Token], idx: usize) -> Option<&Token> {
    tokens[idx + 1..]
        .iter()
        .find(|t| !matches!(t, Token::Whitespace(_)))
}

fn contains(list: &[&str], word: &str) -> bool {
    list.contains(&word)
}

/// Normalize keyword casing and whitespace.
///
/// Returns an empty string for empty input and for input the tokenizer
/// rejects (for example an unterminated string literal).
pub fn format_sql(sql: &str, options: FormatOptions) -> String {
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "candidate could not be tokenized");
            return String::new();
        }
    };

    let mut out = String::new();
    let mut gap = false;
    let mut after_terminator = false;
    let mut depth = 0usize;
    let mut prev_word: Option<String> = None;

    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::EOF => continue,
            Token::Whitespace(Whitespace::SingleLineComment { comment, prefix }) => {
                separate(&mut out, gap || after_terminator);
                out.push_str(prefix);
                out.push_str(comment.trim_end());
                out.push('\n');
                gap = false;
                continue;
            }
            Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                separate(&mut out, gap || after_terminator);
                out.push_str(&token.to_string());
                gap = true;
                continue;
            }
            Token::Whitespace(_) => {
                gap = true;
                continue;
            }
            Token::SemiColon => {
                trim_end_spaces(&mut out);
                out.push(';');
                depth = 0;
                prev_word = None;
                after_terminator = true;
                gap = false;
                continue;
            }
            _ => {}
        }

        let word = bare_word(token);

        let breaks_line = options.reindent
            && !out.is_empty()
            && (after_terminator
                || (depth == 0
                    && word.as_deref().is_some_and(|w| {
                        starts_clause(w, prev_word.as_deref(), tokens.get(idx + 1))
                    })));

        if breaks_line {
            trim_end_spaces(&mut out);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        } else {
            separate(&mut out, gap || after_terminator);
        }

        match &word {
            Some(w) if is_keyword(w, next_significant(&tokens, idx)) => out.push_str(w),
            _ => out.push_str(&token.to_string()),
        }

        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }

        prev_word = word;
        gap = false;
        after_terminator = false;
    }

    out.trim().to_string()
}

fn starts_clause(word: &str, prev_word: Option<&str>, next: Option<&Token>) -> bool {
    if !contains(CLAUSE_STARTS, word) {
        return false;
    }
    // LEFT(...) and RIGHT(...) are string functions
    if matches!(next, Some(Token::LParen)) {
        return false;
    }
    // the modifier already broke the line: LEFT JOIN, LEFT OUTER JOIN
    !prev_word.is_some_and(|p| contains(JOIN_MODIFIERS, p))
}

fn separate(out: &mut String, wanted: bool) {
    if wanted && !out.is_empty() && !out.ends_with(['\n', ' ']) {
        out.push(' ');
    }
}

fn trim_end_spaces(out: &mut String) {
    let trimmed = out.trim_end_matches(' ').len();
    out.truncate(trimmed);
}
