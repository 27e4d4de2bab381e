//! Candidate statement extraction from raw model output
//!
//! The model is asked to answer after an anchor cue, but nothing forces it
//! to. Extraction therefore degrades step by step instead of failing:
//!
//! 1. text after the last anchor, or the whole completion
//! 2. the body of a fenced code block, if any
//! 3. from the first keyword that opens a real statement, dropping leading
//!    prose such as "With the given schema, the query is:"
//! 4. up to the trailing prose, keeping chained statements intact
//!
//! A segment counts as a statement when it opens with a statement keyword
//! and parses. Sentence-case openers ("Show this to HR") read as prose even
//! when the parser is lenient with them, unless the verb is denylisted.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;

use crate::{is_statement_starter, parse_statements, tokenize, DENYLIST, STATEMENT_STARTERS};

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

static LINE_START_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^[ \t]*({})\b", STATEMENT_STARTERS.join("|"))).unwrap()
});

static ANYWHERE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b({})\b", STATEMENT_STARTERS.join("|"))).unwrap());

static BLANK_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\r?\n").unwrap());

/// Words that may open a line in the middle of a statement.
const CLAUSE_WORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN", "LEFT", "RIGHT",
    "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "ON", "USING", "UNION", "EXCEPT", "INTERSECT",
    "AND", "OR", "WINDOW", "QUALIFY", "AS",
];

/// Isolate the candidate statement in a completion.
///
/// Never fails. Empty input gives an empty string; text with no
/// recognizable statement is returned trimmed for the validator to reject.
pub fn extract_sql(completion: &str, anchor: &str) -> String {
    let after_anchor = match completion.rfind(anchor) {
        Some(pos) if !anchor.is_empty() => &completion[pos + anchor.len()..],
        _ => {
            tracing::debug!(anchor, "anchor cue not found, using whole completion");
            completion
        }
    };

    let body = FENCE_REGEX
        .captures(after_anchor)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(after_anchor);

    let start = statement_start(body).unwrap_or(0);
    let body = trim_trailing_paragraphs(&body[start..]);

    trim_after_terminator(body)
}

/// Offset of the first keyword whose statement holds up, preferring keywords
/// at the start of a line. Falls back to the first keyword at all.
fn statement_start(text: &str) -> Option<usize> {
    let mut starts: Vec<usize> = LINE_START_REGEX
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.start())
        .collect();
    for m in ANYWHERE_REGEX.find_iter(text) {
        if !starts.contains(&m.start()) {
            starts.push(m.start());
        }
    }

    let opens_statement = |start: usize| match tokenize(trim_trailing_paragraphs(&text[start..])) {
        Ok(tokens) => is_statement(&tokens[..statement_end(&tokens, 0)]),
        Err(_) => false,
    };

    starts
        .iter()
        .copied()
        .find(|&start| opens_statement(start))
        .or_else(|| starts.first().copied())
}

/// Cut at the first blank line that is followed by something other than
/// more SQL.
fn trim_trailing_paragraphs(text: &str) -> &str {
    for gap in BLANK_LINE_REGEX.find_iter(text) {
        if !continues_statement(text[gap.end()..].trim_start()) {
            return &text[..gap.start()];
        }
    }
    text
}

fn continues_statement(rest: &str) -> bool {
    if rest.starts_with([')', '(', ',', ';']) {
        return true;
    }

    let word: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();

    !word.is_empty()
        && (is_statement_starter(&word)
            || CLAUSE_WORDS.iter().any(|w| w.eq_ignore_ascii_case(&word)))
}

/// Stop after the first top-level `;` that is not followed by another
/// statement.
fn trim_after_terminator(text: &str) -> String {
    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "completion not tokenizable, keeping it as is");
            return text.trim().to_string();
        }
    };

    let mut end = statement_end(&tokens, 0);
    while end < tokens.len() {
        let next = statement_end(&tokens, end);
        if !is_statement(&tokens[end..next]) {
            break;
        }
        end = next;
    }

    render(&tokens[..end]).trim().to_string()
}

/// Index just past the next top-level `;` at or after `from`.
fn statement_end(tokens: &[Token], from: usize) -> usize {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(from) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::SemiColon if depth == 0 => return idx + 1,
            _ => {}
        }
    }
    tokens.len()
}

fn is_statement(tokens: &[Token]) -> bool {
    let opener = tokens.iter().find_map(|t| match t {
        Token::Whitespace(_) | Token::EOF => None,
        Token::Word(word) if word.quote_style.is_none() => Some(Some(word.value.as_str())),
        _ => Some(None),
    });
    let Some(Some(word)) = opener else {
        return false;
    };
    if !is_statement_starter(word) {
        return false;
    }

    let denied = DENYLIST.iter().any(|d| d.eq_ignore_ascii_case(word));
    if denied && !word.chars().any(|c| c.is_ascii_lowercase()) {
        return true;
    }
    if !denied && is_sentence_case(word) {
        return false;
    }

    parse_statements(&render(tokens)).is_ok_and(|statements| !statements.is_empty())
}

/// `Show`, `With`: capital first letter, the rest lower case.
fn is_sentence_case(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.clone().next().is_some()
        && chars.all(|c| !c.is_ascii_uppercase())
}

fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .filter(|t| !matches!(t, Token::EOF))
        .map(|t| t.to_string())
        .collect()
}
