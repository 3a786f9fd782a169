//! Token-level view of a candidate statement.
//!
//! Wraps sqlparser's PostgreSQL tokenizer and flattens its tokens into a small
//! lexeme set the validation rules can pattern-match on. String literals,
//! quoted identifiers and comments are resolved here, so a `;` or `*` inside a
//! literal never reaches the rules.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

/// A significant token of a statement (whitespace and comments dropped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lexeme {
    Word { value: String, quoted: bool },
    Number(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    Period,
    Star,
    Semicolon,
    Cast,
    Other(String),
}

impl Lexeme {
    /// Returns true if this is the unquoted keyword `kw` (case-insensitive).
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(self, Self::Word { value, quoted: false } if value.eq_ignore_ascii_case(kw))
    }

    /// Returns the normalized identifier: unquoted words fold to lowercase,
    /// quoted identifiers keep their exact spelling.
    pub fn ident(&self) -> Option<String> {
        match self {
            Self::Word { value, quoted: false } => Some(value.to_ascii_lowercase()),
            Self::Word { value, quoted: true } => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns true if this identifier names `expected` under PostgreSQL folding rules.
    pub fn names(&self, expected: &str) -> bool {
        match self {
            Self::Word { value, quoted: false } => value.eq_ignore_ascii_case(expected),
            Self::Word { value, quoted: true } => value == expected,
            _ => false,
        }
    }

    fn from_token(token: Token) -> Option<Self> {
        let lexeme = match token {
            Token::Whitespace(_) | Token::EOF => return None,
            Token::Word(word) => Self::Word {
                value: word.value,
                quoted: word.quote_style.is_some(),
            },
            Token::Number(n, _) => Self::Number(n),
            Token::SingleQuotedString(s)
            | Token::NationalStringLiteral(s)
            | Token::EscapedStringLiteral(s) => Self::Str(s),
            Token::DollarQuotedString(s) => Self::Str(s.value),
            Token::LParen => Self::LParen,
            Token::RParen => Self::RParen,
            Token::Comma => Self::Comma,
            Token::Period => Self::Period,
            Token::Mul => Self::Star,
            Token::SemiColon => Self::Semicolon,
            Token::DoubleColon => Self::Cast,
            other => Self::Other(other.to_string()),
        };
        Some(lexeme)
    }
}

/// Tokenizes `sql` with the PostgreSQL dialect.
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Lexeme>, String> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| e.to_string())?;
    Ok(tokens.into_iter().filter_map(Lexeme::from_token).collect())
}

/// A function call found in a token stream.
#[derive(Debug)]
pub(crate) struct FunctionCall<'a> {
    /// Lowercased function name (schema qualifier dropped).
    pub name: String,
    pub args: Vec<&'a [Lexeme]>,
}

impl FunctionCall<'_> {
    /// Returns true if any argument contains a call to one of `names`.
    pub fn args_call_any(&self, names: &[&str]) -> bool {
        self.args.iter().any(|arg| {
            function_calls(arg, true)
                .iter()
                .any(|call| names.contains(&call.name.as_str()))
        })
    }
}

/// Returns the index of the parenthesis closing the one opened at `open`.
pub(crate) fn matching_paren(toks: &[Lexeme], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in toks.iter().enumerate().skip(open) {
        match tok {
            Lexeme::LParen => depth += 1,
            Lexeme::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns true if a parenthesized subquery starts at `i`.
pub(crate) fn starts_subquery(toks: &[Lexeme], i: usize) -> bool {
    matches!(toks.get(i), Some(Lexeme::LParen))
        && toks
            .get(i + 1)
            .is_some_and(|t| t.is_kw("SELECT") || t.is_kw("WITH"))
}

/// Finds the outermost parenthesized subqueries in `toks`, at any paren depth.
///
/// Yields the index of each opening paren with the subquery body. Subqueries
/// nested inside another subquery are not reported separately.
pub(crate) fn outer_subqueries(toks: &[Lexeme]) -> Vec<(usize, &[Lexeme])> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        if starts_subquery(toks, i) {
            let Some(close) = matching_paren(toks, i) else {
                break;
            };
            found.push((i, &toks[i + 1..close]));
            i = close + 1;
        } else {
            i += 1;
        }
    }
    found
}

/// Splits on commas that are not nested inside parentheses.
pub(crate) fn split_top_level(toks: &[Lexeme]) -> Vec<&[Lexeme]> {
    if toks.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in toks.iter().enumerate() {
        match tok {
            Lexeme::LParen => depth += 1,
            Lexeme::RParen => depth = depth.saturating_sub(1),
            Lexeme::Comma if depth == 0 => {
                parts.push(&toks[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&toks[start..]);
    parts
}

/// Finds the first unnested occurrence of keyword `kw` at or after `from`.
pub(crate) fn find_top_level_kw(toks: &[Lexeme], kw: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in toks.iter().enumerate() {
        match tok {
            Lexeme::LParen => depth += 1,
            Lexeme::RParen => depth = depth.saturating_sub(1),
            _ if i >= from && depth == 0 && tok.is_kw(kw) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Collects every `name(...)` call in `toks`, nested calls included.
///
/// With `descend` false, calls inside parenthesized subqueries are skipped.
pub(crate) fn function_calls(toks: &[Lexeme], descend: bool) -> Vec<FunctionCall<'_>> {
    let mut calls = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        if !descend && starts_subquery(toks, i) {
            i = matching_paren(toks, i).map_or(toks.len(), |close| close + 1);
            continue;
        }
        if let (Some(name), Some(Lexeme::LParen)) = (toks[i].ident(), toks.get(i + 1)) {
            if let Some(close) = matching_paren(toks, i + 1) {
                calls.push(FunctionCall {
                    name: name.to_ascii_lowercase(),
                    args: split_top_level(&toks[i + 2..close]),
                });
            }
        }
        i += 1;
    }
    calls
}

/// Returns true if `toks` is a plain column reference such as `p.geom`.
pub(crate) fn is_column_ref(toks: &[Lexeme]) -> bool {
    !toks.is_empty()
        && toks.len() % 2 == 1
        && toks.iter().enumerate().all(|(i, tok)| {
            if i % 2 == 0 {
                matches!(tok, Lexeme::Word { .. })
            } else {
                *tok == Lexeme::Period
            }
        })
}
