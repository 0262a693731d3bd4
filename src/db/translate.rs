//! Positional placeholder translation.
//!
//! Callers always write `?` placeholders. Backends that bind positionally
//! (MySQL, SQLite) take the text unchanged; SQL Server needs named parameters,
//! so each `?` is rewritten to `@P1`, `@P2`, ... in left-to-right order.

use serde::Serialize;

use crate::error::{DbError, DbResult};
use crate::models::{Backend, QueryParam};

/// How a backend expects parameters to appear in SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` is understood natively.
    Positional,
    /// Each `?` becomes `{prefix}{start + i}`.
    Named { prefix: String, start: usize },
}

impl PlaceholderStyle {
    /// `@p0, @p1, ...`
    pub fn named() -> Self {
        Self::Named {
            prefix: "@p".to_string(),
            start: 0,
        }
    }

    /// `@P1, @P2, ...`, the ordinal names the TDS driver declares.
    pub fn tds() -> Self {
        Self::Named {
            prefix: "@P".to_string(),
            start: 1,
        }
    }

    /// The style a backend's driver binds with.
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Mysql | Backend::Sqlite => Self::Positional,
            Backend::Mssql => Self::tds(),
        }
    }
}

/// Quoting and comment rules of a backend's SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlSyntax {
    /// Quotes escape only by doubling; `[...]` quotes an identifier.
    #[default]
    Standard,
    /// MySQL: a backslash escapes the next byte inside `'...'` and `"..."`,
    /// and `#` starts a line comment.
    MySql,
}

impl SqlSyntax {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Mysql => Self::MySql,
            Backend::Sqlite | Backend::Mssql => Self::Standard,
        }
    }
}

/// Which `?` characters count as placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationMode {
    /// Every `?` is a placeholder, including ones inside string literals or
    /// comments. Kept for compatibility with queries written against it.
    Textual,
    /// `?` inside quoted strings, quoted identifiers and comments is left alone.
    #[default]
    LiteralAware,
}

/// One value with the name it is bound under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParam {
    /// `p0`, `p1`, ... (no sigil) for named styles; `None` for positional.
    pub name: Option<String>,
    pub value: QueryParam,
}

/// Backend-ready SQL text plus its bound parameters in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedQuery {
    pub sql: String,
    pub params: Vec<BoundParam>,
}

impl TranslatedQuery {
    /// Parameter values in binding order.
    pub fn values(&self) -> impl Iterator<Item = &QueryParam> {
        self.params.iter().map(|p| &p.value)
    }
}

/// Rewrite `?` placeholders for `style` and pair each value with its name.
///
/// Fails with a validation error when the number of placeholders differs from
/// the number of parameters.
pub fn translate(
    sql: &str,
    params: &[QueryParam],
    style: &PlaceholderStyle,
    syntax: SqlSyntax,
    mode: TranslationMode,
) -> DbResult<TranslatedQuery> {
    let positions = placeholder_positions(sql, syntax, mode);
    if positions.len() != params.len() {
        return Err(DbError::validation(format!(
            "Query has {} placeholder(s) but {} parameter(s) were supplied",
            positions.len(),
            params.len()
        )));
    }

    match style {
        PlaceholderStyle::Positional => Ok(TranslatedQuery {
            sql: sql.to_string(),
            params: params
                .iter()
                .map(|value| BoundParam {
                    name: None,
                    value: value.clone(),
                })
                .collect(),
        }),
        PlaceholderStyle::Named { prefix, start } => {
            let mut out = String::with_capacity(sql.len() + positions.len() * 3);
            let mut last = 0;
            for (i, pos) in positions.iter().enumerate() {
                out.push_str(&sql[last..*pos]);
                out.push_str(prefix);
                out.push_str(&(start + i).to_string());
                last = pos + 1;
            }
            out.push_str(&sql[last..]);

            let bare = prefix.trim_start_matches('@');
            let params = params
                .iter()
                .enumerate()
                .map(|(i, value)| BoundParam {
                    name: Some(format!("{}{}", bare, start + i)),
                    value: value.clone(),
                })
                .collect();

            Ok(TranslatedQuery { sql: out, params })
        }
    }
}

/// Count placeholders the way `translate` would see them.
pub fn count_placeholders(sql: &str, syntax: SqlSyntax, mode: TranslationMode) -> usize {
    placeholder_positions(sql, syntax, mode).len()
}

/// Byte offsets of every `?` treated as a placeholder.
fn placeholder_positions(sql: &str, syntax: SqlSyntax, mode: TranslationMode) -> Vec<usize> {
    match mode {
        TranslationMode::Textual => sql.match_indices('?').map(|(i, _)| i).collect(),
        TranslationMode::LiteralAware => scan_literal_aware(sql, syntax),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    /// Inside a quoted region closed by the given byte; a doubled closer is an
    /// escaped closer.
    Quoted(u8),
    LineComment,
    BlockComment,
}

fn scan_literal_aware(sql: &str, syntax: SqlSyntax) -> Vec<usize> {
    let mysql = syntax == SqlSyntax::MySql;
    let bytes = sql.as_bytes();
    let mut positions = Vec::new();
    let mut state = ScanState::Code;
    let mut i = 0;

    // All delimiters are ASCII, so byte scanning never splits a UTF-8 sequence
    // at a position we act on.
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            ScanState::Code => match b {
                b'?' => positions.push(i),
                b'\'' => state = ScanState::Quoted(b'\''),
                b'"' => state = ScanState::Quoted(b'"'),
                b'`' => state = ScanState::Quoted(b'`'),
                b'[' if !mysql => state = ScanState::Quoted(b']'),
                b'#' if mysql => state = ScanState::LineComment,
                b'-' if next == Some(b'-') => {
                    state = ScanState::LineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = ScanState::BlockComment;
                    i += 1;
                }
                _ => {}
            },
            ScanState::Quoted(close) => {
                if mysql && b == b'\\' && matches!(close, b'\'' | b'"') {
                    i += 1;
                } else if b == close {
                    if next == Some(close) {
                        i += 1;
                    } else {
                        state = ScanState::Code;
                    }
                }
            }
            ScanState::LineComment => {
                if b == b'\n' {
                    state = ScanState::Code;
                }
            }
            ScanState::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = ScanState::Code;
                    i += 1;
                }
            }
        }
        i += 1;
    }

    positions
}
