//! `?` → `$n` placeholder translation.
//!
//! The builders always emit neutral `?` placeholders. Before a statement goes
//! to PostgreSQL it is rewritten to positional `$1, $2, ...` form in two
//! explicit passes:
//!
//! 1. [`scan`] splits the SQL into text runs and placeholder tokens, skipping
//!    quoted literals, quoted identifiers, dollar-quoted bodies and comments.
//! 2. [`translate`] checks the placeholder count against the bindings and
//!    renders the tokens with a running counter.
//!
//! `??` outside literals is an escaped question mark and renders as a single
//! `?` (for the jsonb `?`, `?|` and `?&` operators).

use crate::error::{DbError, DbResult};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder,
    EscapedQuestion,
}

/// Rewrite `?` placeholders to `$n`, numbering left to right.
///
/// Statements without bindings are returned verbatim so raw DDL (which may
/// legitimately contain `?` operators) passes through untouched.
pub fn translate(sql: &str, binding_count: usize) -> DbResult<String> {
    render(sql, binding_count, &[])
}

/// Like [`translate`], appending `::type` to every placeholder whose entry in
/// `casts` is set.
pub(crate) fn translate_with_casts(sql: &str, casts: &[Option<String>]) -> DbResult<String> {
    render(sql, casts.len(), casts)
}

fn render(sql: &str, binding_count: usize, casts: &[Option<String>]) -> DbResult<String> {
    if binding_count == 0 && !sql.contains('?') {
        return Ok(sql.to_string());
    }

    let segments = scan(sql);
    let placeholders = segments
        .iter()
        .filter(|s| matches!(s, Segment::Placeholder))
        .count();

    if binding_count == 0 && placeholders > 0 {
        return Ok(sql.to_string());
    }

    if placeholders != binding_count {
        return Err(DbError::build(format!(
            "statement has {} placeholder(s) but {} binding(s) were supplied",
            placeholders, binding_count
        )));
    }

    let mut out = String::with_capacity(sql.len() + placeholders * 2);
    let mut position = 0usize;
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder => {
                let _ = write!(out, "${}", position + 1);
                if let Some(Some(cast)) = casts.get(position) {
                    let _ = write!(out, "::{}", cast);
                }
                position += 1;
            }
            Segment::EscapedQuestion => out.push('?'),
        }
    }
    Ok(out)
}

fn scan(sql: &str) -> Vec<Segment<'_>> {
    // Every byte we branch on is ASCII, so byte offsets are always char boundaries.
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => i = skip_quoted(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => i = skip_dollar_quoted(bytes, i),
            b'?' => {
                if start < i {
                    segments.push(Segment::Text(&sql[start..i]));
                }
                if bytes.get(i + 1) == Some(&b'?') {
                    segments.push(Segment::EscapedQuestion);
                    i += 2;
                } else {
                    segments.push(Segment::Placeholder);
                    i += 1;
                }
                start = i;
            }
            _ => i += 1,
        }
    }

    if start < sql.len() {
        segments.push(Segment::Text(&sql[start..]));
    }
    segments
}

/// Skip a `'...'` or `"..."` run. A doubled quote re-enters on the next byte.
fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    bytes[open + 1..]
        .iter()
        .position(|&b| b == quote)
        .map(|p| open + 1 + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + 2 + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map(|p| start + 2 + p + 2)
        .unwrap_or(bytes.len())
}

/// Skip a `$tag$ ... $tag$` body. `$1`-style parameters are not tags.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> usize {
    let mut end = start + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    let starts_with_digit = bytes.get(start + 1).is_some_and(|b| b.is_ascii_digit());
    if end >= bytes.len() || bytes[end] != b'$' || starts_with_digit {
        return start + 1;
    }

    let tag = &bytes[start..=end];
    let body = end + 1;
    bytes[body..]
        .windows(tag.len())
        .position(|w| w == tag)
        .map(|p| body + p + tag.len())
        .unwrap_or(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_in_order() {
        let sql = translate("SELECT * FROM t WHERE a=? AND b=?", 2).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a=$1 AND b=$2");
    }

    #[test]
    fn test_translate_many_placeholders() {
        let sql = "INSERT INTO t (a, b) VALUES (?, ?), (?, ?), (?, ?), (?, ?), (?, ?)";
        let out = translate(sql, 10).unwrap();
        assert!(out.ends_with("($9, $10)"));
        assert!(out.contains("($1, $2), ($3, $4)"));
    }

    #[test]
    fn test_translate_skips_string_literals() {
        let out = translate("SELECT '?', 'it''s ?' FROM t WHERE a = ?", 1).unwrap();
        assert_eq!(out, "SELECT '?', 'it''s ?' FROM t WHERE a = $1");
    }

    #[test]
    fn test_translate_skips_quoted_identifiers() {
        let out = translate(r#"SELECT "what?" FROM t WHERE a = ?"#, 1).unwrap();
        assert_eq!(out, r#"SELECT "what?" FROM t WHERE a = $1"#);
    }

    #[test]
    fn test_translate_skips_comments() {
        let out = translate("SELECT 1 -- why?\nFROM t /* really? */ WHERE a = ?", 1).unwrap();
        assert_eq!(out, "SELECT 1 -- why?\nFROM t /* really? */ WHERE a = $1");
    }

    #[test]
    fn test_translate_skips_dollar_quoted_body() {
        let sql = "SELECT $body$ is it? $body$, ? FROM t";
        assert_eq!(translate(sql, 1).unwrap(), "SELECT $body$ is it? $body$, $1 FROM t");
    }

    #[test]
    fn test_translate_escaped_question_mark() {
        let out = translate("SELECT * FROM t WHERE tags ?? ? AND id = ?", 2).unwrap();
        assert_eq!(out, "SELECT * FROM t WHERE tags ? $1 AND id = $2");
    }

    #[test]
    fn test_translate_count_mismatch_is_error() {
        let err = translate("SELECT * FROM t WHERE a = ? AND b = ?", 1).unwrap_err();
        assert!(matches!(err, DbError::Build { .. }));
        assert!(translate("SELECT * FROM t WHERE a = ?", 3).is_err());
    }

    #[test]
    fn test_translate_without_bindings_is_verbatim() {
        let sql = "SELECT data ? 'key' FROM docs";
        assert_eq!(translate(sql, 0).unwrap(), sql);
        assert_eq!(translate("SELECT 1", 0).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_translate_handles_utf8() {
        let out = translate("SELECT 'héllo?' AS grüß, ? AS x", 1).unwrap();
        assert_eq!(out, "SELECT 'héllo?' AS grüß, $1 AS x");
    }

    #[test]
    fn test_translate_with_casts_only_marks_chosen_positions() {
        let casts = vec![None, Some("UUID".to_string()), Some("DATE".to_string())];
        let out = translate_with_casts(
            "SELECT * FROM t WHERE a = ? AND b = ? AND c BETWEEN ? AND '?'",
            &casts,
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT * FROM t WHERE a = $1 AND b = $2::UUID AND c BETWEEN $3::DATE AND '?'"
        );
    }

    #[test]
    fn test_translate_with_casts_checks_count() {
        let casts = vec![Some("INT4".to_string())];
        assert!(translate_with_casts("SELECT ?, ?", &casts).is_err());
    }
}
