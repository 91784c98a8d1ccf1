//! SQL normalization into structural patterns.
//!
//! Literal values are replaced with `?` so that executions of "the same query"
//! with different parameters collapse to one pattern:
//!
//! ```text
//! SELECT * FROM users WHERE id = 42 AND name = 'bob'
//!   → SELECT * FROM users WHERE id = ? AND name = ?
//! ```
//!
//! This is pattern matching, not a SQL parser. Double-quoted identifiers are
//! left alone, and so are digits that belong to identifiers (`table2`, `col1`).

use regex::Regex;
use std::sync::LazyLock;
use xxhash_rust::xxh3::xxh3_128;

/// Single-quoted string literal, non-greedy up to the next quote.
static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'").unwrap());

/// `IN (...)` list, keyword matched case-insensitively.
static IN_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIN\s*\([^)]*\)").unwrap());

/// Normalize a literal SQL statement into its structural pattern.
///
/// Steps run in order, each on the output of the previous one:
/// 1. single-quoted literals → `?`
/// 2. numeric values (preceded by `= < > ! , (` or whitespace, followed by
///    `,` `)` whitespace or end of input) → `?`
/// 3. `IN (...)` → `IN (?)`
///
/// Never fails: text that does not match is returned unchanged.
pub fn normalize(sql: &str) -> String {
    let without_strings = STRING_LITERAL_RE.replace_all(sql, "?");
    let without_numbers = replace_numeric_values(&without_strings);
    IN_LIST_RE.replace_all(&without_numbers, "IN (?)").into_owned()
}

/// Stable fingerprint of a normalized pattern: xxh3-128 as 32 lowercase hex chars.
pub fn fingerprint(normalized_sql: &str) -> String {
    format!("{:032x}", xxh3_128(normalized_sql.as_bytes()))
}

fn is_value_prefix(c: u8) -> bool {
    matches!(c, b'=' | b'<' | b'>' | b'!' | b',' | b'(') || c.is_ascii_whitespace()
}

fn is_value_suffix(c: u8) -> bool {
    matches!(c, b',' | b')') || c.is_ascii_whitespace()
}

/// Replace numbers that stand as values, keeping their surrounding delimiters.
fn replace_numeric_values(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut result = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        // Optional fractional part
        if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }

        let prefix_ok = start > 0 && is_value_prefix(bytes[start - 1]);
        let suffix_ok = i == bytes.len() || is_value_suffix(bytes[i]);
        if prefix_ok && suffix_ok {
            result.push_str(&s[copied..start]);
            result.push('?');
            copied = i;
        }
    }

    result.push_str(&s[copied..]);
    result
}
