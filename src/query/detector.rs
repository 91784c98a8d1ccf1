//! N+1 query detection
//!
//! Scans a [`QueryLedger`] once and reports every structural pattern executed
//! at least `threshold` times. Each finding carries span evidence: a compact
//! excerpt of the query sequence around the repetition.
//!
//! ```text
//! previous  #4  SELECT * FROM posts WHERE published = 1
//! repeating #5  SELECT * FROM users WHERE id = 1
//! repeating_collapsed (2 more)
//! repeating #8  SELECT * FROM users WHERE id = 4
//! next      #9  SELECT count(*) FROM comments
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::ledger::{QueryLedger, QueryRecord};

/// Repetitions at or above this count qualify as N+1.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Context records kept before the first offender.
pub const CONTEXT_BEFORE: usize = 2;

/// Context records kept after the last offender.
pub const CONTEXT_AFTER: usize = 2;

/// One entry of the span evidence sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Span {
    Previous {
        index: u64,
        sql: String,
        duration_ms: f64,
    },
    Repeating {
        index: u64,
        sql: String,
        duration_ms: f64,
    },
    RepeatingCollapsed {
        collapsed_count: usize,
    },
    Next {
        index: u64,
        sql: String,
        duration_ms: f64,
    },
}

impl Span {
    fn previous(record: &QueryRecord) -> Self {
        Self::Previous {
            index: record.sequence_index,
            sql: record.sql.clone(),
            duration_ms: record.duration_ms,
        }
    }

    fn repeating(record: &QueryRecord) -> Self {
        Self::Repeating {
            index: record.sequence_index,
            sql: record.sql.clone(),
            duration_ms: record.duration_ms,
        }
    }

    fn next(record: &QueryRecord) -> Self {
        Self::Next {
            index: record.sequence_index,
            sql: record.sql.clone(),
            duration_ms: record.duration_ms,
        }
    }

    /// Wire name of the span type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Previous { .. } => "previous",
            Self::Repeating { .. } => "repeating",
            Self::RepeatingCollapsed { .. } => "repeating_collapsed",
            Self::Next { .. } => "next",
        }
    }
}

/// Summary of the repeated pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offender {
    /// Normalized pattern shared by every occurrence
    pub sql: String,
    pub count: usize,
    /// Sum of all occurrence durations, rounded to 2 decimals
    pub total_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvidence {
    pub offender: Offender,
    pub spans: Vec<Span>,
}

/// One N+1 finding, built from the first occurrence of the pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub sql: String,
    #[serde(default)]
    pub bindings: Vec<serde_json::Value>,
    pub duration_ms: f64,
    pub is_n1: bool,
    pub duplicate_count: usize,
    pub span_evidence: SpanEvidence,
    pub caller_file: Option<String>,
    pub caller_line: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Streaming-friendly N+1 detector
#[derive(Debug, Clone, Copy)]
pub struct N1Detector {
    threshold: usize,
}

impl Default for N1Detector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl N1Detector {
    /// # Panics
    ///
    /// Panics if `threshold` is 0. Configuration is validated before it gets here.
    pub fn new(threshold: usize) -> Self {
        assert!(threshold >= 1, "N+1 threshold must be at least 1, got {threshold}");
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Report every pattern repeated at least `threshold` times.
    ///
    /// Findings are ordered by the first appearance of their pattern in the
    /// ledger. Calling this twice on the same ledger yields the same result.
    pub fn detect(&self, ledger: &QueryLedger) -> Vec<DiagnosticRecord> {
        let queries = ledger.queries();
        if queries.is_empty() {
            return Vec::new();
        }

        let mut pattern_counts: HashMap<&str, usize> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for query in queries {
            let count = pattern_counts.entry(query.fingerprint.as_str()).or_insert(0);
            if *count == 0 {
                first_seen.push(query.fingerprint.as_str());
            }
            *count += 1;
        }

        let mut ordered: Vec<&QueryRecord> = queries.iter().collect();
        ordered.sort_by_key(|q| q.sequence_index);

        first_seen
            .into_iter()
            .filter(|fp| pattern_counts[fp] >= self.threshold)
            .filter_map(|fp| build_record(&ordered, fp, pattern_counts[fp]))
            .collect()
    }
}

fn build_record(ordered: &[&QueryRecord], fingerprint: &str, count: usize) -> Option<DiagnosticRecord> {
    let occurrences: Vec<&QueryRecord> = ordered
        .iter()
        .copied()
        .filter(|q| q.fingerprint == fingerprint)
        .collect();

    // `ordered` is sorted by index, so the ends are first and last
    let first = *occurrences.first()?;
    let last = *occurrences.last()?;

    let total_duration_ms = round2(occurrences.iter().map(|q| q.duration_ms).sum());

    let before: Vec<&QueryRecord> = ordered
        .iter()
        .copied()
        .filter(|q| q.sequence_index < first.sequence_index)
        .collect();

    let mut spans: Vec<Span> = before
        .iter()
        .skip(before.len().saturating_sub(CONTEXT_BEFORE))
        .map(|q| Span::previous(q))
        .collect();

    spans.push(Span::repeating(first));
    if count > 2 {
        spans.push(Span::RepeatingCollapsed {
            collapsed_count: count - 2,
        });
    }
    if last.sequence_index != first.sequence_index {
        spans.push(Span::repeating(last));
    }

    spans.extend(
        ordered
            .iter()
            .filter(|q| q.sequence_index > last.sequence_index)
            .take(CONTEXT_AFTER)
            .map(|q| Span::next(q)),
    );

    debug!(
        fingerprint = %fingerprint,
        count = count,
        total_duration_ms = total_duration_ms,
        "N+1 pattern detected"
    );

    Some(DiagnosticRecord {
        sql: first.sql.clone(),
        bindings: first.bindings.clone(),
        duration_ms: first.duration_ms,
        is_n1: true,
        duplicate_count: count,
        span_evidence: SpanEvidence {
            offender: Offender {
                sql: first.normalized_sql.clone(),
                count,
                total_duration_ms,
            },
            spans,
        },
        caller_file: first.caller_file.clone(),
        caller_line: first.caller_line,
        occurred_at: first.occurred_at,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
