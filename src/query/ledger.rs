//! Per-unit-of-work query ledger
//!
//! An ordered, append-only record of every statement executed during one HTTP
//! request, CLI command or queue job. Each record carries a 1-based sequence
//! index that is strictly increasing until the next [`QueryLedger::clear`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::caller::Caller;
use super::normalizer::{fingerprint, normalize};
use super::QueryEvent;

/// One executed SQL statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    pub normalized_sql: String,
    pub fingerprint: String,
    #[serde(default)]
    pub bindings: Vec<serde_json::Value>,
    pub duration_ms: f64,
    pub caller_file: Option<String>,
    pub caller_line: Option<u32>,
    pub sequence_index: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Occurrence count per fingerprint
pub type PatternCounts = HashMap<String, usize>;

/// Ordered sequence of executed queries plus their pattern counts.
///
/// Owned by exactly one unit of work. Never share one ledger between
/// concurrent requests or jobs; create one per unit instead.
#[derive(Debug, Default)]
pub struct QueryLedger {
    records: Vec<QueryRecord>,
    pattern_counts: PatternCounts,
    sequence: u64,
}

impl QueryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement. Never fails; an unresolved caller is stored as `None`.
    pub fn log(&mut self, event: QueryEvent, caller: Caller) {
        self.sequence += 1;

        let normalized_sql = normalize(&event.sql);
        let fingerprint = fingerprint(&normalized_sql);

        *self.pattern_counts.entry(fingerprint.clone()).or_insert(0) += 1;

        self.records.push(QueryRecord {
            sql: event.sql,
            normalized_sql,
            fingerprint,
            bindings: event.bindings,
            duration_ms: event.duration_ms,
            caller_file: caller.file,
            caller_line: caller.line,
            sequence_index: self.sequence,
            occurred_at: Utc::now(),
        });
    }

    /// Drop every record and reset the sequence counter to 0.
    pub fn clear(&mut self) {
        self.records.clear();
        self.pattern_counts.clear();
        self.sequence = 0;
    }

    /// Records in insertion order
    pub fn queries(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn pattern_counts(&self) -> &PatternCounts {
        &self.pattern_counts
    }

    pub fn count_of(&self, fingerprint: &str) -> usize {
        self.pattern_counts.get(fingerprint).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the whole ledger content.
    ///
    /// Records keep their relative order and are renumbered from 1 so the
    /// sequence invariant holds; pattern counts are rebuilt from scratch.
    pub fn replace_all(&mut self, records: Vec<QueryRecord>) {
        self.clear();
        for mut record in records {
            self.sequence += 1;
            record.sequence_index = self.sequence;
            *self
                .pattern_counts
                .entry(record.fingerprint.clone())
                .or_insert(0) += 1;
            self.records.push(record);
        }
    }
}
