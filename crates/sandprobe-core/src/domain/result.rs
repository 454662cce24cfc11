//! Per-probe records, per-category results and suite-level statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::outcome::Outcome;
use super::raw::TransportFault;

/// What the harness keeps about one probe execution once its raw result
/// has been judged and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub name: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
    /// `None` when the probe never reached the target (skipped, prepare
    /// failure, interrupted before start).
    pub exit_code: Option<i32>,
    pub fault: Option<TransportFault>,
    /// Harness-side explanation (skip reason, panic message, "interrupted").
    pub note: Option<String>,
    /// Short excerpt of the captured output.
    pub snippet: String,
}

impl ProbeRecord {
    /// A record for a probe that never produced a raw result.
    pub fn without_result(name: impl Into<String>, outcome: Outcome, note: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome,
            elapsed: Duration::ZERO,
            exit_code: None,
            fault: None,
            note: Some(note.into()),
            snippet: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryResult {
    pub category: String,
    /// Declaration order, for both sequential and concurrent categories.
    pub entries: Vec<ProbeRecord>,
}

impl CategoryResult {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ProbeRecord) {
        self.entries.push(record);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Outcome counts over a whole run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub partial: usize,
    pub warned: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl SuiteStats {
    /// Count every record. `total` is always the sum of the six buckets.
    pub fn tally<'a>(categories: impl IntoIterator<Item = &'a CategoryResult>) -> Self {
        let mut stats = SuiteStats::default();
        for record in categories.into_iter().flat_map(|c| c.entries.iter()) {
            stats.record(record.outcome);
        }
        stats
    }

    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Partial => self.partial += 1,
            Outcome::Warn => self.warned += 1,
            Outcome::Skip => self.skipped += 1,
            Outcome::Error => self.errored += 1,
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Pass => self.passed,
            Outcome::Fail => self.failed,
            Outcome::Partial => self.partial,
            Outcome::Warn => self.warned,
            Outcome::Skip => self.skipped,
            Outcome::Error => self.errored,
        }
    }

    /// `passed / total` in `[0, 1]`, or `None` for an empty run.
    pub fn pass_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct SuiteResult {
    pub run_id: Uuid,
    pub suite_digest: String,
    pub categories: Vec<CategoryResult>,
    pub stats: SuiteStats,
    /// The run was cut short by an external interrupt.
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl SuiteResult {
    pub fn new(
        run_id: Uuid,
        suite_digest: impl Into<String>,
        categories: Vec<CategoryResult>,
        interrupted: bool,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let stats = SuiteStats::tally(&categories);
        Self {
            run_id,
            suite_digest: suite_digest.into(),
            categories,
            stats,
            interrupted,
            started_at,
            duration,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &ProbeRecord> {
        self.categories.iter().flat_map(|c| c.entries.iter())
    }

    /// Outcome recorded for `probe`, if it was executed.
    pub fn outcome_of(&self, probe: &str) -> Option<Outcome> {
        self.records().find(|r| r.name == probe).map(|r| r.outcome)
    }
}
