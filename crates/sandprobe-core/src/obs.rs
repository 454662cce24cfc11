//! Structured lifecycle events for a harness run.
//!
//! Every event carries an `event` field (`suite.started`, `probe.finished`,
//! ...) so log pipelines can filter on it. Events are emitted at `info!`
//! unless noted.

use tracing::info;

use crate::domain::{Outcome, SuiteStats};
use crate::evaluator::Verdict;

/// RAII guard that enters a run-scoped span.
///
/// The guard is not `Send`; inside async code use [`run_span`] with
/// `tracing::Instrument` instead.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Span tagging everything inside it with `run_id`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("sandprobe.run", run_id = %run_id)
}

pub fn emit_suite_started(run_id: &str, categories: usize, probes: usize, digest: &str) {
    info!(
        event = "suite.started",
        run_id = %run_id,
        categories = categories,
        probes = probes,
        suite_digest = %digest,
    );
}

pub fn emit_category_started(category: &str, probes: usize, concurrent: bool) {
    info!(
        event = "category.started",
        category = %category,
        probes = probes,
        concurrent = concurrent,
    );
}

pub fn emit_probe_finished(category: &str, probe: &str, outcome: Outcome, elapsed_ms: u64) {
    info!(
        event = "probe.finished",
        category = %category,
        probe = %probe,
        outcome = %outcome,
        elapsed_ms = elapsed_ms,
    );
}

pub fn emit_category_finished(category: &str, passed: usize, total: usize) {
    info!(
        event = "category.finished",
        category = %category,
        passed = passed,
        total = total,
    );
}

pub fn emit_suite_finished(run_id: &str, stats: &SuiteStats, duration_ms: u64) {
    info!(
        event = "suite.finished",
        run_id = %run_id,
        total = stats.total,
        passed = stats.passed,
        failed = stats.failed,
        partial = stats.partial,
        warned = stats.warned,
        skipped = stats.skipped,
        errored = stats.errored,
        duration_ms = duration_ms,
    );
}

pub fn emit_verdict_computed(run_id: &str, verdict: &Verdict) {
    info!(
        event = "verdict.computed",
        run_id = %run_id,
        readiness = %verdict.readiness,
        severity = %verdict.severity,
        pass_rate = verdict.pass_rate,
        critical_failures = verdict.critical_failures.len(),
    );
}

/// Warn level: the run was cut short.
pub fn emit_suite_interrupted(run_id: &str, completed: usize, remaining: usize) {
    tracing::warn!(
        event = "suite.interrupted",
        run_id = %run_id,
        completed = completed,
        remaining = remaining,
    );
}
