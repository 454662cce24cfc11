//! Report assembly, JSON sink and console summary.
//!
//! The top-level field names and the outcome vocabulary are consumed by
//! dashboards and CI gating; renaming any of them is a breaking change.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::path::Path;

use crate::domain::{HarnessError, Outcome, Result, SuiteResult, TransportFault};
use crate::evaluator::{Readiness, Severity, Thresholds, Verdict};

/// Longest output excerpt kept per probe.
pub const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportStatistics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub partial: usize,
    pub warnings: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Percentage, 0 to 100.
    pub pass_rate: f64,
}

/// `{category: [[probe, outcome], ...]}` in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOutcomes(pub Vec<(String, Vec<(String, Outcome)>)>);

impl Serialize for CategoryOutcomes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (category, entries) in &self.0 {
            map.serialize_entry(category, entries)?;
        }
        map.end()
    }
}

/// Per-probe detail beyond the bare outcome.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeDetail {
    pub category: String,
    pub probe: String,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<TransportFault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

/// The full run report.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    pub timestamp: String,
    pub run_id: String,
    pub suite_digest: String,
    pub interrupted: bool,
    pub statistics: ReportStatistics,
    pub results: CategoryOutcomes,
    pub critical_failures: Vec<String>,
    pub production_ready: Readiness,
    pub justification: String,
    pub severity: Severity,
    pub thresholds: Thresholds,
    pub details: Vec<ProbeDetail>,
}

impl Report {
    /// Pure assembly: ordering follows the suite result exactly.
    pub fn build(result: &SuiteResult, verdict: &Verdict, timestamp: DateTime<Utc>) -> Self {
        let stats = &result.stats;
        let statistics = ReportStatistics {
            total: stats.total,
            passed: stats.passed,
            failed: stats.failed,
            partial: stats.partial,
            warnings: stats.warned,
            skipped: stats.skipped,
            errored: stats.errored,
            pass_rate: round2(verdict.pass_rate * 100.0),
        };

        let results = CategoryOutcomes(
            result
                .categories
                .iter()
                .map(|c| {
                    (
                        c.category.clone(),
                        c.entries
                            .iter()
                            .map(|e| (e.name.clone(), e.outcome))
                            .collect(),
                    )
                })
                .collect(),
        );

        let details = result
            .categories
            .iter()
            .flat_map(|c| {
                c.entries.iter().map(move |e| ProbeDetail {
                    category: c.category.clone(),
                    probe: e.name.clone(),
                    outcome: e.outcome,
                    elapsed_ms: e.elapsed.as_millis() as u64,
                    exit_code: e.exit_code,
                    fault: e.fault.clone(),
                    note: e.note.clone(),
                    snippet: e.snippet.clone(),
                })
            })
            .collect();

        Self {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            run_id: result.run_id.to_string(),
            suite_digest: result.suite_digest.clone(),
            interrupted: result.interrupted,
            statistics,
            results,
            critical_failures: verdict.critical_failures.clone(),
            production_ready: verdict.readiness,
            justification: verdict.justification.clone(),
            severity: verdict.severity,
            thresholds: verdict.thresholds,
            details,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Written instead of a [`Report`] when the harness itself is misconfigured.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorReport {
    pub timestamp: String,
    pub production_ready: Readiness,
    pub error: String,
}

impl ErrorReport {
    pub fn new(error: &dyn std::fmt::Display, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            production_ready: Readiness::No,
            error: error.to_string(),
        }
    }
}

/// Write any report as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HarnessError::ReportSink(format!("create {}: {e}", parent.display())))?;
    }
    std::fs::write(path, content)
        .map_err(|e| HarnessError::ReportSink(format!("write {}: {e}", path.display())))?;
    Ok(())
}

/// Human-readable summary for the terminal.
pub fn render_summary(report: &Report) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);
    out.push_str(&format!("{rule}\nSECURITY VALIDATION SUMMARY\n{rule}\n"));

    for (category, entries) in &report.results.0 {
        let passed = entries.iter().filter(|(_, o)| *o == Outcome::Pass).count();
        out.push_str(&format!("\n{category}: {passed}/{} passed\n", entries.len()));
        for (probe, outcome) in entries {
            out.push_str(&format!("  {} {probe}: {outcome}\n", outcome.symbol()));
        }
    }

    let s = &report.statistics;
    out.push_str(&format!(
        "\nTotal: {}  Passed: {}  Failed: {}  Partial: {}  Warnings: {}  Skipped: {}  Errors: {}\n",
        s.total, s.passed, s.failed, s.partial, s.warnings, s.skipped, s.errored
    ));
    out.push_str(&format!("Pass Rate: {:.1}%\n", s.pass_rate));

    if report.critical_failures.is_empty() {
        out.push_str("\nNO CRITICAL ISSUES FOUND\n");
    } else {
        out.push_str("\nCRITICAL ISSUES FOUND:\n");
        for name in &report.critical_failures {
            out.push_str(&format!("  - {name}\n"));
        }
    }
    if report.interrupted {
        out.push_str("\nRun interrupted: results are partial.\n");
    }

    out.push_str(&format!(
        "\nProduction Ready: {}\nSeverity: {}\nJustification: {}\n",
        report.production_ready, report.severity, report.justification
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CategoryResult, ProbeRecord};
    use crate::evaluator::{evaluate, ReadinessPolicy};
    use std::time::Duration;
    use uuid::Uuid;

    fn record(name: &str, outcome: Outcome) -> ProbeRecord {
        ProbeRecord {
            name: name.into(),
            outcome,
            elapsed: Duration::from_millis(1500),
            exit_code: Some(0),
            fault: None,
            note: None,
            snippet: "ok".into(),
        }
    }

    fn fixture() -> (SuiteResult, Verdict) {
        let mut zeta = CategoryResult::new("Zeta Boundary");
        zeta.push(record("Low Integrity Level", Outcome::Pass));
        zeta.push(record("Parent directory traversal", Outcome::Fail));
        let mut alpha = CategoryResult::new("Alpha Limits");
        alpha.push(record("Memory Limit (100MB)", Outcome::Warn));
        alpha.push(ProbeRecord::without_result(
            "Skipped one",
            Outcome::Skip,
            "not applicable",
        ));
        let result = SuiteResult::new(
            Uuid::nil(),
            "abc123",
            vec![zeta, alpha],
            false,
            Utc::now(),
            Duration::from_secs(3),
        );
        let verdict = evaluate(
            &result,
            &ReadinessPolicy::default().with_critical("Low Integrity Level"),
        )
        .unwrap();
        (result, verdict)
    }

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_report_has_stable_keys() {
        let (result, verdict) = fixture();
        let report = Report::build(&result, &verdict, ts());
        let raw = serde_json::to_value(&report).unwrap();
        let obj = raw.as_object().unwrap();
        for key in [
            "timestamp",
            "statistics",
            "results",
            "critical_failures",
            "production_ready",
            "justification",
            "severity",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        for key in [
            "total", "passed", "failed", "partial", "warnings", "skipped", "errored", "pass_rate",
        ] {
            assert!(raw["statistics"].get(key).is_some(), "missing statistics.{key}");
        }
        assert_eq!(raw["timestamp"], "2026-01-01T00:00:00Z");
        assert_eq!(raw["statistics"]["pass_rate"], 25.0);
        assert_eq!(raw["production_ready"], "NO");
        assert_eq!(raw["results"]["Zeta Boundary"][1][0], "Parent directory traversal");
        assert_eq!(raw["results"]["Zeta Boundary"][1][1], "FAIL");
        assert_eq!(raw["details"][0]["elapsed_ms"], 1500);
    }

    #[test]
    fn test_results_keep_declaration_order() {
        let (result, verdict) = fixture();
        let text = serde_json::to_string(&Report::build(&result, &verdict, ts())).unwrap();
        let zeta = text.find("\"Zeta Boundary\"").unwrap();
        let alpha = text.find("\"Alpha Limits\"").unwrap();
        assert!(zeta < alpha, "categories must not be re-sorted");
    }

    #[test]
    fn test_build_is_deterministic() {
        let (result, verdict) = fixture();
        let a = serde_json::to_string(&Report::build(&result, &verdict, ts())).unwrap();
        let b = serde_json::to_string(&Report::build(&result, &verdict, ts())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_write_json_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let (result, verdict) = fixture();
        write_json(&path, &Report::build(&result, &verdict, ts())).unwrap();
        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["suite_digest"], "abc123");
    }

    #[test]
    fn test_write_json_reports_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go.
        let err = write_json(dir.path(), &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, HarnessError::ReportSink(_)));
    }

    #[test]
    fn test_error_report_shape() {
        let err = HarnessError::config("duplicate probe name \"x\"");
        let raw = serde_json::to_value(ErrorReport::new(&err, ts())).unwrap();
        assert_eq!(raw["production_ready"], "NO");
        assert!(raw["error"].as_str().unwrap().contains("duplicate"));
    }

    #[test]
    fn test_render_summary_lists_symbols() {
        let (result, verdict) = fixture();
        let text = render_summary(&Report::build(&result, &verdict, ts()));
        assert!(text.contains("[+] Low Integrity Level: PASS"));
        assert!(text.contains("[-] Parent directory traversal: FAIL"));
        assert!(text.contains("[.] Skipped one: SKIP"));
        assert!(text.contains("Pass Rate: 25.0%"));
        assert!(text.contains("NO CRITICAL ISSUES FOUND"));
    }
}
