//! End-to-end checks over the public core API: judge, evaluate, report.

use chrono::{DateTime, Utc};
use sandprobe_core::{
    evaluate, CategoryResult, FaultKind, Judge, Outcome, Predicate, ProbeRecord, RawResult,
    Readiness, ReadinessPolicy, Report, RuleJudge, Severity, SuiteResult, TransportFault,
};
use std::time::Duration;
use uuid::Uuid;

fn enforcement_judge() -> RuleJudge {
    RuleJudge::otherwise(Outcome::Warn)
        .when(
            Predicate::elapsed_under(Duration::from_secs(33)),
            Outcome::Pass,
        )
        .tolerating(FaultKind::Timeout)
}

fn record(name: &str, outcome: Outcome) -> ProbeRecord {
    ProbeRecord {
        name: name.to_string(),
        outcome,
        elapsed: Duration::from_millis(20),
        exit_code: Some(0),
        fault: None,
        note: None,
        snippet: String::new(),
    }
}

fn single_category(records: Vec<ProbeRecord>) -> SuiteResult {
    let mut cat = CategoryResult::new("Resource Limits");
    for r in records {
        cat.push(r);
    }
    SuiteResult::new(
        Uuid::new_v4(),
        "digest",
        vec![cat],
        false,
        Utc::now(),
        Duration::from_secs(5),
    )
}

#[test]
fn timeout_enforced_before_bound_passes() {
    let judge = enforcement_judge();
    let raw = RawResult::faulted(
        TransportFault::Timeout { limit_ms: 35_000 },
        Duration::from_millis(30_200),
    );
    assert!(judge.tolerates(raw.fault.as_ref().unwrap()));
    assert_eq!(judge.judge(&raw), Outcome::Pass);
}

#[test]
fn timeout_at_harness_bound_warns() {
    let judge = enforcement_judge();
    let raw = RawResult::faulted(
        TransportFault::Timeout { limit_ms: 35_000 },
        Duration::from_secs(35),
    );
    assert_eq!(raw.exit_code, -1);
    assert_eq!(judge.judge(&raw), Outcome::Warn);
}

#[test]
fn timeout_on_success_expecting_judge_is_not_tolerated() {
    let judge = RuleJudge::otherwise(Outcome::Fail)
        .when(Predicate::stdout_contains("Hello"), Outcome::Pass);
    let fault = TransportFault::Timeout { limit_ms: 35_000 };
    // Untolerated faults never reach the judge; the executor records ERROR.
    assert!(!judge.tolerates(&fault));
}

#[test]
fn twenty_passes_is_ready() {
    let records = (0..20).map(|i| record(&format!("p{i}"), Outcome::Pass)).collect();
    let result = single_category(records);
    let verdict = evaluate(&result, &ReadinessPolicy::default()).unwrap();
    assert_eq!(verdict.readiness, Readiness::Yes);
    assert_eq!(verdict.severity, Severity::Low);

    let ts: DateTime<Utc> = Utc::now();
    let report = serde_json::to_value(Report::build(&result, &verdict, ts)).unwrap();
    assert_eq!(report["statistics"]["pass_rate"], 100.0);
    assert_eq!(report["statistics"]["total"], 20);
    assert_eq!(report["production_ready"], "YES");
    assert_eq!(report["severity"], "LOW");
}

#[test]
fn critical_failure_forces_high_severity_at_any_rate() {
    for passes in [1usize, 9, 50] {
        let mut records: Vec<ProbeRecord> = (0..passes)
            .map(|i| record(&format!("p{i}"), Outcome::Pass))
            .collect();
        records.push(record("Execution Timeout (30s)", Outcome::Fail));
        let result = single_category(records);
        let policy = ReadinessPolicy::default().with_critical("Execution Timeout (30s)");
        let verdict = evaluate(&result, &policy).unwrap();
        assert_eq!(verdict.severity, Severity::High);
        assert_ne!(verdict.readiness, Readiness::Yes);
        assert!((0.0..=1.0).contains(&verdict.pass_rate));
    }
}

#[test]
fn identical_results_give_identical_verdicts() {
    let records = vec![
        record("a", Outcome::Pass),
        record("b", Outcome::Warn),
        record("c", Outcome::Error),
    ];
    let result = single_category(records);
    let policy = ReadinessPolicy::default();
    assert_eq!(
        evaluate(&result, &policy).unwrap(),
        evaluate(&result, &policy).unwrap()
    );
}
