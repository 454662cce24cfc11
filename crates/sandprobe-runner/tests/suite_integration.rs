//! Orchestrator, evaluator and report wired together, against the scripted
//! fake and (on unix) against real local processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sandprobe_core::{
    evaluate, Category, CommandSpec, FaultKind, HarnessConfig, Outcome, Placeholders, Predicate,
    Probe, Readiness, ReadinessPolicy, Report, RuleJudge, Severity, Suite, TransportFault,
};
use sandprobe_runner::catalog::{self, CONCURRENCY};
use sandprobe_runner::fakes::{Scripted, ScriptedInvoker};
use sandprobe_runner::{assemble_suite, critical_probes, SuiteRunner};

fn echo_probe(category: &str, name: &str) -> Probe {
    Probe::new(
        category,
        name,
        CommandSpec::new("echo").arg(format!("marker:{name}")),
        RuleJudge::otherwise(Outcome::Fail)
            .when(Predicate::stdout_contains(format!("marker:{name}")), Outcome::Pass),
    )
}

fn ten_probe_suite() -> Suite {
    let mut boundary = Category::sequential("Security Boundary");
    for i in 0..5 {
        boundary = boundary.with_probe(echo_probe("Security Boundary", &format!("boundary-{i}")));
    }
    let mut limits = Category::sequential("Resource Limits");
    for i in 0..4 {
        limits = limits.with_probe(echo_probe("Resource Limits", &format!("limit-{i}")));
    }
    limits = limits.with_probe(echo_probe("Resource Limits", "Execution Timeout (30s)"));
    Suite::new(vec![boundary, limits])
}

/// Answers every probe with its own marker. Rules already on `base` take
/// precedence.
fn faithful_service(base: ScriptedInvoker, suite: &Suite) -> ScriptedInvoker {
    suite.probes().fold(base, |fake, p| {
        let marker = format!("marker:{}", p.name);
        fake.on(marker.clone(), Scripted::ok(marker))
    })
}

#[tokio::test]
async fn healthy_service_is_production_ready() {
    let suite = ten_probe_suite();
    let fake = Arc::new(faithful_service(ScriptedInvoker::new(), &suite));
    let critical = vec!["Execution Timeout (30s)".to_string()];
    let result = SuiteRunner::new(fake).run(&suite, &critical).await.unwrap();

    let policy = ReadinessPolicy::default().with_critical("Execution Timeout (30s)");
    let verdict = evaluate(&result, &policy).unwrap();
    assert_eq!(result.stats.passed, 10);
    assert_eq!(verdict.readiness, Readiness::Yes);
    assert_eq!(verdict.severity, Severity::Low);

    let report = serde_json::to_value(Report::build(&result, &verdict, Utc::now())).unwrap();
    assert_eq!(report["production_ready"], "YES");
    assert_eq!(report["results"]["Security Boundary"][0][0], "boundary-0");
    assert_eq!(report["critical_failures"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn one_critical_failure_blocks_full_readiness() {
    let suite = ten_probe_suite();
    // The timeout probe's process ran to completion without its marker.
    let fake = faithful_service(
        ScriptedInvoker::new().on("Execution Timeout", Scripted::ok("This should not appear")),
        &suite,
    );
    let critical = vec!["Execution Timeout (30s)".to_string()];
    let result = SuiteRunner::new(Arc::new(fake))
        .run(&suite, &critical)
        .await
        .unwrap();

    let policy = ReadinessPolicy::default().with_critical("Execution Timeout (30s)");
    let verdict = evaluate(&result, &policy).unwrap();
    assert_eq!(result.outcome_of("Execution Timeout (30s)"), Some(Outcome::Fail));
    assert_eq!(verdict.critical_failures, vec!["Execution Timeout (30s)"]);
    assert_eq!(verdict.severity, Severity::High);
    assert_ne!(verdict.readiness, Readiness::Yes);
}

#[tokio::test]
async fn unreachable_target_yields_errors_not_failures() {
    let suite = ten_probe_suite();
    let fake = ScriptedInvoker::new().with_default(Scripted::fault(TransportFault::Unreachable {
        reason: "connection refused".into(),
    }));
    let result = SuiteRunner::new(Arc::new(fake)).run(&suite, &[]).await.unwrap();
    assert_eq!(result.stats.errored, 10);
    assert_eq!(result.stats.failed, 0);

    let verdict = evaluate(&result, &ReadinessPolicy::default()).unwrap();
    assert_eq!(verdict.readiness, Readiness::No);
}

#[tokio::test]
async fn tolerated_timeout_is_judged_on_elapsed_time() {
    let probe = Probe::new(
        "Resource Limits",
        "Execution Timeout (30s)",
        CommandSpec::new("sleep").arg("35"),
        RuleJudge::otherwise(Outcome::Warn)
            .when(Predicate::elapsed_under(Duration::from_secs(33)), Outcome::Pass)
            .tolerating(FaultKind::Timeout),
    );
    let suite = Suite::new(vec![Category::sequential("Resource Limits").with_probe(probe)]);
    let fake = ScriptedInvoker::new().on(
        "sleep",
        Scripted::fault(TransportFault::Timeout { limit_ms: 30_000 })
            .with_reported_elapsed(Duration::from_millis(30_200)),
    );
    let result = SuiteRunner::new(Arc::new(fake)).run(&suite, &[]).await.unwrap();
    let record = &result.categories[0].entries[0];
    assert_eq!(record.outcome, Outcome::Pass);
    assert_eq!(record.exit_code, Some(-1));
}

#[tokio::test]
async fn builtin_concurrency_category_attributes_each_response() {
    let mut config = HarnessConfig::default();
    config.suite.categories = vec![CONCURRENCY.to_string()];
    config.suite.concurrency_requests = 5;
    config.suite.concurrency_workers = 3;
    let ph = Placeholders::new(std::env::temp_dir(), "itest");
    let suite = assemble_suite(&config, &ph);
    assert_eq!(suite.probe_count(), 5);

    // Later requests answer first.
    let fake = (0..5).fold(ScriptedInvoker::new(), |fake, i| {
        fake.on(
            format!("Request {i}"),
            Scripted::ok(format!("Request {i}\n"))
                .with_latency(Duration::from_millis((5 - i) as u64 * 30)),
        )
    });
    let fake = Arc::new(fake);
    let critical = critical_probes(&config, &suite);
    assert!(critical.is_empty());
    let result = SuiteRunner::new(fake.clone()).run(&suite, &critical).await.unwrap();

    let entries = &result.categories[0].entries;
    let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    let expected: Vec<String> = (0..5).map(|i| format!("Concurrent Request {i}")).collect();
    assert_eq!(names, expected);
    assert!(entries.iter().all(|e| e.outcome == Outcome::Pass));
    assert!(fake.max_in_flight() <= 3);
}

#[tokio::test]
async fn watchdog_exit_and_redacted_errors_pass() {
    let mut config = HarnessConfig::default();
    config.suite.categories = vec![
        catalog::PROCESS_LIFECYCLE.to_string(),
        catalog::ERROR_HANDLING.to_string(),
    ];
    let ph = Placeholders::new(std::env::temp_dir(), "wdog");
    let suite = assemble_suite(&config, &ph);
    let watchdog = config.limits.watchdog_exit_code;

    let fake = Arc::new(
        ScriptedInvoker::new()
            .on(
                "watchdog_wdog",
                Scripted::ok("spinning\n").with_exit_code(watchdog),
            )
            .on(
                "error_test_wdog",
                Scripted::ok("")
                    .with_stderr(format!("access denied: {}", catalog::REDACTION_MARKER))
                    .with_exit_code(1),
            ),
    );
    let result = SuiteRunner::new(fake.clone()).run(&suite, &[]).await.unwrap();

    let record = |name: &str| result.records().find(|r| r.name == name).unwrap();
    assert_eq!(record("Process Watchdog").outcome, Outcome::Pass);
    assert_eq!(record("Process Watchdog").exit_code, Some(watchdog));
    assert_eq!(record("Error Sanitization").outcome, Outcome::Pass);

    // Every probe reached the transport once, in declaration order.
    let lines: Vec<String> = fake.calls().iter().map(|c| c.display_line()).collect();
    assert_eq!(lines.len(), suite.probe_count());
    let watchdog_at = lines.iter().position(|l| l.contains("watchdog_wdog")).unwrap();
    let sanitize_at = lines.iter().position(|l| l.contains("error_test_wdog")).unwrap();
    assert!(watchdog_at < sanitize_at);
}

#[tokio::test]
async fn duplicate_probe_names_are_rejected_before_execution() {
    let suite = Suite::new(vec![Category::sequential("A")
        .with_probe(echo_probe("A", "same"))
        .with_probe(echo_probe("A", "same"))]);
    let fake = Arc::new(ScriptedInvoker::new());
    let err = SuiteRunner::new(fake.clone()).run(&suite, &[]).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(fake.call_count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn local_processes_satisfy_basic_probes() {
    use sandprobe_core::Dialect;
    use sandprobe_runner::ProcessTransport;

    let sandbox = tempfile::tempdir().unwrap();
    let sandbox_path = sandbox.path().canonicalize().unwrap();
    let mut config = HarnessConfig::default();
    config.suite.dialect = Some(Dialect::Posix);
    config.suite.concurrency_requests = 3;
    let ph = Placeholders::new(&sandbox_path, "local1");
    let builtin = catalog::builtin_suite(&config, &ph);

    let pick = |name: &str| builtin.probes().find(|p| p.name == name).cloned().unwrap();
    let mut suite = Suite::new(vec![
        Category::sequential("Security Boundary").with_probe(pick("Working Directory Enforcement")),
        Category::sequential("Output Capture").with_probe(pick("Basic Output Capture")),
        Category::sequential("Process Lifecycle").with_probe(pick("Normal Termination")),
        Category::sequential("Integration").with_probe(pick("Service Availability")),
    ]);
    suite.categories.extend(
        builtin
            .categories
            .iter()
            .filter(|c| c.name == CONCURRENCY)
            .cloned(),
    );

    let transport = ProcessTransport::new().with_default_dir(&sandbox_path);
    let result = SuiteRunner::new(Arc::new(transport))
        .run(&suite, &[])
        .await
        .unwrap();

    for record in result.records() {
        assert_eq!(record.outcome, Outcome::Pass, "{}: {:?}", record.name, record.snippet);
    }
    assert_eq!(result.stats.total, 7);

    // Fixtures and the marker file are gone.
    let leftovers: Vec<_> = std::fs::read_dir(&sandbox_path).unwrap().collect();
    assert!(leftovers.is_empty(), "sandbox not cleaned: {leftovers:?}");
}
