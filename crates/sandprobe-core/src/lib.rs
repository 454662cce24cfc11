//! Sandprobe core library.
//!
//! Domain model, judges, readiness evaluation, reporting and configuration
//! for the Sandprobe security validation harness. Execution lives in
//! `sandprobe-runner`.

pub mod config;
pub mod domain;
pub mod evaluator;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod telemetry;

pub use config::{
    Dialect, HarnessConfig, LimitsConfig, ReadinessConfig, ReportConfig, SandboxConfig,
    SuiteConfig, TransportConfig, TransportKind,
};

pub use domain::{
    Category, CategoryResult, CommandSpec, FaultKind, Fixture, FixtureDef, FnJudge, HarnessError,
    Judge, Outcome, Pattern, Placeholders, Predicate, ProbeDef, Probe, ProbeRecord, RawResult, Result,
    Rule, RuleJudge, Scheduling, Stream, Suite, SuiteResult, SuiteStats, TransportFault,
    DEFAULT_PROBE_TIMEOUT, EXIT_CODE_UNAVAILABLE,
};

pub use evaluator::{
    evaluate, readiness_for, Posture, Readiness, ReadinessPolicy, Severity, Thresholds, Verdict,
};

pub use report::{render_summary, write_json, ErrorReport, ProbeDetail, Report, ReportStatistics};

pub use metrics::METRICS;
pub use telemetry::init_tracing;
