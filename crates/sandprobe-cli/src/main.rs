//! Sandprobe - security validation harness CLI
//!
//! The `sandprobe` command runs the probe battery against a sandboxed
//! command-execution service and decides whether it is production ready.
//!
//! ## Commands
//!
//! - `run`: execute the battery, write the JSON report, print a summary
//! - `list`: print the battery without running it
//!
//! ## Exit codes
//!
//! `0` ready, `1` not ready, `2` configuration error, `3` report not written.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use sandprobe_core::obs::{self, RunSpan};
use sandprobe_core::{
    evaluate, init_tracing, render_summary, write_json, ErrorReport, HarnessConfig, Placeholders,
    Posture, Report, ReportConfig, TransportKind, METRICS,
};
use sandprobe_runner::{
    assemble_suite, build_invoker, critical_probes, ProbeExecutor, SuiteRunner,
};

const EXIT_READY: u8 = 0;
const EXIT_NOT_READY: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_REPORT: u8 = 3;

#[derive(Parser)]
#[command(name = "sandprobe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Security validation harness for sandboxed command execution", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the probe battery and issue a readiness verdict
    Run(RunArgs),

    /// List the probes that would run
    List(SuiteArgs),
}

/// Flags shared by every command that builds the suite.
#[derive(Args, Debug, Default, Clone)]
struct SuiteArgs {
    /// TOML configuration file
    #[arg(short, long, env = "SANDPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox working directory
    #[arg(long, env = "SANDPROBE_SANDBOX")]
    sandbox: Option<PathBuf>,

    /// Readiness thresholds preset (strict, lenient)
    #[arg(long)]
    posture: Option<Posture>,

    /// Transport to the target service (process, http)
    #[arg(long)]
    transport: Option<TransportKind>,

    /// Execution endpoint; implies the http transport unless one is given
    #[arg(long, env = "SANDPROBE_ENDPOINT")]
    endpoint: Option<String>,

    /// Worker pool size for the concurrency category
    #[arg(long)]
    workers: Option<usize>,

    /// Only run these categories (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,
}

#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    #[command(flatten)]
    suite: SuiteArgs,

    /// Where to write the JSON report
    #[arg(short, long, env = "SANDPROBE_REPORT")]
    report: Option<PathBuf>,

    /// Treat CONDITIONAL readiness as success
    #[arg(long)]
    accept_conditional: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let code = match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::List(args) => cmd_list(&args),
    };
    ExitCode::from(code)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn load_config(args: &SuiteArgs) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    apply_overrides(&mut config, args);
    Ok(config)
}

/// Command-line flags win over file values.
fn apply_overrides(config: &mut HarnessConfig, args: &SuiteArgs) {
    if let Some(dir) = &args.sandbox {
        config.sandbox.dir = dir.clone();
    }
    if let Some(posture) = args.posture {
        config.readiness.posture = posture;
    }
    if let Some(endpoint) = &args.endpoint {
        config.transport.endpoint = Some(endpoint.clone());
        config.transport.kind = TransportKind::Http;
    }
    if let Some(kind) = args.transport {
        config.transport.kind = kind;
    }
    if let Some(workers) = args.workers {
        config.suite.concurrency_workers = workers;
    }
    if !args.categories.is_empty() {
        config.suite.categories = args.categories.clone();
    }
}

/// Create (if asked) and canonicalize the sandbox so that probes comparing
/// reported paths against it see the same spelling the target does.
fn prepare_sandbox(config: &mut HarnessConfig) -> Result<PathBuf> {
    let dir = &config.sandbox.dir;
    if config.sandbox.create {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create sandbox {}", dir.display()))?;
    }
    let canonical = dir
        .canonicalize()
        .with_context(|| format!("Sandbox {} is not accessible", dir.display()))?;
    config.sandbox.dir = canonical.clone();
    Ok(canonical)
}

/// Assemble the suite against the sandbox as configured and validate it.
///
/// Probe names never depend on how the sandbox path is spelled, so this
/// rejects a bad critical list or malformed probes before anything on disk
/// is created.
fn check_suite(config: &HarnessConfig, run_tag: &str) -> Result<()> {
    let ph = Placeholders::new(&config.sandbox.dir, run_tag);
    let suite = assemble_suite(config, &ph);
    let critical = critical_probes(config, &suite);
    suite.validate(&critical).context("Invalid suite")
}

/// Short per-run tag embedded in generated file names.
fn new_run_tag() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(args: &RunArgs) -> u8 {
    let fallback_report = args
        .report
        .clone()
        .unwrap_or_else(|| ReportConfig::default().path);

    let mut config = match load_config(&args.suite) {
        Ok(config) => config,
        Err(e) => return config_failure(&fallback_report, &e),
    };
    if let Some(path) = &args.report {
        config.report.path = path.clone();
    }
    if args.accept_conditional {
        config.readiness.accept_conditional = Some(true);
    }
    let report_path = config.report.path.clone();

    let run_tag = new_run_tag();
    let prepared = config
        .validate()
        .context("Invalid configuration")
        .and_then(|_| check_suite(&config, &run_tag))
        .and_then(|_| prepare_sandbox(&mut config));
    let sandbox = match prepared {
        Ok(dir) => dir,
        Err(e) => return config_failure(&report_path, &e),
    };

    let invoker = match build_invoker(&config).context("Failed to set up transport") {
        Ok(invoker) => invoker,
        Err(e) => return config_failure(&report_path, &e),
    };

    let ph = Placeholders::new(&sandbox, run_tag);
    let suite = assemble_suite(&config, &ph);
    let critical = critical_probes(&config, &suite);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            warn!("Received Ctrl+C, finishing with partial results");
            let _ = shutdown_tx.send(true);
        }
    });

    let executor = ProbeExecutor::new(Arc::clone(&invoker))
        .with_grace(Duration::from_millis(config.transport.grace_ms));
    let runner = SuiteRunner::from_executor(executor).with_shutdown(shutdown_rx);

    info!(
        transport = invoker.name(),
        sandbox = %sandbox.display(),
        probes = suite.probe_count(),
        "starting security validation"
    );
    let result = match runner.run(&suite, &critical).await {
        Ok(result) => result,
        Err(e) => return config_failure(&report_path, &anyhow::Error::new(e)),
    };

    let _span = RunSpan::enter(&result.run_id.to_string());
    METRICS.flush();

    if result.stats.total == 0 {
        let err = anyhow::anyhow!("run interrupted before any probe completed");
        write_error_report(&report_path, &err);
        return EXIT_NOT_READY;
    }

    let policy = config.readiness.policy(critical);
    let verdict = match evaluate(&result, &policy) {
        Ok(verdict) => verdict,
        Err(e) => return config_failure(&report_path, &anyhow::Error::new(e)),
    };
    obs::emit_verdict_computed(&result.run_id.to_string(), &verdict);

    let report = Report::build(&result, &verdict, Utc::now());
    println!("{}", render_summary(&report));

    if let Err(e) = write_json(&report_path, &report) {
        error!(path = %report_path.display(), error = %e, "failed to write report");
        eprintln!("Error: {e}");
        return EXIT_REPORT;
    }
    println!("Report written to {}", report_path.display());

    match verdict
        .readiness
        .exit_code(config.readiness.accept_conditional())
    {
        0 => EXIT_READY,
        _ => EXIT_NOT_READY,
    }
}

fn cmd_list(args: &SuiteArgs) -> u8 {
    let config = match load_config(args).and_then(|c| {
        c.validate().context("Invalid configuration")?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return EXIT_CONFIG;
        }
    };
    print!("{}", render_listing(&config));
    EXIT_READY
}

fn render_listing(config: &HarnessConfig) -> String {
    let ph = Placeholders::new(&config.sandbox.dir, "list");
    let suite = assemble_suite(config, &ph);
    let critical = critical_probes(config, &suite);

    let mut out = String::new();
    for category in &suite.categories {
        out.push_str(&format!("{}\n", category.name));
        for probe in &category.probes {
            let marker = if critical.contains(&probe.name) {
                "*"
            } else {
                " "
            };
            let mut line = format!(
                "  {marker} {:<36} {:>4}s",
                probe.name,
                probe.timeout.as_secs()
            );
            if let Some(reason) = &probe.skip {
                line.push_str(&format!("  (skipped: {reason})"));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "\n{} probes, * = critical\n",
        suite.probe_count()
    ));
    out
}

/// Report a harness misconfiguration: log it, write the minimal error
/// report and exit with the configuration code.
fn config_failure(report_path: &Path, err: &anyhow::Error) -> u8 {
    error!(error = %format!("{err:#}"), "configuration error");
    eprintln!("Error: {err:#}");
    write_error_report(report_path, err);
    EXIT_CONFIG
}

fn write_error_report(report_path: &Path, err: &anyhow::Error) {
    let message = format!("{err:#}");
    let report = ErrorReport::new(&message, Utc::now());
    if let Err(e) = write_json(report_path, &report) {
        error!(path = %report_path.display(), error = %e, "failed to write error report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sandprobe").chain(args.iter().copied())).unwrap()
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Commands::Run(args) => args,
            Commands::List(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let args = run_args(parse(&[
            "--verbose",
            "run",
            "--posture",
            "lenient",
            "--transport",
            "http",
            "--workers",
            "8",
            "--category",
            "Integration",
            "--category",
            "Concurrency",
            "--accept-conditional",
            "--report",
            "/tmp/out.json",
        ]));
        assert_eq!(args.suite.posture, Some(Posture::Lenient));
        assert_eq!(args.suite.transport, Some(TransportKind::Http));
        assert_eq!(args.suite.workers, Some(8));
        assert_eq!(args.suite.categories, vec!["Integration", "Concurrency"]);
        assert!(args.accept_conditional);
        assert_eq!(args.report, Some(PathBuf::from("/tmp/out.json")));
    }

    #[test]
    fn test_unknown_posture_is_rejected() {
        let parsed = Cli::try_parse_from(["sandprobe", "run", "--posture", "relaxed"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = HarnessConfig::from_toml_str(
            r#"
[suite]
concurrency_workers = 2
categories = ["Security Boundary"]

[readiness]
posture = "strict"
"#,
        )
        .unwrap();
        let args = SuiteArgs {
            posture: Some(Posture::Lenient),
            endpoint: Some("http://127.0.0.1:8080/execute".into()),
            workers: Some(6),
            categories: vec!["Integration".into()],
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.readiness.posture, Posture::Lenient);
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(config.suite.concurrency_workers, 6);
        assert_eq!(config.suite.categories, vec!["Integration"]);
        assert!(config.readiness.accept_conditional());
    }

    #[test]
    fn test_explicit_transport_beats_endpoint() {
        let mut config = HarnessConfig::default();
        let args = SuiteArgs {
            endpoint: Some("http://127.0.0.1:8080/execute".into()),
            transport: Some(TransportKind::Process),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.transport.kind, TransportKind::Process);
        assert!(config.transport.endpoint.is_some());
    }

    #[test]
    fn test_run_tag_is_short() {
        let tag = new_run_tag();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(tag, new_run_tag());
    }

    #[test]
    fn test_listing_marks_critical_probes() {
        let text = render_listing(&HarnessConfig::default());
        assert!(text.contains("Security Boundary\n"));
        assert!(text.contains("* Low Integrity Level"));
        assert!(text.contains("* Memory Limit (100MB)"));
        assert!(text.contains("  Parent directory traversal"));
        assert!(text.contains("23 probes"));
    }

    #[tokio::test]
    async fn test_config_error_writes_error_report() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sandprobe.toml");
        std::fs::write(
            &config_path,
            "[readiness]\nhigh_bar = 0.5\nmid_bar = 0.8\n",
        )
        .unwrap();
        let report_path = dir.path().join("report.json");

        let args = RunArgs {
            suite: SuiteArgs {
                config: Some(config_path),
                sandbox: Some(dir.path().join("sandbox")),
                ..Default::default()
            },
            report: Some(report_path.clone()),
            accept_conditional: false,
        };
        assert_eq!(cmd_run(&args).await, EXIT_CONFIG);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(raw["production_ready"], "NO");
        assert!(raw["error"].as_str().unwrap().contains("mid_bar"));
        assert!(!dir.path().join("sandbox").exists());
    }

    #[tokio::test]
    async fn test_unknown_critical_probe_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sandprobe.toml");
        std::fs::write(
            &config_path,
            "[readiness]\ncritical_probes = [\"No Such Probe\"]\n",
        )
        .unwrap();
        let args = RunArgs {
            suite: SuiteArgs {
                config: Some(config_path),
                sandbox: Some(dir.path().join("sandbox")),
                categories: vec!["Integration".into()],
                ..Default::default()
            },
            report: Some(dir.path().join("report.json")),
            accept_conditional: false,
        };
        assert_eq!(cmd_run(&args).await, EXIT_CONFIG);

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("report.json")).unwrap(),
        )
        .unwrap();
        assert!(raw["error"].as_str().unwrap().contains("No Such Probe"));
        assert!(!dir.path().join("sandbox").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_integration_category_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("out").join("report.json");
        let args = run_args(parse(&[
            "run",
            "--sandbox",
            dir.path().join("sandbox").to_str().unwrap(),
            "--report",
            report_path.to_str().unwrap(),
            "--transport",
            "process",
            "--category",
            "integration",
        ]));

        assert_eq!(cmd_run(&args).await, EXIT_READY);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(raw["production_ready"], "YES");
        assert_eq!(raw["statistics"]["total"], 1);
        assert_eq!(raw["results"]["Integration"][0][0], "Service Availability");
        assert_eq!(raw["results"]["Integration"][0][1], "PASS");
        assert_eq!(raw["interrupted"], false);
    }
}
