//! Builtin probe battery.
//!
//! Seven categories exercising the guarantees a sandboxed execution
//! service must keep. Script probes are written into the sandbox as
//! fixtures (named with the run tag) and removed again after judging.
//! Limits from `[limits]` shape both script content and probe names.

use std::path::PathBuf;
use std::time::Duration;

use sandprobe_core::{
    Category, CommandSpec, Dialect, FaultKind, HarnessConfig, LimitsConfig, Outcome, Placeholders,
    Predicate, Probe, RuleJudge, Stream, Suite,
};

pub const SECURITY_BOUNDARY: &str = "Security Boundary";
pub const RESOURCE_LIMITS: &str = "Resource Limits";
pub const OUTPUT_CAPTURE: &str = "Output Capture";
pub const PROCESS_LIFECYCLE: &str = "Process Lifecycle";
pub const ERROR_HANDLING: &str = "Error Handling";
pub const INTEGRATION: &str = "Integration";
pub const CONCURRENCY: &str = "Concurrency";

/// Marker a sanitizing service substitutes for user paths.
pub const REDACTION_MARKER: &str = "[USER_PATH]";

const SERVICE_GREETING: &str = "Hello from sandprobe";

fn memory_probe_name(limits: &LimitsConfig) -> String {
    format!("Memory Limit ({}MB)", limits.memory_limit_mb)
}

fn timeout_probe_name(limits: &LimitsConfig) -> String {
    format!("Execution Timeout ({}s)", limits.enforced_timeout_secs)
}

/// Probes whose failure blocks production readiness.
pub fn default_critical(limits: &LimitsConfig) -> Vec<String> {
    vec![
        "Low Integrity Level".to_string(),
        "Working Directory Enforcement".to_string(),
        memory_probe_name(limits),
        timeout_probe_name(limits),
        "Service Availability".to_string(),
    ]
}

/// The critical list for `suite`.
///
/// A list named in configuration is returned as-is (validation rejects
/// names missing from the suite). The builtin list is narrowed to the
/// probes actually present, so a category filter does not turn into a
/// configuration error.
pub fn critical_probes(config: &HarnessConfig, suite: &Suite) -> Vec<String> {
    match &config.readiness.critical_probes {
        Some(names) => names.clone(),
        None => default_critical(&config.limits)
            .into_iter()
            .filter(|name| suite.contains_probe(name))
            .collect(),
    }
}

/// Builtin battery plus `[[probes]]` from configuration, filtered by
/// `[suite] categories`.
pub fn assemble_suite(config: &HarnessConfig, ph: &Placeholders) -> Suite {
    let mut suite = builtin_suite(config, ph);
    for def in &config.probes {
        suite.push_probe(def.clone().into_probe(ph, config.limits.probe_timeout()));
    }
    suite.retain_categories(&config.suite.categories);
    suite
}

pub fn builtin_suite(config: &HarnessConfig, ph: &Placeholders) -> Suite {
    let battery = Battery {
        ph,
        limits: &config.limits,
        dialect: config.suite.dialect(),
        python: config.suite.python(),
        timeout: config.limits.probe_timeout(),
    };
    Suite::new(vec![
        security_boundary(&battery),
        resource_limits(&battery),
        output_capture(&battery),
        process_lifecycle(&battery),
        error_handling(&battery, &config.suite.sensitive_patterns()),
        integration(&battery),
        concurrency(
            &battery,
            config.suite.concurrency_workers,
            config.suite.concurrency_requests,
        ),
    ])
}

// ---------------------------------------------------------------------------
// Probe construction
// ---------------------------------------------------------------------------

struct Battery<'a> {
    ph: &'a Placeholders,
    limits: &'a LimitsConfig,
    dialect: Dialect,
    python: String,
    timeout: Duration,
}

impl Battery<'_> {
    fn tag(&self) -> &str {
        &self.ph.run_tag
    }

    fn fixture_path(&self, stem: &str, ext: &str) -> PathBuf {
        self.ph
            .sandbox()
            .join(format!("{stem}_{}.{ext}", self.ph.run_tag))
    }

    fn direct(&self, category: &str, name: &str, spec: CommandSpec, judge: RuleJudge) -> Probe {
        Probe::new(category, name, spec.working_dir(self.ph.sandbox()), judge)
            .with_timeout(self.timeout)
    }

    /// A command line that is a builtin on `cmd` but a program on posix.
    fn echo(&self, text: &str) -> CommandSpec {
        match self.dialect {
            Dialect::Posix => CommandSpec::new("echo").arg(text),
            Dialect::Cmd => CommandSpec::new("cmd").args(["/C", "echo", text]),
        }
    }

    /// Script probe with one body per dialect.
    fn shell(
        &self,
        category: &str,
        name: &str,
        stem: &str,
        (posix, cmd): (String, String),
        judge: RuleJudge,
    ) -> Probe {
        let (path, body, spec) = match self.dialect {
            Dialect::Posix => {
                let path = self.fixture_path(stem, "sh");
                let spec = CommandSpec::new("sh").arg(path.to_string_lossy());
                (path, posix, spec)
            }
            Dialect::Cmd => {
                let path = self.fixture_path(stem, "bat");
                let spec = CommandSpec::new("cmd").args(["/C".to_string(), path.to_string_lossy().into_owned()]);
                (path, format!("@echo off\n{cmd}"), spec)
            }
        };
        self.direct(category, name, spec, judge).with_fixture(path, body)
    }

    fn python(&self, category: &str, name: &str, stem: &str, body: String, judge: RuleJudge) -> Probe {
        let path = self.fixture_path(stem, "py");
        let spec = CommandSpec::new(&self.python).arg(path.to_string_lossy());
        self.direct(category, name, spec, judge).with_fixture(path, body)
    }
}

/// Explicit verdict markers first; anything else is an ambiguous signal.
fn marker_judge(fail: &str, pass: &str) -> RuleJudge {
    RuleJudge::otherwise(Outcome::Warn)
        .when(Predicate::stdout_contains(fail), Outcome::Fail)
        .when(Predicate::stdout_contains(pass), Outcome::Pass)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

fn security_boundary(b: &Battery) -> Category {
    let tag = b.tag();
    let integrity = (
        format!(
            r#"echo "Testing write to system directories..."
for target in /usr /etc; do
  if ( echo test > "$target/sandprobe_{tag}.txt" ) 2>/dev/null; then
    echo "FAIL: Write to $target succeeded"
    rm -f "$target/sandprobe_{tag}.txt"
  else
    echo "PASS: Write to $target blocked"
  fi
done
"#
        ),
        format!(
            r#"echo Testing write to Program Files...
echo test > "C:\Program Files\sandprobe_{tag}.txt" 2>&1 && echo FAIL: Write succeeded || echo PASS: Write blocked
echo Testing write to Windows directory...
echo test > "C:\Windows\sandprobe_{tag}.txt" 2>&1 && echo FAIL: Write succeeded || echo PASS: Write blocked
"#
        ),
    );

    let mut category = Category::sequential(SECURITY_BOUNDARY).with_probe(b.shell(
        SECURITY_BOUNDARY,
        "Low Integrity Level",
        "integrity_test",
        integrity,
        marker_judge("FAIL:", "PASS:"),
    ));

    let escapes = [
        ("Parent directory traversal", "escape_parent", "../../etc", r"..\..\Windows"),
        ("Direct path outside sandbox", "escape_direct", "/etc", r"C:\Users"),
    ];
    for (name, stem, posix_path, cmd_path) in escapes {
        let bodies = (
            format!(
                "ls \"{posix_path}\" >/dev/null 2>&1 && echo \"FAIL: {name} allowed\" || echo \"PASS: {name} blocked\"\n"
            ),
            format!("dir \"{cmd_path}\" 2>&1 && echo FAIL: {name} allowed || echo PASS: {name} blocked\n"),
        );
        category = category.with_probe(b.shell(
            SECURITY_BOUNDARY,
            name,
            stem,
            bodies,
            marker_judge("FAIL:", "PASS:"),
        ));
    }

    // UNC administrative share on cmd; a root-only file on posix.
    let system = (
        "cat /etc/shadow >/dev/null 2>&1 && echo \"FAIL: System directory access allowed\" || echo \"PASS: System directory access blocked\"\n".to_string(),
        "dir \"\\\\localhost\\C$\\Windows\" 2>&1 && echo FAIL: System directory access allowed || echo PASS: System directory access blocked\n".to_string(),
    );
    category = category.with_probe(b.shell(
        SECURITY_BOUNDARY,
        "System directory access",
        "escape_system",
        system,
        marker_judge("FAIL:", "PASS:"),
    ));

    let marker_file = b.ph.sandbox().join(format!("test_wd_{tag}.txt"));
    let reports_sandbox = Predicate::Contains {
        stream: Stream::Stdout,
        needle: b.ph.sandbox().to_string_lossy().into_owned(),
        ignore_case: true,
    };
    let workdir = (
        format!("echo \"Current directory: $(pwd)\"\necho Test > test_wd_{tag}.txt\n"),
        format!("echo Current directory: %CD%\necho Test > test_wd_{tag}.txt\n"),
    );
    category.with_probe(
        b.shell(
            SECURITY_BOUNDARY,
            "Working Directory Enforcement",
            "workdir_test",
            workdir,
            RuleJudge::otherwise(Outcome::Fail)
                .when(
                    Predicate::all([
                        reports_sandbox.clone(),
                        Predicate::FileExists {
                            path: marker_file.clone(),
                        },
                    ]),
                    Outcome::Pass,
                )
                .when(reports_sandbox, Outcome::Partial),
        )
        .with_cleanup(marker_file),
    )
}

fn resource_limits(b: &Battery) -> Category {
    let limits = b.limits;
    let alloc_mb = limits.memory_limit_mb + limits.memory_limit_mb / 2;
    let memory = format!(
        r#"import sys
print("Testing memory allocation...")
try:
    big_data = bytearray({alloc_mb} * 1024 * 1024)
    print(f"FAIL: Allocated {{len(big_data) // (1024 * 1024)}}MB")
    sys.exit(1)
except MemoryError:
    print("PASS: Memory allocation blocked at limit")
    sys.exit(0)
"#
    );

    let sleep_secs = limits.enforced_timeout_secs + 5;
    let sleeper = (
        format!(
            "echo \"Starting long-running process...\"\nsleep {sleep_secs}\necho \"This should not appear\"\n"
        ),
        format!(
            "echo Starting long-running process...\nping -n {} 127.0.0.1 > nul\necho This should not appear\n",
            sleep_secs + 1
        ),
    );
    let enforced_bound = secs(limits.enforced_timeout_secs + 3);

    let n = limits.process_limit;
    let attempts = n + 2;
    let spawner = (
        format!(
            r#"echo "Starting child processes..."
i=1
while [ "$i" -le {attempts} ]; do
  ( sleep 1; echo "Child $i completed" ) &
  i=$((i + 1))
done
wait
echo "Main process completed"
"#
        ),
        format!(
            r#"echo Starting child processes...
for /L %%i in (1,1,{attempts}) do start /B cmd /c "ping -n 2 127.0.0.1 > nul & echo Child %%i completed"
ping -n 4 127.0.0.1 > nul
echo Main process completed
"#
        ),
    );

    Category::sequential(RESOURCE_LIMITS)
        .with_probe(b.python(
            RESOURCE_LIMITS,
            &memory_probe_name(limits),
            "memory_test",
            memory,
            RuleJudge::otherwise(Outcome::Warn)
                .when(Predicate::stdout_contains("FAIL: Allocated"), Outcome::Fail)
                .when(Predicate::stdout_contains("PASS:"), Outcome::Pass)
                // Killed by the limit before it could report.
                .when(Predicate::ExitNonZero, Outcome::Partial),
        ))
        .with_probe(b.shell(
            RESOURCE_LIMITS,
            &timeout_probe_name(limits),
            "timeout_test",
            sleeper,
            RuleJudge::otherwise(Outcome::Warn)
                .when(Predicate::stdout_contains("This should not appear"), Outcome::Fail)
                .when(Predicate::elapsed_under(enforced_bound), Outcome::Pass)
                .tolerating(FaultKind::Timeout),
        ))
        .with_probe(b.shell(
            RESOURCE_LIMITS,
            &format!("Process Count Limit ({n})"),
            "process_limit",
            spawner,
            RuleJudge::otherwise(Outcome::Fail)
                .when(
                    Predicate::not(Predicate::stdout_contains("Starting child processes")),
                    Outcome::Warn,
                )
                .when(
                    Predicate::CountAtMost {
                        stream: Stream::Stdout,
                        needle: "Child ".to_string(),
                        n: n as usize,
                    },
                    Outcome::Pass,
                ),
        ))
}

fn output_capture(b: &Battery) -> Category {
    let both = (
        "echo \"STDOUT: Test message\"\necho \"STDERR: Error message\" >&2\n".to_string(),
        "echo STDOUT: Test message\necho STDERR: Error message 1>&2\n".to_string(),
    );
    let stdout_ok = Predicate::stdout_contains("STDOUT: Test message");
    let stderr_ok = Predicate::stderr_contains("STDERR: Error message");

    let large = r#"import sys
for i in range(1000):
    print(f"Line {i}: " + "X" * 90)
print("END_MARKER", file=sys.stderr)
"#
    .to_string();
    let lines = |n: usize| Predicate::CountAtLeast {
        stream: Stream::Stdout,
        needle: "Line ".to_string(),
        n,
    };
    let marker = Predicate::stderr_contains("END_MARKER");

    Category::sequential(OUTPUT_CAPTURE)
        .with_probe(b.shell(
            OUTPUT_CAPTURE,
            "Basic Output Capture",
            "output_test",
            both,
            RuleJudge::otherwise(Outcome::Fail)
                .when(Predicate::all([stdout_ok.clone(), stderr_ok.clone()]), Outcome::Pass)
                .when(Predicate::any([stdout_ok, stderr_ok]), Outcome::Partial),
        ))
        .with_probe(b.python(
            OUTPUT_CAPTURE,
            "Large Output Handling",
            "large_output",
            large,
            RuleJudge::otherwise(Outcome::Fail)
                .when(Predicate::all([lines(900), marker.clone()]), Outcome::Pass)
                .when(Predicate::any([lines(1), marker]), Outcome::Partial),
        ))
}

fn process_lifecycle(b: &Battery) -> Category {
    let limits = b.limits;
    let normal = (
        "echo \"Process starting\"\necho \"Process ending normally\"\nexit 0\n".to_string(),
        "echo Process starting\necho Process ending normally\nexit 0\n".to_string(),
    );
    let forever = (
        "echo \"Starting infinite loop\"\nwhile true; do sleep 1; done\n".to_string(),
        "echo Starting infinite loop\n:loop\nping -n 2 127.0.0.1 > nul\ngoto loop\n".to_string(),
    );
    // The parent exits at once; a grandchild that survives it prints late.
    let orphan = (
        "echo \"Spawning grandchild\"\n( sleep 10; echo \"Orphan still running\" ) &\necho \"Parent exiting\"\n"
            .to_string(),
        "echo Spawning grandchild\nstart /B cmd /c \"ping -n 11 127.0.0.1 > nul & echo Orphan still running\"\necho Parent exiting\n"
            .to_string(),
    );
    let spin = (
        "echo \"Spinning\"\nwhile :; do :; done\n".to_string(),
        "echo Spinning\n:spin\ngoto spin\n".to_string(),
    );

    Category::sequential(PROCESS_LIFECYCLE)
        .with_probe(b.shell(
            PROCESS_LIFECYCLE,
            "Normal Termination",
            "normal_exit",
            normal,
            RuleJudge::otherwise(Outcome::Warn).when(
                Predicate::all([
                    Predicate::exit_code(0),
                    Predicate::stdout_contains("Process ending normally"),
                ]),
                Outcome::Pass,
            ),
        ))
        .with_probe(b.shell(
            PROCESS_LIFECYCLE,
            "Timeout Cleanup",
            "timeout_cleanup",
            forever,
            RuleJudge::otherwise(Outcome::Warn)
                .when(
                    Predicate::elapsed_under(secs(limits.enforced_timeout_secs + 3)),
                    Outcome::Pass,
                )
                .tolerating(FaultKind::Timeout),
        ))
        .with_probe(b.shell(
            PROCESS_LIFECYCLE,
            "Job Object Management",
            "job_object",
            orphan,
            RuleJudge::otherwise(Outcome::Warn)
                .when(Predicate::stdout_contains("Orphan still running"), Outcome::Fail)
                .when(Predicate::elapsed_under(secs(8)), Outcome::Pass)
                .tolerating(FaultKind::Timeout),
        ))
        .with_probe(b.shell(
            PROCESS_LIFECYCLE,
            "Process Watchdog",
            "watchdog",
            spin,
            RuleJudge::otherwise(Outcome::Warn)
                .when(Predicate::exit_code(limits.watchdog_exit_code), Outcome::Pass)
                // Stopped by something other than the watchdog.
                .when(
                    Predicate::all([
                        Predicate::not(Predicate::Faulted {
                            kind: FaultKind::Timeout,
                        }),
                        Predicate::elapsed_under(limits.probe_timeout()),
                    ]),
                    Outcome::Partial,
                )
                .tolerating(FaultKind::Timeout),
        ))
}

fn error_handling(b: &Battery, sensitive: &[String]) -> Category {
    let tag = b.tag();
    let exceed_mb = b.limits.memory_limit_mb * 2;
    let exceed = format!(
        r#"import sys
try:
    data = bytearray({exceed_mb} * 1024 * 1024)
    del data
    print("WARN: Allocation was not limited")
except MemoryError:
    print("PASS: MemoryError raised and handled")
sys.exit(0)
"#
    );

    // Echo every sensitive pattern to stderr, then provoke a real error
    // message about a path built from the first one.
    let mut posix = String::new();
    let mut cmd = String::new();
    for pattern in sensitive {
        posix.push_str(&format!("echo \"Attempting to access {pattern}\" >&2\n"));
        cmd.push_str(&format!("echo Attempting to access {pattern} 1>&2\n"));
    }
    let first = sensitive.first().map(String::as_str).unwrap_or_default();
    posix.push_str(&format!(
        "ls \"{}/sandprobe_{tag}\"\n",
        first.trim_end_matches('/')
    ));
    cmd.push_str(&format!("dir \"{}\\sandprobe_{tag}\"\n", first.trim_end_matches('\\')));

    let sanitization = if sensitive.is_empty() {
        RuleJudge::otherwise(Outcome::Pass)
    } else {
        let leaks = Predicate::any(sensitive.iter().map(|p| Predicate::stderr_contains(p.as_str())));
        RuleJudge::otherwise(Outcome::Pass)
            .when(Predicate::stderr_contains(REDACTION_MARKER), Outcome::Pass)
            .when(leaks, Outcome::Warn)
    };

    Category::sequential(ERROR_HANDLING)
        .with_probe(b.direct(
            ERROR_HANDLING,
            "Invalid Command Handling",
            CommandSpec::new(format!("sandprobe_nonexistent_command_{tag}")),
            RuleJudge::otherwise(Outcome::Fail)
                .when(
                    Predicate::any([
                        Predicate::Faulted {
                            kind: FaultKind::Spawn,
                        },
                        Predicate::ExitNonZero,
                    ]),
                    Outcome::Pass,
                )
                .tolerating(FaultKind::Spawn),
        ))
        .with_probe(b.python(
            ERROR_HANDLING,
            "Resource Exceeded Handling",
            "resource_exceeded",
            exceed,
            RuleJudge::otherwise(Outcome::Warn).when(Predicate::stdout_contains("PASS:"), Outcome::Pass),
        ))
        .with_probe(b.shell(
            ERROR_HANDLING,
            "Error Sanitization",
            "error_test",
            (posix, cmd),
            sanitization,
        ))
}

fn integration(b: &Battery) -> Category {
    Category::sequential(INTEGRATION).with_probe(b.direct(
        INTEGRATION,
        "Service Availability",
        b.echo(SERVICE_GREETING),
        RuleJudge::otherwise(Outcome::Fail)
            .when(Predicate::stdout_contains(SERVICE_GREETING), Outcome::Pass),
    ))
}

fn concurrency(b: &Battery, workers: usize, requests: usize) -> Category {
    let mut category = Category::concurrent(CONCURRENCY, workers);
    for i in 0..requests {
        category = category.with_probe(b.direct(
            CONCURRENCY,
            &format!("Concurrent Request {i}"),
            b.echo(&format!("Request {i}")),
            // Anchored so "Request 1" never matches "Request 10".
            RuleJudge::otherwise(Outcome::Fail).when(
                Predicate::Matches {
                    stream: Stream::Stdout,
                    pattern: format!(r"(?m)^Request {i}\s*$").into(),
                },
                Outcome::Pass,
            ),
        ));
    }
    category
}
