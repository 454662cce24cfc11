//! Harness configuration.
//!
//! Loaded from TOML. Every section and field has a default, so an empty
//! file (or no file at all) describes the builtin battery run against the
//! local process transport with strict readiness bars.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{HarnessError, ProbeDef, Result};
use crate::evaluator::{Posture, ReadinessPolicy, Thresholds};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub suite: SuiteConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Extra declarative probes appended to the builtin battery.
    #[serde(default)]
    pub probes: Vec<ProbeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Working directory shared by probes.
    #[serde(default = "default_sandbox_dir")]
    pub dir: PathBuf,

    /// Create `dir` if it does not exist.
    #[serde(default = "default_true")]
    pub create: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Process,
    Http,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(TransportKind::Process),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// Argument prefix placed before every process invocation, e.g. a
    /// client that forwards the command to the execution service.
    #[serde(default)]
    pub launcher: Vec<String>,

    /// Execution endpoint for the HTTP transport.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Slack on top of each probe timeout for transport teardown.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

/// Limits the target service is expected to enforce. Probe content and
/// names are derived from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_enforced_timeout_secs")]
    pub enforced_timeout_secs: u64,

    /// Harness-side bound per probe; must exceed the enforced timeout so
    /// that enforcement can be observed.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    #[serde(default = "default_process_limit")]
    pub process_limit: u32,

    /// Exit code the service's watchdog uses when it kills a process.
    #[serde(default = "default_watchdog_exit_code")]
    pub watchdog_exit_code: i32,
}

impl LimitsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn enforced_timeout(&self) -> Duration {
        Duration::from_secs(self.enforced_timeout_secs)
    }
}

/// Shell flavour of the generated probe scripts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Posix,
    Cmd,
}

impl Dialect {
    pub fn native() -> Self {
        if cfg!(windows) {
            Dialect::Cmd
        } else {
            Dialect::Posix
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Pool size for the concurrent category.
    #[serde(default = "default_concurrency_workers")]
    pub concurrency_workers: usize,

    /// Number of probes in the concurrent category.
    #[serde(default = "default_concurrency_requests")]
    pub concurrency_requests: usize,

    /// Defaults to the host platform's shell.
    #[serde(default)]
    pub dialect: Option<Dialect>,

    /// Interpreter for script probes. Defaults per dialect.
    #[serde(default)]
    pub python: Option<String>,

    /// Strings that must not leak into error output. Defaults per dialect.
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,

    /// Run only these categories (case-insensitive). Empty runs all.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl SuiteConfig {
    pub fn dialect(&self) -> Dialect {
        self.dialect.unwrap_or_else(Dialect::native)
    }

    pub fn python(&self) -> String {
        match &self.python {
            Some(p) => p.clone(),
            None => match self.dialect() {
                Dialect::Posix => "python3".to_string(),
                Dialect::Cmd => "python".to_string(),
            },
        }
    }

    pub fn sensitive_patterns(&self) -> Vec<String> {
        if !self.sensitive_patterns.is_empty() {
            return self.sensitive_patterns.clone();
        }
        let defaults: &[&str] = match self.dialect() {
            Dialect::Posix => &["/root/", "/home/"],
            Dialect::Cmd => &["Administrator", r"C:\Users"],
        };
        defaults.iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default)]
    pub posture: Posture,

    /// Overrides the posture's YES bar (fraction, 0 to 1).
    #[serde(default)]
    pub high_bar: Option<f64>,

    /// Overrides the posture's CONDITIONAL bar (fraction, 0 to 1).
    #[serde(default)]
    pub mid_bar: Option<f64>,

    #[serde(default = "default_warn_noise_threshold")]
    pub warn_noise_threshold: usize,

    /// Replaces the builtin critical list when set.
    #[serde(default)]
    pub critical_probes: Option<Vec<String>>,

    /// Exit 0 on CONDITIONAL. Defaults to `true` for the lenient posture.
    #[serde(default)]
    pub accept_conditional: Option<bool>,
}

impl ReadinessConfig {
    pub fn thresholds(&self) -> Thresholds {
        let preset = self.posture.thresholds();
        Thresholds {
            high_bar: self.high_bar.unwrap_or(preset.high_bar),
            mid_bar: self.mid_bar.unwrap_or(preset.mid_bar),
        }
    }

    pub fn accept_conditional(&self) -> bool {
        self.accept_conditional
            .unwrap_or(self.posture == Posture::Lenient)
    }

    /// Build the evaluator policy. `builtin_critical` is used unless the
    /// configuration names its own list.
    pub fn policy(&self, builtin_critical: Vec<String>) -> ReadinessPolicy {
        ReadinessPolicy {
            thresholds: self.thresholds(),
            warn_noise_threshold: self.warn_noise_threshold,
            critical_probes: self.critical_probes.clone().unwrap_or(builtin_critical),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}
fn default_sandbox_dir() -> PathBuf {
    std::env::temp_dir().join("sandprobe-sandbox")
}
fn default_grace_ms() -> u64 {
    2_000
}
fn default_enforced_timeout_secs() -> u64 {
    30
}
fn default_probe_timeout_secs() -> u64 {
    35
}
fn default_memory_limit_mb() -> u64 {
    100
}
fn default_process_limit() -> u32 {
    5
}
fn default_watchdog_exit_code() -> i32 {
    888
}
fn default_concurrency_workers() -> usize {
    3
}
fn default_concurrency_requests() -> usize {
    5
}
fn default_warn_noise_threshold() -> usize {
    3
}
fn default_report_path() -> PathBuf {
    PathBuf::from("security_validation_report.json")
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            dir: default_sandbox_dir(),
            create: true,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            launcher: Vec::new(),
            endpoint: None,
            api_key_env: None,
            grace_ms: default_grace_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enforced_timeout_secs: default_enforced_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            memory_limit_mb: default_memory_limit_mb(),
            process_limit: default_process_limit(),
            watchdog_exit_code: default_watchdog_exit_code(),
        }
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            concurrency_workers: default_concurrency_workers(),
            concurrency_requests: default_concurrency_requests(),
            dialect: None,
            python: None,
            sensitive_patterns: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            posture: Posture::default(),
            high_bar: None,
            mid_bar: None,
            warn_noise_threshold: default_warn_noise_threshold(),
            critical_probes: None,
            accept_conditional: None,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file. Does not validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Settings-level checks. Probe-level checks (duplicate names, critical
    /// names present, judge patterns) run once the suite is assembled.
    pub fn validate(&self) -> Result<()> {
        self.readiness.thresholds().validate()?;

        if self.sandbox.dir.as_os_str().is_empty() {
            return Err(HarnessError::config("sandbox.dir must not be empty"));
        }

        let limits = &self.limits;
        if limits.enforced_timeout_secs == 0 || limits.probe_timeout_secs == 0 {
            return Err(HarnessError::config("timeouts must be greater than zero"));
        }
        if limits.probe_timeout_secs <= limits.enforced_timeout_secs {
            return Err(HarnessError::config(format!(
                "limits.probe_timeout_secs ({}) must exceed limits.enforced_timeout_secs ({})",
                limits.probe_timeout_secs, limits.enforced_timeout_secs
            )));
        }
        if limits.memory_limit_mb == 0 || limits.process_limit == 0 {
            return Err(HarnessError::config(
                "limits.memory_limit_mb and limits.process_limit must be greater than zero",
            ));
        }

        if self.suite.concurrency_workers == 0 {
            return Err(HarnessError::config(
                "suite.concurrency_workers must be at least 1",
            ));
        }
        if self.suite.concurrency_requests == 0 {
            return Err(HarnessError::config(
                "suite.concurrency_requests must be at least 1",
            ));
        }
        if self.suite.sensitive_patterns.iter().any(|p| p.is_empty()) {
            return Err(HarnessError::config(
                "suite.sensitive_patterns must not contain empty strings",
            ));
        }

        match self.transport.kind {
            TransportKind::Process => {
                if self.transport.launcher.iter().any(|a| a.trim().is_empty()) {
                    return Err(HarnessError::config(
                        "transport.launcher must not contain empty arguments",
                    ));
                }
            }
            TransportKind::Http => {
                let endpoint = self.transport.endpoint.as_deref().unwrap_or("");
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(HarnessError::config(
                        "transport.endpoint must be an http(s) URL for the http transport",
                    ));
                }
            }
        }

        if let Some(list) = &self.readiness.critical_probes {
            if list.iter().any(|n| n.trim().is_empty()) {
                return Err(HarnessError::config(
                    "readiness.critical_probes must not contain empty names",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.limits.enforced_timeout_secs, 30);
        assert_eq!(cfg.limits.probe_timeout(), Duration::from_secs(35));
        assert_eq!(cfg.limits.watchdog_exit_code, 888);
        assert_eq!(cfg.suite.concurrency_workers, 3);
        assert_eq!(cfg.suite.concurrency_requests, 5);
        assert_eq!(cfg.readiness.thresholds(), Posture::Strict.thresholds());
        assert!(!cfg.readiness.accept_conditional());
        assert_eq!(cfg.transport.kind, TransportKind::Process);
        assert!(cfg.probes.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_lenient_posture_with_override() {
        let cfg = HarnessConfig::from_toml_str(
            r#"
            [readiness]
            posture = "lenient"
            mid_bar = 0.65
            critical_probes = ["Service Availability"]
            "#,
        )
        .unwrap();
        let t = cfg.readiness.thresholds();
        assert_eq!(t.high_bar, 0.70);
        assert_eq!(t.mid_bar, 0.65);
        assert!(cfg.readiness.accept_conditional());

        let policy = cfg.readiness.policy(vec!["ignored".into()]);
        assert_eq!(policy.critical_probes, vec!["Service Availability"]);
    }

    #[test]
    fn test_builtin_critical_used_when_unset() {
        let cfg = HarnessConfig::default();
        let policy = cfg.readiness.policy(vec!["Low Integrity Level".into()]);
        assert_eq!(policy.critical_probes, vec!["Low Integrity Level"]);
        assert_eq!(policy.warn_noise_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_inverted_bars() {
        let cfg = HarnessConfig::from_toml_str(
            r#"
            [readiness]
            high_bar = 0.5
            mid_bar = 0.8
            "#,
        )
        .unwrap();
        assert!(cfg.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_validate_rejects_zero_workers_and_short_probe_timeout() {
        let mut cfg = HarnessConfig::default();
        cfg.suite.concurrency_workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = HarnessConfig::default();
        cfg.limits.probe_timeout_secs = 30;
        assert!(cfg
            .validate()
            .unwrap_err()
            .to_string()
            .contains("probe_timeout_secs"));
    }

    #[test]
    fn test_http_transport_needs_endpoint() {
        let mut cfg = HarnessConfig::default();
        cfg.transport.kind = TransportKind::Http;
        assert!(cfg.validate().is_err());
        cfg.transport.endpoint = Some("http://127.0.0.1:50055/execute".into());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_dialect_defaults() {
        let mut suite = SuiteConfig::default();
        suite.dialect = Some(Dialect::Cmd);
        assert_eq!(suite.python(), "python");
        assert!(suite
            .sensitive_patterns()
            .contains(&r"C:\Users".to_string()));

        suite.dialect = Some(Dialect::Posix);
        assert_eq!(suite.python(), "python3");
        suite.sensitive_patterns = vec!["secret-user".into()];
        assert_eq!(suite.sensitive_patterns(), vec!["secret-user"]);
    }

    #[test]
    fn test_parse_error_is_configuration() {
        let err = HarnessConfig::from_toml_str("[limits]\nprobe_timeout_secs = \"soon\"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_from_file_with_extra_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandprobe.toml");
        std::fs::write(
            &path,
            r#"
            [sandbox]
            dir = "/tmp/sb"

            [[probes]]
            category = "Custom"
            name = "Echo"
            program = "echo"
            args = ["hi"]
            [probes.judge]
            otherwise = "FAIL"
            [[probes.judge.rules]]
            then = "PASS"
            when = { type = "contains", needle = "hi" }
            "#,
        )
        .unwrap();
        let cfg = HarnessConfig::load(&path).unwrap();
        assert_eq!(cfg.sandbox.dir, PathBuf::from("/tmp/sb"));
        assert_eq!(cfg.probes.len(), 1);
        assert_eq!(cfg.probes[0].judge.rules.len(), 1);

        assert!(HarnessConfig::load(&dir.path().join("missing.toml"))
            .unwrap_err()
            .is_configuration());
    }
}
