//! Readiness evaluation.
//!
//! Turns a completed [`SuiteResult`] into a [`Verdict`]: which critical
//! probes failed, how severe the findings are, and whether the target is
//! ready for production. Thresholds come from a [`ReadinessPolicy`], never
//! from constants, so a stricter or more lenient posture is a matter of
//! configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{HarnessError, Result, SuiteResult};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Named threshold presets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    /// YES at 90%, CONDITIONAL at 75%.
    #[default]
    Strict,
    /// YES at 70%, CONDITIONAL at 60%.
    Lenient,
}

impl Posture {
    pub fn thresholds(&self) -> Thresholds {
        match self {
            Posture::Strict => Thresholds {
                high_bar: 0.90,
                mid_bar: 0.75,
            },
            Posture::Lenient => Thresholds {
                high_bar: 0.70,
                mid_bar: 0.60,
            },
        }
    }
}

impl std::str::FromStr for Posture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Posture::Strict),
            "lenient" => Ok(Posture::Lenient),
            other => Err(format!("unknown posture: {other}")),
        }
    }
}

/// Pass-rate bars, as fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Minimum pass rate for YES.
    pub high_bar: f64,
    /// Minimum pass rate for CONDITIONAL.
    pub mid_bar: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Posture::Strict.thresholds()
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, bar) in [("high_bar", self.high_bar), ("mid_bar", self.mid_bar)] {
            if !(0.0..=1.0).contains(&bar) {
                return Err(HarnessError::config(format!(
                    "{name} {bar} must be within [0, 1]"
                )));
            }
        }
        if self.mid_bar > self.high_bar {
            return Err(HarnessError::config(format!(
                "mid_bar {} exceeds high_bar {}",
                self.mid_bar, self.high_bar
            )));
        }
        Ok(())
    }
}

/// Everything the evaluator needs besides the results themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadinessPolicy {
    pub thresholds: Thresholds,
    /// More warnings than this raise severity to MEDIUM.
    pub warn_noise_threshold: usize,
    /// Probes whose FAIL or ERROR alone forces HIGH severity.
    pub critical_probes: Vec<String>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::for_posture(Posture::Strict)
    }
}

impl ReadinessPolicy {
    pub fn for_posture(posture: Posture) -> Self {
        Self {
            thresholds: posture.thresholds(),
            warn_noise_threshold: 3,
            critical_probes: Vec::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_critical(mut self, name: impl Into<String>) -> Self {
        self.critical_probes.push(name.into());
        self
    }

    pub fn with_warn_noise_threshold(mut self, n: usize) -> Self {
        self.warn_noise_threshold = n;
        self
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    Yes,
    Conditional,
    No,
}

impl Readiness {
    /// Process exit code for CI. CONDITIONAL counts as ready only when
    /// `accept_conditional` is set.
    pub fn exit_code(&self, accept_conditional: bool) -> i32 {
        match self {
            Readiness::Yes => 0,
            Readiness::Conditional if accept_conditional => 0,
            Readiness::Conditional | Readiness::No => 1,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Readiness::Yes => "YES",
            Readiness::Conditional => "CONDITIONAL",
            Readiness::No => "NO",
        })
    }
}

/// Final judgement of a run. Computed once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub severity: Severity,
    pub readiness: Readiness,
    pub justification: String,
    /// Critical probes recorded as FAIL or ERROR, in suite order.
    pub critical_failures: Vec<String>,
    /// `passed / total`, in `[0, 1]`.
    pub pass_rate: f64,
    pub thresholds: Thresholds,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate a completed (or interrupted) run.
///
/// Fails with a configuration error when the run recorded no probes, since
/// a pass rate over nothing means nothing, or when the policy is malformed.
pub fn evaluate(result: &SuiteResult, policy: &ReadinessPolicy) -> Result<Verdict> {
    policy.thresholds.validate()?;

    let stats = &result.stats;
    let pass_rate = stats.pass_rate().ok_or_else(|| {
        HarnessError::config("cannot evaluate readiness: the run recorded no probes")
    })?;

    let critical_failures: Vec<String> = result
        .records()
        .filter(|r| r.outcome.is_critical_failure())
        .filter(|r| policy.critical_probes.iter().any(|c| c == &r.name))
        .map(|r| r.name.clone())
        .collect();

    let severity = if !critical_failures.is_empty() {
        Severity::High
    } else if stats.failed > 0 || stats.warned > policy.warn_noise_threshold {
        Severity::Medium
    } else {
        Severity::Low
    };

    let readiness = readiness_for(pass_rate, critical_failures.len(), &policy.thresholds);
    let justification = justify(
        readiness,
        pass_rate,
        &critical_failures,
        &policy.thresholds,
        result.interrupted,
    );

    Ok(Verdict {
        severity,
        readiness,
        justification,
        critical_failures,
        pass_rate,
        thresholds: policy.thresholds,
    })
}

/// The readiness rule on its own: YES needs the high bar and no critical
/// failures, CONDITIONAL needs the mid bar and at most one.
pub fn readiness_for(pass_rate: f64, critical_failures: usize, thresholds: &Thresholds) -> Readiness {
    if pass_rate >= thresholds.high_bar && critical_failures == 0 {
        Readiness::Yes
    } else if pass_rate >= thresholds.mid_bar && critical_failures <= 1 {
        Readiness::Conditional
    } else {
        Readiness::No
    }
}

fn justify(
    readiness: Readiness,
    pass_rate: f64,
    critical_failures: &[String],
    thresholds: &Thresholds,
    interrupted: bool,
) -> String {
    let lead = match readiness {
        Readiness::Yes => {
            "All critical security controls are functioning properly. \
             System meets production security requirements."
        }
        Readiness::Conditional => {
            "Most security controls functioning, but minor issues need resolution \
             before production deployment."
        }
        Readiness::No if !critical_failures.is_empty() => {
            "Critical security controls are not functioning properly. \
             System requires fixes before production deployment."
        }
        Readiness::No => {
            "Too many security controls failed or could not be verified. \
             System is not ready for production deployment."
        }
    };

    let mut text = format!(
        "{lead} Pass rate {:.1}% (YES requires {:.1}%, CONDITIONAL requires {:.1}%).",
        pass_rate * 100.0,
        thresholds.high_bar * 100.0,
        thresholds.mid_bar * 100.0,
    );
    if !critical_failures.is_empty() {
        text.push_str(&format!(
            " Critical failures: {}.",
            critical_failures.join(", ")
        ));
    }
    if interrupted {
        text.push_str(" The run was interrupted; results are partial.");
    }
    text
}
