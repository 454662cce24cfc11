//! Normalized probe outcome taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a single probe execution.
///
/// The serialized vocabulary (`PASS`, `FAIL`, `PARTIAL`, `WARN`, `SKIP`,
/// `ERROR`) is consumed by dashboards and CI gating and must stay stable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The security expectation held.
    Pass,
    /// The target responded but violated the expectation.
    Fail,
    /// Some but not all expected markers were observed.
    Partial,
    /// Ambiguous or low-severity signal that needs a human look.
    Warn,
    /// Not executed (declared skipped).
    Skip,
    /// Transport or infrastructure failure; says nothing about security.
    Error,
}

impl Outcome {
    /// All outcomes in report order.
    pub const ALL: [Outcome; 6] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::Partial,
        Outcome::Warn,
        Outcome::Skip,
        Outcome::Error,
    ];

    /// Stable wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Partial => "PARTIAL",
            Outcome::Warn => "WARN",
            Outcome::Skip => "SKIP",
            Outcome::Error => "ERROR",
        }
    }

    /// Console marker used in the summary table.
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Pass => "[+]",
            Outcome::Fail => "[-]",
            Outcome::Partial => "[~]",
            Outcome::Warn => "[!]",
            Outcome::Skip => "[.]",
            Outcome::Error => "[X]",
        }
    }

    /// Outcomes that count against a critical probe.
    pub fn is_critical_failure(&self) -> bool {
        matches!(self, Outcome::Fail | Outcome::Error)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outcome::ALL
            .iter()
            .copied()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown outcome: {s}"))
    }
}
