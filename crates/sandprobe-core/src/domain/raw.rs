//! Raw observation of one probe invocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Exit code reported when the target produced none (timeout, spawn
/// failure, transport error).
pub const EXIT_CODE_UNAVAILABLE: i32 = -1;

/// Kind of transport fault, used by judges to declare which faults they
/// tolerate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Timeout,
    Spawn,
    Unreachable,
    Protocol,
}

/// A transport-level failure observed while invoking the target.
///
/// Carried as data inside [`RawResult`]; never returned as an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportFault {
    /// The invocation did not complete within its bound and was killed.
    Timeout { limit_ms: u64 },
    /// The process could not be started.
    Spawn { reason: String },
    /// The remote service could not be reached.
    Unreachable { reason: String },
    /// The service answered with something that is not a valid response.
    Protocol { reason: String },
}

impl TransportFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            TransportFault::Timeout { .. } => FaultKind::Timeout,
            TransportFault::Spawn { .. } => FaultKind::Spawn,
            TransportFault::Unreachable { .. } => FaultKind::Unreachable,
            TransportFault::Protocol { .. } => FaultKind::Protocol,
        }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::Timeout { limit_ms } => write!(f, "timed out after {limit_ms}ms"),
            TransportFault::Spawn { reason } => write!(f, "spawn failed: {reason}"),
            TransportFault::Unreachable { reason } => write!(f, "target unreachable: {reason}"),
            TransportFault::Protocol { reason } => write!(f, "protocol error: {reason}"),
        }
    }
}

/// Captured output of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
    pub fault: Option<TransportFault>,
}

impl RawResult {
    /// A completed invocation.
    pub fn completed(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
        elapsed: Duration,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            elapsed,
            fault: None,
        }
    }

    /// An invocation that hit a transport fault.
    pub fn faulted(fault: TransportFault, elapsed: Duration) -> Self {
        let stderr = match &fault {
            TransportFault::Timeout { .. } => "Process timeout".to_string(),
            other => other.to_string(),
        };
        Self {
            stdout: String::new(),
            stderr,
            exit_code: EXIT_CODE_UNAVAILABLE,
            elapsed,
            fault: Some(fault),
        }
    }

    /// Attach output captured before the fault occurred.
    pub fn with_partial_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        let stderr = stderr.into();
        if !stderr.is_empty() {
            self.stderr = format!("{}\n{}", self.stderr, stderr);
        }
        self
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.fault, Some(TransportFault::Timeout { .. }))
    }

    /// stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stderr.is_empty() && !self.stdout.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }

    /// Short excerpt for reports, at most `max_chars` characters.
    pub fn snippet(&self, max_chars: usize) -> String {
        let combined = self.combined_output();
        let trimmed = combined.trim();
        if trimmed.chars().count() <= max_chars {
            return trimmed.to_string();
        }
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
