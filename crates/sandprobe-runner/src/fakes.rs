//! In-memory transport fake (testing only).
//!
//! [`ScriptedInvoker`] answers invocations with canned [`RawResult`]s so
//! the executor, orchestrator and evaluator can be exercised without a
//! live target service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use sandprobe_core::{CommandSpec, RawResult, TransportFault};

use crate::invoke::TargetInvoker;

/// One canned response.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Real time the fake waits before answering.
    pub latency: Duration,
    /// Elapsed time reported in the result, when different from `latency`.
    pub reported_elapsed: Option<Duration>,
    pub fault: Option<TransportFault>,
    pub panics: bool,
}

impl Scripted {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            latency: Duration::ZERO,
            reported_elapsed: None,
            fault: None,
            panics: false,
        }
    }

    pub fn fault(fault: TransportFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::ok("")
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::ok("")
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_reported_elapsed(mut self, elapsed: Duration) -> Self {
        self.reported_elapsed = Some(elapsed);
        self
    }
}

/// Transport fake keyed by substrings of the invoked command line.
///
/// The first rule whose key occurs in [`CommandSpec::display_line`] wins;
/// anything unmatched gets the default response (empty output, exit 0).
/// Latency longer than the invocation timeout produces a timeout fault, as
/// a real transport would.
pub struct ScriptedInvoker {
    rules: Mutex<Vec<(String, Scripted)>>,
    default: Scripted,
    calls: Mutex<Vec<CommandSpec>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default: Scripted::ok(""),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on(self, key: impl Into<String>, response: Scripted) -> Self {
        lock(&self.rules).push((key.into(), response));
        self
    }

    pub fn with_default(mut self, response: Scripted) -> Self {
        self.default = response;
        self
    }

    /// Every spec invoked so far, in call order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Highest number of invocations that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, spec: &CommandSpec) -> Scripted {
        let line = spec.display_line();
        lock(&self.rules)
            .iter()
            .find(|(key, _)| line.contains(key.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetInvoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> RawResult {
        lock(&self.calls).push(spec.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let response = self.lookup(spec);
        if response.panics {
            panic!("scripted transport panic for {}", spec.display_line());
        }

        if response.latency > timeout {
            tokio::time::sleep(timeout).await;
            return RawResult::faulted(
                TransportFault::Timeout {
                    limit_ms: timeout.as_millis() as u64,
                },
                timeout,
            );
        }
        if !response.latency.is_zero() {
            tokio::time::sleep(response.latency).await;
        }

        let elapsed = response.reported_elapsed.unwrap_or(response.latency);
        match response.fault {
            Some(fault) => RawResult::faulted(fault, elapsed)
                .with_partial_output(response.stdout, response.stderr),
            None => RawResult::completed(response.stdout, response.stderr, response.exit_code, elapsed),
        }
    }
}
