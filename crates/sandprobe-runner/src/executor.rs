//! Runs one probe through a transport and turns the raw result into a
//! [`ProbeRecord`].
//!
//! The executor owns the fault policy and failure containment and nothing
//! else: classification is always the probe's judge's business.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use sandprobe_core::report::SNIPPET_CHARS;
use sandprobe_core::{Outcome, Probe, ProbeRecord, RawResult, TransportFault, METRICS};

use crate::invoke::TargetInvoker;

/// Default slack on top of a probe's own timeout before the executor stops
/// waiting on a transport.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

pub struct ProbeExecutor {
    invoker: Arc<dyn TargetInvoker>,
    grace: Duration,
}

impl ProbeExecutor {
    pub fn new(invoker: Arc<dyn TargetInvoker>) -> Self {
        Self {
            invoker,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `probe`, converting any panic along the way into an ERROR record.
    pub async fn run(&self, probe: &Probe) -> ProbeRecord {
        match AssertUnwindSafe(self.run_inner(probe)).catch_unwind().await {
            Ok(record) => record,
            Err(payload) => {
                METRICS.inc_judge_panics();
                let msg = panic_message(payload.as_ref());
                warn!(probe = %probe.name, panic = %msg, "probe panicked");
                self.cleanup(probe).await;
                ProbeRecord::without_result(
                    probe.name.clone(),
                    Outcome::Error,
                    format!("probe panicked: {msg}"),
                )
            }
        }
    }

    async fn run_inner(&self, probe: &Probe) -> ProbeRecord {
        if let Some(reason) = &probe.skip {
            debug!(probe = %probe.name, reason = %reason, "probe skipped");
            return ProbeRecord::without_result(probe.name.clone(), Outcome::Skip, reason.clone());
        }

        if let Err(e) = self.prepare(probe).await {
            warn!(probe = %probe.name, error = %e, "probe preparation failed");
            self.cleanup(probe).await;
            return ProbeRecord::without_result(
                probe.name.clone(),
                Outcome::Error,
                format!("prepare failed: {e}"),
            );
        }

        let raw = self.invoke(probe).await;
        METRICS.inc_probes_executed();
        if let Some(fault) = &raw.fault {
            METRICS.inc_transport_faults();
            if matches!(fault, TransportFault::Timeout { .. }) {
                METRICS.inc_timeouts();
            }
        }

        let (outcome, note) = classify(probe, &raw);
        self.cleanup(probe).await;

        ProbeRecord {
            name: probe.name.clone(),
            outcome,
            elapsed: raw.elapsed,
            exit_code: Some(raw.exit_code),
            fault: raw.fault.clone(),
            note,
            snippet: raw.snippet(SNIPPET_CHARS),
        }
    }

    /// Invoke with an outer bound so a misbehaving transport cannot hold
    /// the run past `timeout + grace`.
    async fn invoke(&self, probe: &Probe) -> RawResult {
        let start = Instant::now();
        let bound = probe.timeout + self.grace;
        match tokio::time::timeout(bound, self.invoker.invoke(&probe.invocation, probe.timeout))
            .await
        {
            Ok(raw) => raw,
            Err(_) => RawResult::faulted(
                TransportFault::Timeout {
                    limit_ms: probe.timeout.as_millis() as u64,
                },
                start.elapsed(),
            ),
        }
    }

    /// Write fixtures, creating parent directories as needed.
    async fn prepare(&self, probe: &Probe) -> std::io::Result<()> {
        for fixture in &probe.fixtures {
            if let Some(parent) = fixture.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&fixture.path, fixture.contents.as_bytes()).await?;
        }
        Ok(())
    }

    /// Best-effort removal of cleanup paths.
    pub async fn cleanup(&self, probe: &Probe) {
        for path in &probe.cleanup {
            let result = match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
                Ok(_) => tokio::fs::remove_file(path).await,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(path = %path.display(), error = %e, "cleanup failed");
            }
        }
    }
}

/// Apply the fault policy, then the judge.
fn classify(probe: &Probe, raw: &RawResult) -> (Outcome, Option<String>) {
    let fault_note = raw.fault.as_ref().map(ToString::to_string);
    if let Some(fault) = &raw.fault {
        if !probe.judge.tolerates(fault) {
            return (Outcome::Error, fault_note);
        }
    }
    match std::panic::catch_unwind(AssertUnwindSafe(|| probe.judge.judge(raw))) {
        Ok(outcome) => (outcome, fault_note),
        Err(payload) => {
            METRICS.inc_judge_panics();
            let msg = panic_message(payload.as_ref());
            warn!(probe = %probe.name, panic = %msg, "judge panicked");
            (Outcome::Error, Some(format!("judge panicked: {msg}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
