//! Suite orchestration.
//!
//! Categories run in declaration order. Probes inside a sequential
//! category run one after another, since later probes may inspect sandbox
//! state left by earlier ones. A concurrent category fans its probes out
//! over a bounded worker pool and records them back in declaration order.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{warn, Instrument};
use uuid::Uuid;

use sandprobe_core::{
    obs, Category, CategoryResult, Outcome, Probe, ProbeRecord, Result, Scheduling, Suite,
    SuiteResult,
};

use crate::executor::ProbeExecutor;
use crate::invoke::TargetInvoker;

pub struct SuiteRunner {
    executor: Arc<ProbeExecutor>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SuiteRunner {
    pub fn new(invoker: Arc<dyn TargetInvoker>) -> Self {
        Self::from_executor(ProbeExecutor::new(invoker))
    }

    pub fn from_executor(executor: ProbeExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            shutdown: None,
        }
    }

    /// Stop scheduling probes once `shutdown` becomes `true`. Probes in
    /// flight at that moment are abandoned (their processes are killed)
    /// and recorded as ERROR.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn interrupted(&self) -> bool {
        is_set(self.shutdown.as_ref())
    }

    /// Validate `suite` against `critical`, then run it.
    ///
    /// The only error is a configuration error, raised before any probe
    /// touches the sandbox. Everything that goes wrong afterwards is folded
    /// into probe outcomes.
    pub async fn run(&self, suite: &Suite, critical: &[String]) -> Result<SuiteResult> {
        suite.validate(critical)?;

        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        Ok(self.run_validated(run_id, suite).instrument(span).await)
    }

    async fn run_validated(&self, run_id: Uuid, suite: &Suite) -> SuiteResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let digest = suite.digest();
        let run_label = run_id.to_string();
        obs::emit_suite_started(
            &run_label,
            suite.categories.len(),
            suite.probe_count(),
            &digest,
        );

        let mut categories = Vec::with_capacity(suite.categories.len());
        for category in &suite.categories {
            if self.interrupted() {
                break;
            }
            let concurrent = matches!(category.scheduling, Scheduling::Concurrent { .. });
            obs::emit_category_started(&category.name, category.probes.len(), concurrent);

            let result = match category.scheduling {
                Scheduling::Sequential => self.run_sequential(category).await,
                Scheduling::Concurrent { workers } => self.run_concurrent(category, workers).await,
            };

            obs::emit_category_finished(
                &result.category,
                result.count(Outcome::Pass),
                result.entries.len(),
            );
            if !result.entries.is_empty() {
                categories.push(result);
            }
        }

        let interrupted = self.interrupted();
        let result = SuiteResult::new(
            run_id,
            digest,
            categories,
            interrupted,
            started_at,
            clock.elapsed(),
        );
        if interrupted {
            obs::emit_suite_interrupted(
                &run_label,
                result.stats.total,
                suite.probe_count().saturating_sub(result.stats.total),
            );
        }
        obs::emit_suite_finished(&run_label, &result.stats, millis(result.duration));
        result
    }

    async fn run_sequential(&self, category: &Category) -> CategoryResult {
        let mut result = CategoryResult::new(&category.name);
        for probe in &category.probes {
            if self.interrupted() {
                break;
            }
            let record = run_one(&self.executor, probe, self.shutdown.clone()).await;
            obs::emit_probe_finished(&category.name, &record.name, record.outcome, millis(record.elapsed));
            result.push(record);
        }
        result
    }

    async fn run_concurrent(&self, category: &Category, workers: usize) -> CategoryResult {
        enum Slot {
            Pending,
            NotStarted,
            Done(ProbeRecord),
        }

        let sem = Arc::new(Semaphore::new(workers.max(1)));
        let mut join_set = JoinSet::new();
        for (idx, probe) in category.probes.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            let sem = Arc::clone(&sem);
            let shutdown = self.shutdown.clone();
            join_set.spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    if is_set(shutdown.as_ref()) {
                        return (idx, None);
                    }
                    (idx, Some(run_one(&executor, &probe, shutdown).await))
                }
                .in_current_span(),
            );
        }

        let mut slots: Vec<Slot> = category.probes.iter().map(|_| Slot::Pending).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Some(record))) => slots[idx] = Slot::Done(record),
                Ok((idx, None)) => slots[idx] = Slot::NotStarted,
                Err(e) => warn!(category = %category.name, error = %e, "probe task failed"),
            }
        }

        let mut result = CategoryResult::new(&category.name);
        for (probe, slot) in category.probes.iter().zip(slots) {
            let record = match slot {
                Slot::Done(record) => record,
                Slot::NotStarted => continue,
                Slot::Pending => ProbeRecord::without_result(
                    probe.name.clone(),
                    Outcome::Error,
                    "probe task failed",
                ),
            };
            obs::emit_probe_finished(&category.name, &record.name, record.outcome, millis(record.elapsed));
            result.push(record);
        }
        result
    }
}

/// Run one probe, abandoning it if shutdown is signalled meanwhile.
async fn run_one(
    executor: &ProbeExecutor,
    probe: &Probe,
    shutdown: Option<watch::Receiver<bool>>,
) -> ProbeRecord {
    let Some(mut rx) = shutdown else {
        return executor.run(probe).await;
    };
    let started = Instant::now();
    tokio::select! {
        record = executor.run(probe) => record,
        _ = wait_for_shutdown(&mut rx) => {
            executor.cleanup(probe).await;
            let mut record = ProbeRecord::without_result(probe.name.clone(), Outcome::Error, "interrupted");
            record.elapsed = started.elapsed();
            record
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: no shutdown can arrive any more.
            std::future::pending::<()>().await;
        }
    }
}

fn is_set(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.map(|rx| *rx.borrow()).unwrap_or(false)
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
