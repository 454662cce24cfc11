//! Local process transport.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use sandprobe_core::{CommandSpec, RawResult, TransportFault, EXIT_CODE_UNAVAILABLE};

use crate::invoke::TargetInvoker;

/// How long readers may keep draining after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Spawns `launcher ++ [program] ++ args` as a child process.
///
/// The launcher prefix lets the harness drive a service client (for
/// example a CLI that forwards the command to the execution service)
/// instead of executing probes directly. On unix each child leads its own
/// process group, and the whole group is killed when the invocation times
/// out or is dropped, so neither path orphans grandchildren.
#[derive(Debug, Clone, Default)]
pub struct ProcessTransport {
    launcher: Vec<String>,
    default_dir: Option<PathBuf>,
}

impl ProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Working directory used when a spec carries no hint.
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    fn argv<'a>(&'a self, spec: &'a CommandSpec) -> (&'a str, Vec<&'a str>) {
        let mut parts = self
            .launcher
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(spec.program.as_str()))
            .chain(spec.args.iter().map(String::as_str));
        // The chain always yields at least the program.
        let exe = parts.next().unwrap_or(spec.program.as_str());
        (exe, parts.collect())
    }
}

#[async_trait]
impl TargetInvoker for ProcessTransport {
    fn name(&self) -> &str {
        "process"
    }

    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> RawResult {
        let start = Instant::now();
        let (exe, args) = self.argv(spec);

        let mut cmd = Command::new(exe);
        cmd.args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = spec.working_dir.as_ref().or(self.default_dir.as_ref()) {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %exe, error = %e, "spawn failed");
                return RawResult::faulted(
                    TransportFault::Spawn {
                        reason: format!("{exe}: {e}"),
                    },
                    start.elapsed(),
                );
            }
        };

        let mut group = GroupGuard::new(&child);
        let stdout = Capture::default();
        let stderr = Capture::default();
        let mut out_reader = stdout.drain(child.stdout.take());
        let mut err_reader = stderr.drain(child.stderr.take());

        // Grandchildren holding the pipes open keep the invocation alive
        // until they exit or the bound expires.
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            let _ = tokio::join!(&mut out_reader, &mut err_reader);
            status
        })
        .await;

        match finished {
            Ok(Ok(status)) => {
                group.disarm();
                RawResult::completed(
                    stdout.text(),
                    stderr.text(),
                    exit_code(status),
                    start.elapsed(),
                )
            }
            Ok(Err(e)) => {
                group.kill();
                RawResult::faulted(
                    TransportFault::Spawn {
                        reason: format!("waiting on {exe}: {e}"),
                    },
                    start.elapsed(),
                )
                .with_partial_output(stdout.text(), stderr.text())
            }
            Err(_) => {
                let elapsed = start.elapsed();
                debug!(program = %exe, limit_ms = timeout.as_millis() as u64, "killing timed out process group");
                group.kill();
                reap(&mut child).await;
                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    tokio::join!(&mut out_reader, &mut err_reader)
                })
                .await;
                out_reader.abort();
                err_reader.abort();
                RawResult::faulted(
                    TransportFault::Timeout {
                        limit_ms: timeout.as_millis() as u64,
                    },
                    elapsed,
                )
                .with_partial_output(stdout.text(), stderr.text())
            }
        }
    }
}

/// Bytes read from one child stream so far.
#[derive(Debug, Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn drain<R>(&self, reader: Option<R>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = self.0.clone();
        tokio::spawn(async move {
            let Some(mut reader) = reader else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        })
    }

    fn text(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Kills the child's process group on drop unless disarmed.
///
/// Covers the interrupt path, where the invocation future is dropped
/// mid-flight and `kill_on_drop` alone would reach only the direct child.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group was created for this
    // child and the leader is not yet reaped, so the id cannot be reused.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Kill the direct child if the group signal missed it, then collect it.
async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(DRAIN_GRACE, child.wait()).await;
}

/// Exit code as reported, with signal deaths mapped the way shells do
/// (`128 + signal`) so they stay distinct from "no exit code".
fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(EXIT_CODE_UNAVAILABLE)
}
