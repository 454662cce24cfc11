//! The target invocation seam.

use async_trait::async_trait;
use std::time::Duration;

use sandprobe_core::{CommandSpec, RawResult};

/// Executes one command against the target service.
///
/// Implementations never fail for expected conditions: non-zero exits,
/// stderr output, timeouts and unreachable services all come back as
/// [`RawResult`] fields or a [`TransportFault`](sandprobe_core::TransportFault).
/// Errors that prevent a transport from existing at all surface from its
/// constructor instead.
#[async_trait]
pub trait TargetInvoker: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &str;

    /// Run `spec`, giving up after `timeout`.
    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> RawResult;
}
