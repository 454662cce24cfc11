//! Sandprobe runner.
//!
//! Everything that touches the target service: the invocation seam and its
//! transports, the per-probe executor, the suite orchestrator and the
//! builtin probe battery.

pub mod catalog;
pub mod executor;
pub mod fakes;
pub mod invoke;
pub mod suite;
pub mod transport;

pub use catalog::{assemble_suite, builtin_suite, critical_probes, default_critical};
pub use executor::{ProbeExecutor, DEFAULT_GRACE};
pub use invoke::TargetInvoker;
pub use suite::SuiteRunner;
pub use transport::{build_invoker, HttpTransport, ProcessTransport};
