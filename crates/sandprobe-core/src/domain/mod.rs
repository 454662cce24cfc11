//! Domain model for Sandprobe.
//!
//! - `Probe` / `Category` / `Suite`: what to run
//! - `CommandSpec` / `RawResult`: what crosses the invocation boundary
//! - `Judge`: how a raw result becomes an `Outcome`
//! - `ProbeRecord` / `CategoryResult` / `SuiteResult`: what a run produced

pub mod command;
pub mod error;
pub mod judge;
pub mod outcome;
pub mod probe;
pub mod raw;
pub mod result;

pub use command::CommandSpec;
pub use error::{HarnessError, Result};
pub use judge::{FnJudge, Judge, Pattern, Predicate, Rule, RuleJudge, Stream};
pub use outcome::Outcome;
pub use probe::{
    Category, Fixture, FixtureDef, Placeholders, Probe, ProbeDef, Scheduling, Suite,
    DEFAULT_PROBE_TIMEOUT,
};
pub use raw::{FaultKind, RawResult, TransportFault, EXIT_CODE_UNAVAILABLE};
pub use result::{CategoryResult, ProbeRecord, SuiteResult, SuiteStats};
