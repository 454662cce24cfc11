//! Judges: classification strategies that turn a [`RawResult`] into an
//! [`Outcome`].
//!
//! Every probe carries its own judge, so the executor stays generic and does
//! no string matching itself. [`RuleJudge`] is the declarative form used by
//! the builtin battery and by probes loaded from configuration: an ordered
//! list of `(predicate, outcome)` rules evaluated first-match-wins, with a
//! fallback outcome. [`FnJudge`] wraps an arbitrary closure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{HarnessError, Result};
use super::outcome::Outcome;
use super::raw::{FaultKind, RawResult, TransportFault};

/// Classification strategy attached to a probe.
pub trait Judge: Send + Sync + fmt::Debug {
    /// Classify a raw result. Only called when there is no fault, or the
    /// fault is one this judge [`tolerates`](Judge::tolerates).
    fn judge(&self, raw: &RawResult) -> Outcome;

    /// Whether this judge knows how to classify a result carrying `fault`.
    /// Untolerated faults become [`Outcome::Error`] without consulting the
    /// judge.
    fn tolerates(&self, _fault: &TransportFault) -> bool {
        false
    }

    /// Reject malformed judge definitions before the run starts.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Which captured stream a predicate looks at.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Stdout,
    Stderr,
    #[default]
    Either,
}

impl Stream {
    fn select(&self, raw: &RawResult) -> String {
        match self {
            Stream::Stdout => raw.stdout.clone(),
            Stream::Stderr => raw.stderr.clone(),
            Stream::Either => raw.combined_output(),
        }
    }
}

/// A regular expression compiled once when the predicate is built.
///
/// Serializes as its source text. An invalid source is kept so that
/// [`Judge::validate`] can report it; it never matches.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    compiled: std::result::Result<Regex, regex::Error>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source);
        Self { source, compiled }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.as_ref().is_ok_and(|re| re.is_match(text))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.source, f)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl From<String> for Pattern {
    fn from(source: String) -> Self {
        Pattern::new(source)
    }
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Self {
        Pattern::new(source)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Pattern::new)
    }
}

/// A condition over a raw result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    Contains {
        #[serde(default)]
        stream: Stream,
        needle: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// Regular expression match.
    Matches {
        #[serde(default)]
        stream: Stream,
        pattern: Pattern,
    },
    CountAtLeast {
        #[serde(default)]
        stream: Stream,
        needle: String,
        n: usize,
    },
    CountAtMost {
        #[serde(default)]
        stream: Stream,
        needle: String,
        n: usize,
    },
    ExitCode {
        code: i32,
    },
    ExitNonZero,
    ElapsedUnder {
        ms: u64,
    },
    Faulted {
        kind: FaultKind,
    },
    /// A file the probe was expected to leave behind exists.
    FileExists {
        path: PathBuf,
    },
    All {
        of: Vec<Predicate>,
    },
    Any {
        of: Vec<Predicate>,
    },
    Not {
        inner: Box<Predicate>,
    },
}

impl Predicate {
    pub fn stdout_contains(needle: impl Into<String>) -> Self {
        Predicate::Contains {
            stream: Stream::Stdout,
            needle: needle.into(),
            ignore_case: false,
        }
    }

    pub fn stderr_contains(needle: impl Into<String>) -> Self {
        Predicate::Contains {
            stream: Stream::Stderr,
            needle: needle.into(),
            ignore_case: false,
        }
    }

    pub fn output_contains(needle: impl Into<String>) -> Self {
        Predicate::Contains {
            stream: Stream::Either,
            needle: needle.into(),
            ignore_case: false,
        }
    }

    pub fn exit_code(code: i32) -> Self {
        Predicate::ExitCode { code }
    }

    pub fn elapsed_under(bound: Duration) -> Self {
        Predicate::ElapsedUnder {
            ms: bound.as_millis() as u64,
        }
    }

    pub fn all(of: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::All {
            of: of.into_iter().collect(),
        }
    }

    pub fn any(of: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Any {
            of: of.into_iter().collect(),
        }
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not {
            inner: Box::new(inner),
        }
    }

    /// Evaluate against a raw result.
    pub fn holds(&self, raw: &RawResult) -> bool {
        match self {
            Predicate::Contains {
                stream,
                needle,
                ignore_case,
            } => {
                let text = stream.select(raw);
                if *ignore_case {
                    text.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    text.contains(needle.as_str())
                }
            }
            Predicate::Matches { stream, pattern } => pattern.is_match(&stream.select(raw)),
            Predicate::CountAtLeast { stream, needle, n } => {
                stream.select(raw).matches(needle.as_str()).count() >= *n
            }
            Predicate::CountAtMost { stream, needle, n } => {
                stream.select(raw).matches(needle.as_str()).count() <= *n
            }
            Predicate::ExitCode { code } => raw.exit_code == *code,
            Predicate::ExitNonZero => raw.exit_code != 0,
            Predicate::ElapsedUnder { ms } => raw.elapsed < Duration::from_millis(*ms),
            Predicate::Faulted { kind } => raw.fault.as_ref().map(|f| f.kind()) == Some(*kind),
            Predicate::FileExists { path } => path.exists(),
            Predicate::All { of } => of.iter().all(|p| p.holds(raw)),
            Predicate::Any { of } => of.iter().any(|p| p.holds(raw)),
            Predicate::Not { inner } => !inner.holds(raw),
        }
    }

    /// Rewrite every string-valued field (needles, patterns, paths) through `f`.
    pub fn map_text(&self, f: &dyn Fn(&str) -> String) -> Predicate {
        match self {
            Predicate::Contains {
                stream,
                needle,
                ignore_case,
            } => Predicate::Contains {
                stream: *stream,
                needle: f(needle),
                ignore_case: *ignore_case,
            },
            Predicate::Matches { stream, pattern } => Predicate::Matches {
                stream: *stream,
                pattern: Pattern::new(f(pattern.as_str())),
            },
            Predicate::CountAtLeast { stream, needle, n } => Predicate::CountAtLeast {
                stream: *stream,
                needle: f(needle),
                n: *n,
            },
            Predicate::CountAtMost { stream, needle, n } => Predicate::CountAtMost {
                stream: *stream,
                needle: f(needle),
                n: *n,
            },
            Predicate::FileExists { path } => Predicate::FileExists {
                path: PathBuf::from(f(&path.to_string_lossy())),
            },
            Predicate::All { of } => Predicate::All {
                of: of.iter().map(|p| p.map_text(f)).collect(),
            },
            Predicate::Any { of } => Predicate::Any {
                of: of.iter().map(|p| p.map_text(f)).collect(),
            },
            Predicate::Not { inner } => Predicate::Not {
                inner: Box::new(inner.map_text(f)),
            },
            other => other.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Predicate::Matches { pattern, .. } => match &pattern.compiled {
                Ok(_) => Ok(()),
                Err(e) => Err(HarnessError::config(format!(
                    "invalid pattern {:?}: {e}",
                    pattern.as_str()
                ))),
            },
            Predicate::Contains { needle, .. }
            | Predicate::CountAtLeast { needle, .. }
            | Predicate::CountAtMost { needle, .. }
                if needle.is_empty() =>
            {
                Err(HarnessError::config("predicate needle must not be empty"))
            }
            Predicate::All { of } | Predicate::Any { of } => {
                if of.is_empty() {
                    return Err(HarnessError::config(
                        "all/any predicate needs at least one member",
                    ));
                }
                of.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not { inner } => inner.validate(),
            _ => Ok(()),
        }
    }
}

/// One `(predicate, outcome)` rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub when: Predicate,
    pub then: Outcome,
}

/// Declarative, first-match-wins judge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleJudge {
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Outcome when no rule matches.
    pub otherwise: Outcome,

    /// Fault kinds this judge classifies itself instead of yielding ERROR.
    #[serde(default)]
    pub tolerate: Vec<FaultKind>,
}

impl RuleJudge {
    /// Judge with no rules that always yields `otherwise`.
    pub fn otherwise(otherwise: Outcome) -> Self {
        Self {
            rules: Vec::new(),
            otherwise,
            tolerate: Vec::new(),
        }
    }

    /// Append a rule.
    pub fn when(mut self, predicate: Predicate, then: Outcome) -> Self {
        self.rules.push(Rule {
            when: predicate,
            then,
        });
        self
    }

    /// Tolerate a fault kind.
    pub fn tolerating(mut self, kind: FaultKind) -> Self {
        if !self.tolerate.contains(&kind) {
            self.tolerate.push(kind);
        }
        self
    }

    /// Rewrite all rule texts through `f` (placeholder expansion).
    pub fn map_text(&self, f: &dyn Fn(&str) -> String) -> RuleJudge {
        RuleJudge {
            rules: self
                .rules
                .iter()
                .map(|r| Rule {
                    when: r.when.map_text(f),
                    then: r.then,
                })
                .collect(),
            otherwise: self.otherwise,
            tolerate: self.tolerate.clone(),
        }
    }
}

impl Judge for RuleJudge {
    fn judge(&self, raw: &RawResult) -> Outcome {
        self.rules
            .iter()
            .find(|r| r.when.holds(raw))
            .map(|r| r.then)
            .unwrap_or(self.otherwise)
    }

    fn tolerates(&self, fault: &TransportFault) -> bool {
        self.tolerate.contains(&fault.kind())
    }

    fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(|r| r.when.validate())
    }
}

/// Judge backed by a closure.
pub struct FnJudge<F> {
    label: String,
    f: F,
    tolerate: Vec<FaultKind>,
}

impl<F> FnJudge<F>
where
    F: Fn(&RawResult) -> Outcome + Send + Sync,
{
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
            tolerate: Vec::new(),
        }
    }

    pub fn tolerating(mut self, kind: FaultKind) -> Self {
        self.tolerate.push(kind);
        self
    }
}

impl<F> fmt::Debug for FnJudge<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJudge")
            .field("label", &self.label)
            .field("tolerate", &self.tolerate)
            .finish()
    }
}

impl<F> Judge for FnJudge<F>
where
    F: Fn(&RawResult) -> Outcome + Send + Sync,
{
    fn judge(&self, raw: &RawResult) -> Outcome {
        (self.f)(raw)
    }

    fn tolerates(&self, fault: &TransportFault) -> bool {
        self.tolerate.contains(&fault.kind())
    }
}
