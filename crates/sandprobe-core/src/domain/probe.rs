//! Probes, categories and suites.
//!
//! A [`Probe`] is immutable once built. Probes are grouped into
//! [`Category`]s, and the ordered list of categories forms a [`Suite`].
//! Probes can be built in code (the builtin battery) or declared in
//! configuration through [`ProbeDef`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::command::CommandSpec;
use super::error::{HarnessError, Result};
use super::judge::{Judge, RuleJudge};

/// Default per-probe timeout: a little above the 30s bound the target
/// service enforces itself, leaving room for teardown.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(35);

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// A file written into the sandbox before the probe is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub path: PathBuf,
    pub contents: String,
}

/// One declarative security test against the target service.
#[derive(Debug, Clone)]
pub struct Probe {
    pub category: String,
    pub name: String,
    pub invocation: CommandSpec,
    pub timeout: Duration,
    pub judge: Arc<dyn Judge>,

    /// Written before invocation.
    pub fixtures: Vec<Fixture>,

    /// Removed (best effort) after judging.
    pub cleanup: Vec<PathBuf>,

    /// When set, the probe is recorded as SKIP without being invoked.
    pub skip: Option<String>,
}

impl Probe {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        invocation: CommandSpec,
        judge: impl Judge + 'static,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            invocation,
            timeout: DEFAULT_PROBE_TIMEOUT,
            judge: Arc::new(judge),
            fixtures: Vec::new(),
            cleanup: Vec::new(),
            skip: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a fixture. The fixture path is also scheduled for cleanup.
    pub fn with_fixture(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let path = path.into();
        self.cleanup.push(path.clone());
        self.fixtures.push(Fixture {
            path,
            contents: contents.into(),
        });
        self
    }

    pub fn with_cleanup(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup.push(path.into());
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    /// Structural checks. Called for every probe before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::config(format!(
                "probe in category {:?} has an empty name",
                self.category
            )));
        }
        if self.category.trim().is_empty() {
            return Err(HarnessError::config(format!(
                "probe {:?} has an empty category",
                self.name
            )));
        }
        if self.invocation.program.trim().is_empty() {
            return Err(HarnessError::config(format!(
                "probe {:?} has an empty program",
                self.name
            )));
        }
        if self.timeout.is_zero() {
            return Err(HarnessError::config(format!(
                "probe {:?} has a zero timeout",
                self.name
            )));
        }
        self.judge
            .validate()
            .map_err(|e| HarnessError::config(format!("probe {:?}: {e}", self.name)))
    }
}

// ---------------------------------------------------------------------------
// Categories and suites
// ---------------------------------------------------------------------------

/// How a category schedules its probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// One after another, in declaration order.
    #[default]
    Sequential,
    /// In parallel through a bounded pool of `workers` tasks.
    Concurrent { workers: usize },
}

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub scheduling: Scheduling,
    pub probes: Vec<Probe>,
}

impl Category {
    pub fn sequential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheduling: Scheduling::Sequential,
            probes: Vec::new(),
        }
    }

    pub fn concurrent(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            scheduling: Scheduling::Concurrent { workers },
            probes: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }
}

/// An ordered list of categories.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub categories: Vec<Category>,
}

impl Suite {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// Append `probe` to the category it names, creating a sequential
    /// category at the end if none exists yet.
    pub fn push_probe(&mut self, probe: Probe) {
        match self
            .categories
            .iter_mut()
            .find(|c| c.name == probe.category)
        {
            Some(cat) => cat.probes.push(probe),
            None => {
                let name = probe.category.clone();
                self.categories
                    .push(Category::sequential(name).with_probe(probe));
            }
        }
    }

    /// Keep only the named categories (case-insensitive). An empty filter
    /// keeps everything.
    pub fn retain_categories(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        self.categories
            .retain(|c| names.iter().any(|n| n.eq_ignore_ascii_case(&c.name)));
    }

    pub fn probes(&self) -> impl Iterator<Item = &Probe> {
        self.categories.iter().flat_map(|c| c.probes.iter())
    }

    pub fn probe_count(&self) -> usize {
        self.categories.iter().map(|c| c.probes.len()).sum()
    }

    pub fn contains_probe(&self, name: &str) -> bool {
        self.probes().any(|p| p.name == name)
    }

    /// SHA-256 over the ordered `category\0probe` names. Stable across runs
    /// with the same battery, so reports can be matched to a suite revision.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for cat in &self.categories {
            for probe in &cat.probes {
                hasher.update(cat.name.as_bytes());
                hasher.update(b"\0");
                hasher.update(probe.name.as_bytes());
                hasher.update(b"\0");
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Reject suites that would produce a meaningless verdict.
    ///
    /// Every critical name must refer to a probe in the suite. Category
    /// names must be unique, as must probe names across the whole suite,
    /// and every probe must pass [`Probe::validate`].
    pub fn validate(&self, critical: &[String]) -> Result<()> {
        if self.probe_count() == 0 {
            return Err(HarnessError::config("suite contains no probes"));
        }

        let mut seen = HashSet::new();
        let mut categories = HashSet::new();
        for cat in &self.categories {
            if !categories.insert(cat.name.as_str()) {
                return Err(HarnessError::config(format!(
                    "duplicate category name {:?}",
                    cat.name
                )));
            }
            if let Scheduling::Concurrent { workers: 0 } = cat.scheduling {
                return Err(HarnessError::config(format!(
                    "category {:?} needs at least one worker",
                    cat.name
                )));
            }
            for probe in &cat.probes {
                probe.validate()?;
                if probe.category != cat.name {
                    return Err(HarnessError::config(format!(
                        "probe {:?} declares category {:?} but is listed under {:?}",
                        probe.name, probe.category, cat.name
                    )));
                }
                if !seen.insert(probe.name.as_str()) {
                    return Err(HarnessError::config(format!(
                        "duplicate probe name {:?}",
                        probe.name
                    )));
                }
            }
        }

        for name in critical {
            if !seen.contains(name.as_str()) {
                return Err(HarnessError::config(format!(
                    "critical probe {name:?} is not part of the suite"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Declarative probes
// ---------------------------------------------------------------------------

/// Values substituted into declarative probe text.
///
/// `{sandbox}` expands to the sandbox directory and `{run_tag}` to a short
/// per-run identifier used to keep generated file names from colliding.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub sandbox: PathBuf,
    pub run_tag: String,
}

impl Placeholders {
    pub fn new(sandbox: impl Into<PathBuf>, run_tag: impl Into<String>) -> Self {
        Self {
            sandbox: sandbox.into(),
            run_tag: run_tag.into(),
        }
    }

    pub fn expand(&self, text: &str) -> String {
        text.replace("{sandbox}", &self.sandbox.to_string_lossy())
            .replace("{run_tag}", &self.run_tag)
    }

    /// Expand, then resolve relative paths against the sandbox.
    pub fn resolve(&self, text: &str) -> PathBuf {
        let expanded = PathBuf::from(self.expand(text));
        if expanded.is_absolute() {
            expanded
        } else {
            self.sandbox.join(expanded)
        }
    }

    pub fn sandbox(&self) -> &Path {
        &self.sandbox
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureDef {
    pub path: String,
    pub contents: String,
}

/// Serde form of a probe, as written under `[[probes]]` in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeDef {
    pub category: String,
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub fixtures: Vec<FixtureDef>,
    #[serde(default)]
    pub cleanup: Vec<String>,
    #[serde(default)]
    pub skip: Option<String>,
    pub judge: RuleJudge,
}

impl ProbeDef {
    /// Build the runtime probe, expanding placeholders everywhere text
    /// appears (arguments, environment, fixture bodies, judge needles).
    pub fn into_probe(self, ph: &Placeholders, default_timeout: Duration) -> Probe {
        let expand = |s: &str| ph.expand(s);

        let mut invocation = CommandSpec::new(ph.expand(&self.program))
            .args(self.args.iter().map(|a| ph.expand(a)));
        for (k, v) in &self.env {
            invocation = invocation.env(k.clone(), ph.expand(v));
        }
        if let Some(dir) = &self.working_dir {
            invocation = invocation.working_dir(ph.resolve(dir));
        }

        let timeout = self
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);

        let mut probe = Probe::new(
            self.category,
            self.name,
            invocation,
            self.judge.map_text(&expand),
        )
        .with_timeout(timeout);

        for fixture in &self.fixtures {
            probe = probe.with_fixture(ph.resolve(&fixture.path), ph.expand(&fixture.contents));
        }
        for path in &self.cleanup {
            probe = probe.with_cleanup(ph.resolve(path));
        }
        if let Some(reason) = self.skip {
            probe = probe.skipped(reason);
        }
        probe
    }
}
