use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::split::SplitPolicy;

/// Errors raised while declaring dependencies or building the case graph.
///
/// Every variant is fatal to the run: nothing is dispatched once one of these
/// is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("test '{0}' is defined more than once")]
    DuplicateTest(String),
    #[error("{}", not_found_message("test", .name, .suggestion.as_deref()))]
    UnknownTest {
        name: String,
        suggestion: Option<String>,
    },
    #[error(
        "test '{source_test}' depends on unknown test '{target}'{}",
        suggestion_suffix(.suggestion.as_deref())
    )]
    UnknownDependency {
        source_test: String,
        target: String,
        suggestion: Option<String>,
    },
    #[error("test '{0}' cannot depend on itself")]
    SelfDependency(String),
    #[error("partition '{0}' is not part of the configured system")]
    UnknownPartition(String),
    #[error("unknown split policy '{0}'")]
    UnknownPolicy(String),
    #[error("no tests match the selection")]
    EmptySelection,
    #[error(
        "test '{source_test}' depends on '{target}', but no matching cases of '{target}' exist in this run"
    )]
    NoMatchingCases { source_test: String, target: String },
    #[error("dependency cycle between test cases: {}", join_cycle(.cycle))]
    CaseCycle { cycle: Vec<CaseKey> },
    #[error("dependency cycle between tests: {}", join_cycle(.cycle))]
    TestCycle { cycle: Vec<String> },
}

/// Render a cycle as `a -> b -> a`.
pub fn join_cycle<T: fmt::Display>(cycle: &[T]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(|c| c.to_string()).collect();
    if let Some(first) = parts.first().cloned() {
        parts.push(first);
    }
    parts.join(" -> ")
}

fn suggestion_suffix(suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!(". Did you mean '{}'?", s),
        None => String::new(),
    }
}

fn not_found_message(kind: &str, name: &str, suggestion: Option<&str>) -> String {
    format!("{} '{}' not found{}", kind, name, suggestion_suffix(suggestion))
}

/// The coordinates of a case: which partition and which environment it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coords {
    pub partition: String,
    pub environ: String,
}

impl Coords {
    pub fn new(partition: impl Into<String>, environ: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            environ: environ.into(),
        }
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.partition, self.environ)
    }
}

/// Identity of a test case: test name plus coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseKey {
    pub test: String,
    pub partition: String,
    pub environ: String,
}

impl CaseKey {
    pub fn new(
        test: impl Into<String>,
        partition: impl Into<String>,
        environ: impl Into<String>,
    ) -> Self {
        Self {
            test: test.into(),
            partition: partition.into(),
            environ: environ.into(),
        }
    }

    pub fn coords(&self) -> Coords {
        Coords::new(self.partition.clone(), self.environ.clone())
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}+{}", self.test, self.partition, self.environ)
    }
}

/// Execution state of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CaseState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Aborted,
    /// Not attempted because a (transitive) dependency failed or was aborted.
    DependencyFailed,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseState::Pending => write!(f, "pending"),
            CaseState::Running => write!(f, "running"),
            CaseState::Succeeded => write!(f, "succeeded"),
            CaseState::Failed => write!(f, "failed"),
            CaseState::Skipped => write!(f, "skipped"),
            CaseState::Aborted => write!(f, "aborted"),
            CaseState::DependencyFailed => write!(f, "dependency-failed"),
        }
    }
}

impl CaseState {
    /// Whether this state is terminal: the case will not change state again
    /// during this run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaseState::Pending | CaseState::Running)
    }

    /// Failures that poison dependents.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CaseState::Failed | CaseState::Aborted | CaseState::DependencyFailed
        )
    }
}

/// One outgoing dependency declaration of a test.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub target: String,
    pub how: SplitPolicy,
}

/// A test definition.
///
/// `valid_systems` holds partition patterns (`*`, `sys:*`, `sys:part` or a
/// bare partition name) and `valid_prog_environs` holds environment patterns.
/// A (partition, environment) pair is valid when both lists match.
#[derive(Debug, Clone, Default)]
pub struct Test {
    pub name: String,
    pub valid_systems: Vec<String>,
    pub valid_prog_environs: Vec<String>,
    /// Shell command executed by the shell runner
    pub command: Option<String>,
    pub tags: Vec<String>,
    pub(crate) dependencies: Vec<Dependency>,
}

impl Test {
    /// A test valid on every partition and environment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid_systems: vec!["*".to_string()],
            valid_prog_environs: vec!["*".to_string()],
            ..Self::default()
        }
    }

    pub fn with_systems<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.valid_systems = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_environs<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.valid_prog_environs = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Outgoing dependency declarations, in declaration order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Names of the tests this test depends on, deduplicated, in declaration order.
    pub fn dependency_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for dep in &self.dependencies {
            if !out.contains(&dep.target) {
                out.push(dep.target.clone());
            }
        }
        out
    }
}

/// Name and tag filters narrowing which tests a run selects.
///
/// `names` keeps only the listed tests, `exclude` drops tests by name, and
/// every pattern in `tags` must fully match at least one tag of a test.
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pub names: Vec<String>,
    pub exclude: Vec<String>,
    pub tags: Vec<Regex>,
}

impl TestFilter {
    /// Build a filter, compiling tag patterns as anchored regular expressions.
    pub fn new(
        names: &[String],
        exclude: &[String],
        tags: &[String],
    ) -> Result<Self, regex::Error> {
        let tags = tags
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names: names.to_vec(),
            exclude: exclude.to_vec(),
            tags,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.exclude.is_empty() && self.tags.is_empty()
    }

    fn matches(&self, test: &Test) -> bool {
        if !self.names.is_empty() && !self.names.contains(&test.name) {
            return false;
        }
        if self.exclude.contains(&test.name) {
            return false;
        }
        self.tags
            .iter()
            .all(|re| test.tags.iter().any(|tag| re.is_match(tag)))
    }
}

/// The set of tests known to a run, in definition order.
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    tests: Vec<Test>,
    index: HashMap<String, usize>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test. Names must be unique.
    ///
    /// Dependencies already present on `test` are discarded; declare them via
    /// [`TestRegistry::depends_on`] so their targets are validated.
    pub fn add_test(&mut self, mut test: Test) -> Result<(), GraphError> {
        if self.index.contains_key(&test.name) {
            return Err(GraphError::DuplicateTest(test.name));
        }
        test.dependencies.clear();
        self.index.insert(test.name.clone(), self.tests.len());
        self.tests.push(test);
        Ok(())
    }

    /// Declare that `source` depends on `target`, split according to `how`.
    pub fn depends_on(
        &mut self,
        source: &str,
        target: &str,
        how: SplitPolicy,
    ) -> Result<(), GraphError> {
        let src_idx = *self
            .index
            .get(source)
            .ok_or_else(|| self.not_found(source))?;
        if !self.index.contains_key(target) {
            return Err(GraphError::UnknownDependency {
                source_test: source.to_string(),
                target: target.to_string(),
                suggestion: self.suggest(target),
            });
        }
        if source == target {
            return Err(GraphError::SelfDependency(source.to_string()));
        }
        self.tests[src_idx].dependencies.push(Dependency {
            target: target.to_string(),
            how,
        });
        Ok(())
    }

    pub fn get_test(&self, name: &str) -> Option<&Test> {
        self.index.get(name).map(|&i| &self.tests[i])
    }

    /// Look up a test, returning an error with a did-you-mean suggestion if not found.
    pub fn get_test_or_err(&self, name: &str) -> Result<&Test, GraphError> {
        self.get_test(name).ok_or_else(|| self.not_found(name))
    }

    /// Position of a test in definition order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn tests(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Names of the tests passing `filter`, in definition order.
    ///
    /// Names given to the filter, selected or excluded, must be known. A
    /// non-empty filter that leaves nothing selected is an error. Tests the
    /// selection depends on are pulled back in when the graph is built, even
    /// if excluded here.
    pub fn select(&self, filter: &TestFilter) -> Result<Vec<String>, GraphError> {
        for name in filter.names.iter().chain(&filter.exclude) {
            self.get_test_or_err(name)?;
        }
        let selected: Vec<String> = self
            .tests
            .iter()
            .filter(|t| filter.matches(t))
            .map(|t| t.name.clone())
            .collect();
        if selected.is_empty() && !filter.is_empty() {
            return Err(GraphError::EmptySelection);
        }
        Ok(selected)
    }

    fn not_found(&self, name: &str) -> GraphError {
        GraphError::UnknownTest {
            name: name.to_string(),
            suggestion: self.suggest(name),
        }
    }

    fn suggest(&self, name: &str) -> Option<String> {
        self.tests
            .iter()
            .map(|t| t.name.as_str())
            .filter(|candidate| is_similar(name, candidate))
            .min_by_key(|candidate| levenshtein(name, candidate))
            .map(|s| s.to_string())
    }
}

/// Compute Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];
    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// Prefix match either way, or edit distance of at most 2.
fn is_similar(query: &str, candidate: &str) -> bool {
    if candidate.starts_with(query) || query.starts_with(candidate) {
        return true;
    }
    levenshtein(query, candidate) <= 2
}
