//! Case space enumeration.
//!
//! A test's cases are the (partition, environment) pairs that its
//! `valid_systems`/`valid_prog_environs` patterns accept *and* that are active
//! in the current run. Enumeration order is stable: partitions in system
//! declaration order, then environments in partition declaration order.

use glob::Pattern;
use regex::Regex;
use std::collections::HashMap;

use crate::graph::{CaseKey, GraphError, Test, TestRegistry};

/// A partition taking part in the run, with the environments it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePartition {
    pub name: String,
    pub environs: Vec<String>,
}

/// The partitions and environments active for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSet {
    system: String,
    partitions: Vec<ActivePartition>,
}

impl ActiveSet {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            partitions: Vec::new(),
        }
    }

    /// Add a partition offering `environs`.
    pub fn with_partition<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        environs: impl IntoIterator<Item = S>,
    ) -> Self {
        self.partitions.push(ActivePartition {
            name: name.into(),
            environs: environs.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn partitions(&self) -> &[ActivePartition] {
        &self.partitions
    }

    /// Keep only the named partitions. An empty list keeps everything.
    pub fn restrict_partitions(&mut self, names: &[String]) -> Result<(), GraphError> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.partitions.iter().any(|p| &p.name == name) {
                return Err(GraphError::UnknownPartition(name.clone()));
            }
        }
        self.partitions.retain(|p| names.contains(&p.name));
        Ok(())
    }

    /// Keep only environments fully matching at least one of `filters`.
    /// An empty list keeps everything.
    pub fn restrict_environs(&mut self, filters: &[Regex]) {
        if filters.is_empty() {
            return;
        }
        for part in &mut self.partitions {
            part.environs
                .retain(|env| filters.iter().any(|re| re.is_match(env)));
        }
    }

    fn partition_matches(&self, pattern: &str, partition: &str) -> bool {
        if pattern.contains(':') {
            let fullname = format!("{}:{}", self.system, partition);
            glob_match(pattern, &fullname)
        } else {
            glob_match(pattern, partition)
        }
    }
}

/// Compile environment filters as anchored regular expressions.
pub fn environ_filters(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("^(?:{})$", p)))
        .collect()
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(candidate),
        Err(_) => pattern == candidate,
    }
}

/// The cases of one test that are feasible in this run.
pub fn enumerate_cases(test: &Test, active: &ActiveSet) -> Vec<CaseKey> {
    let mut cases = Vec::new();
    for part in active.partitions() {
        let part_ok = test
            .valid_systems
            .iter()
            .any(|pat| active.partition_matches(pat, &part.name));
        if !part_ok {
            continue;
        }
        for env in &part.environs {
            if test.valid_prog_environs.iter().any(|pat| glob_match(pat, env)) {
                cases.push(CaseKey::new(&test.name, &part.name, env));
            }
        }
    }
    cases
}

/// Feasible cases for every test in a registry.
#[derive(Debug, Clone, Default)]
pub struct CaseSpace {
    cases: HashMap<String, Vec<CaseKey>>,
}

impl CaseSpace {
    pub fn enumerate(registry: &TestRegistry, active: &ActiveSet) -> Self {
        let cases = registry
            .tests()
            .map(|t| (t.name.clone(), enumerate_cases(t, active)))
            .collect();
        Self { cases }
    }

    /// Cases of `test`, empty if it has none or is unknown.
    pub fn cases_of(&self, test: &str) -> &[CaseKey] {
        self.cases.get(test).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_feasible(&self, test: &str) -> bool {
        !self.cases_of(test).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> ActiveSet {
        ActiveSet::new("daint")
            .with_partition("login", ["builtin"])
            .with_partition("gpu", ["gnu", "cray"])
            .with_partition("mc", ["gnu", "cray", "intel"])
    }

    fn test_with(systems: &[&str], environs: &[&str]) -> Test {
        Test {
            name: "t".into(),
            valid_systems: systems.iter().map(|s| s.to_string()).collect(),
            valid_prog_environs: environs.iter().map(|s| s.to_string()).collect(),
            ..Test::default()
        }
    }

    fn coords(cases: &[CaseKey]) -> Vec<(String, String)> {
        cases
            .iter()
            .map(|c| (c.partition.clone(), c.environ.clone()))
            .collect()
    }

    #[test]
    fn test_wildcards_cover_everything_in_declaration_order() {
        let cases = enumerate_cases(&test_with(&["*"], &["*"]), &active());
        let got = coords(&cases);
        assert_eq!(got.len(), 6);
        assert_eq!(got[0], ("login".into(), "builtin".into()));
        assert_eq!(got[1], ("gpu".into(), "gnu".into()));
        assert_eq!(got[5], ("mc".into(), "intel".into()));
    }

    #[test]
    fn test_system_qualified_patterns() {
        let t = test_with(&["daint:gpu", "daint:mc"], &["gnu"]);
        assert_eq!(
            coords(&enumerate_cases(&t, &active())),
            vec![("gpu".into(), "gnu".into()), ("mc".into(), "gnu".into())]
        );

        let t = test_with(&["daint:*"], &["intel"]);
        assert_eq!(
            coords(&enumerate_cases(&t, &active())),
            vec![("mc".into(), "intel".into())]
        );

        let t = test_with(&["dom:*"], &["*"]);
        assert!(enumerate_cases(&t, &active()).is_empty());
    }

    #[test]
    fn test_bare_partition_names() {
        let t = test_with(&["gpu"], &["*"]);
        assert_eq!(enumerate_cases(&t, &active()).len(), 2);
    }

    #[test]
    fn test_environment_must_be_offered_by_partition() {
        let t = test_with(&["gpu"], &["intel"]);
        assert!(enumerate_cases(&t, &active()).is_empty());
    }

    #[test]
    fn test_restrict_partitions() {
        let mut a = active();
        a.restrict_partitions(&["mc".to_string()]).unwrap();
        let cases = enumerate_cases(&test_with(&["*"], &["*"]), &a);
        assert!(cases.iter().all(|c| c.partition == "mc"));
        assert_eq!(cases.len(), 3);
    }

    #[test]
    fn test_restrict_unknown_partition_is_error() {
        let mut a = active();
        let err = a.restrict_partitions(&["nope".to_string()]).unwrap_err();
        assert_eq!(err, GraphError::UnknownPartition("nope".into()));
    }

    #[test]
    fn test_restrict_environs_is_anchored() {
        let mut a = active();
        a.restrict_environs(&environ_filters(&["gn".to_string()]).unwrap());
        assert!(enumerate_cases(&test_with(&["*"], &["*"]), &a).is_empty());

        let mut a = active();
        a.restrict_environs(&environ_filters(&["gnu|intel".to_string()]).unwrap());
        let cases = enumerate_cases(&test_with(&["*"], &["*"]), &a);
        assert_eq!(cases.len(), 3);
    }

    #[test]
    fn test_case_space_feasibility() {
        let mut reg = TestRegistry::new();
        reg.add_test(Test::new("everywhere")).unwrap();
        reg.add_test(Test {
            name: "nowhere".into(),
            ..test_with(&["nowhere"], &["*"])
        })
        .unwrap();
        let space = CaseSpace::enumerate(&reg, &active());
        assert!(space.is_feasible("everywhere"));
        assert!(!space.is_feasible("nowhere"));
        assert!(space.cases_of("unknown").is_empty());
    }
}
