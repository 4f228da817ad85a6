use serde::Serialize;

use crate::casegraph::CaseGraph;
use crate::cycle::{NamedGraph, find_cycle, find_cycles};
use crate::enumerate::{ActiveSet, CaseSpace};
use crate::graph::{CaseKey, GraphError, TestRegistry};

/// Result of checking a suite's dependency graph for issues
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    /// Set when the suite could not be materialized at all (declaration errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_cycle: Option<Vec<CaseKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_cycle: Option<Vec<String>>,
    /// Every cyclic strongly connected component of the test-level relation
    pub cyclic_tests: Vec<Vec<String>>,
    /// Tests with no feasible cases in the active run
    pub infeasible: Vec<String>,
    pub case_count: usize,
    pub edge_count: usize,
}

/// Reject graphs that are cyclic at the case level or at the test level.
///
/// The case-level check runs first, so a configuration that is cyclic at both
/// granularities reports the case cycle.
pub fn validate(graph: &CaseGraph) -> Result<(), GraphError> {
    if let Some(cycle) = find_case_cycle(graph) {
        return Err(GraphError::CaseCycle { cycle });
    }
    if let Some(cycle) = find_test_cycle(graph) {
        return Err(GraphError::TestCycle { cycle });
    }
    Ok(())
}

/// First cycle among test cases, in dependency-edge order.
pub fn find_case_cycle(graph: &CaseGraph) -> Option<Vec<CaseKey>> {
    let adj = graph.adjacency();
    find_cycle(adj.len(), &adj).map(|ids| {
        let keys: Vec<CaseKey> = graph.cases().cloned().collect();
        ids.into_iter().map(|i| keys[i].clone()).collect()
    })
}

/// Collapse every case onto its test. Edge multiplicity is dropped.
///
/// Must be computed over the complete case graph: a test-level cycle may only
/// appear once the edges of several declarations are combined.
pub fn collapse_to_tests(graph: &CaseGraph) -> NamedGraph {
    let mut tests = NamedGraph::new();
    for name in graph.test_names() {
        tests.add_node(name);
    }
    for (src, dst) in graph.edges() {
        tests.add_edge(&src.test, &dst.test);
    }
    tests
}

/// First cycle in the collapsed test-level relation.
pub fn find_test_cycle(graph: &CaseGraph) -> Option<Vec<String>> {
    collapse_to_tests(graph).find_cycle()
}

/// All cyclic components of the collapsed test-level relation, members in
/// definition order.
pub fn cyclic_test_components(graph: &CaseGraph) -> Vec<Vec<String>> {
    let tests = collapse_to_tests(graph);
    let mut out: Vec<Vec<String>> = find_cycles(tests.num_nodes(), tests.adjacency())
        .into_iter()
        .map(|mut scc| {
            scc.members.sort();
            scc.members
                .into_iter()
                .map(|id| tests.get_name(id).to_string())
                .collect()
        })
        .collect();
    out.sort();
    out
}

/// Run every check and return a summary instead of failing fast.
pub fn check_all(
    registry: &TestRegistry,
    active: &ActiveSet,
    selection: &[String],
) -> CheckResult {
    let space = CaseSpace::enumerate(registry, active);
    let infeasible: Vec<String> = registry
        .tests()
        .filter(|t| !space.is_feasible(&t.name))
        .map(|t| t.name.clone())
        .collect();

    let graph = match CaseGraph::build_unchecked(registry, active, selection) {
        Ok(g) => g,
        Err(e) => {
            return CheckResult {
                ok: false,
                error: Some(e.to_string()),
                infeasible,
                ..CheckResult::default()
            };
        }
    };

    let case_cycle = find_case_cycle(&graph);
    let test_cycle = find_test_cycle(&graph);
    let ok = case_cycle.is_none() && test_cycle.is_none();

    CheckResult {
        ok,
        error: None,
        case_cycle,
        test_cycle,
        cyclic_tests: cyclic_test_components(&graph),
        infeasible,
        case_count: graph.len(),
        edge_count: graph.edge_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Test;
    use crate::split::SplitPolicy;

    fn active() -> ActiveSet {
        ActiveSet::new("sys")
            .with_partition("p0", ["e0", "e1"])
            .with_partition("p1", ["e0", "e1"])
    }

    fn registry(names: &[&str]) -> TestRegistry {
        let mut reg = TestRegistry::new();
        for name in names {
            reg.add_test(Test::new(*name)).unwrap();
        }
        reg
    }

    #[test]
    fn test_validate_accepts_chain() {
        let mut reg = registry(&["t0", "t1", "t2"]);
        reg.depends_on("t1", "t0", SplitPolicy::fully()).unwrap();
        reg.depends_on("t2", "t1", SplitPolicy::by_env()).unwrap();
        let g = CaseGraph::build_unchecked(&reg, &active(), &[]).unwrap();
        assert!(validate(&g).is_ok());
    }

    #[test]
    fn test_mutual_dependency_reports_case_cycle() {
        let mut reg = registry(&["t0", "t1"]);
        reg.depends_on("t0", "t1", SplitPolicy::default()).unwrap();
        reg.depends_on("t1", "t0", SplitPolicy::default()).unwrap();
        let g = CaseGraph::build_unchecked(&reg, &active(), &[]).unwrap();
        match validate(&g).unwrap_err() {
            GraphError::CaseCycle { cycle } => {
                assert_eq!(
                    cycle,
                    vec![CaseKey::new("t0", "p0", "e0"), CaseKey::new("t1", "p0", "e0")]
                );
            }
            other => panic!("expected case cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_split_cycle_is_only_visible_at_test_level() {
        // t1 depends on t0 only across environments, t0 depends on t1 only on
        // the same case: no case cycle, but t0 <-> t1 at test level.
        let mut reg = registry(&["t0", "t1"]);
        reg.depends_on(
            "t1",
            "t0",
            SplitPolicy::custom(|src, dst| src.environ == "e1" && dst.environ == "e0"),
        )
        .unwrap();
        reg.depends_on(
            "t0",
            "t1",
            SplitPolicy::custom(|src, dst| src.environ == "e1" && dst.environ == "e0"),
        )
        .unwrap();
        let g = CaseGraph::build_unchecked(&reg, &active(), &[]).unwrap();
        assert!(find_case_cycle(&g).is_none());
        assert_eq!(
            validate(&g).unwrap_err(),
            GraphError::TestCycle {
                cycle: vec!["t0".into(), "t1".into()]
            }
        );
    }

    #[test]
    fn test_collapse_ignores_multiplicity() {
        let mut reg = registry(&["t0", "t1"]);
        reg.depends_on("t1", "t0", SplitPolicy::fully()).unwrap();
        let g = CaseGraph::build_unchecked(&reg, &active(), &[]).unwrap();
        assert_eq!(g.edge_count(), 16);
        let tests = collapse_to_tests(&g);
        assert_eq!(tests.num_nodes(), 2);
        assert_eq!(tests.num_edges(), 1);
    }

    #[test]
    fn test_check_all_reports_everything() {
        let mut reg = registry(&["a", "b", "c"]);
        reg.add_test(Test {
            valid_systems: vec!["elsewhere:*".into()],
            ..Test::new("lost")
        })
        .unwrap();
        reg.depends_on("a", "b", SplitPolicy::default()).unwrap();
        reg.depends_on("b", "a", SplitPolicy::by_xenv()).unwrap();
        let result = check_all(&reg, &active(), &[]);
        assert!(!result.ok);
        assert!(result.error.is_none());
        assert_eq!(result.infeasible, vec!["lost".to_string()]);
        assert_eq!(
            result.cyclic_tests,
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        assert_eq!(result.case_count, 12);
    }

    #[test]
    fn test_check_all_surfaces_declaration_errors() {
        let mut reg = registry(&["a"]);
        reg.add_test(Test {
            valid_systems: vec!["elsewhere:*".into()],
            ..Test::new("lost")
        })
        .unwrap();
        reg.depends_on("a", "lost", SplitPolicy::default()).unwrap();
        let result = check_all(&reg, &active(), &[]);
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("no matching cases"));
    }
}
