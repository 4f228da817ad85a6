//! The case graph: test-level declarations projected onto test cases.
//!
//! Nodes are [`CaseKey`]s stored in a petgraph arena; an edge `a → b` means
//! case `a` depends on case `b`. The graph is built once, validated, and is
//! read-only afterwards. Per-case mutable state lives elsewhere (see
//! [`crate::tracker`] and [`crate::cleanup`]) and is indexed by [`CaseId`].

use log::{debug, warn};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::check;
use crate::enumerate::{ActiveSet, CaseSpace};
use crate::graph::{CaseKey, GraphError, TestRegistry};

/// Dense index of a case within a [`CaseGraph`].
pub type CaseId = NodeIndex;

/// Immutable dependency graph over test cases.
#[derive(Debug, Clone, Default)]
pub struct CaseGraph {
    graph: DiGraph<CaseKey, ()>,
    index: HashMap<CaseKey, CaseId>,
    /// Test names in definition order, restricted to tests with cases in the graph.
    tests: Vec<String>,
    /// Test-level dependency names per test, as declared.
    conceptual: HashMap<String, Vec<String>>,
}

impl CaseGraph {
    /// Build and validate the case graph for a run.
    ///
    /// `selection` names the tests the user asked for; an empty selection
    /// means every registered test. Tests the selection depends on are pulled
    /// in automatically. The returned graph holds exactly the cases reachable
    /// from the selected tests' cases.
    ///
    /// # Errors
    /// - [`GraphError::UnknownTest`] if a selected name is not registered
    /// - [`GraphError::NoMatchingCases`] if a dependency target has no cases
    ///   in the active run
    /// - [`GraphError::CaseCycle`] / [`GraphError::TestCycle`] if the
    ///   dependencies are cyclic at either granularity
    pub fn build(
        registry: &TestRegistry,
        active: &ActiveSet,
        selection: &[String],
    ) -> Result<Self, GraphError> {
        let selected = resolve_selection(registry, selection)?;
        let full = Self::materialize_for(registry, active, &selected)?;
        check::validate(&full)?;

        let graph = full.retain_reachable_from(&selected);
        debug!(
            "Built case graph: {} tests, {} cases, {} edges",
            graph.tests.len(),
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Materialize the graph for `selection` and everything it depends on,
    /// without cycle validation or reachability pruning.
    ///
    /// Exposed for diagnostics; execution must only ever use graphs returned
    /// by [`CaseGraph::build`].
    pub fn build_unchecked(
        registry: &TestRegistry,
        active: &ActiveSet,
        selection: &[String],
    ) -> Result<Self, GraphError> {
        let selected = resolve_selection(registry, selection)?;
        Self::materialize_for(registry, active, &selected)
    }

    fn materialize_for(
        registry: &TestRegistry,
        active: &ActiveSet,
        selected: &[String],
    ) -> Result<Self, GraphError> {
        let space = CaseSpace::enumerate(registry, active);
        for name in selected {
            if !space.is_feasible(name) {
                warn!("Test '{}' has no feasible cases in this run; skipping it", name);
            }
        }
        let closure = dependency_closure(registry, selected);
        Self::materialize(registry, &space, &closure)
    }

    /// Every case of every test in `closure`, with all edges the split
    /// policies produce.
    fn materialize(
        registry: &TestRegistry,
        space: &CaseSpace,
        closure: &HashSet<String>,
    ) -> Result<Self, GraphError> {
        let mut out = Self::default();

        for test in registry.tests().filter(|t| closure.contains(&t.name)) {
            for case in space.cases_of(&test.name) {
                out.add_case(case.clone());
            }
        }

        for test in registry.tests().filter(|t| closure.contains(&t.name)) {
            let sources = space.cases_of(&test.name);
            for dep in test.dependencies() {
                let targets = space.cases_of(&dep.target);
                if sources.is_empty() {
                    continue;
                }
                if targets.is_empty() {
                    return Err(GraphError::NoMatchingCases {
                        source_test: test.name.clone(),
                        target: dep.target.clone(),
                    });
                }
                for src in sources {
                    let src_coords = src.coords();
                    for dst in targets {
                        if dep.how.edge(&src_coords, &dst.coords()) {
                            out.add_edge(src, dst);
                        }
                    }
                }
            }
            if !sources.is_empty() {
                out.conceptual
                    .insert(test.name.clone(), test.dependency_names());
            }
        }

        Ok(out)
    }

    fn add_case(&mut self, key: CaseKey) -> CaseId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        if !self.tests.contains(&key.test) {
            self.tests.push(key.test.clone());
        }
        let id = self.graph.add_node(key.clone());
        self.index.insert(key, id);
        id
    }

    fn add_edge(&mut self, src: &CaseKey, dst: &CaseKey) {
        if let (Some(&a), Some(&b)) = (self.index.get(src), self.index.get(dst)) {
            // Two declarations may produce the same case edge.
            self.graph.update_edge(a, b, ());
        }
    }

    /// Copy of this graph restricted to cases reachable from `roots`' cases.
    fn retain_reachable_from(&self, roots: &[String]) -> Self {
        let mut keep: HashSet<CaseId> = HashSet::new();
        for root in roots {
            for start in self.cases_of_test(root) {
                if keep.contains(&start) {
                    continue;
                }
                let mut dfs = Dfs::new(&self.graph, start);
                while let Some(n) = dfs.next(&self.graph) {
                    keep.insert(n);
                }
            }
        }

        let mut out = Self::default();
        for id in self.graph.node_indices() {
            if keep.contains(&id) {
                out.add_case(self.graph[id].clone());
            }
        }
        for edge in self.graph.raw_edges() {
            if keep.contains(&edge.source()) && keep.contains(&edge.target()) {
                out.add_edge(&self.graph[edge.source()], &self.graph[edge.target()]);
            }
        }
        for test in &out.tests {
            if let Some(names) = self.conceptual.get(test) {
                out.conceptual.insert(test.clone(), names.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All case ids in enumeration order.
    pub fn ids(&self) -> impl Iterator<Item = CaseId> + '_ {
        self.graph.node_indices()
    }

    /// All cases in enumeration order.
    pub fn cases(&self) -> impl Iterator<Item = &CaseKey> {
        self.graph.node_weights()
    }

    pub fn id(&self, key: &CaseKey) -> Option<CaseId> {
        self.index.get(key).copied()
    }

    pub fn key(&self, id: CaseId) -> &CaseKey {
        &self.graph[id]
    }

    pub fn contains(&self, key: &CaseKey) -> bool {
        self.index.contains_key(key)
    }

    /// Tests that have at least one case in the graph, in definition order.
    pub fn test_names(&self) -> &[String] {
        &self.tests
    }

    /// Ids of the cases belonging to `test`, in enumeration order.
    pub fn cases_of_test(&self, test: &str) -> Vec<CaseId> {
        self.graph
            .node_indices()
            .filter(|&id| self.graph[id].test == test)
            .collect()
    }

    /// Cases `id` depends on, in enumeration order.
    pub fn dependencies(&self, id: CaseId) -> Vec<CaseId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Immediate dependents of `id`, in enumeration order.
    pub fn dependents(&self, id: CaseId) -> Vec<CaseId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: CaseId, dir: Direction) -> Vec<CaseId> {
        let mut out: Vec<CaseId> = self.graph.neighbors_directed(id, dir).collect();
        out.sort();
        out
    }

    /// Every case that transitively depends on `id`, in breadth-first order.
    pub fn transitive_dependents(&self, id: CaseId) -> Vec<CaseId> {
        let mut seen: HashSet<CaseId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<CaseId> = self.dependents(id).into();
        while let Some(n) = queue.pop_front() {
            if !seen.insert(n) {
                continue;
            }
            order.push(n);
            queue.extend(self.dependents(n));
        }
        order
    }

    /// Test names the test of `key` declares dependencies on.
    pub fn dependencies_conceptual(&self, test: &str) -> &[String] {
        self.conceptual.get(test).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The cases `key` was actually wired to.
    pub fn dependencies_actual(&self, key: &CaseKey) -> Vec<CaseKey> {
        match self.id(key) {
            Some(id) => self
                .dependencies(id)
                .into_iter()
                .map(|d| self.graph[d].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Edges as (dependent, dependency) pairs in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&CaseKey, &CaseKey)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()]))
    }

    /// Adjacency list over dense ids (dependent → dependencies).
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        self.graph
            .node_indices()
            .map(|id| {
                self.dependencies(id)
                    .into_iter()
                    .map(|d| d.index())
                    .collect()
            })
            .collect()
    }
}

/// Validate selected names; an empty selection means every test.
fn resolve_selection(
    registry: &TestRegistry,
    selection: &[String],
) -> Result<Vec<String>, GraphError> {
    if selection.is_empty() {
        return Ok(registry.tests().map(|t| t.name.clone()).collect());
    }
    let mut names = Vec::new();
    for name in selection {
        let test = registry.get_test_or_err(name)?;
        if !names.contains(&test.name) {
            names.push(test.name.clone());
        }
    }
    Ok(names)
}

/// Selected tests plus everything they transitively depend on.
fn dependency_closure(registry: &TestRegistry, selected: &[String]) -> HashSet<String> {
    let mut closure: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = selected.iter().map(String::as_str).collect();
    while let Some(name) = queue.pop_front() {
        if !closure.insert(name.to_string()) {
            continue;
        }
        if let Some(test) = registry.get_test(name) {
            for dep in test.dependencies() {
                queue.push_back(&dep.target);
            }
        }
    }
    closure
}
