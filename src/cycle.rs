//! Cycle detection for directed graphs.
//!
//! Two algorithms, both iterative so deep dependency chains cannot overflow
//! the stack:
//!
//! 1. **Three-colour DFS** ([`find_cycle`]): stops at the first back edge and
//!    returns the cycle as an ordered node sequence. Used to reject invalid
//!    dependency graphs with a readable error.
//!
//! 2. **Tarjan's SCC** ([`tarjan_scc`]): finds all strongly connected
//!    components in O(V+E). Used to report *every* cyclic component at once.
//!    Reference: Tarjan, "Depth-First Search and Linear Graph Algorithms," SIAM 1972.
//!
//! # Graph Representation
//!
//! Both operate on an adjacency list `&[Vec<NodeId>]` where `adj[u]` lists the
//! successors of `u`. Callers map their own identifiers onto dense ids;
//! [`NamedGraph`] does that for string-named nodes.

use std::collections::HashMap;

/// A node identifier. Using usize for efficiency; callers map their own IDs.
pub type NodeId = usize;

// ─────────────────────────────────────────────────────────────────────────────
// 1. Three-colour DFS
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Returns the first cycle found, as the sequence of nodes along it.
///
/// Roots are tried in ascending id order and successors in adjacency order,
/// so the result is deterministic for a given adjacency list. The returned
/// path starts at the node the back edge points to; its last element has an
/// edge back to the first. Self-loops are reported as a one-element cycle.
///
/// # Example
/// ```
/// use casegraph::cycle::find_cycle;
///
/// // 0 → 1 → 2 → 1
/// let adj = vec![vec![1], vec![2], vec![1]];
/// assert_eq!(find_cycle(3, &adj), Some(vec![1, 2]));
/// ```
pub fn find_cycle(num_nodes: usize, adj: &[Vec<NodeId>]) -> Option<Vec<NodeId>> {
    let mut colour = vec![Colour::White; num_nodes];
    // (node, index of next successor to visit)
    let mut stack: Vec<(NodeId, usize)> = Vec::new();

    for root in 0..num_nodes {
        if colour[root] != Colour::White {
            continue;
        }
        colour[root] = Colour::Grey;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (v, next) = *top;
            if next < adj[v].len() {
                top.1 += 1;
                let w = adj[v][next];
                match colour[w] {
                    Colour::White => {
                        colour[w] = Colour::Grey;
                        stack.push((w, 0));
                    }
                    Colour::Grey => {
                        // Back edge: w is on the current path.
                        let start = stack.iter().position(|&(n, _)| n == w).unwrap_or(0);
                        return Some(stack[start..].iter().map(|&(n, _)| n).collect());
                    }
                    Colour::Black => {}
                }
            } else {
                colour[v] = Colour::Black;
                stack.pop();
            }
        }
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// 2. Tarjan's SCC Algorithm (Iterative)
// ─────────────────────────────────────────────────────────────────────────────

/// A strongly connected component: a maximal set of nodes where every node
/// is reachable from every other node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scc {
    /// The node IDs in this SCC, in no particular order.
    pub members: Vec<NodeId>,
}

/// Finds all strongly connected components using Tarjan's algorithm.
///
/// # Returns
/// All SCCs in reverse topological order of the condensation DAG.
/// Each SCC with >1 member contains at least one cycle.
///
/// # Example
/// ```
/// use casegraph::cycle::tarjan_scc;
///
/// // Graph: 0 → 1 → 2 → 0 (a 3-node cycle)
/// let adj = vec![vec![1], vec![2], vec![0]];
/// let sccs = tarjan_scc(3, &adj);
/// assert_eq!(sccs.len(), 1);
/// assert_eq!(sccs[0].members.len(), 3);
/// ```
pub fn tarjan_scc(num_nodes: usize, adj: &[Vec<NodeId>]) -> Vec<Scc> {
    const UNDEFINED: i32 = -1;
    let mut index = vec![UNDEFINED; num_nodes];
    let mut lowlink = vec![0i32; num_nodes];
    let mut on_stack = vec![false; num_nodes];

    let mut stack: Vec<NodeId> = Vec::new();
    let mut current_index: i32 = 0;
    let mut result: Vec<Scc> = Vec::new();

    struct Frame {
        node: NodeId,
        next_neighbor: usize,
    }

    for start in 0..num_nodes {
        if index[start] != UNDEFINED {
            continue;
        }

        let mut call_stack: Vec<Frame> = vec![Frame {
            node: start,
            next_neighbor: 0,
        }];

        index[start] = current_index;
        lowlink[start] = current_index;
        current_index += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(frame) = call_stack.last_mut() {
            let v = frame.node;

            if frame.next_neighbor < adj[v].len() {
                let w = adj[v][frame.next_neighbor];
                frame.next_neighbor += 1;

                if index[w] == UNDEFINED {
                    index[w] = current_index;
                    lowlink[w] = current_index;
                    current_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call_stack.push(Frame {
                        node: w,
                        next_neighbor: 0,
                    });
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                if lowlink[v] == index[v] {
                    let mut scc_members = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        scc_members.push(w);
                        if w == v {
                            break;
                        }
                    }
                    result.push(Scc {
                        members: scc_members,
                    });
                }

                // "Return" from recursion: propagate lowlink to parent
                call_stack.pop();
                if let Some(parent) = call_stack.last_mut() {
                    let p = parent.node;
                    lowlink[p] = lowlink[p].min(lowlink[v]);
                }
            }
        }
    }

    result
}

/// Returns only the SCCs that contain a cycle: size > 1, or a self-loop.
pub fn find_cycles(num_nodes: usize, adj: &[Vec<NodeId>]) -> Vec<Scc> {
    tarjan_scc(num_nodes, adj)
        .into_iter()
        .filter(|scc| match scc.members.as_slice() {
            [n] => adj[*n].contains(n),
            _ => true,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Named Graph Helper
// ─────────────────────────────────────────────────────────────────────────────

/// A graph with string-named nodes and deduplicated edges.
///
/// Used for the collapsed test-level relation, where many case edges map onto
/// the same pair of tests.
#[derive(Debug, Clone, Default)]
pub struct NamedGraph {
    names: Vec<String>,
    name_to_id: HashMap<String, NodeId>,
    adj: Vec<Vec<NodeId>>,
}

impl NamedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with the given name. Returns the existing id if present.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        self.adj.push(Vec::new());
        id
    }

    /// Adds a directed edge from `from` to `to`, ignoring duplicates.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from_id = self.add_node(from);
        let to_id = self.add_node(to);
        if !self.adj[from_id].contains(&to_id) {
            self.adj[from_id].push(to_id);
        }
    }

    pub fn get_id(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: NodeId) -> &str {
        &self.names[id]
    }

    pub fn num_nodes(&self) -> usize {
        self.names.len()
    }

    pub fn num_edges(&self) -> usize {
        self.adj.iter().map(Vec::len).sum()
    }

    pub fn adjacency(&self) -> &[Vec<NodeId>] {
        &self.adj
    }

    /// First cycle found, by node name.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        find_cycle(self.num_nodes(), &self.adj).map(|ids| {
            ids.into_iter()
                .map(|id| self.names[id].clone())
                .collect()
        })
    }
}
