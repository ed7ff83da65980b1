//! Generic directed dependency graph with cycle prevention
//!
//! An edge `from → to` reads "`from` depends on `to`". Column dependencies
//! and checklist task dependencies are both built on this type.

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

/// Rejected edge: the path from the edge's destination back to its source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle: {path:?}")]
pub struct CycleError<N: Debug> {
    pub path: Vec<N>,
}

/// Directed acyclic graph keyed by node identity, with typed edges
#[derive(Debug, Clone)]
pub struct DependencyGraph<N, K = ()> {
    graph: StableDiGraph<N, K>,
    index: HashMap<N, NodeIndex>,
}

impl<N, K> Default for DependencyGraph<N, K> {
    fn default() -> Self {
        Self {
            graph: StableDiGraph::default(),
            index: HashMap::new(),
        }
    }
}

impl<N, K> DependencyGraph<N, K>
where
    N: Clone + Eq + Hash + Debug,
    K: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, node: &N) -> bool {
        self.index.contains_key(node)
    }

    /// Insert a node if absent.
    pub fn add_node(&mut self, node: N) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.index.insert(node, idx);
        idx
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, node: &N) -> bool {
        match self.index.remove(node) {
            Some(idx) => {
                self.graph.remove_node(idx);
                true
            }
            None => false,
        }
    }

    /// The cycle that `from → to` would close, if any.
    ///
    /// Searches depth-first from `to` along existing edges; reaching `from`
    /// means the new edge closes a loop. The returned path starts at `to` and
    /// ends at `from`. A self-edge is the one-node path `[from]`.
    pub fn would_create_cycle(&self, from: &N, to: &N) -> Option<Vec<N>> {
        if from == to {
            return Some(vec![from.clone()]);
        }
        let (&source, &start) = (self.index.get(from)?, self.index.get(to)?);

        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if current == source {
                let mut path = vec![current];
                let mut cursor = current;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path.into_iter().map(|idx| self.graph[idx].clone()).collect());
            }
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(next) {
                    parent.insert(next, current);
                    stack.push(next);
                }
            }
        }
        None
    }

    /// Add `from → to`, creating missing nodes. Rejects edges that would
    /// close a cycle; adding an identical edge again is a no-op.
    pub fn add_edge(&mut self, from: N, to: N, kind: K) -> Result<(), CycleError<N>> {
        if let Some(path) = self.would_create_cycle(&from, &to) {
            return Err(CycleError { path });
        }
        let a = self.add_node(from);
        let b = self.add_node(to);
        let exists = self
            .graph
            .edges_directed(a, Direction::Outgoing)
            .any(|edge| edge.target() == b && edge.weight() == &kind);
        if !exists {
            self.graph.add_edge(a, b, kind);
        }
        Ok(())
    }

    /// Remove every `from → to` edge. Returns how many were removed.
    pub fn remove_edge(&mut self, from: &N, to: &N) -> usize {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return 0;
        };
        let ids: Vec<_> = self
            .graph
            .edges_directed(a, Direction::Outgoing)
            .filter(|e| e.target() == b)
            .map(|e| e.id())
            .collect();
        for id in &ids {
            self.graph.remove_edge(*id);
        }
        ids.len()
    }

    /// Drop every outgoing edge of `node`, keeping the node.
    pub fn clear_dependencies(&mut self, node: &N) {
        let Some(&idx) = self.index.get(node) else {
            return;
        };
        let ids: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for id in ids {
            self.graph.remove_edge(id);
        }
    }

    fn neighbors(&self, node: &N, direction: Direction) -> Vec<N> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .neighbors_directed(idx, direction)
            .filter(|n| seen.insert(*n))
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Nodes `node` depends on directly.
    pub fn dependencies(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// Nodes that depend on `node` directly.
    pub fn dependents(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Every node that depends on `node`, directly or not.
    pub fn transitive_dependents(&self, node: &N) -> Vec<N> {
        let Some(&start) = self.index.get(node) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([start]);
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            for next in self.graph.neighbors_directed(current, Direction::Incoming) {
                if visited.insert(next) {
                    out.push(self.graph[next].clone());
                    stack.push(next);
                }
            }
        }
        out
    }

    /// All edges as `(from, to, kind)`.
    pub fn edges(&self) -> Vec<(N, N, K)> {
        self.graph
            .edge_indices()
            .filter_map(|id| {
                let (a, b) = self.graph.edge_endpoints(id)?;
                Some((
                    self.graph[a].clone(),
                    self.graph[b].clone(),
                    self.graph[id].clone(),
                ))
            })
            .collect()
    }

    /// Every node, dependencies before the nodes that depend on them.
    pub fn topological_order(&self) -> Result<Vec<N>, CycleError<N>> {
        let mut order = toposort(&self.graph, None).map_err(|cycle| CycleError {
            path: vec![self.graph[cycle.node_id()].clone()],
        })?;
        order.reverse();
        Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_rejects_closing_edge_with_path() {
        let mut graph: DependencyGraph<String> = DependencyGraph::new();
        graph.add_edge(s("A"), s("B"), ()).unwrap();
        graph.add_edge(s("B"), s("C"), ()).unwrap();

        let err = graph.add_edge(s("C"), s("A"), ()).unwrap_err();
        assert_eq!(err.path, vec![s("A"), s("B"), s("C")]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        assert_eq!(graph.would_create_cycle(&"x", &"x"), Some(vec!["x"]));
        assert!(graph.add_edge("x", "x", ()).is_err());
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        graph.add_edge("top", "left", ()).unwrap();
        graph.add_edge("top", "right", ()).unwrap();
        graph.add_edge("left", "bottom", ()).unwrap();
        graph.add_edge("right", "bottom", ()).unwrap();
        assert!(graph.would_create_cycle(&"top", &"bottom").is_none());
        assert!(graph.would_create_cycle(&"bottom", &"top").is_some());
    }

    #[test]
    fn test_unknown_nodes_never_cycle() {
        let graph: DependencyGraph<&str> = DependencyGraph::new();
        assert!(graph.would_create_cycle(&"a", &"b").is_none());
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut graph: DependencyGraph<&str, u8> = DependencyGraph::new();
        graph.add_edge("a", "b", 1).unwrap();
        graph.add_edge("a", "b", 1).unwrap();
        graph.add_edge("a", "b", 2).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.dependencies(&"a"), vec!["b"]);
        assert_eq!(graph.remove_edge(&"a", &"b"), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        graph.add_edge("a", "b", ()).unwrap();
        graph.add_edge("b", "c", ()).unwrap();
        assert!(graph.remove_node(&"b"));
        assert!(!graph.contains(&"b"));
        assert_eq!(graph.edge_count(), 0);
        // c → a is fine once b is gone
        graph.add_edge("c", "a", ()).unwrap();
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        graph.add_edge("total", "subtotal", ()).unwrap();
        graph.add_edge("subtotal", "qty", ()).unwrap();
        graph.add_edge("subtotal", "price", ()).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("qty") < pos("subtotal"));
        assert!(pos("price") < pos("subtotal"));
        assert!(pos("subtotal") < pos("total"));
    }

    #[test]
    fn test_dependents_and_transitive_dependents() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        graph.add_edge("b", "a", ()).unwrap();
        graph.add_edge("c", "b", ()).unwrap();
        graph.add_edge("d", "a", ()).unwrap();

        let mut direct = graph.dependents(&"a");
        direct.sort();
        assert_eq!(direct, vec!["b", "d"]);

        let mut all = graph.transitive_dependents(&"a");
        all.sort();
        assert_eq!(all, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_clear_dependencies_keeps_node() {
        let mut graph: DependencyGraph<&str> = DependencyGraph::new();
        graph.add_edge("f", "x", ()).unwrap();
        graph.add_edge("f", "y", ()).unwrap();
        graph.clear_dependencies(&"f");
        assert!(graph.contains(&"f"));
        assert!(graph.dependencies(&"f").is_empty());
    }
}
