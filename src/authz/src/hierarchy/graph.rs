//! Role inheritance graph keyed by role id
//!
//! Edges point from a descendant to an ancestor: holders of the descendant
//! receive every permission bound to the ancestor. The graph owns two
//! adjacency maps (upward and downward) so both traversal directions are
//! plain reachability queries over ids.
//!
//! Writes through [`InheritanceGraph::add_edge`] keep the graph acyclic.
//! Graphs loaded from storage go through [`InheritanceGraph::from_edges`],
//! which accepts whatever the rows say; [`InheritanceGraph::find_cycles`]
//! audits such data, and every traversal keeps a visited set so it
//! terminates even when a cycle slipped in.

use crate::types::RoleId;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Graph-related errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The edge would let a role reach itself
    #[error("Inheritance cycle: {}", render_path(.path))]
    Cycle {
        /// Closed role path, first element repeated at the end
        path: Vec<RoleId>,
    },
}

/// Render a role path as `1 -> 2 -> 1`
pub fn render_path(path: &[RoleId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Directed role inheritance graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritanceGraph {
    /// descendant -> direct ancestors
    up: HashMap<RoleId, BTreeSet<RoleId>>,

    /// ancestor -> direct descendants
    down: HashMap<RoleId, BTreeSet<RoleId>>,
}

impl InheritanceGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored `(descendant, ancestor)` rows without
    /// checking for cycles
    pub fn from_edges(edges: impl IntoIterator<Item = (RoleId, RoleId)>) -> Self {
        let mut graph = Self::new();
        for (descendant, ancestor) in edges {
            graph.insert(descendant, ancestor);
        }
        graph
    }

    /// Add an inheritance edge
    ///
    /// Returns `Ok(false)` when the edge already exists.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if `descendant` is already reachable
    /// upward from `ancestor`. The graph is left untouched.
    pub fn add_edge(&mut self, descendant: RoleId, ancestor: RoleId) -> Result<bool, GraphError> {
        if self.contains_edge(descendant, ancestor) {
            return Ok(false);
        }

        if descendant == ancestor {
            return Err(GraphError::Cycle {
                path: vec![descendant, descendant],
            });
        }

        if let Some(mut path) = self.path_up(ancestor, descendant) {
            // path runs ancestor .. descendant; the new edge closes it
            path.insert(0, descendant);
            return Err(GraphError::Cycle { path });
        }

        self.insert(descendant, ancestor);
        Ok(true)
    }

    /// Remove an inheritance edge, returning whether it existed
    pub fn remove_edge(&mut self, descendant: RoleId, ancestor: RoleId) -> bool {
        let removed = self
            .up
            .get_mut(&descendant)
            .map(|parents| parents.remove(&ancestor))
            .unwrap_or(false);

        if removed {
            if let Some(children) = self.down.get_mut(&ancestor) {
                children.remove(&descendant);
            }
            self.prune(descendant);
            self.prune(ancestor);
        }
        removed
    }

    /// Remove every edge mentioning `role`, returning the removed edges
    pub fn remove_node(&mut self, role: RoleId) -> Vec<(RoleId, RoleId)> {
        let mut removed = Vec::new();

        if let Some(parents) = self.up.remove(&role) {
            for parent in parents {
                if let Some(children) = self.down.get_mut(&parent) {
                    children.remove(&role);
                }
                self.prune(parent);
                removed.push((role, parent));
            }
        }

        if let Some(children) = self.down.remove(&role) {
            for child in children {
                if let Some(parents) = self.up.get_mut(&child) {
                    parents.remove(&role);
                }
                self.prune(child);
                removed.push((child, role));
            }
        }

        removed
    }

    /// Whether the direct edge exists
    pub fn contains_edge(&self, descendant: RoleId, ancestor: RoleId) -> bool {
        self.up
            .get(&descendant)
            .map(|parents| parents.contains(&ancestor))
            .unwrap_or(false)
    }

    /// Direct ancestors of a role
    pub fn parents(&self, role: RoleId) -> BTreeSet<RoleId> {
        self.up.get(&role).cloned().unwrap_or_default()
    }

    /// Direct descendants of a role
    pub fn children(&self, role: RoleId) -> BTreeSet<RoleId> {
        self.down.get(&role).cloned().unwrap_or_default()
    }

    /// Full transitive set of ancestors, excluding the role itself
    pub fn ancestors(&self, role: RoleId) -> BTreeSet<RoleId> {
        Self::reach(&self.up, std::iter::once(role), true)
    }

    /// Full transitive set of descendants, excluding the role itself
    pub fn descendants(&self, role: RoleId) -> BTreeSet<RoleId> {
        Self::reach(&self.down, std::iter::once(role), true)
    }

    /// Union of the given roles and all of their ancestors
    pub fn expand(&self, roles: impl IntoIterator<Item = RoleId>) -> BTreeSet<RoleId> {
        Self::reach(&self.up, roles, false)
    }

    /// All edges as `(descendant, ancestor)` pairs in ascending order
    pub fn edges(&self) -> Vec<(RoleId, RoleId)> {
        let mut edges: Vec<_> = self
            .up
            .iter()
            .flat_map(|(d, parents)| parents.iter().map(move |a| (*d, *a)))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.up.values().map(BTreeSet::len).sum()
    }

    /// Whether the graph has no edges
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Detect cycles using DFS
    ///
    /// Uses three states per node:
    /// - White: unvisited
    /// - Gray: on the current DFS stack
    /// - Black: fully visited
    ///
    /// Every edge into a gray node closes a cycle, reported as a path whose
    /// first role is repeated at the end.
    pub fn find_cycles(&self) -> Vec<Vec<RoleId>> {
        let mut state: HashMap<RoleId, Color> = HashMap::new();
        let mut cycles = Vec::new();

        let mut starts: Vec<RoleId> = self.up.keys().copied().collect();
        starts.sort_unstable();

        for start in starts {
            if state.get(&start).copied().unwrap_or(Color::White) == Color::White {
                let mut path = Vec::new();
                self.dfs(start, &mut state, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn dfs(
        &self,
        node: RoleId,
        state: &mut HashMap<RoleId, Color>,
        path: &mut Vec<RoleId>,
        cycles: &mut Vec<Vec<RoleId>>,
    ) {
        state.insert(node, Color::Gray);
        path.push(node);

        if let Some(parents) = self.up.get(&node) {
            for &next in parents {
                match state.get(&next).copied().unwrap_or(Color::White) {
                    Color::White => self.dfs(next, state, path, cycles),
                    Color::Gray => {
                        if let Some(start) = path.iter().position(|n| *n == next) {
                            let mut cycle = path[start..].to_vec();
                            cycle.push(next);
                            cycles.push(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        path.pop();
        state.insert(node, Color::Black);
    }

    /// Shortest upward path from `from` to `to`, inclusive
    fn path_up(&self, from: RoleId, to: RoleId) -> Option<Vec<RoleId>> {
        let mut came_from: HashMap<RoleId, RoleId> = HashMap::new();
        let mut visited: HashSet<RoleId> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = came_from.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }

            if let Some(parents) = self.up.get(&current) {
                for &parent in parents {
                    if visited.insert(parent) {
                        came_from.insert(parent, current);
                        queue.push_back(parent);
                    }
                }
            }
        }

        None
    }

    /// Visited-set BFS over one adjacency direction
    fn reach(
        adjacency: &HashMap<RoleId, BTreeSet<RoleId>>,
        starts: impl IntoIterator<Item = RoleId>,
        exclude_starts: bool,
    ) -> BTreeSet<RoleId> {
        let starts: Vec<RoleId> = starts.into_iter().collect();
        let mut visited: BTreeSet<RoleId> = starts.iter().copied().collect();
        let mut queue: VecDeque<RoleId> = starts.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if let Some(next) = adjacency.get(&current) {
                for &role in next {
                    if visited.insert(role) {
                        queue.push_back(role);
                    }
                }
            }
        }

        if exclude_starts {
            for start in &starts {
                visited.remove(start);
            }
        }
        visited
    }

    fn insert(&mut self, descendant: RoleId, ancestor: RoleId) {
        self.up.entry(descendant).or_default().insert(ancestor);
        self.down.entry(ancestor).or_default().insert(descendant);
    }

    fn prune(&mut self, role: RoleId) {
        if self.up.get(&role).map_or(false, BTreeSet::is_empty) {
            self.up.remove(&role);
        }
        if self.down.get(&role).map_or(false, BTreeSet::is_empty) {
            self.down.remove(&role);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}
