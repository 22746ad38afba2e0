//! 完備グラフ (completion graph)

use crate::dependency::DependencySet;
use mimizuku_core::model::{Individual, Literal};
use mimizuku_core::rbox::{RoleBox, RoleId};
use mimizuku_core::term::{ConceptId, ConceptPool};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeName {
    /// Root individual from the ABox (or the query), never pruned by merges.
    Named(Individual),
    /// Fresh tree node introduced by a generating rule.
    Anonymous(u32),
    /// Data value node.
    Literal(Literal),
}

#[derive(Debug)]
pub struct Node {
    pub name: NodeName,
    /// Tree edge to the individual whose generating rule created this node.
    pub parent: Option<NodeId>,
    /// Anonymous tree individuals are blockable; roots and literals are not.
    pub blockable: bool,
    labels: HashMap<ConceptId, DependencySet>,
    /// Redirect to the surviving node plus the dependency set of the merge.
    merged: Option<(NodeId, DependencySet)>,
    pruned: bool,
    out_edges: Vec<EdgeId>,
    in_edges: Vec<EdgeId>,
    children: Vec<NodeId>,
    differents: HashMap<NodeId, DependencySet>,
}

impl Node {
    fn new(name: NodeName, parent: Option<NodeId>, blockable: bool) -> Self {
        Self {
            name,
            parent,
            blockable,
            labels: HashMap::new(),
            merged: None,
            pruned: false,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            children: Vec::new(),
            differents: HashMap::new(),
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self.name, NodeName::Named(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.name, NodeName::Literal(_))
    }
}

#[derive(Debug)]
pub struct Edge {
    pub from: NodeId,
    pub role: RoleId,
    pub to: NodeId,
    pub depends: DependencySet,
}

/// Contradiction found on a node; carries the merged dependency set that the
/// backtrack engine uses to compute the backjump target.
#[derive(Debug, Clone)]
pub struct Clash {
    pub node: NodeId,
    pub concept: ConceptId,
    pub depends: DependencySet,
}

/// Result of asserting a type on a node.
#[derive(Debug)]
pub enum AddOutcome {
    Added,
    Noop,
    Clash(Clash),
}

/// Restore point for the undo trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailMark(usize);

#[derive(Debug)]
enum TrailOp {
    NodeAdded,
    EdgeAdded,
    TypeAdded(NodeId, ConceptId),
    Merged(NodeId),
    Pruned(NodeId),
    DifferentAdded(NodeId, NodeId),
}

/// Arena-backed completion graph. Nodes are never deleted; merging sets a
/// redirect pointer and pruning sets a flag, so both are cheap to undo when
/// a branch is abandoned. Every mutation is recorded on the trail together
/// with the branch context it belongs to (via the dependency set on the
/// fact itself), and `rewind` restores any earlier mark exactly.
#[derive(Debug, Default)]
pub struct CompletionGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    trail: Vec<TrailOp>,
    anon_counter: u32,
    /// Bumped on every mutation; blocking caches are validated against it.
    generation: u64,
}

impl CompletionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    /// Resolve merge redirects to the surviving representative.
    pub fn canon(&self, mut id: NodeId) -> NodeId {
        while let Some((next, _)) = &self.nodes[id.index()].merged {
            id = *next;
        }
        id
    }

    /// Like `canon`, but also accumulates the dependency sets of the merges
    /// crossed on the way. A fact routed through a merged node depends on
    /// the branches that caused the merge.
    pub fn canon_with_depends(&self, mut id: NodeId) -> (NodeId, DependencySet) {
        let mut depends = DependencySet::independent();
        while let Some((next, ds)) = &self.nodes[id.index()].merged {
            depends = depends.union(ds);
            id = *next;
        }
        (id, depends)
    }

    pub fn is_pruned(&self, id: NodeId) -> bool {
        self.nodes[id.index()].pruned
    }

    pub fn is_merged(&self, id: NodeId) -> bool {
        self.nodes[id.index()].merged.is_some()
    }

    /// Live = neither pruned nor merged away.
    pub fn is_live(&self, id: NodeId) -> bool {
        !self.is_pruned(id) && !self.is_merged(id)
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|&n| self.is_live(n))
    }

    pub fn add_individual(&mut self, individual: Individual) -> NodeId {
        self.push_node(Node::new(NodeName::Named(individual), None, false), true)
    }

    /// Fresh root individual for a satisfiability query; not blockable and
    /// not attached to the tree.
    pub fn add_root(&mut self) -> NodeId {
        let n = self.anon_counter;
        self.anon_counter += 1;
        self.push_node(Node::new(NodeName::Anonymous(n), None, false), true)
    }

    pub fn add_blockable(&mut self, parent: NodeId) -> NodeId {
        let n = self.anon_counter;
        self.anon_counter += 1;
        self.push_node(
            Node::new(NodeName::Anonymous(n), Some(parent), true),
            true,
        )
    }

    pub fn add_literal(&mut self, value: Literal, parent: NodeId) -> NodeId {
        self.push_node(Node::new(NodeName::Literal(value), Some(parent), false), false)
    }

    fn push_node(&mut self, node: Node, with_top: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        if let Some(parent) = node.parent {
            self.nodes[parent.index()].children.push(id);
        }
        self.nodes.push(node);
        self.trail.push(TrailOp::NodeAdded);
        self.generation += 1;
        if with_top {
            self.nodes[id.index()]
                .labels
                .insert(ConceptPool::TOP, DependencySet::independent());
            self.trail.push(TrailOp::TypeAdded(id, ConceptPool::TOP));
        }
        id
    }

    /// Record that `node` has type `concept`, justified by `depends`.
    /// Idempotent when the type is already present; a complement already on
    /// the node closes the graph with a clash whose dependency set is the
    /// union of both justifications.
    pub fn add_type(
        &mut self,
        pool: &ConceptPool,
        node: NodeId,
        concept: ConceptId,
        depends: DependencySet,
    ) -> AddOutcome {
        let (node, merge_ds) = self.canon_with_depends(node);
        let depends = depends.union(&merge_ds);
        if self.is_pruned(node) {
            return AddOutcome::Noop;
        }
        if self.nodes[node.index()].labels.contains_key(&concept) {
            return AddOutcome::Noop;
        }
        let complement = pool.negate(concept);
        if let Some(existing) = self.nodes[node.index()].labels.get(&complement) {
            return AddOutcome::Clash(Clash {
                node,
                concept,
                depends: depends.union(existing),
            });
        }
        self.nodes[node.index()].labels.insert(concept, depends);
        self.trail.push(TrailOp::TypeAdded(node, concept));
        self.generation += 1;
        AddOutcome::Added
    }

    pub fn has_type(&self, node: NodeId, concept: ConceptId) -> bool {
        let node = self.canon(node);
        self.nodes[node.index()].labels.contains_key(&concept)
    }

    pub fn get_depends(&self, node: NodeId, concept: ConceptId) -> Option<&DependencySet> {
        let node = self.canon(node);
        self.nodes[node.index()].labels.get(&concept)
    }

    pub fn types_of(&self, node: NodeId) -> impl Iterator<Item = (ConceptId, &DependencySet)> {
        let node = self.canon(node);
        self.nodes[node.index()].labels.iter().map(|(&c, d)| (c, d))
    }

    /// Sorted label set, used by the blocking conditions.
    pub fn label_set(&self, node: NodeId) -> Vec<ConceptId> {
        let node = self.canon(node);
        let mut labels: Vec<ConceptId> =
            self.nodes[node.index()].labels.keys().copied().collect();
        labels.sort_unstable();
        labels
    }

    /// Add a role-labelled edge. Duplicate live edges are collapsed.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        role: RoleId,
        to: NodeId,
        depends: DependencySet,
    ) -> bool {
        let (from, from_ds) = self.canon_with_depends(from);
        let (to, to_ds) = self.canon_with_depends(to);
        let depends = depends.union(&from_ds).union(&to_ds);
        if self.is_pruned(from) || self.is_pruned(to) {
            return false;
        }
        let duplicate = self.nodes[from.index()].out_edges.iter().any(|&e| {
            let edge = &self.edges[e.index()];
            edge.role == role && self.canon(edge.to) == to
        });
        if duplicate {
            return false;
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { from, role, to, depends });
        self.nodes[from.index()].out_edges.push(id);
        self.nodes[to.index()].in_edges.push(id);
        self.trail.push(TrailOp::EdgeAdded);
        self.generation += 1;
        true
    }

    /// All r-successors of `node`, following the role hierarchy and inverse
    /// directions. Returns `(successor, dependency-of-edge)` pairs with the
    /// successor resolved to its merge representative.
    pub fn r_successors(
        &self,
        rbox: &RoleBox,
        node: NodeId,
        role: RoleId,
    ) -> Vec<(NodeId, DependencySet)> {
        let node = self.canon(node);
        let mut out = Vec::new();
        for &e in &self.nodes[node.index()].out_edges {
            let edge = &self.edges[e.index()];
            let (target, merge_ds) = self.canon_with_depends(edge.to);
            if self.is_pruned(target) {
                continue;
            }
            if rbox.is_sub_role_of(edge.role, role) {
                out.push((target, edge.depends.union(&merge_ds)));
            }
        }
        for &e in &self.nodes[node.index()].in_edges {
            let edge = &self.edges[e.index()];
            let (source, merge_ds) = self.canon_with_depends(edge.from);
            if self.is_pruned(source) {
                continue;
            }
            // an incoming s-edge is an outgoing s⁻-edge
            if rbox.is_sub_role_of(edge.role.inverse(), role) {
                out.push((source, edge.depends.union(&merge_ds)));
            }
        }
        out
    }

    pub fn r_predecessors(
        &self,
        rbox: &RoleBox,
        node: NodeId,
        role: RoleId,
    ) -> Vec<(NodeId, DependencySet)> {
        self.r_successors(rbox, node, role.inverse())
    }

    /// Roles on live edges from `parent` down to `child` (inverse edges
    /// normalized to the parent→child direction). Used by pairwise blocking.
    pub fn roles_between(&self, parent: NodeId, child: NodeId) -> Vec<RoleId> {
        let parent = self.canon(parent);
        let child = self.canon(child);
        let mut roles = Vec::new();
        for &e in &self.nodes[child.index()].in_edges {
            let edge = &self.edges[e.index()];
            if self.canon(edge.from) == parent {
                roles.push(edge.role);
            }
        }
        for &e in &self.nodes[child.index()].out_edges {
            let edge = &self.edges[e.index()];
            if self.canon(edge.to) == parent {
                roles.push(edge.role.inverse());
            }
        }
        roles.sort_unstable();
        roles.dedup();
        roles
    }

    /// Record an explicit inequality between two individuals.
    pub fn add_different(
        &mut self,
        n1: NodeId,
        n2: NodeId,
        depends: DependencySet,
    ) -> Option<Clash> {
        let (n1, ds1) = self.canon_with_depends(n1);
        let (n2, ds2) = self.canon_with_depends(n2);
        let depends = depends.union(&ds1).union(&ds2);
        if n1 == n2 {
            return Some(Clash {
                node: n1,
                concept: ConceptPool::BOTTOM,
                depends,
            });
        }
        if self.nodes[n1.index()].differents.contains_key(&n2) {
            return None;
        }
        self.nodes[n1.index()].differents.insert(n2, depends.clone());
        self.nodes[n2.index()].differents.insert(n1, depends);
        self.trail.push(TrailOp::DifferentAdded(n1, n2));
        self.generation += 1;
        None
    }

    pub fn are_different(&self, n1: NodeId, n2: NodeId) -> Option<&DependencySet> {
        let n1 = self.canon(n1);
        let n2 = self.canon(n2);
        self.nodes[n1.index()].differents.get(&n2)
    }

    /// Merge `from` into `into` (union of individuals). Types, edges and
    /// inequalities of the absorbed node are copied onto the survivor, each
    /// justified by its own dependency set extended with `depends`; the
    /// absorbed node's anonymous subtree is pruned. Returns a clash if the
    /// two nodes are asserted different or the copied facts contradict.
    pub fn merge(
        &mut self,
        pool: &ConceptPool,
        from: NodeId,
        into: NodeId,
        depends: DependencySet,
    ) -> Option<Clash> {
        let (from, from_ds) = self.canon_with_depends(from);
        let (into, into_ds) = self.canon_with_depends(into);
        let depends = depends.union(&from_ds).union(&into_ds);
        if from == into {
            return None;
        }
        if let Some(neq) = self.are_different(from, into) {
            return Some(Clash {
                node: into,
                concept: ConceptPool::BOTTOM,
                depends: depends.union(neq),
            });
        }

        self.nodes[from.index()].merged = Some((into, depends.clone()));
        self.trail.push(TrailOp::Merged(from));
        self.generation += 1;

        // copy type facts
        let labels: Vec<(ConceptId, DependencySet)> = self.nodes[from.index()]
            .labels
            .iter()
            .map(|(&c, d)| (c, d.clone()))
            .collect();
        for (concept, ds) in labels {
            match self.add_type(pool, into, concept, ds.union(&depends)) {
                AddOutcome::Clash(clash) => return Some(clash),
                AddOutcome::Added | AddOutcome::Noop => {}
            }
        }

        // translate edges through the merge target
        let out: Vec<EdgeId> = self.nodes[from.index()].out_edges.clone();
        for e in out {
            let (role, to, ds) = {
                let edge = &self.edges[e.index()];
                (edge.role, self.canon(edge.to), edge.depends.clone())
            };
            if self.is_pruned(to) {
                continue;
            }
            let target = if to == from { into } else { to };
            self.add_edge(into, role, target, ds.union(&depends));
        }
        let incoming: Vec<EdgeId> = self.nodes[from.index()].in_edges.clone();
        for e in incoming {
            let (role, src, ds) = {
                let edge = &self.edges[e.index()];
                (edge.role, self.canon(edge.from), edge.depends.clone())
            };
            if self.is_pruned(src) || src == from {
                continue;
            }
            self.add_edge(src, role, into, ds.union(&depends));
        }

        // inequality links survive the merge
        let differents: Vec<(NodeId, DependencySet)> = self.nodes[from.index()]
            .differents
            .iter()
            .map(|(&n, d)| (n, d.clone()))
            .collect();
        for (other, ds) in differents {
            if let Some(clash) = self.add_different(into, other, ds.union(&depends)) {
                return Some(clash);
            }
        }

        // the absorbed node's anonymous subtree is no longer reachable
        let children: Vec<NodeId> = self.nodes[from.index()].children.clone();
        for child in children {
            if !self.nodes[child.index()].is_named() {
                self.prune(child);
            }
        }
        None
    }

    /// Remove a node and its anonymous tree descendants from active search
    /// state. Only ever undone by rewinding the trail; a pruned subtree is
    /// reconstructed by replaying the originating branch, never by an
    /// undo-of-prune.
    pub fn prune(&mut self, node: NodeId) {
        if self.nodes[node.index()].pruned {
            return;
        }
        self.nodes[node.index()].pruned = true;
        self.trail.push(TrailOp::Pruned(node));
        self.generation += 1;
        let children: Vec<NodeId> = self.nodes[node.index()].children.clone();
        for child in children {
            if !self.nodes[child.index()].is_named() {
                self.prune(child);
            }
        }
    }

    pub fn mark(&self) -> TrailMark {
        TrailMark(self.trail.len())
    }

    /// Rewind every mutation made after `mark`, restoring the graph to the
    /// exact state it had when the mark was taken.
    pub fn rewind(&mut self, mark: TrailMark) {
        while self.trail.len() > mark.0 {
            let Some(op) = self.trail.pop() else { break };
            match op {
                TrailOp::NodeAdded => {
                    if let Some(node) = self.nodes.pop() {
                        if let Some(parent) = node.parent {
                            self.nodes[parent.index()].children.pop();
                        }
                        if matches!(node.name, NodeName::Anonymous(_)) {
                            self.anon_counter -= 1;
                        }
                    }
                }
                TrailOp::EdgeAdded => {
                    if let Some(edge) = self.edges.pop() {
                        self.nodes[edge.from.index()].out_edges.pop();
                        self.nodes[edge.to.index()].in_edges.pop();
                    }
                }
                TrailOp::TypeAdded(node, concept) => {
                    self.nodes[node.index()].labels.remove(&concept);
                }
                TrailOp::Merged(node) => {
                    self.nodes[node.index()].merged = None;
                }
                TrailOp::Pruned(node) => {
                    self.nodes[node.index()].pruned = false;
                }
                TrailOp::DifferentAdded(n1, n2) => {
                    self.nodes[n1.index()].differents.remove(&n2);
                    self.nodes[n2.index()].differents.remove(&n1);
                }
            }
        }
        self.generation += 1;
    }

    /// Tree descendants of a node (itself excluded), for blocking-cache
    /// invalidation and re-queueing.
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.nodes[node.index()].children.clone();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n.index()].children.iter().copied());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimizuku_core::model::ClassExpression;
    use mimizuku_core::rbox::RoleBox;

    fn setup() -> (ConceptPool, RoleBox) {
        (ConceptPool::new(), RoleBox::new())
    }

    fn intern(pool: &mut ConceptPool, rbox: &mut RoleBox, name: &str) -> ConceptId {
        pool.intern(
            &ClassExpression::named(format!("http://example.org/{name}")),
            rbox,
        )
        .unwrap()
    }

    #[test]
    fn test_add_type_idempotent() {
        let (mut pool, mut rbox) = setup();
        let c = intern(&mut pool, &mut rbox, "C");
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));

        assert!(matches!(
            graph.add_type(&pool, a, c, DependencySet::independent()),
            AddOutcome::Added
        ));
        assert!(matches!(
            graph.add_type(&pool, a, c, DependencySet::from_branch(1)),
            AddOutcome::Noop
        ));
    }

    #[test]
    fn test_complement_clash_merges_dependencies() {
        let (mut pool, mut rbox) = setup();
        let c = intern(&mut pool, &mut rbox, "C");
        let not_c = pool.negate(c);
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));

        graph.add_type(&pool, a, c, DependencySet::from_branch(2));
        match graph.add_type(&pool, a, not_c, DependencySet::from_branch(3)) {
            AddOutcome::Clash(clash) => {
                assert!(clash.depends.contains(2));
                assert!(clash.depends.contains(3));
                assert_eq!(clash.depends.max(), 3);
            }
            other => panic!("expected clash, got {other:?}"),
        }
    }

    #[test]
    fn test_rewind_restores_state() {
        let (mut pool, mut rbox) = setup();
        let c = intern(&mut pool, &mut rbox, "C");
        let r = rbox
            .intern(&mimizuku_core::model::PropertyExpression::object(
                "http://example.org/r",
            ))
            .unwrap();
        rbox.close();
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));

        let mark = graph.mark();
        let b = graph.add_blockable(a);
        graph.add_edge(a, r, b, DependencySet::from_branch(1));
        graph.add_type(&pool, b, c, DependencySet::from_branch(1));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.r_successors(&rbox, a, r).len(), 1);

        graph.rewind(mark);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.r_successors(&rbox, a, r).is_empty());
    }

    #[test]
    fn test_merge_copies_types_and_edges() {
        let (mut pool, mut rbox) = setup();
        let c = intern(&mut pool, &mut rbox, "C");
        let d = intern(&mut pool, &mut rbox, "D");
        let r = rbox
            .intern(&mimizuku_core::model::PropertyExpression::object(
                "http://example.org/r",
            ))
            .unwrap();
        rbox.close();
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));
        let b = graph.add_individual(Individual::new("http://example.org/b"));
        let x = graph.add_individual(Individual::new("http://example.org/x"));

        graph.add_type(&pool, b, c, DependencySet::independent());
        graph.add_type(&pool, a, d, DependencySet::independent());
        graph.add_edge(b, r, x, DependencySet::independent());

        assert!(graph.merge(&pool, b, a, DependencySet::from_branch(1)).is_none());
        assert_eq!(graph.canon(b), a);
        assert!(graph.has_type(a, c));
        assert!(graph.has_type(a, d));
        let succs = graph.r_successors(&rbox, a, r);
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].0, x);
        // the copied fact depends on the merge
        assert!(graph.get_depends(a, c).unwrap().contains(1));
    }

    #[test]
    fn test_merge_of_different_individuals_clashes() {
        let (pool, _) = setup();
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));
        let b = graph.add_individual(Individual::new("http://example.org/b"));
        graph.add_different(a, b, DependencySet::independent());

        assert!(graph.merge(&pool, a, b, DependencySet::from_branch(1)).is_some());
    }

    #[test]
    fn test_prune_removes_subtree() {
        let (pool, _) = setup();
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));
        let x = graph.add_blockable(a);
        let y = graph.add_blockable(x);

        graph.prune(x);
        assert!(graph.is_pruned(x));
        assert!(graph.is_pruned(y));
        assert!(!graph.is_pruned(a));
        let _ = pool;
    }

    #[test]
    fn test_inverse_successor_visible() {
        let (_pool, mut rbox) = setup();
        let r = rbox
            .intern(&mimizuku_core::model::PropertyExpression::object(
                "http://example.org/r",
            ))
            .unwrap();
        rbox.close();
        let mut graph = CompletionGraph::new();
        let a = graph.add_individual(Individual::new("http://example.org/a"));
        let b = graph.add_individual(Individual::new("http://example.org/b"));
        graph.add_edge(a, r, b, DependencySet::independent());

        // b --r⁻--> a
        let succs = graph.r_successors(&rbox, b, r.inverse());
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].0, a);
    }
}
