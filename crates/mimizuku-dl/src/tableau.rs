//! タブロー展開エンジン (completion rules and backjumping search)

use crate::blocking::{Blocking, BlockingStrategy};
use crate::dependency::DependencySet;
use crate::graph::{AddOutcome, Clash, CompletionGraph, NodeId, NodeName, TrailMark};
use crate::kb::KnowledgeBase;
use mimizuku_core::datatype::DatatypeReasoner;
use mimizuku_core::model::{Individual, Literal};
use mimizuku_core::rbox::RoleId;
use mimizuku_core::term::{ConceptData, ConceptId, ConceptPool};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Search result. `Incomplete` means the search was cut off by a timeout,
/// step budget or cancellation and proved nothing; callers must never
/// collapse it into either boolean answer silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Satisfiable,
    Unsatisfiable,
    Incomplete,
}

/// Cooperative resource limits, checked between rule applications.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub timeout: Option<Duration>,
    pub max_steps: Option<u64>,
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub steps: u64,
    pub branches: u64,
    pub clashes: u64,
    pub backjumps: u64,
    pub nodes: usize,
}

#[derive(Debug, Clone)]
enum BranchKind {
    /// One alternative per untried disjunct.
    Disjunction {
        node: NodeId,
        disjuncts: Vec<ConceptId>,
    },
    /// Force a successor into the qualifier or its complement before the
    /// max rule counts it.
    Choose { succ: NodeId, filler: ConceptId },
    /// One alternative per mergeable successor pair of an over-full max
    /// restriction.
    MaxMerge { pairs: Vec<(NodeId, NodeId)> },
}

impl BranchKind {
    fn arity(&self) -> usize {
        match self {
            BranchKind::Disjunction { disjuncts, .. } => disjuncts.len(),
            BranchKind::Choose { .. } => 2,
            BranchKind::MaxMerge { pairs } => pairs.len(),
        }
    }
}

#[derive(Debug)]
struct Branch {
    mark: TrailMark,
    kind: BranchKind,
    /// Dependencies of the facts that triggered the nondeterministic rule.
    depends: DependencySet,
    next_alt: usize,
    /// Union of the dependency sets of every clash seen under this branch.
    clash_union: DependencySet,
}

enum StepOutcome {
    Complete,
    Clash(Clash),
    Incomplete,
}

/// One tableau search: a completion graph, a branch stack, and the driver
/// loop that applies completion rules to a work queue of dirty nodes until
/// the graph is complete or closed. Each top-level query builds its own
/// `Tableau`; nothing here is shared between searches.
pub struct Tableau<'a> {
    kb: &'a KnowledgeBase,
    datatypes: &'a dyn DatatypeReasoner,
    graph: CompletionGraph,
    blocking: Blocking,
    branches: Vec<Branch>,
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    nominal_nodes: HashMap<Individual, NodeId>,
    pending_clash: Option<Clash>,
    limits: SearchLimits,
    started: Instant,
    stats: SearchStats,
}

impl<'a> Tableau<'a> {
    pub fn new(
        kb: &'a KnowledgeBase,
        datatypes: &'a dyn DatatypeReasoner,
        limits: SearchLimits,
    ) -> Self {
        let strategy = BlockingStrategy::for_expressivity(&kb.expressivity);
        Self {
            kb,
            datatypes,
            graph: CompletionGraph::new(),
            blocking: Blocking::new(strategy),
            branches: Vec::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            nominal_nodes: HashMap::new(),
            pending_clash: None,
            limits,
            started: Instant::now(),
            stats: SearchStats::default(),
        }
    }

    pub fn stats(&self) -> SearchStats {
        let mut stats = self.stats;
        stats.nodes = self.graph.node_count();
        stats
    }

    pub fn graph(&self) -> &CompletionGraph {
        &self.graph
    }

    pub fn node_for(&self, individual: &Individual) -> Option<NodeId> {
        self.nominal_nodes.get(individual).map(|&n| self.graph.canon(n))
    }

    /// Seed the graph with every ABox assertion of the knowledge base. An
    /// assertion-level contradiction is remembered and surfaced by `run` as
    /// an independent clash.
    pub fn seed_abox(&mut self) {
        for individual in self.kb.individuals() {
            let node = self.graph.add_individual(individual.clone());
            self.nominal_nodes.insert(individual.clone(), node);
            self.enqueue(node);
        }
        let roots: Vec<NodeId> = self
            .kb
            .individuals()
            .iter()
            .map(|i| self.nominal_nodes[i])
            .collect();

        for &(idx, concept) in self.kb.class_assertions() {
            if let Err(clash) = self.assert_type(roots[idx], concept, DependencySet::independent())
            {
                self.record_seed_clash(clash);
            }
        }
        for &(from, role, to) in self.kb.role_assertions() {
            if self.graph.add_edge(roots[from], role, roots[to], DependencySet::independent()) {
                self.enqueue(roots[from]);
                self.enqueue(roots[to]);
            }
        }
        for (idx, role, literal) in self.kb.data_assertions() {
            let value = self.graph.add_literal(literal.clone(), roots[*idx]);
            self.graph
                .add_edge(roots[*idx], *role, value, DependencySet::independent());
            self.enqueue(roots[*idx]);
        }
        for &(a, b) in self.kb.same_individuals() {
            if let Some(clash) =
                self.graph
                    .merge(&self.kb.pool, roots[a], roots[b], DependencySet::independent())
            {
                self.record_seed_clash(clash);
            }
            self.enqueue(roots[b]);
        }
        for &(a, b) in self.kb.different_individuals() {
            if let Some(clash) =
                self.graph
                    .add_different(roots[a], roots[b], DependencySet::independent())
            {
                self.record_seed_clash(clash);
            }
        }
    }

    /// Add a fresh root individual carrying `concept`, for satisfiability
    /// queries.
    pub fn add_root_concept(&mut self, concept: ConceptId) -> NodeId {
        let node = self.graph.add_root();
        if let Err(clash) = self.assert_type(node, concept, DependencySet::independent()) {
            self.record_seed_clash(clash);
        }
        node
    }

    /// Type a named individual's root node, for instance checking. The
    /// individual's node is created if the ABox never mentioned it.
    pub fn assert_individual(&mut self, individual: &Individual, concept: ConceptId) {
        let node = self.nominal_node(individual);
        if let Err(clash) = self.assert_type(node, concept, DependencySet::independent()) {
            self.record_seed_clash(clash);
        }
    }

    fn record_seed_clash(&mut self, clash: Clash) {
        if self.pending_clash.is_none() {
            self.pending_clash = Some(clash);
        }
    }

    /// Drive the search to a verdict.
    pub fn run(&mut self) -> Verdict {
        if let Some(clash) = self.pending_clash.take() {
            self.stats.clashes += 1;
            if !self.backjump(clash) {
                return Verdict::Unsatisfiable;
            }
        }
        loop {
            match self.expand() {
                StepOutcome::Complete => {
                    debug!(
                        nodes = self.graph.node_count(),
                        branches = self.stats.branches,
                        clashes = self.stats.clashes,
                        "completion graph is complete"
                    );
                    return Verdict::Satisfiable;
                }
                StepOutcome::Incomplete => {
                    warn!(
                        steps = self.stats.steps,
                        elapsed_ms = self.started.elapsed().as_millis() as u64,
                        "search aborted before completion"
                    );
                    return Verdict::Incomplete;
                }
                StepOutcome::Clash(clash) => {
                    self.stats.clashes += 1;
                    trace!(node = clash.node.0, "clash");
                    if !self.backjump(clash) {
                        return Verdict::Unsatisfiable;
                    }
                }
            }
        }
    }

    fn expand(&mut self) -> StepOutcome {
        loop {
            while let Some(node) = self.queue.pop_front() {
                self.queued.remove(&node);
                if self.limits_exceeded() {
                    return StepOutcome::Incomplete;
                }
                self.stats.steps += 1;
                let node = self.graph.canon(node);
                if !self.graph.is_live(node) || self.graph.node(node).is_literal() {
                    continue;
                }
                match self.apply_rules(node) {
                    Ok(true) => self.enqueue(self.graph.canon(node)),
                    Ok(false) => {}
                    Err(clash) => return StepOutcome::Clash(clash),
                }
            }
            // fixpoint sweep: catches nodes whose blocker changed under them
            let mut progress = false;
            let live: Vec<NodeId> = self.graph.live_nodes().collect();
            for node in live {
                if self.limits_exceeded() {
                    return StepOutcome::Incomplete;
                }
                if self.graph.node(node).is_literal() {
                    continue;
                }
                self.stats.steps += 1;
                match self.apply_rules(node) {
                    Ok(p) => progress |= p,
                    Err(clash) => return StepOutcome::Clash(clash),
                }
            }
            if !progress {
                return StepOutcome::Complete;
            }
        }
    }

    fn limits_exceeded(&self) -> bool {
        if let Some(max) = self.limits.max_steps {
            if self.stats.steps >= max {
                return true;
            }
        }
        if let Some(timeout) = self.limits.timeout {
            if self.started.elapsed() >= timeout {
                return true;
            }
        }
        if let Some(cancel) = &self.limits.cancel {
            if cancel.load(Ordering::Relaxed) {
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // completion rules
    // ------------------------------------------------------------------

    /// Apply every rule whose trigger matches on `node`. Deterministic rules
    /// run first; at most one nondeterministic branch is opened per pass.
    /// Returns whether the graph changed.
    fn apply_rules(&mut self, node: NodeId) -> Result<bool, Clash> {
        let before = self.graph.generation();
        self.apply_universals(node)?;
        self.apply_unfolding(node)?;
        self.apply_and(node)?;
        self.apply_self(node)?;
        self.apply_nominal(node)?;
        let node = self.graph.canon(node);
        self.apply_all(node)?;
        self.apply_functional(node)?;
        let node = self.graph.canon(node);
        if !self.blocking.is_blocked(&self.graph, node) {
            self.apply_some(node)?;
            self.apply_min(node)?;
        }
        self.apply_choose(node)?;
        self.apply_max(node)?;
        self.apply_or(node)?;
        Ok(self.graph.generation() != before)
    }

    fn assert_type(
        &mut self,
        node: NodeId,
        concept: ConceptId,
        depends: DependencySet,
    ) -> Result<(), Clash> {
        match self.graph.add_type(&self.kb.pool, node, concept, depends) {
            AddOutcome::Added => {
                self.enqueue(self.graph.canon(node));
                Ok(())
            }
            AddOutcome::Noop => Ok(()),
            AddOutcome::Clash(clash) => Err(clash),
        }
    }

    fn enqueue(&mut self, node: NodeId) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    fn requeue_all(&mut self) {
        self.queue.clear();
        self.queued.clear();
        let live: Vec<NodeId> = self.graph.live_nodes().collect();
        for node in live {
            if !self.graph.node(node).is_literal() {
                self.enqueue(node);
            }
        }
    }

    /// Axioms internalized as universal concepts hold on every individual.
    fn apply_universals(&mut self, node: NodeId) -> Result<(), Clash> {
        let kb = self.kb;
        for &concept in kb.universals() {
            self.assert_type(node, concept, DependencySet::independent())?;
        }
        Ok(())
    }

    /// Lazy unfolding of absorbed axioms with a named left-hand side.
    fn apply_unfolding(&mut self, node: NodeId) -> Result<(), Clash> {
        let pending: Vec<(ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter(|&(c, _)| !self.kb.unfoldings(c).is_empty())
            .map(|(c, ds)| (c, ds.clone()))
            .collect();
        let kb = self.kb;
        for (concept, ds) in pending {
            for &implied in kb.unfoldings(concept) {
                self.assert_type(node, implied, ds.clone())?;
            }
        }
        Ok(())
    }

    fn apply_and(&mut self, node: NodeId) -> Result<(), Clash> {
        let conjunctions: Vec<(Vec<ConceptId>, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match self.kb.pool.concept(c) {
                ConceptData::And(parts) => Some((parts.clone(), ds.clone())),
                _ => None,
            })
            .collect();
        for (parts, ds) in conjunctions {
            for part in parts {
                self.assert_type(node, part, ds.clone())?;
            }
        }
        Ok(())
    }

    /// ∃r.Self adds a reflexive edge; ¬∃r.Self closes the graph when a
    /// matching self-loop exists.
    fn apply_self(&mut self, node: NodeId) -> Result<(), Clash> {
        let selfs: Vec<(ConceptId, RoleId, bool, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::SelfRestriction(r) => Some((c, r, true, ds.clone())),
                ConceptData::NegSelfRestriction(r) => Some((c, r, false, ds.clone())),
                _ => None,
            })
            .collect();
        for (concept, role, positive, ds) in selfs {
            if positive {
                if self.graph.add_edge(node, role, node, ds) {
                    self.enqueue(node);
                }
            } else {
                for (succ, eds) in self.graph.r_successors(&self.kb.rbox, node, role) {
                    if succ == node {
                        return Err(Clash {
                            node,
                            concept,
                            depends: ds.union(&eds),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Nominal labels pin a node to the root individual they name.
    fn apply_nominal(&mut self, node: NodeId) -> Result<(), Clash> {
        let nominals: Vec<(ConceptId, Individual, bool, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match self.kb.pool.concept(c) {
                ConceptData::Nominal(i) => Some((c, i.clone(), true, ds.clone())),
                ConceptData::NegNominal(i) => Some((c, i.clone(), false, ds.clone())),
                _ => None,
            })
            .collect();
        for (concept, individual, positive, ds) in nominals {
            let target = self.nominal_node(&individual);
            let here = self.graph.canon(node);
            let target = self.graph.canon(target);
            if positive {
                if here != target {
                    if let Some(clash) = self.graph.merge(&self.kb.pool, here, target, ds) {
                        return Err(clash);
                    }
                    self.enqueue(target);
                }
            } else if here == target {
                // ¬{a} on a node equal to a; the equality's own
                // dependencies ride on the label via canon routing
                return Err(Clash {
                    node: here,
                    concept,
                    depends: ds,
                });
            }
        }
        Ok(())
    }

    fn nominal_node(&mut self, individual: &Individual) -> NodeId {
        if let Some(&node) = self.nominal_nodes.get(individual) {
            return node;
        }
        let node = self.graph.add_individual(individual.clone());
        self.nominal_nodes.insert(individual.clone(), node);
        self.enqueue(node);
        node
    }

    /// ∀-rule with transitive propagation through the role hierarchy.
    fn apply_all(&mut self, node: NodeId) -> Result<(), Clash> {
        let alls: Vec<(RoleId, ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::All(r, filler) => Some((r, filler, ds.clone())),
                _ => None,
            })
            .collect();
        for (role, filler, ds) in alls {
            for (succ, eds) in self.graph.r_successors(&self.kb.rbox, node, role) {
                if self.graph.node(succ).is_literal() {
                    continue;
                }
                self.assert_type(succ, filler, ds.union(&eds))?;
            }
            // ∀R.C over a transitive S ⊑ R also imposes ∀S.C downstream
            for s in self.kb.rbox.transitive_sub_roles(role) {
                let Some(propagated) = self.kb.pool.find_all(s, filler) else {
                    continue;
                };
                for (succ, eds) in self.graph.r_successors(&self.kb.rbox, node, s) {
                    if self.graph.node(succ).is_literal() {
                        continue;
                    }
                    self.assert_type(succ, propagated, ds.union(&eds))?;
                }
            }
            if self.kb.rbox.is_reflexive(role) {
                self.assert_type(node, filler, ds.clone())?;
            }
        }
        Ok(())
    }

    /// Functional roles behave as an implicit ≤1 r.⊤: any two successors
    /// merge deterministically.
    fn apply_functional(&mut self, node: NodeId) -> Result<(), Clash> {
        for id in 0..self.kb.rbox.len() as u32 {
            let role = RoleId(id);
            if !self.kb.rbox.is_functional(role) {
                continue;
            }
            let succs = self.distinct_successors(node, role);
            if succs.len() < 2 {
                continue;
            }
            let (a, a_ds) = succs[0].clone();
            let (b, b_ds) = succs[1].clone();
            let ds = a_ds.union(&b_ds);
            self.merge_pair(a, b, ds)?;
            // one merge per pass; the queue brings the node back
            return Ok(());
        }
        Ok(())
    }

    /// Merge two nodes, preferring a named survivor; literal pairs are
    /// decided by the datatype reasoner instead of graph merging.
    fn merge_pair(&mut self, a: NodeId, b: NodeId, ds: DependencySet) -> Result<(), Clash> {
        let a_node = self.graph.node(a);
        let b_node = self.graph.node(b);
        if a_node.is_literal() && b_node.is_literal() {
            // the merged node carries every value already merged into
            // either side, so the whole group must satisfy together
            if !self.datatypes.is_satisfiable(&self.literal_group(a, b)) {
                return Err(Clash {
                    node: a,
                    concept: ConceptPool::BOTTOM,
                    depends: ds,
                });
            }
            let (from, into) = (b, a);
            if let Some(clash) = self.graph.merge(&self.kb.pool, from, into, ds) {
                return Err(clash);
            }
            return Ok(());
        }
        let (from, into) = if b_node.is_named() && !a_node.is_named() {
            (a, b)
        } else {
            (b, a)
        };
        if let Some(clash) = self.graph.merge(&self.kb.pool, from, into, ds) {
            return Err(clash);
        }
        self.enqueue(self.graph.canon(into));
        Ok(())
    }

    /// Constants carried by every literal node routed to either merge
    /// endpoint.
    fn literal_group(&self, a: NodeId, b: NodeId) -> Vec<Literal> {
        let (ca, cb) = (self.graph.canon(a), self.graph.canon(b));
        let mut values = Vec::new();
        for i in 0..self.graph.node_count() as u32 {
            let id = NodeId(i);
            let NodeName::Literal(value) = &self.graph.node(id).name else {
                continue;
            };
            let canon = self.graph.canon(id);
            if canon == ca || canon == cb {
                values.push(value.clone());
            }
        }
        values
    }

    /// ∃-rule: generate a fresh successor unless one with the filler exists.
    fn apply_some(&mut self, node: NodeId) -> Result<(), Clash> {
        let somes: Vec<(RoleId, ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::Some(r, filler) => Some((r, filler, ds.clone())),
                _ => None,
            })
            .collect();
        for (role, filler, ds) in somes {
            let satisfied = self
                .graph
                .r_successors(&self.kb.rbox, node, role)
                .iter()
                .any(|&(succ, _)| self.graph.has_type(succ, filler));
            if satisfied {
                continue;
            }
            let succ = self.graph.add_blockable(node);
            self.graph.add_edge(node, role, succ, ds.clone());
            self.assert_type(succ, filler, ds)?;
            self.enqueue(node);
        }
        Ok(())
    }

    /// ≥-rule: generate n pairwise-different successors.
    fn apply_min(&mut self, node: NodeId) -> Result<(), Clash> {
        let mins: Vec<(RoleId, u32, ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::Min(r, n, filler) => Some((r, n, filler, ds.clone())),
                _ => None,
            })
            .collect();
        for (role, n, filler, ds) in mins {
            let witnesses: Vec<NodeId> = self
                .distinct_successors(node, role)
                .into_iter()
                .filter(|&(succ, _)| self.graph.has_type(succ, filler))
                .map(|(succ, _)| succ)
                .collect();
            if self.has_pairwise_different(&witnesses, n as usize) {
                continue;
            }
            let fresh: Vec<NodeId> = (0..n).map(|_| self.graph.add_blockable(node)).collect();
            for &succ in &fresh {
                self.graph.add_edge(node, role, succ, ds.clone());
                self.assert_type(succ, filler, ds.clone())?;
            }
            for (i, &a) in fresh.iter().enumerate() {
                for &b in &fresh[i + 1..] {
                    if let Some(clash) = self.graph.add_different(a, b, ds.clone()) {
                        return Err(clash);
                    }
                }
            }
            self.enqueue(node);
        }
        Ok(())
    }

    /// Choose-rule: before a qualified max can count successors, each one
    /// must commit to the qualifier or its complement.
    fn apply_choose(&mut self, node: NodeId) -> Result<(), Clash> {
        let maxes: Vec<(RoleId, ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::Max(r, _, filler) if filler != ConceptPool::TOP => {
                    Some((r, filler, ds.clone()))
                }
                _ => None,
            })
            .collect();
        for (role, filler, ds) in maxes {
            let complement = self.kb.pool.negate(filler);
            for (succ, eds) in self.graph.r_successors(&self.kb.rbox, node, role) {
                if self.graph.node(succ).is_literal()
                    || self.graph.has_type(succ, filler)
                    || self.graph.has_type(succ, complement)
                {
                    continue;
                }
                return self.open_branch(
                    BranchKind::Choose { succ, filler },
                    ds.union(&eds),
                );
            }
        }
        Ok(())
    }

    /// ≤-rule: an over-full max restriction merges two successors, branching
    /// over candidate pairs; if all successors are pairwise different the
    /// graph is closed.
    fn apply_max(&mut self, node: NodeId) -> Result<(), Clash> {
        let maxes: Vec<(ConceptId, RoleId, u32, ConceptId, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match *self.kb.pool.concept(c) {
                ConceptData::Max(r, n, filler) => Some((c, r, n, filler, ds.clone())),
                _ => None,
            })
            .collect();
        for (concept, role, n, filler, ds) in maxes {
            let witnesses: Vec<(NodeId, DependencySet)> = self
                .distinct_successors(node, role)
                .into_iter()
                .filter(|&(succ, _)| {
                    filler == ConceptPool::TOP || self.graph.has_type(succ, filler)
                })
                .collect();
            if witnesses.len() <= n as usize {
                continue;
            }
            // dependencies of everything the count rests on
            let mut base = ds.clone();
            for (succ, eds) in &witnesses {
                base = base.union(eds);
                if filler != ConceptPool::TOP {
                    if let Some(tds) = self.graph.get_depends(*succ, filler) {
                        base = base.union(tds);
                    }
                }
            }
            let mut pairs = Vec::new();
            for (i, (a, _)) in witnesses.iter().enumerate() {
                for (b, _) in &witnesses[i + 1..] {
                    if self.graph.are_different(*a, *b).is_none() {
                        pairs.push((*a, *b));
                    }
                }
            }
            if pairs.is_empty() {
                for (i, (a, _)) in witnesses.iter().enumerate() {
                    for (b, _) in &witnesses[i + 1..] {
                        if let Some(neq) = self.graph.are_different(*a, *b) {
                            base = base.union(neq);
                        }
                    }
                }
                return Err(Clash {
                    node,
                    concept,
                    depends: base,
                });
            }
            return self.open_branch(BranchKind::MaxMerge { pairs }, base);
        }
        Ok(())
    }

    /// ⊔-rule: branch over untried disjuncts.
    fn apply_or(&mut self, node: NodeId) -> Result<(), Clash> {
        let disjunctions: Vec<(Vec<ConceptId>, DependencySet)> = self
            .graph
            .types_of(node)
            .filter_map(|(c, ds)| match self.kb.pool.concept(c) {
                ConceptData::Or(parts) => Some((parts.clone(), ds.clone())),
                _ => None,
            })
            .collect();
        for (disjuncts, ds) in disjunctions {
            if disjuncts.iter().any(|&d| self.graph.has_type(node, d)) {
                continue;
            }
            return self.open_branch(BranchKind::Disjunction { node, disjuncts }, ds);
        }
        Ok(())
    }

    /// Live r-successors, collapsed to merge representatives.
    fn distinct_successors(&self, node: NodeId, role: RoleId) -> Vec<(NodeId, DependencySet)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (succ, ds) in self.graph.r_successors(&self.kb.rbox, node, role) {
            if seen.insert(succ) {
                out.push((succ, ds));
            }
        }
        out
    }

    /// Is there a subset of `nodes` of size `n` whose members are pairwise
    /// asserted different? n is a cardinality bound, so small.
    fn has_pairwise_different(&self, nodes: &[NodeId], n: usize) -> bool {
        fn go(
            graph: &CompletionGraph,
            nodes: &[NodeId],
            chosen: &mut Vec<NodeId>,
            n: usize,
        ) -> bool {
            if chosen.len() == n {
                return true;
            }
            for (i, &candidate) in nodes.iter().enumerate() {
                if chosen
                    .iter()
                    .all(|&c| graph.are_different(c, candidate).is_some())
                {
                    chosen.push(candidate);
                    if go(graph, &nodes[i + 1..], chosen, n) {
                        return true;
                    }
                    chosen.pop();
                }
            }
            false
        }
        if n == 0 {
            return true;
        }
        go(&self.graph, nodes, &mut Vec::new(), n)
    }

    // ------------------------------------------------------------------
    // branching and backjumping
    // ------------------------------------------------------------------

    fn open_branch(&mut self, kind: BranchKind, depends: DependencySet) -> Result<(), Clash> {
        self.branches.push(Branch {
            mark: self.graph.mark(),
            kind,
            depends,
            next_alt: 0,
            clash_union: DependencySet::independent(),
        });
        self.stats.branches += 1;
        let index = self.branches.len();
        trace!(branch = index, "branch opened");
        self.try_alternative(index)
    }

    fn try_alternative(&mut self, branch_no: usize) -> Result<(), Clash> {
        let (kind, depends, alt) = {
            let branch = &mut self.branches[branch_no - 1];
            let alt = branch.next_alt;
            branch.next_alt += 1;
            (branch.kind.clone(), branch.depends.clone(), alt)
        };
        let ds = depends.add(branch_no as u32);
        match kind {
            BranchKind::Disjunction { node, disjuncts } => {
                self.assert_type(node, disjuncts[alt], ds)
            }
            BranchKind::Choose { succ, filler } => {
                let concept = if alt == 0 {
                    filler
                } else {
                    self.kb.pool.negate(filler)
                };
                self.assert_type(succ, concept, ds)
            }
            BranchKind::MaxMerge { pairs } => {
                let (a, b) = pairs[alt];
                self.merge_pair(a, b, ds)
            }
        }
    }

    /// Dependency-directed backjumping: revert straight to the deepest
    /// branch the clash depends on, discarding every branch in between.
    /// Returns false when no branch can absorb the clash (unsatisfiable).
    fn backjump(&mut self, clash: Clash) -> bool {
        let mut depends = clash.depends;
        loop {
            let target = depends.max() as usize;
            if target == 0 {
                return false;
            }
            if self.branches.len() > target {
                self.stats.backjumps += 1;
                trace!(
                    from = self.branches.len(),
                    to = target,
                    "backjump discards intermediate branches"
                );
            }
            self.branches.truncate(target);
            let mark = self.branches[target - 1].mark;
            self.graph.rewind(mark);
            {
                let branch = &mut self.branches[target - 1];
                branch.clash_union = branch.clash_union.union(&depends);
            }
            let has_alternative = {
                let branch = &self.branches[target - 1];
                branch.next_alt < branch.kind.arity()
            };
            if has_alternative {
                self.requeue_all();
                match self.try_alternative(target) {
                    Ok(()) => return true,
                    Err(next) => {
                        depends = next.depends;
                        continue;
                    }
                }
            }
            // exhausted: the clash no longer depends on this branch's own
            // choice, only on what the branch itself depended on
            let Some(branch) = self.branches.pop() else {
                return false;
            };
            depends = branch
                .clash_union
                .remove(target as u32)
                .union(&branch.depends);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimizuku_core::datatype::SimpleDatatypeReasoner;
    use mimizuku_core::model::{Axiom, ClassExpression, Ontology, PropertyExpression};

    fn ce(name: &str) -> ClassExpression {
        ClassExpression::named(format!("http://example.org/{name}"))
    }

    fn role(name: &str) -> PropertyExpression {
        PropertyExpression::object(format!("http://example.org/{name}"))
    }

    fn ind(name: &str) -> Individual {
        Individual::new(format!("http://example.org/{name}"))
    }

    fn check_concept(ontology: &Ontology, concept: &ClassExpression) -> Verdict {
        let mut kb = KnowledgeBase::new(ontology).unwrap();
        let c = kb.intern(concept).unwrap();
        let dt = SimpleDatatypeReasoner;
        let mut tableau = Tableau::new(&kb, &dt, SearchLimits::default());
        tableau.seed_abox();
        tableau.add_root_concept(c);
        tableau.run()
    }

    fn check_consistency(ontology: &Ontology) -> Verdict {
        let kb = KnowledgeBase::new(ontology).unwrap();
        let dt = SimpleDatatypeReasoner;
        let mut tableau = Tableau::new(&kb, &dt, SearchLimits::default());
        tableau.seed_abox();
        tableau.run()
    }

    #[test]
    fn test_atomic_concept_satisfiable() {
        let ontology = Ontology::new();
        assert_eq!(check_concept(&ontology, &ce("C")), Verdict::Satisfiable);
    }

    #[test]
    fn test_direct_contradiction_unsatisfiable() {
        let ontology = Ontology::new();
        let contradiction =
            ClassExpression::and(vec![ce("C"), ClassExpression::not(ce("C"))]);
        assert_eq!(
            check_concept(&ontology, &contradiction),
            Verdict::Unsatisfiable
        );
    }

    #[test]
    fn test_disjunction_explores_alternatives() {
        // (C ⊔ D) ⊓ ¬C is satisfiable via the D disjunct
        let ontology = Ontology::new();
        let expr = ClassExpression::and(vec![
            ClassExpression::or(vec![ce("C"), ce("D")]),
            ClassExpression::not(ce("C")),
        ]);
        assert_eq!(check_concept(&ontology, &expr), Verdict::Satisfiable);
    }

    #[test]
    fn test_exists_forall_clash() {
        // ∃r.C ⊓ ∀r.¬C is unsatisfiable
        let ontology = Ontology::new();
        let expr = ClassExpression::and(vec![
            ClassExpression::some(role("r"), ce("C")),
            ClassExpression::all(role("r"), ClassExpression::not(ce("C"))),
        ]);
        assert_eq!(check_concept(&ontology, &expr), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_cyclic_existential_terminates_by_blocking() {
        // C ⊑ ∃r.C expands forever without blocking
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(
            ce("C"),
            ClassExpression::some(role("r"), ce("C")),
        ));
        assert_eq!(check_concept(&ontology, &ce("C")), Verdict::Satisfiable);
    }

    #[test]
    fn test_inconsistent_abox() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::not(ce("C")),
            ind("a"),
        ));
        assert_eq!(check_consistency(&ontology), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_functional_role_merges_successors() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::FunctionalProperty(role("r")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("a"), ind("b")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("a"), ind("c")));
        ontology.add_axiom(Axiom::ClassAssertion(ce("D"), ind("b")));

        let kb = KnowledgeBase::new(&ontology).unwrap();
        let dt = SimpleDatatypeReasoner;
        let mut tableau = Tableau::new(&kb, &dt, SearchLimits::default());
        tableau.seed_abox();
        assert_eq!(tableau.run(), Verdict::Satisfiable);

        // b and c collapsed to one successor which kept D
        let a = tableau.node_for(&ind("a")).unwrap();
        let b = tableau.node_for(&ind("b")).unwrap();
        let c = tableau.node_for(&ind("c")).unwrap();
        assert_eq!(b, c);
        let r = {
            let mut probe = KnowledgeBase::new(&ontology).unwrap();
            probe.rbox.intern(&role("r")).unwrap()
        };
        let succs = tableau.graph().r_successors(&kb.rbox, a, r);
        let distinct: HashSet<NodeId> = succs.iter().map(|&(n, _)| n).collect();
        assert_eq!(distinct.len(), 1);
    }

    #[test]
    fn test_functional_role_with_different_successors_is_inconsistent() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::FunctionalProperty(role("r")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("a"), ind("b")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("a"), ind("c")));
        ontology.add_axiom(Axiom::DifferentIndividuals(vec![ind("b"), ind("c")]));
        assert_eq!(check_consistency(&ontology), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_functional_data_role_with_distinct_constants_clashes() {
        let data = PropertyExpression::data("http://example.org/v");
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::FunctionalProperty(data.clone()));
        ontology.add_axiom(Axiom::DataPropertyAssertion(
            data.clone(),
            ind("a"),
            Literal::string("1"),
        ));
        ontology.add_axiom(Axiom::DataPropertyAssertion(
            data,
            ind("a"),
            Literal::string("2"),
        ));
        assert_eq!(check_consistency(&ontology), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_merged_literal_values_checked_as_a_group() {
        // pairwise compatible values whose conjunction is still
        // unsatisfiable; a pair-only check cannot see this
        struct AtMostTwoValues;
        impl DatatypeReasoner for AtMostTwoValues {
            fn is_satisfiable(&self, values: &[Literal]) -> bool {
                values.len() <= 2
            }
            fn are_disjoint(&self, _: &Literal, _: &Literal) -> bool {
                false
            }
        }

        let data = PropertyExpression::data("http://example.org/v");
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::FunctionalProperty(data.clone()));
        for value in ["1", "2", "3"] {
            ontology.add_axiom(Axiom::DataPropertyAssertion(
                data.clone(),
                ind("a"),
                Literal::string(value),
            ));
        }
        let kb = KnowledgeBase::new(&ontology).unwrap();
        let dt = AtMostTwoValues;
        let mut tableau = Tableau::new(&kb, &dt, SearchLimits::default());
        tableau.seed_abox();
        assert_eq!(tableau.run(), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_min_max_interaction() {
        // ≥3 r.⊤ ⊓ ≤2 r.⊤ is unsatisfiable
        let ontology = Ontology::new();
        let expr = ClassExpression::and(vec![
            ClassExpression::min(3, role("r"), None),
            ClassExpression::max(2, role("r"), None),
        ]);
        assert_eq!(check_concept(&ontology, &expr), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_qualified_max_uses_choose_rule() {
        // ∃r.C ⊓ ∃r.D ⊓ ≤1 r.⊤ is satisfiable (the successors merge)
        let ontology = Ontology::new();
        let expr = ClassExpression::and(vec![
            ClassExpression::some(role("r"), ce("C")),
            ClassExpression::some(role("r"), ce("D")),
            ClassExpression::max(1, role("r"), None),
        ]);
        assert_eq!(check_concept(&ontology, &expr), Verdict::Satisfiable);
    }

    #[test]
    fn test_transitive_role_propagates_universal() {
        // a -r-> b -r-> c, r transitive, a: ∀r.C must reach c
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::TransitiveProperty(role("r")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("a"), ind("b")));
        ontology.add_axiom(Axiom::ObjectPropertyAssertion(role("r"), ind("b"), ind("c")));
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::all(role("r"), ce("C")),
            ind("a"),
        ));
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::not(ce("C")),
            ind("c"),
        ));
        assert_eq!(check_consistency(&ontology), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_nominal_merges_with_root() {
        // b: {a}, a: C, b: ¬C is inconsistent
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::OneOf(vec![ind("a")]),
            ind("b"),
        ));
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::not(ce("C")),
            ind("b"),
        ));
        assert_eq!(check_consistency(&ontology), Verdict::Unsatisfiable);
    }

    #[test]
    fn test_step_budget_yields_incomplete() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(
            ce("C"),
            ClassExpression::some(role("r"), ce("C")),
        ));
        let mut kb = KnowledgeBase::new(&ontology).unwrap();
        let c = kb.intern(&ce("C")).unwrap();
        let dt = SimpleDatatypeReasoner;
        let limits = SearchLimits {
            max_steps: Some(1),
            ..SearchLimits::default()
        };
        let mut tableau = Tableau::new(&kb, &dt, limits);
        tableau.seed_abox();
        tableau.add_root_concept(c);
        assert_eq!(tableau.run(), Verdict::Incomplete);
    }

    #[test]
    fn test_backjump_discards_deeper_branches() {
        // nested disjunctions where the clash depends only on the outer
        // one; the run must still find the satisfying combination
        let ontology = Ontology::new();
        let expr = ClassExpression::and(vec![
            ClassExpression::or(vec![ce("A"), ce("B")]),
            ClassExpression::or(vec![ce("X"), ce("Y")]),
            ClassExpression::not(ce("A")),
            ClassExpression::not(ce("X")),
        ]);
        assert_eq!(check_concept(&ontology, &expr), Verdict::Satisfiable);
    }

    #[test]
    fn test_backjump_rewinds_graph_to_branch_point() {
        // (A ⊔ B) ⊓ ∀r.¬Q with A ⊑ ∃r.Q: the A alternative grows an
        // r-successor typed Q, which clashes with the propagated ¬Q
        // under branch 1; retrying with B must leave no trace of that
        // subtree in the graph
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(
            ce("A"),
            ClassExpression::some(role("r"), ce("Q")),
        ));
        let mut kb = KnowledgeBase::new(&ontology).unwrap();
        let expr = ClassExpression::and(vec![
            ClassExpression::or(vec![ce("A"), ce("B")]),
            ClassExpression::all(role("r"), ClassExpression::not(ce("Q"))),
        ]);
        let query = kb.intern(&expr).unwrap();
        let a = kb.intern(&ce("A")).unwrap();
        let b = kb.intern(&ce("B")).unwrap();
        let dt = SimpleDatatypeReasoner;
        let mut tableau = Tableau::new(&kb, &dt, SearchLimits::default());
        tableau.seed_abox();
        let root = tableau.add_root_concept(query);
        assert_eq!(tableau.run(), Verdict::Satisfiable);
        assert!(tableau.stats().clashes >= 1);

        let graph = tableau.graph();
        // the successor created under the failed alternative is gone
        assert_eq!(graph.node_count(), 1);
        // no label introduced past the branch point survives
        assert!(graph.get_depends(root, a).is_none());
        // the surviving disjunct carries its branch index
        assert!(graph.get_depends(root, b).is_some_and(|ds| ds.contains(1)));
    }
}
