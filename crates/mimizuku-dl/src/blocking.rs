//! ブロッキング (termination by ancestor blocking)

use crate::graph::{CompletionGraph, NodeId};
use mimizuku_core::expressivity::Expressivity;
use mimizuku_core::term::ConceptId;
use std::collections::HashMap;

/// Which blocking condition guarantees termination for the ontology at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingStrategy {
    /// Label-subset blocking; sound without inverse roles or qualified
    /// number restrictions.
    Subset,
    /// Pairwise equality blocking over (node, parent) label pairs and the
    /// connecting roles.
    Equality,
}

impl BlockingStrategy {
    pub fn for_expressivity(expr: &Expressivity) -> Self {
        if expr.inverses || (expr.cardinality && expr.qualified_cardinality) {
            BlockingStrategy::Equality
        } else {
            BlockingStrategy::Subset
        }
    }
}

/// Blocking oracle with a per-node memo. The memo is keyed on the graph's
/// mutation generation: any change to the graph invalidates every cached
/// answer, which is coarse but always sound.
#[derive(Debug)]
pub struct Blocking {
    strategy: BlockingStrategy,
    cache: HashMap<NodeId, (u64, bool)>,
}

impl Blocking {
    pub fn new(strategy: BlockingStrategy) -> Self {
        Self {
            strategy,
            cache: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> BlockingStrategy {
        self.strategy
    }

    /// A node is blocked when itself or any blockable ancestor is directly
    /// blocked by a strict ancestor witness. Generating rules must not fire
    /// on blocked nodes.
    pub fn is_blocked(&mut self, graph: &CompletionGraph, node: NodeId) -> bool {
        let node = graph.canon(node);
        if !graph.node(node).blockable {
            return false;
        }
        let generation = graph.generation();
        if let Some(&(gen, blocked)) = self.cache.get(&node) {
            if gen == generation {
                return blocked;
            }
        }
        let mut blocked = false;
        let mut current = Some(node);
        while let Some(x) = current {
            if !graph.node(x).blockable {
                break;
            }
            if self.directly_blocked(graph, x) {
                blocked = true;
                break;
            }
            current = graph.node(x).parent;
        }
        self.cache.insert(node, (generation, blocked));
        blocked
    }

    fn directly_blocked(&self, graph: &CompletionGraph, node: NodeId) -> bool {
        let labels = graph.label_set(node);
        let mut witness = graph.node(node).parent;
        while let Some(y) = witness {
            if !graph.node(y).blockable {
                break;
            }
            let matches = match self.strategy {
                BlockingStrategy::Subset => is_subset(&labels, &graph.label_set(y)),
                BlockingStrategy::Equality => self.pairwise_match(graph, node, y, &labels),
            };
            if matches {
                return true;
            }
            witness = graph.node(y).parent;
        }
        false
    }

    /// L(x) = L(y), L(x') = L(y'), and the roles connecting x' to x equal
    /// those connecting y' to y.
    fn pairwise_match(
        &self,
        graph: &CompletionGraph,
        x: NodeId,
        y: NodeId,
        x_labels: &[ConceptId],
    ) -> bool {
        let (Some(xp), Some(yp)) = (graph.node(x).parent, graph.node(y).parent) else {
            return false;
        };
        x_labels == graph.label_set(y).as_slice()
            && graph.label_set(xp) == graph.label_set(yp)
            && graph.roles_between(xp, x) == graph.roles_between(yp, y)
    }
}

fn is_subset(sub: &[ConceptId], sup: &[ConceptId]) -> bool {
    // both slices are sorted
    let mut it = sup.iter();
    'outer: for c in sub {
        for s in it.by_ref() {
            if s == c {
                continue 'outer;
            }
            if s > c {
                return false;
            }
        }
        return false;
    }
    true
}
