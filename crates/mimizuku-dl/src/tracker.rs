//! 増分変更トラッカ (incremental change tracking)

use mimizuku_core::model::{Axiom, ClassExpression, Individual, PropertyExpression};

/// One recorded ontology change.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddedType(Individual, ClassExpression),
    RemovedType(Individual, ClassExpression),
    AddedEdge(Individual, PropertyExpression, Individual),
    RemovedEdge(Individual, PropertyExpression, Individual),
    AddedIndividual(Individual),
    RemovedIndividual(Individual),
    AddedAxiom(Axiom),
    RemovedAxiom(Axiom),
}

impl Change {
    /// ABox-level changes keep interned term ids stable, so the knowledge
    /// base can be extended in place. They still invalidate satisfiability
    /// verdicts: every check is run against the full ABox, and a new
    /// assertion can flip a concept from satisfiable to unsatisfiable.
    pub fn is_abox(&self) -> bool {
        match self {
            Change::AddedType(..)
            | Change::RemovedType(..)
            | Change::AddedEdge(..)
            | Change::RemovedEdge(..)
            | Change::AddedIndividual(_)
            | Change::RemovedIndividual(_) => true,
            Change::AddedAxiom(axiom) | Change::RemovedAxiom(axiom) => matches!(
                axiom,
                Axiom::ClassAssertion(..)
                    | Axiom::ObjectPropertyAssertion(..)
                    | Axiom::NegativeObjectPropertyAssertion(..)
                    | Axiom::DataPropertyAssertion(..)
                    | Axiom::SameIndividual(_)
                    | Axiom::DifferentIndividuals(_)
            ),
        }
    }
}

/// Records ontology edits made after classification so the next consistency
/// check knows what changed and whether the knowledge base can be extended
/// in place or must be rebuilt.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Vec<Change>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, change: Change) {
        self.pending.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.pending
    }

    /// True when every pending change is assertional and the terminology
    /// and role axioms are untouched.
    pub fn is_abox_only(&self) -> bool {
        self.pending.iter().all(Change::is_abox)
    }

    /// True when at least one pending change retracts something. Monotonic
    /// additions can extend an existing completion graph; deletions cannot.
    pub fn has_deletions(&self) -> bool {
        self.pending.iter().any(|c| {
            matches!(
                c,
                Change::RemovedType(..)
                    | Change::RemovedEdge(..)
                    | Change::RemovedIndividual(_)
                    | Change::RemovedAxiom(_)
            )
        })
    }

    /// Individuals whose assertions changed; a re-check can restrict
    /// attention to these and their neighborhoods.
    pub fn updated_individuals(&self) -> Vec<Individual> {
        let mut out: Vec<Individual> = self
            .pending
            .iter()
            .flat_map(|c| match c {
                Change::AddedType(i, _)
                | Change::RemovedType(i, _)
                | Change::AddedIndividual(i)
                | Change::RemovedIndividual(i) => vec![i.clone()],
                Change::AddedEdge(a, _, b) | Change::RemovedEdge(a, _, b) => {
                    vec![a.clone(), b.clone()]
                }
                Change::AddedAxiom(axiom) | Change::RemovedAxiom(axiom) => match axiom {
                    Axiom::ClassAssertion(_, i) | Axiom::DataPropertyAssertion(_, i, _) => {
                        vec![i.clone()]
                    }
                    Axiom::ObjectPropertyAssertion(_, a, b)
                    | Axiom::NegativeObjectPropertyAssertion(_, a, b) => {
                        vec![a.clone(), b.clone()]
                    }
                    Axiom::SameIndividual(is) | Axiom::DifferentIndividuals(is) => is.clone(),
                    _ => Vec::new(),
                },
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.dedup();
        out
    }

    pub fn drain(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ind(name: &str) -> Individual {
        Individual::new(format!("http://example.org/{name}"))
    }

    fn ce(name: &str) -> ClassExpression {
        ClassExpression::named(format!("http://example.org/{name}"))
    }

    #[test]
    fn test_abox_only_detection() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::AddedType(ind("a"), ce("C")));
        assert!(tracker.is_abox_only());
        tracker.record(Change::AddedAxiom(Axiom::SubClassOf(ce("C"), ce("D"))));
        assert!(!tracker.is_abox_only());
    }

    #[test]
    fn test_deletion_detection() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::AddedType(ind("a"), ce("C")));
        assert!(!tracker.has_deletions());
        tracker.record(Change::RemovedType(ind("a"), ce("C")));
        assert!(tracker.has_deletions());
    }

    #[test]
    fn test_updated_individuals_deduplicated() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::AddedType(ind("a"), ce("C")));
        tracker.record(Change::AddedEdge(
            ind("a"),
            PropertyExpression::object("http://example.org/r"),
            ind("b"),
        ));
        let updated = tracker.updated_individuals();
        assert_eq!(updated, vec![ind("a"), ind("b")]);
    }

    #[test]
    fn test_drain_empties_tracker() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::AddedIndividual(ind("a")));
        assert_eq!(tracker.drain().len(), 1);
        assert!(tracker.is_empty());
    }
}
