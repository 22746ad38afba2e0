//! DL リーナー公開 API

use crate::cache::{CacheFeatures, CacheSafety, ConceptCache};
use crate::kb::KnowledgeBase;
use crate::tableau::{SearchLimits, SearchStats, Tableau, Verdict};
use crate::tracker::{Change, ChangeTracker};
use crate::DlError;
use mimizuku_core::datatype::{DatatypeReasoner, SimpleDatatypeReasoner};
use mimizuku_core::expressivity::Expressivity;
use mimizuku_core::model::{Axiom, ClassExpression, Individual, Ontology, PropertyExpression};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Immutable engine configuration, fixed at construction so concurrent
/// reasoner instances stay independent.
#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    pub cache_capacity: usize,
    /// `None` derives the safety policy from the ontology's expressivity.
    pub cache_safety: Option<CacheSafety>,
    pub timeout: Option<Duration>,
    pub max_steps: Option<u64>,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            cache_safety: None,
            timeout: None,
            max_steps: None,
        }
    }
}

/// Counters exposed for callers that assert on reasoning behavior.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReasonerStats {
    pub consistency_checks: u64,
    pub satisfiability_checks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub steps: u64,
    pub branches: u64,
    pub clashes: u64,
    pub backjumps: u64,
}

/// Tableau-based OWL DL reasoner over one ontology.
pub struct DlReasoner {
    ontology: Ontology,
    kb: KnowledgeBase,
    config: ReasonerConfig,
    cache: ConceptCache,
    datatypes: Box<dyn DatatypeReasoner + Send + Sync>,
    cancel: Arc<AtomicBool>,
    tracker: ChangeTracker,
    consistency: Option<Verdict>,
    stats: ReasonerStats,
}

impl DlReasoner {
    pub fn new(ontology: &Ontology) -> Result<Self, DlError> {
        Self::with_config(ontology, ReasonerConfig::default())
    }

    pub fn with_config(ontology: &Ontology, config: ReasonerConfig) -> Result<Self, DlError> {
        let kb = KnowledgeBase::new(ontology)?;
        let safety = config
            .cache_safety
            .unwrap_or_else(|| Self::derive_safety(&kb.expressivity));
        info!(
            dl = %kb.expressivity.dl_name(),
            cache_safety = ?safety,
            "reasoner created"
        );
        Ok(Self {
            ontology: ontology.clone(),
            kb,
            cache: ConceptCache::new(config.cache_capacity, safety),
            config,
            datatypes: Box::new(SimpleDatatypeReasoner),
            cancel: Arc::new(AtomicBool::new(false)),
            tracker: ChangeTracker::new(),
            consistency: None,
            stats: ReasonerStats::default(),
        })
    }

    /// With inverses and nominals together no cached model fragment can be
    /// reused; inverses alone need the per-verdict dynamic check; otherwise
    /// caching is unconditionally safe.
    fn derive_safety(expressivity: &Expressivity) -> CacheSafety {
        if expressivity.inverses && expressivity.nominals {
            CacheSafety::Never
        } else if expressivity.inverses {
            CacheSafety::Dynamic
        } else {
            CacheSafety::Always
        }
    }

    /// A query concept can widen the expressivity profile (an inverse role
    /// or nominal the axioms never mention), which may demote the derived
    /// cache policy. Explicitly configured policies are left alone.
    fn refresh_cache_safety(&mut self) {
        if self.config.cache_safety.is_none() {
            self.cache
                .set_safety(Self::derive_safety(&self.kb.expressivity));
        }
    }

    fn entry_features(&self) -> CacheFeatures {
        CacheFeatures {
            nominals: self.kb.expressivity.nominals,
            inverses: self.kb.expressivity.inverses,
        }
    }

    /// Shared flag for cooperative cancellation from another thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn expressivity(&self) -> &Expressivity {
        &self.kb.expressivity
    }

    pub fn stats(&self) -> ReasonerStats {
        let mut stats = self.stats;
        stats.cache_hits = self.cache.hits();
        stats.cache_misses = self.cache.misses();
        stats
    }

    fn limits(&self) -> SearchLimits {
        SearchLimits {
            timeout: self.config.timeout,
            max_steps: self.config.max_steps,
            cancel: Some(Arc::clone(&self.cancel)),
        }
    }

    fn absorb(&mut self, search: SearchStats) {
        self.stats.steps += search.steps;
        self.stats.branches += search.branches;
        self.stats.clashes += search.clashes;
        self.stats.backjumps += search.backjumps;
    }

    /// Tri-state consistency check; memoized until the ontology changes.
    pub fn check_consistent(&mut self) -> Result<Verdict, DlError> {
        self.flush_changes()?;
        if let Some(verdict) = self.consistency {
            return Ok(verdict);
        }
        self.stats.consistency_checks += 1;
        let mut tableau = Tableau::new(&self.kb, self.datatypes.as_ref(), self.limits());
        tableau.seed_abox();
        let verdict = tableau.run();
        let search = tableau.stats();
        self.absorb(search);
        if verdict != Verdict::Incomplete {
            self.consistency = Some(verdict);
        }
        debug!(?verdict, "consistency check");
        Ok(verdict)
    }

    pub fn is_consistent(&mut self) -> Result<bool, DlError> {
        match self.check_consistent()? {
            Verdict::Satisfiable => Ok(true),
            Verdict::Unsatisfiable => Ok(false),
            Verdict::Incomplete => Err(DlError::Timeout("consistency check".into())),
        }
    }

    /// Tri-state concept satisfiability with respect to the knowledge base.
    pub fn check_satisfiable(&mut self, concept: &ClassExpression) -> Result<Verdict, DlError> {
        self.flush_changes()?;
        let id = self.kb.intern(concept)?;
        self.refresh_cache_safety();
        if let Some(satisfiable) = self.cache.get(id) {
            return Ok(if satisfiable {
                Verdict::Satisfiable
            } else {
                Verdict::Unsatisfiable
            });
        }
        self.stats.satisfiability_checks += 1;
        let mut tableau = Tableau::new(&self.kb, self.datatypes.as_ref(), self.limits());
        tableau.seed_abox();
        tableau.add_root_concept(id);
        let verdict = tableau.run();
        let search = tableau.stats();
        self.absorb(search);
        match verdict {
            Verdict::Satisfiable | Verdict::Unsatisfiable => {
                self.cache.put(
                    id,
                    verdict == Verdict::Satisfiable,
                    self.kb.pool.is_primitive(id),
                    self.entry_features(),
                );
            }
            Verdict::Incomplete => {}
        }
        Ok(verdict)
    }

    pub fn is_satisfiable(&mut self, concept: &ClassExpression) -> Result<bool, DlError> {
        match self.check_satisfiable(concept)? {
            Verdict::Satisfiable => Ok(true),
            Verdict::Unsatisfiable => Ok(false),
            Verdict::Incomplete => Err(DlError::Timeout("satisfiability check".into())),
        }
    }

    /// C1 ⊑ C2 iff C1 ⊓ ¬C2 is unsatisfiable.
    pub fn is_subclass_of(
        &mut self,
        sub: &ClassExpression,
        sup: &ClassExpression,
    ) -> Result<bool, DlError> {
        let test = ClassExpression::and(vec![
            sub.clone(),
            ClassExpression::not(sup.clone()),
        ]);
        Ok(!self.is_satisfiable(&test)?)
    }

    pub fn is_equivalent_class(
        &mut self,
        a: &ClassExpression,
        b: &ClassExpression,
    ) -> Result<bool, DlError> {
        Ok(self.is_subclass_of(a, b)? && self.is_subclass_of(b, a)?)
    }

    /// C1 and C2 are disjoint iff C1 ⊓ C2 is unsatisfiable.
    pub fn is_disjoint_with(
        &mut self,
        a: &ClassExpression,
        b: &ClassExpression,
    ) -> Result<bool, DlError> {
        let test = ClassExpression::and(vec![a.clone(), b.clone()]);
        Ok(!self.is_satisfiable(&test)?)
    }

    /// a is an instance of C iff the ABox plus a:¬C is inconsistent.
    pub fn is_instance_of(
        &mut self,
        individual: &Individual,
        concept: &ClassExpression,
    ) -> Result<bool, DlError> {
        self.flush_changes()?;
        if self.kb.lookup_individual(individual).is_none() {
            return Ok(false);
        }
        let id = self.kb.intern(&ClassExpression::not(concept.clone()))?;
        self.stats.satisfiability_checks += 1;
        let mut tableau = Tableau::new(&self.kb, self.datatypes.as_ref(), self.limits());
        tableau.seed_abox();
        tableau.assert_individual(individual, id);
        let verdict = tableau.run();
        let search = tableau.stats();
        self.absorb(search);
        match verdict {
            Verdict::Unsatisfiable => Ok(true),
            Verdict::Satisfiable => Ok(false),
            Verdict::Incomplete => Err(DlError::Timeout("instance check".into())),
        }
    }

    /// All named individuals provably belonging to `concept`.
    pub fn instances_of(
        &mut self,
        concept: &ClassExpression,
    ) -> Result<Vec<Individual>, DlError> {
        self.flush_changes()?;
        let individuals: Vec<Individual> = self.kb.individuals().to_vec();
        let mut out = Vec::new();
        for individual in individuals {
            if self.is_instance_of(&individual, concept)? {
                out.push(individual);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // incremental updates
    // ------------------------------------------------------------------

    pub fn add_axiom(&mut self, axiom: Axiom) {
        self.tracker.record(Change::AddedAxiom(axiom));
    }

    pub fn remove_axiom(&mut self, axiom: Axiom) {
        self.tracker.record(Change::RemovedAxiom(axiom));
    }

    pub fn add_type(&mut self, individual: Individual, concept: ClassExpression) {
        self.tracker.record(Change::AddedType(individual, concept));
    }

    pub fn add_edge(
        &mut self,
        from: Individual,
        property: PropertyExpression,
        to: Individual,
    ) {
        self.tracker.record(Change::AddedEdge(from, property, to));
    }

    pub fn add_individual(&mut self, individual: Individual) {
        self.tracker.record(Change::AddedIndividual(individual));
    }

    pub fn remove_type(&mut self, individual: Individual, concept: ClassExpression) {
        self.tracker.record(Change::RemovedType(individual, concept));
    }

    pub fn remove_edge(
        &mut self,
        from: Individual,
        property: PropertyExpression,
        to: Individual,
    ) {
        self.tracker.record(Change::RemovedEdge(from, property, to));
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Fold pending changes into the knowledge base. Monotonic ABox
    /// additions are applied in place, keeping interned ids; anything else
    /// rebuilds from the edited ontology. Cached verdicts are dropped
    /// either way: satisfiability is checked against the full ABox, so an
    /// added assertion can invalidate a stored verdict.
    fn flush_changes(&mut self) -> Result<(), DlError> {
        if self.tracker.is_empty() {
            return Ok(());
        }
        let incremental = self.tracker.is_abox_only() && !self.tracker.has_deletions();
        let changes = self.tracker.drain();
        debug!(
            count = changes.len(),
            incremental, "applying pending ontology changes"
        );
        for change in &changes {
            Self::apply_to_ontology(&mut self.ontology, change);
        }
        if incremental {
            for change in &changes {
                match change {
                    Change::AddedType(i, c) => {
                        self.kb
                            .add_abox_axiom(&Axiom::ClassAssertion(c.clone(), i.clone()))?;
                    }
                    Change::AddedEdge(a, p, b) => {
                        self.kb.add_abox_axiom(&Axiom::ObjectPropertyAssertion(
                            p.clone(),
                            a.clone(),
                            b.clone(),
                        ))?;
                    }
                    Change::AddedIndividual(i) => {
                        self.kb.add_named_individual(i);
                    }
                    Change::AddedAxiom(axiom) => {
                        self.kb.add_abox_axiom(axiom)?;
                    }
                    _ => {}
                }
            }
        } else {
            self.kb = KnowledgeBase::new(&self.ontology)?;
        }
        self.cache.clear();
        self.consistency = None;
        self.refresh_cache_safety();
        Ok(())
    }

    fn apply_to_ontology(ontology: &mut Ontology, change: &Change) {
        match change {
            Change::AddedType(i, c) => {
                ontology.add_axiom(Axiom::ClassAssertion(c.clone(), i.clone()));
            }
            Change::RemovedType(i, c) => {
                let target = Axiom::ClassAssertion(c.clone(), i.clone());
                ontology.axioms.retain(|a| *a != target);
            }
            Change::AddedEdge(a, p, b) => {
                ontology.add_axiom(Axiom::ObjectPropertyAssertion(
                    p.clone(),
                    a.clone(),
                    b.clone(),
                ));
            }
            Change::RemovedEdge(a, p, b) => {
                let target =
                    Axiom::ObjectPropertyAssertion(p.clone(), a.clone(), b.clone());
                ontology.axioms.retain(|x| *x != target);
            }
            Change::AddedIndividual(i) => {
                ontology.individuals.insert(i.clone());
            }
            Change::RemovedIndividual(i) => {
                ontology.individuals.remove(i);
                ontology.axioms.retain(|a| !Self::mentions_individual(a, i));
            }
            Change::AddedAxiom(axiom) => {
                ontology.add_axiom(axiom.clone());
            }
            Change::RemovedAxiom(axiom) => {
                ontology.axioms.retain(|a| a != axiom);
            }
        }
    }

    fn mentions_individual(axiom: &Axiom, individual: &Individual) -> bool {
        match axiom {
            Axiom::ClassAssertion(_, i) | Axiom::DataPropertyAssertion(_, i, _) => {
                i == individual
            }
            Axiom::ObjectPropertyAssertion(_, a, b)
            | Axiom::NegativeObjectPropertyAssertion(_, a, b) => {
                a == individual || b == individual
            }
            Axiom::SameIndividual(is) | Axiom::DifferentIndividuals(is) => {
                is.contains(individual)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ce(name: &str) -> ClassExpression {
        ClassExpression::named(format!("http://example.org/{name}"))
    }

    fn role(name: &str) -> PropertyExpression {
        PropertyExpression::object(format!("http://example.org/{name}"))
    }

    fn ind(name: &str) -> Individual {
        Individual::new(format!("http://example.org/{name}"))
    }

    #[test]
    fn test_subsumption_chain() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ce("D")));
        ontology.add_axiom(Axiom::SubClassOf(ce("D"), ce("E")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();

        assert!(reasoner.is_subclass_of(&ce("C"), &ce("E")).unwrap());
        assert!(!reasoner.is_subclass_of(&ce("E"), &ce("C")).unwrap());
    }

    #[test]
    fn test_self_contradictory_class_assertion() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ClassExpression::not(ce("C"))));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();

        assert!(!reasoner.is_consistent().unwrap());
    }

    #[test]
    fn test_satisfiability_served_from_cache_on_repeat() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ce("D")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();

        assert!(reasoner.is_satisfiable(&ce("C")).unwrap());
        let checks_after_first = reasoner.stats().satisfiability_checks;
        assert!(reasoner.is_satisfiable(&ce("C")).unwrap());
        assert_eq!(reasoner.stats().satisfiability_checks, checks_after_first);
        assert!(reasoner.stats().cache_hits >= 1);
    }

    #[test]
    fn test_disjoint_classes() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ClassExpression::not(ce("D"))));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();

        assert!(reasoner.is_disjoint_with(&ce("C"), &ce("D")).unwrap());
        assert!(!reasoner.is_disjoint_with(&ce("C"), &ce("E")).unwrap());
    }

    #[test]
    fn test_query_expressivity_demotes_cache_policy() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ce("D")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();
        // inverse- and nominal-free axioms: caching starts unconditional
        assert!(reasoner.is_satisfiable(&ce("C")).unwrap());

        // the query brings in an inverse role and a nominal, which makes
        // cached model reuse unsound; the derived policy must notice even
        // though the axioms never changed
        let query = ClassExpression::some(
            role("r").inverse(),
            ClassExpression::OneOf(vec![ind("a")]),
        );
        assert!(reasoner.is_satisfiable(&query).unwrap());
        let checks = reasoner.stats().satisfiability_checks;
        assert!(reasoner.is_satisfiable(&query).unwrap());
        // nothing was cached, so the repeat runs the tableau again
        assert_eq!(reasoner.stats().satisfiability_checks, checks + 1);
    }

    #[test]
    fn test_instance_checking() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("Dog"), ce("Animal")));
        ontology.add_axiom(Axiom::ClassAssertion(ce("Dog"), ind("rex")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();

        assert!(reasoner.is_instance_of(&ind("rex"), &ce("Animal")).unwrap());
        assert!(!reasoner.is_instance_of(&ind("rex"), &ce("Plant")).unwrap());
        assert_eq!(
            reasoner.instances_of(&ce("Animal")).unwrap(),
            vec![ind("rex")]
        );
    }

    #[test]
    fn test_incremental_abox_addition() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(ce("C"), ClassExpression::not(ce("D"))));
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();
        assert!(reasoner.is_consistent().unwrap());

        reasoner.add_type(ind("a"), ce("D"));
        assert!(!reasoner.is_consistent().unwrap());
    }

    #[test]
    fn test_incremental_retraction_restores_consistency() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        ontology.add_axiom(Axiom::ClassAssertion(
            ClassExpression::not(ce("C")),
            ind("a"),
        ));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();
        assert!(!reasoner.is_consistent().unwrap());

        reasoner.remove_type(ind("a"), ce("C"));
        assert!(reasoner.is_consistent().unwrap());
    }

    #[test]
    fn test_abox_addition_invalidates_cached_verdict() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::ClassAssertion(ce("C"), ind("a")));
        let mut reasoner = DlReasoner::new(&ontology).unwrap();
        assert!(reasoner.is_satisfiable(&ce("C")).unwrap());

        // The new assertion makes the whole ABox inconsistent, so the
        // stored satisfiable verdict for C must not be served again.
        reasoner.add_type(ind("a"), ClassExpression::not(ce("C")));
        assert!(!reasoner.is_satisfiable(&ce("C")).unwrap());
        assert!(!reasoner.is_consistent().unwrap());
    }

    #[test]
    fn test_step_budget_surfaces_as_timeout_error() {
        let mut ontology = Ontology::new();
        ontology.add_axiom(Axiom::SubClassOf(
            ce("C"),
            ClassExpression::some(role("r"), ce("C")),
        ));
        let config = ReasonerConfig {
            max_steps: Some(1),
            ..ReasonerConfig::default()
        };
        let mut reasoner = DlReasoner::with_config(&ontology, config).unwrap();
        assert!(matches!(
            reasoner.is_satisfiable(&ce("C")),
            Err(DlError::Timeout(_))
        ));
    }
}
