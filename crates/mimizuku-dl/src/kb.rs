//! 知識ベース前処理 (absorption and internalization)

use crate::DlError;
use mimizuku_core::expressivity::Expressivity;
use mimizuku_core::model::{Axiom, ClassExpression, Individual, Literal, Ontology};
use mimizuku_core::rbox::{RoleBox, RoleId};
use mimizuku_core::term::{ConceptId, ConceptPool};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Preprocessed ontology ready for tableau search. TBox axioms with a named
/// (or negated-named) left-hand side are absorbed into a lazy-unfolding map;
/// the rest are internalized into universal concepts of the form ¬C ⊔ D
/// asserted on every individual. Role axioms live in the closed role box.
#[derive(Debug)]
pub struct KnowledgeBase {
    pub pool: ConceptPool,
    pub rbox: RoleBox,
    pub expressivity: Expressivity,
    /// Atom (or negated atom) id → concepts implied by it.
    unfold: HashMap<ConceptId, Vec<ConceptId>>,
    /// Concepts every individual must satisfy.
    universals: Vec<ConceptId>,
    individuals: Vec<Individual>,
    individual_index: HashMap<Individual, usize>,
    class_assertions: Vec<(usize, ConceptId)>,
    role_assertions: Vec<(usize, RoleId, usize)>,
    data_assertions: Vec<(usize, RoleId, Literal)>,
    same: Vec<(usize, usize)>,
    different: Vec<(usize, usize)>,
}

impl KnowledgeBase {
    pub fn new(ontology: &Ontology) -> Result<Self, DlError> {
        let mut kb = KnowledgeBase {
            pool: ConceptPool::new(),
            rbox: RoleBox::new(),
            expressivity: Expressivity::new(),
            unfold: HashMap::new(),
            universals: Vec::new(),
            individuals: Vec::new(),
            individual_index: HashMap::new(),
            class_assertions: Vec::new(),
            role_assertions: Vec::new(),
            data_assertions: Vec::new(),
            same: Vec::new(),
            different: Vec::new(),
        };

        // deterministic node order regardless of set iteration
        let mut named: Vec<Individual> = ontology.individuals.iter().cloned().collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        for individual in named {
            kb.individual_id(&individual);
        }

        // role axioms first so concept interning sees final role flags
        for axiom in &ontology.axioms {
            kb.process_role_axiom(axiom)?;
        }
        for axiom in &ontology.axioms {
            kb.process_axiom(axiom)?;
            kb.expressivity.update_axiom(axiom);
        }

        if kb.rbox.has_complex_chains() {
            kb.expressivity.complex_role_inclusions = true;
            for (chain, sup) in kb.rbox.complex_chains() {
                warn!(
                    chain_len = chain.len(),
                    role = %kb.rbox.name(*sup),
                    "ignoring complex role inclusion (unsupported)"
                );
            }
        }

        // reflexive roles force a self-loop on every individual, irreflexive
        // roles forbid one; a role flagged both ways yields ∃r.Self ⊓ ¬∃r.Self
        // and closes every graph
        for id in (0..kb.rbox.len() as u32).step_by(2) {
            let role = RoleId(id);
            if kb.rbox.is_reflexive(role) {
                let c = kb.pool.self_of(role);
                kb.universals.push(c);
            }
            if kb.rbox.is_irreflexive(role) {
                let c = kb.pool.self_of(role);
                let neg = kb.pool.negate(c);
                kb.universals.push(neg);
            }
        }

        kb.rbox.close();
        kb.prepare_transitive();
        kb.universals.sort_unstable();
        kb.universals.dedup();
        let mut interned: Vec<ConceptId> = kb.universals.clone();
        interned.extend(kb.unfold.values().flatten().copied());
        interned.extend(kb.class_assertions.iter().map(|&(_, c)| c));
        for c in interned {
            kb.expressivity.update_concept(&kb.pool, &kb.rbox, c);
        }
        debug!(
            dl = %kb.expressivity.dl_name(),
            individuals = kb.individuals.len(),
            universals = kb.universals.len(),
            unfold_entries = kb.unfold.len(),
            "knowledge base prepared"
        );
        Ok(kb)
    }

    fn process_role_axiom(&mut self, axiom: &Axiom) -> Result<(), DlError> {
        match axiom {
            Axiom::SubPropertyOf(sub, sup) => {
                let sub = self.rbox.intern(sub)?;
                let sup = self.rbox.intern(sup)?;
                self.rbox.add_sub_role(sub, sup);
            }
            Axiom::EquivalentProperties(props) => {
                for pair in props.windows(2) {
                    let a = self.rbox.intern(&pair[0])?;
                    let b = self.rbox.intern(&pair[1])?;
                    self.rbox.add_sub_role(a, b);
                    self.rbox.add_sub_role(b, a);
                }
            }
            Axiom::InverseProperties(p, q) => {
                let p = self.rbox.intern(p)?;
                let q = self.rbox.intern(q)?;
                self.rbox.add_sub_role(q, p.inverse());
                self.rbox.add_sub_role(p.inverse(), q);
            }
            Axiom::SubPropertyChainOf(chain, sup) => {
                let chain: Vec<RoleId> = chain
                    .iter()
                    .map(|p| self.rbox.intern(p))
                    .collect::<Result<_, _>>()?;
                let sup = self.rbox.intern(sup)?;
                self.rbox.add_chain(chain, sup);
            }
            Axiom::FunctionalProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_functional(p);
            }
            Axiom::InverseFunctionalProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_inverse_functional(p);
            }
            Axiom::TransitiveProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_transitive(p);
            }
            Axiom::SymmetricProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_symmetric(p);
            }
            Axiom::ReflexiveProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_reflexive(p);
            }
            Axiom::IrreflexiveProperty(p) => {
                let p = self.rbox.intern(p)?;
                self.rbox.set_irreflexive(p);
            }
            _ => {}
        }
        Ok(())
    }

    fn process_axiom(&mut self, axiom: &Axiom) -> Result<(), DlError> {
        match axiom {
            Axiom::SubClassOf(sub, sup) => self.add_inclusion(sub, sup)?,
            Axiom::EquivalentClasses(classes) => {
                for pair in classes.windows(2) {
                    self.add_inclusion(&pair[0], &pair[1])?;
                    self.add_inclusion(&pair[1], &pair[0])?;
                }
            }
            Axiom::DisjointClasses(classes) => {
                for (i, a) in classes.iter().enumerate() {
                    for b in &classes[i + 1..] {
                        self.add_inclusion(a, &ClassExpression::not(b.clone()))?;
                    }
                }
            }
            Axiom::ObjectPropertyDomain(p, c) => {
                // ∃R.⊤ ⊑ C internalizes as ∀R.⊥ ⊔ C
                let role = self.rbox.intern(p)?;
                let c = self.intern_internal(c)?;
                let no_successor = self.pool.all_of(role, ConceptPool::BOTTOM);
                let universal = self.pool.or_of(vec![no_successor, c]);
                self.universals.push(universal);
            }
            Axiom::ObjectPropertyRange(p, c) => {
                let role = self.rbox.intern(p)?;
                let c = self.intern_internal(c)?;
                let universal = self.pool.all_of(role, c);
                self.universals.push(universal);
            }
            Axiom::SameIndividual(individuals) => {
                for pair in individuals.windows(2) {
                    let a = self.individual_id(&pair[0]);
                    let b = self.individual_id(&pair[1]);
                    self.same.push((a, b));
                }
            }
            Axiom::DifferentIndividuals(individuals) => {
                for (i, a) in individuals.iter().enumerate() {
                    for b in &individuals[i + 1..] {
                        let a = self.individual_id(a);
                        let b = self.individual_id(b);
                        self.different.push((a, b));
                    }
                }
            }
            Axiom::ClassAssertion(c, individual) => {
                let c = self.intern_internal(c)?;
                let id = self.individual_id(individual);
                self.class_assertions.push((id, c));
            }
            Axiom::ObjectPropertyAssertion(p, from, to) => {
                let role = self.rbox.intern(p)?;
                let from = self.individual_id(from);
                let to = self.individual_id(to);
                self.role_assertions.push((from, role, to));
            }
            Axiom::NegativeObjectPropertyAssertion(p, from, to) => {
                // ¬R(a,b) is a: ∀R.¬{b}
                self.expressivity.nominals = true;
                let role = self.rbox.intern(p)?;
                let not_b = {
                    let nominal = self.pool.nominal_of(to.clone());
                    self.pool.negate(nominal)
                };
                let restriction = self.pool.all_of(role, not_b);
                let from = self.individual_id(from);
                self.individual_id(to);
                self.class_assertions.push((from, restriction));
            }
            Axiom::DataPropertyAssertion(p, individual, value) => {
                let role = self.rbox.intern(p)?;
                let id = self.individual_id(individual);
                self.data_assertions.push((id, role, value.clone()));
            }
            // handled in the role pass
            _ => {}
        }
        Ok(())
    }

    /// Absorb sub ⊑ sup into the unfolding map when the left-hand side is a
    /// (possibly negated) class name; internalize as a universal concept
    /// otherwise.
    fn add_inclusion(
        &mut self,
        sub: &ClassExpression,
        sup: &ClassExpression,
    ) -> Result<(), DlError> {
        let sup_id = self.intern_internal(sup)?;
        match sub {
            ClassExpression::Named(_) => {
                let key = self.intern_internal(sub)?;
                self.unfold.entry(key).or_default().push(sup_id);
            }
            ClassExpression::ComplementOf(inner) if matches!(**inner, ClassExpression::Named(_)) => {
                let key = self.intern_internal(sub)?;
                self.unfold.entry(key).or_default().push(sup_id);
            }
            _ => {
                let sub_id = self.intern_internal(sub)?;
                let neg_sub = self.pool.negate(sub_id);
                let universal = self.pool.or_of(vec![neg_sub, sup_id]);
                self.universals.push(universal);
            }
        }
        Ok(())
    }

    /// Intern a query concept after the knowledge base is built. The
    /// expressivity profile is widened too: a query can introduce inverses
    /// or nominals the axioms never mention, and blocking and cache policy
    /// must see them.
    pub fn intern(&mut self, expr: &ClassExpression) -> Result<ConceptId, DlError> {
        let id = self.pool.intern(expr, &mut self.rbox)?;
        // a query concept may mention a fresh role, reopening the hierarchy
        if !self.rbox.is_closed() {
            self.rbox.close();
        }
        self.prepare_transitive();
        self.expressivity.update_concept(&self.pool, &self.rbox, id);
        Ok(id)
    }

    fn intern_internal(&mut self, expr: &ClassExpression) -> Result<ConceptId, DlError> {
        let id = self.pool.intern(expr, &mut self.rbox)?;
        Ok(id)
    }

    /// Fold a single assertional axiom into an already-built knowledge base.
    /// Monotonic ABox additions keep every interned id stable, which is what
    /// lets the concept cache survive incremental updates.
    pub fn add_abox_axiom(&mut self, axiom: &Axiom) -> Result<(), DlError> {
        self.process_axiom(axiom)?;
        self.expressivity.update_axiom(axiom);
        if !self.rbox.is_closed() {
            self.rbox.close();
        }
        self.prepare_transitive();
        if let Some(&(_, c)) = self.class_assertions.last() {
            self.expressivity.update_concept(&self.pool, &self.rbox, c);
        }
        Ok(())
    }

    pub fn add_named_individual(&mut self, individual: &Individual) -> usize {
        self.individual_id(individual)
    }

    /// Pre-intern ∀S.C for every interned ∀R.C and transitive S ⊑ R, so the
    /// ∀-rule never needs a mutable pool during search. Must be re-run after
    /// interning query concepts; idempotent and cheap once saturated.
    pub fn prepare_transitive(&mut self) {
        use mimizuku_core::term::ConceptData;
        if !self.rbox.is_closed() {
            return;
        }
        let mut i = 0;
        while i < self.pool.len() {
            let id = ConceptId(i as u32);
            if let ConceptData::All(role, filler) = *self.pool.concept(id) {
                for s in self.rbox.transitive_sub_roles(role) {
                    self.pool.all_of(s, filler);
                }
            }
            i += 1;
        }
    }

    fn individual_id(&mut self, individual: &Individual) -> usize {
        if let Some(&id) = self.individual_index.get(individual) {
            return id;
        }
        let id = self.individuals.len();
        self.individuals.push(individual.clone());
        self.individual_index.insert(individual.clone(), id);
        id
    }

    pub fn unfoldings(&self, concept: ConceptId) -> &[ConceptId] {
        self.unfold.get(&concept).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn universals(&self) -> &[ConceptId] {
        &self.universals
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn lookup_individual(&self, individual: &Individual) -> Option<usize> {
        self.individual_index.get(individual).copied()
    }

    pub fn class_assertions(&self) -> &[(usize, ConceptId)] {
        &self.class_assertions
    }

    pub fn role_assertions(&self) -> &[(usize, RoleId, usize)] {
        &self.role_assertions
    }

    pub fn data_assertions(&self) -> &[(usize, RoleId, Literal)] {
        &self.data_assertions
    }

    pub fn same_individuals(&self) -> &[(usize, usize)] {
        &self.same
    }

    pub fn different_individuals(&self) -> &[(usize, usize)] {
        &self.different
    }

    pub fn has_nominals(&self) -> bool {
        self.expressivity.nominals
    }
}
