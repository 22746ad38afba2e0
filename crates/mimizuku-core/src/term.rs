//! ハッシュコンシング概念プール (NNF)

use crate::model::{ClassExpression, Individual, Iri, PropertyExpression};
use crate::rbox::{RoleBox, RoleId};
use crate::CoreError;
use std::collections::HashMap;

/// Interned concept identifier. Structurally equal expressions intern to the
/// same id, so id equality is structural equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptId(pub u32);

impl ConceptId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Canonical concept representation. Negation only ever appears on atoms,
/// nominals and self restrictions (negation normal form).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConceptData {
    Top,
    Bottom,
    Atom(Iri),
    NegAtom(Iri),
    And(Vec<ConceptId>),
    Or(Vec<ConceptId>),
    Some(RoleId, ConceptId),
    All(RoleId, ConceptId),
    Min(RoleId, u32, ConceptId),
    Max(RoleId, u32, ConceptId),
    SelfRestriction(RoleId),
    NegSelfRestriction(RoleId),
    Nominal(Individual),
    NegNominal(Individual),
}

/// Hash-consing pool. Every interned concept is stored together with its
/// complement, so `negate` is a table lookup.
#[derive(Debug)]
pub struct ConceptPool {
    data: Vec<ConceptData>,
    neg: Vec<ConceptId>,
    index: HashMap<ConceptData, ConceptId>,
}

impl ConceptPool {
    pub const TOP: ConceptId = ConceptId(0);
    pub const BOTTOM: ConceptId = ConceptId(1);

    pub fn new() -> Self {
        let mut pool = Self {
            data: Vec::new(),
            neg: Vec::new(),
            index: HashMap::new(),
        };
        let top = pool.intern_data(ConceptData::Top);
        debug_assert_eq!(top, Self::TOP);
        debug_assert_eq!(pool.negate(top), Self::BOTTOM);
        pool
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn concept(&self, id: ConceptId) -> &ConceptData {
        &self.data[id.index()]
    }

    pub fn negate(&self, id: ConceptId) -> ConceptId {
        self.neg[id.index()]
    }

    pub fn is_atomic(&self, id: ConceptId) -> bool {
        matches!(self.concept(id), ConceptData::Atom(_))
    }

    /// Atomic names and their negations; these are pinned in the
    /// satisfiability cache.
    pub fn is_primitive(&self, id: ConceptId) -> bool {
        matches!(
            self.concept(id),
            ConceptData::Top | ConceptData::Bottom | ConceptData::Atom(_) | ConceptData::NegAtom(_)
        )
    }

    /// Intern a surface class expression in negation normal form.
    /// Idempotent: re-interning a normalized expression yields the same id.
    pub fn intern(
        &mut self,
        expr: &ClassExpression,
        rbox: &mut RoleBox,
    ) -> Result<ConceptId, CoreError> {
        self.intern_nnf(expr, rbox, false)
    }

    /// Conjunction of already-interned concepts.
    pub fn and_of(&mut self, ids: Vec<ConceptId>) -> ConceptId {
        self.make_and(ids)
    }

    /// Disjunction of already-interned concepts. Used for axiom
    /// internalization (C ⊑ D becomes the universal concept ¬C ⊔ D).
    pub fn or_of(&mut self, ids: Vec<ConceptId>) -> ConceptId {
        self.make_or(ids)
    }

    pub fn some_of(&mut self, role: RoleId, filler: ConceptId) -> ConceptId {
        self.intern_data(ConceptData::Some(role, filler))
    }

    pub fn all_of(&mut self, role: RoleId, filler: ConceptId) -> ConceptId {
        self.intern_data(ConceptData::All(role, filler))
    }

    pub fn nominal_of(&mut self, individual: Individual) -> ConceptId {
        self.intern_data(ConceptData::Nominal(individual))
    }

    pub fn self_of(&mut self, role: RoleId) -> ConceptId {
        self.intern_data(ConceptData::SelfRestriction(role))
    }

    /// Look up an already-interned ∀R.C without allocating. The ∀-rule uses
    /// this for transitive propagation concepts pre-interned by the
    /// knowledge base.
    pub fn find_all(&self, role: RoleId, filler: ConceptId) -> Option<ConceptId> {
        self.index.get(&ConceptData::All(role, filler)).copied()
    }

    fn intern_nnf(
        &mut self,
        expr: &ClassExpression,
        rbox: &mut RoleBox,
        negated: bool,
    ) -> Result<ConceptId, CoreError> {
        match expr {
            ClassExpression::Thing => {
                Ok(if negated { Self::BOTTOM } else { Self::TOP })
            }
            ClassExpression::Nothing => {
                Ok(if negated { Self::TOP } else { Self::BOTTOM })
            }
            ClassExpression::Named(iri) => {
                let data = if negated {
                    ConceptData::NegAtom(iri.clone())
                } else {
                    ConceptData::Atom(iri.clone())
                };
                Ok(self.intern_data(data))
            }
            ClassExpression::ComplementOf(inner) => self.intern_nnf(inner, rbox, !negated),
            ClassExpression::IntersectionOf(parts) => {
                let ids = self.intern_parts(parts, rbox, negated)?;
                Ok(if negated { self.make_or(ids) } else { self.make_and(ids) })
            }
            ClassExpression::UnionOf(parts) => {
                let ids = self.intern_parts(parts, rbox, negated)?;
                Ok(if negated { self.make_and(ids) } else { self.make_or(ids) })
            }
            ClassExpression::OneOf(individuals) => {
                if individuals.is_empty() {
                    return Err(CoreError::MalformedTerm("empty owl:oneOf".into()));
                }
                let ids: Vec<ConceptId> = individuals
                    .iter()
                    .map(|i| {
                        let data = if negated {
                            ConceptData::NegNominal(i.clone())
                        } else {
                            ConceptData::Nominal(i.clone())
                        };
                        self.intern_data(data)
                    })
                    .collect();
                Ok(if negated { self.make_and(ids) } else { self.make_or(ids) })
            }
            ClassExpression::SomeValuesFrom { property, class } => {
                let role = self.object_role(property, rbox, "someValuesFrom")?;
                let filler = self.intern_nnf(class, rbox, negated)?;
                let data = if negated {
                    ConceptData::All(role, filler)
                } else {
                    ConceptData::Some(role, filler)
                };
                Ok(self.intern_data(data))
            }
            ClassExpression::AllValuesFrom { property, class } => {
                let role = self.object_role(property, rbox, "allValuesFrom")?;
                let filler = self.intern_nnf(class, rbox, negated)?;
                let data = if negated {
                    ConceptData::Some(role, filler)
                } else {
                    ConceptData::All(role, filler)
                };
                Ok(self.intern_data(data))
            }
            ClassExpression::HasValue { property, individual } => {
                let role = self.object_role(property, rbox, "hasValue")?;
                let nominal = self.intern_data(if negated {
                    ConceptData::NegNominal(individual.clone())
                } else {
                    ConceptData::Nominal(individual.clone())
                });
                let data = if negated {
                    ConceptData::All(role, nominal)
                } else {
                    ConceptData::Some(role, nominal)
                };
                Ok(self.intern_data(data))
            }
            ClassExpression::HasSelf(property) => {
                let role = self.object_role(property, rbox, "hasSelf")?;
                let data = if negated {
                    ConceptData::NegSelfRestriction(role)
                } else {
                    ConceptData::SelfRestriction(role)
                };
                Ok(self.intern_data(data))
            }
            ClassExpression::MinCardinality { cardinality, property, class } => {
                let role = self.object_role(property, rbox, "minCardinality")?;
                let filler = self.intern_qualifier(class.as_deref(), rbox)?;
                Ok(if negated {
                    // ¬(≥n R.C) = ≤n-1 R.C; ¬(≥0 R.C) = ⊥
                    match cardinality.checked_sub(1) {
                        Some(m) => self.intern_data(ConceptData::Max(role, m, filler)),
                        None => Self::BOTTOM,
                    }
                } else if *cardinality == 0 {
                    Self::TOP
                } else {
                    self.intern_data(ConceptData::Min(role, *cardinality, filler))
                })
            }
            ClassExpression::MaxCardinality { cardinality, property, class } => {
                // ¬(≤n R.C) = ≥n+1 R.C, and complements are interned
                // eagerly, so n must leave room for the increment.
                let above = cardinality.checked_add(1).ok_or_else(|| {
                    CoreError::MalformedTerm(format!(
                        "maxCardinality {cardinality} has no complement"
                    ))
                })?;
                let role = self.object_role(property, rbox, "maxCardinality")?;
                let filler = self.intern_qualifier(class.as_deref(), rbox)?;
                Ok(if negated {
                    self.intern_data(ConceptData::Min(role, above, filler))
                } else {
                    self.intern_data(ConceptData::Max(role, *cardinality, filler))
                })
            }
            ClassExpression::ExactCardinality { cardinality, property, class } => {
                // =n R.C desugars to ≥n R.C ⊓ ≤n R.C
                let min = ClassExpression::MinCardinality {
                    cardinality: *cardinality,
                    property: property.clone(),
                    class: class.clone(),
                };
                let max = ClassExpression::MaxCardinality {
                    cardinality: *cardinality,
                    property: property.clone(),
                    class: class.clone(),
                };
                self.intern_nnf(
                    &ClassExpression::IntersectionOf(vec![min, max]),
                    rbox,
                    negated,
                )
            }
        }
    }

    fn intern_parts(
        &mut self,
        parts: &[ClassExpression],
        rbox: &mut RoleBox,
        negated: bool,
    ) -> Result<Vec<ConceptId>, CoreError> {
        if parts.is_empty() {
            return Err(CoreError::MalformedTerm(
                "empty intersection/union".into(),
            ));
        }
        parts
            .iter()
            .map(|p| self.intern_nnf(p, rbox, negated))
            .collect()
    }

    /// The qualifier of a cardinality restriction stays positive under
    /// negation: ¬(≥n R.C) = ≤n-1 R.C.
    fn intern_qualifier(
        &mut self,
        class: Option<&ClassExpression>,
        rbox: &mut RoleBox,
    ) -> Result<ConceptId, CoreError> {
        match class {
            Some(c) => self.intern_nnf(c, rbox, false),
            None => Ok(Self::TOP),
        }
    }

    fn object_role(
        &mut self,
        property: &PropertyExpression,
        rbox: &mut RoleBox,
        context: &str,
    ) -> Result<RoleId, CoreError> {
        let role = rbox.intern(property)?;
        if rbox.is_datatype(role) {
            return Err(CoreError::UnsupportedConstruct(format!(
                "data property {} in {} restriction",
                rbox.name(role),
                context
            )));
        }
        Ok(role)
    }

    /// n-ary conjunction with flattening, deduplication and the obvious
    /// simplifications (⊥ absorbs, ⊤ drops, C ⊓ ¬C = ⊥).
    fn make_and(&mut self, ids: Vec<ConceptId>) -> ConceptId {
        let mut flat = Vec::new();
        for id in ids {
            match self.concept(id) {
                ConceptData::And(inner) => flat.extend(inner.iter().copied()),
                _ => flat.push(id),
            }
        }
        flat.sort_unstable();
        flat.dedup();
        if flat.contains(&Self::BOTTOM) {
            return Self::BOTTOM;
        }
        flat.retain(|&c| c != Self::TOP);
        for &c in &flat {
            if flat.binary_search(&self.negate(c)).is_ok() {
                return Self::BOTTOM;
            }
        }
        match flat.len() {
            0 => Self::TOP,
            1 => flat[0],
            _ => self.intern_data(ConceptData::And(flat)),
        }
    }

    fn make_or(&mut self, ids: Vec<ConceptId>) -> ConceptId {
        let mut flat = Vec::new();
        for id in ids {
            match self.concept(id) {
                ConceptData::Or(inner) => flat.extend(inner.iter().copied()),
                _ => flat.push(id),
            }
        }
        flat.sort_unstable();
        flat.dedup();
        if flat.contains(&Self::TOP) {
            return Self::TOP;
        }
        flat.retain(|&c| c != Self::BOTTOM);
        for &c in &flat {
            if flat.binary_search(&self.negate(c)).is_ok() {
                return Self::TOP;
            }
        }
        match flat.len() {
            0 => Self::BOTTOM,
            1 => flat[0],
            _ => self.intern_data(ConceptData::Or(flat)),
        }
    }

    /// Intern canonical data together with its complement so that `negate`
    /// never allocates.
    fn intern_data(&mut self, data: ConceptData) -> ConceptId {
        if let Some(&id) = self.index.get(&data) {
            return id;
        }
        let id = ConceptId(self.data.len() as u32);
        self.data.push(data.clone());
        self.neg.push(id); // placeholder until the complement exists
        self.index.insert(data.clone(), id);

        let neg_data = self.negate_data(&data);
        let neg_id = match self.index.get(&neg_data) {
            Some(&existing) => existing,
            None => {
                let neg_id = ConceptId(self.data.len() as u32);
                self.data.push(neg_data.clone());
                self.neg.push(id);
                self.index.insert(neg_data, neg_id);
                neg_id
            }
        };
        self.neg[id.index()] = neg_id;
        self.neg[neg_id.index()] = id;
        id
    }

    fn negate_data(&self, data: &ConceptData) -> ConceptData {
        match data {
            ConceptData::Top => ConceptData::Bottom,
            ConceptData::Bottom => ConceptData::Top,
            ConceptData::Atom(iri) => ConceptData::NegAtom(iri.clone()),
            ConceptData::NegAtom(iri) => ConceptData::Atom(iri.clone()),
            ConceptData::And(ids) => {
                ConceptData::Or(self.negated_sorted(ids))
            }
            ConceptData::Or(ids) => {
                ConceptData::And(self.negated_sorted(ids))
            }
            ConceptData::Some(r, c) => ConceptData::All(*r, self.negate(*c)),
            ConceptData::All(r, c) => ConceptData::Some(*r, self.negate(*c)),
            ConceptData::Min(r, n, c) => {
                debug_assert!(*n >= 1);
                ConceptData::Max(*r, n - 1, *c)
            }
            ConceptData::Max(r, n, c) => {
                // intern_nnf rejects n == u32::MAX before ConceptData::Max
                // ever reaches the pool
                debug_assert!(*n < u32::MAX);
                ConceptData::Min(*r, n + 1, *c)
            }
            ConceptData::SelfRestriction(r) => ConceptData::NegSelfRestriction(*r),
            ConceptData::NegSelfRestriction(r) => ConceptData::SelfRestriction(*r),
            ConceptData::Nominal(i) => ConceptData::NegNominal(i.clone()),
            ConceptData::NegNominal(i) => ConceptData::Nominal(i.clone()),
        }
    }

    fn negated_sorted(&self, ids: &[ConceptId]) -> Vec<ConceptId> {
        let mut out: Vec<ConceptId> = ids.iter().map(|&c| self.negate(c)).collect();
        out.sort_unstable();
        out
    }

    /// Human-readable rendering, for tracing and diagnostics.
    pub fn render(&self, id: ConceptId, rbox: &RoleBox) -> String {
        match self.concept(id) {
            ConceptData::Top => "⊤".into(),
            ConceptData::Bottom => "⊥".into(),
            ConceptData::Atom(iri) => iri.to_string(),
            ConceptData::NegAtom(iri) => format!("¬{}", iri),
            ConceptData::And(ids) => {
                let parts: Vec<String> = ids.iter().map(|&c| self.render(c, rbox)).collect();
                format!("({})", parts.join(" ⊓ "))
            }
            ConceptData::Or(ids) => {
                let parts: Vec<String> = ids.iter().map(|&c| self.render(c, rbox)).collect();
                format!("({})", parts.join(" ⊔ "))
            }
            ConceptData::Some(r, c) => format!("∃{}.{}", rbox.name(*r), self.render(*c, rbox)),
            ConceptData::All(r, c) => format!("∀{}.{}", rbox.name(*r), self.render(*c, rbox)),
            ConceptData::Min(r, n, c) => {
                format!("≥{} {}.{}", n, rbox.name(*r), self.render(*c, rbox))
            }
            ConceptData::Max(r, n, c) => {
                format!("≤{} {}.{}", n, rbox.name(*r), self.render(*c, rbox))
            }
            ConceptData::SelfRestriction(r) => format!("∃{}.Self", rbox.name(*r)),
            ConceptData::NegSelfRestriction(r) => format!("¬∃{}.Self", rbox.name(*r)),
            ConceptData::Nominal(i) => format!("{{{}}}", i),
            ConceptData::NegNominal(i) => format!("¬{{{}}}", i),
        }
    }
}

impl Default for ConceptPool {
    fn default() -> Self {
        Self::new()
    }
}
