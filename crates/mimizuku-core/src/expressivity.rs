//! 表現力プロファイル

use crate::model::Axiom;
use crate::rbox::RoleBox;
use crate::term::{ConceptData, ConceptId, ConceptPool};

/// Summary of the DL constructs used by the loaded axioms. Computed once per
/// knowledge base by monotonic folding; the search only ever reads a
/// snapshot (it is `Clone` and never mutated mid-search).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expressivity {
    pub negation: bool,
    pub disjunction: bool,
    pub existentials: bool,
    pub inverses: bool,
    pub nominals: bool,
    pub cardinality: bool,
    pub qualified_cardinality: bool,
    pub functionality: bool,
    pub transitivity: bool,
    pub role_hierarchy: bool,
    pub complex_role_inclusions: bool,
    pub reflexivity: bool,
    pub datatypes: bool,
}

impl Expressivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the constructs reachable from an interned concept.
    pub fn update_concept(&mut self, pool: &ConceptPool, rbox: &RoleBox, id: ConceptId) {
        match pool.concept(id) {
            ConceptData::Top | ConceptData::Bottom | ConceptData::Atom(_) => {}
            ConceptData::NegAtom(_) => self.negation = true,
            ConceptData::And(parts) => {
                for &p in parts {
                    self.update_concept(pool, rbox, p);
                }
            }
            ConceptData::Or(parts) => {
                self.disjunction = true;
                for &p in parts {
                    self.update_concept(pool, rbox, p);
                }
            }
            ConceptData::Some(r, c) => {
                self.existentials = true;
                self.update_role(rbox, *r);
                self.update_concept(pool, rbox, *c);
            }
            ConceptData::All(r, c) => {
                self.update_role(rbox, *r);
                self.update_concept(pool, rbox, *c);
            }
            ConceptData::Min(r, _, q) | ConceptData::Max(r, _, q) => {
                self.cardinality = true;
                if *q != ConceptPool::TOP {
                    self.qualified_cardinality = true;
                }
                self.update_role(rbox, *r);
                self.update_concept(pool, rbox, *q);
            }
            ConceptData::SelfRestriction(r) | ConceptData::NegSelfRestriction(r) => {
                self.reflexivity = true;
                self.update_role(rbox, *r);
            }
            ConceptData::Nominal(_) | ConceptData::NegNominal(_) => self.nominals = true,
        }
    }

    fn update_role(&mut self, rbox: &RoleBox, role: crate::rbox::RoleId) {
        // An odd id is the anonymous inverse of a named role.
        if role.0 % 2 == 1 {
            self.inverses = true;
        }
        if rbox.is_transitive(role) {
            self.transitivity = true;
        }
        if rbox.is_datatype(role) {
            self.datatypes = true;
        }
    }

    /// Fold in the role-level features of an axiom. Concept-level features
    /// are folded separately as the concepts are interned.
    pub fn update_axiom(&mut self, axiom: &Axiom) {
        match axiom {
            Axiom::SubPropertyOf(_, _) | Axiom::EquivalentProperties(_) => {
                self.role_hierarchy = true;
            }
            Axiom::SubPropertyChainOf(chain, _) if chain.len() > 1 => {
                self.complex_role_inclusions = true;
            }
            Axiom::InverseProperties(_, _) => self.inverses = true,
            Axiom::FunctionalProperty(_) | Axiom::InverseFunctionalProperty(_) => {
                self.functionality = true;
                self.cardinality = true;
            }
            Axiom::TransitiveProperty(_) => self.transitivity = true,
            Axiom::SymmetricProperty(_) => self.inverses = true,
            Axiom::ReflexiveProperty(_) | Axiom::IrreflexiveProperty(_) => {
                self.reflexivity = true;
            }
            Axiom::SameIndividual(_) | Axiom::DifferentIndividuals(_) => {}
            Axiom::DataPropertyAssertion(_, _, _) => self.datatypes = true,
            _ => {}
        }
        if matches!(axiom, Axiom::InverseFunctionalProperty(_)) {
            self.inverses = true;
        }
    }

    /// Render the usual DL fragment name, e.g. "ALCHIQ" or "SHOIN".
    pub fn dl_name(&self) -> String {
        let mut name = String::new();
        if self.transitivity {
            name.push('S');
        } else {
            name.push_str("ALC");
        }
        if self.role_hierarchy {
            name.push('H');
        }
        if self.nominals {
            name.push('O');
        }
        if self.inverses {
            name.push('I');
        }
        if self.qualified_cardinality {
            name.push('Q');
        } else if self.cardinality {
            name.push('N');
        } else if self.functionality {
            name.push('F');
        }
        if self.datatypes {
            name.push_str("(D)");
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassExpression, PropertyExpression};

    fn profile_of(expr: &ClassExpression) -> Expressivity {
        let mut pool = ConceptPool::new();
        let mut rbox = RoleBox::new();
        let id = pool.intern(expr, &mut rbox).unwrap();
        let mut e = Expressivity::new();
        e.update_concept(&pool, &rbox, id);
        e
    }

    #[test]
    fn test_plain_alc() {
        let expr = ClassExpression::some(
            PropertyExpression::object("http://example.org/r"),
            ClassExpression::named("http://example.org/C"),
        );
        let e = profile_of(&expr);
        assert!(e.existentials);
        assert!(!e.inverses);
        assert!(!e.nominals);
        assert_eq!(e.dl_name(), "ALC");
    }

    #[test]
    fn test_inverse_detected() {
        let expr = ClassExpression::some(
            PropertyExpression::object("http://example.org/r").inverse(),
            ClassExpression::Thing,
        );
        let e = profile_of(&expr);
        assert!(e.inverses);
        assert_eq!(e.dl_name(), "ALCI");
    }

    #[test]
    fn test_qualified_cardinality_detected() {
        let expr = ClassExpression::max(
            1,
            PropertyExpression::object("http://example.org/r"),
            Some(ClassExpression::named("http://example.org/C")),
        );
        let e = profile_of(&expr);
        assert!(e.cardinality);
        assert!(e.qualified_cardinality);
        assert_eq!(e.dl_name(), "ALCQ");
    }

    #[test]
    fn test_unqualified_cardinality_is_n() {
        let expr = ClassExpression::min(
            2,
            PropertyExpression::object("http://example.org/r"),
            None,
        );
        let e = profile_of(&expr);
        assert!(e.cardinality);
        assert!(!e.qualified_cardinality);
        assert_eq!(e.dl_name(), "ALCN");
    }

    #[test]
    fn test_nominal_detected() {
        let expr = ClassExpression::OneOf(vec![crate::model::Individual::new(
            "http://example.org/a",
        )]);
        let e = profile_of(&expr);
        assert!(e.nominals);
    }
}
