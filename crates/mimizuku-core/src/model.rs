//! OWL DL データモデル

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// OWL IRI wrapper for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Iri(pub String);

impl Iri {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Iri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OWL Individual
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Individual(pub Iri);

impl Individual {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Iri::new(s))
    }
}

impl std::fmt::Display for Individual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data value carried by a data property assertion.
///
/// Value-space reasoning beyond constant equality is a collaborator concern;
/// the tableau only needs to tell two constants apart (see `datatype`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    pub datatype: Option<Iri>,
}

impl Literal {
    pub fn string(s: impl Into<String>) -> Self {
        Self { lexical: s.into(), datatype: None }
    }
}

/// OWL DL Class Expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassExpression {
    /// Named class
    Named(Iri),

    /// owl:Thing (⊤)
    Thing,

    /// owl:Nothing (⊥)
    Nothing,

    /// Intersection of classes: C1 ⊓ C2 ⊓ ... ⊓ Cn
    IntersectionOf(Vec<ClassExpression>),

    /// Union of classes: C1 ⊔ C2 ⊔ ... ⊔ Cn
    UnionOf(Vec<ClassExpression>),

    /// Complement of class: ¬C
    ComplementOf(Box<ClassExpression>),

    /// Enumeration of individuals: {i1, i2, ..., in}
    OneOf(Vec<Individual>),

    /// Existential restriction: ∃R.C
    SomeValuesFrom {
        property: PropertyExpression,
        class: Box<ClassExpression>,
    },

    /// Universal restriction: ∀R.C
    AllValuesFrom {
        property: PropertyExpression,
        class: Box<ClassExpression>,
    },

    /// Has value: ∃R.{i}
    HasValue {
        property: PropertyExpression,
        individual: Individual,
    },

    /// Local reflexivity: ∃R.Self
    HasSelf(PropertyExpression),

    /// Minimum cardinality: ≥n R.C
    MinCardinality {
        cardinality: u32,
        property: PropertyExpression,
        class: Option<Box<ClassExpression>>, // None means owl:Thing
    },

    /// Maximum cardinality: ≤n R.C
    MaxCardinality {
        cardinality: u32,
        property: PropertyExpression,
        class: Option<Box<ClassExpression>>, // None means owl:Thing
    },

    /// Exact cardinality: =n R.C (sugar for ≥n ⊓ ≤n)
    ExactCardinality {
        cardinality: u32,
        property: PropertyExpression,
        class: Option<Box<ClassExpression>>, // None means owl:Thing
    },
}

impl ClassExpression {
    pub fn named(s: impl Into<String>) -> Self {
        ClassExpression::Named(Iri::new(s))
    }

    pub fn and(parts: Vec<ClassExpression>) -> Self {
        ClassExpression::IntersectionOf(parts)
    }

    pub fn or(parts: Vec<ClassExpression>) -> Self {
        ClassExpression::UnionOf(parts)
    }

    pub fn not(self) -> Self {
        ClassExpression::ComplementOf(Box::new(self))
    }

    pub fn some(property: PropertyExpression, class: ClassExpression) -> Self {
        ClassExpression::SomeValuesFrom { property, class: Box::new(class) }
    }

    pub fn all(property: PropertyExpression, class: ClassExpression) -> Self {
        ClassExpression::AllValuesFrom { property, class: Box::new(class) }
    }

    pub fn min(cardinality: u32, property: PropertyExpression, class: Option<ClassExpression>) -> Self {
        ClassExpression::MinCardinality { cardinality, property, class: class.map(Box::new) }
    }

    pub fn max(cardinality: u32, property: PropertyExpression, class: Option<ClassExpression>) -> Self {
        ClassExpression::MaxCardinality { cardinality, property, class: class.map(Box::new) }
    }
}

/// OWL DL Property Expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyExpression {
    /// Object property
    ObjectProperty(Iri),

    /// Data property
    DataProperty(Iri),

    /// Inverse property: R⁻
    InverseOf(Box<PropertyExpression>),
}

impl PropertyExpression {
    pub fn object(s: impl Into<String>) -> Self {
        PropertyExpression::ObjectProperty(Iri::new(s))
    }

    pub fn data(s: impl Into<String>) -> Self {
        PropertyExpression::DataProperty(Iri::new(s))
    }

    pub fn inverse(self) -> Self {
        PropertyExpression::InverseOf(Box::new(self))
    }
}

/// OWL DL Axiom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axiom {
    /// SubClassOf(C1 C2)
    SubClassOf(ClassExpression, ClassExpression),

    /// EquivalentClasses(C1 ... Cn)
    EquivalentClasses(Vec<ClassExpression>),

    /// DisjointClasses(C1 ... Cn)
    DisjointClasses(Vec<ClassExpression>),

    /// SubPropertyOf(P1 P2)
    SubPropertyOf(PropertyExpression, PropertyExpression),

    /// EquivalentProperties(P1 ... Pn)
    EquivalentProperties(Vec<PropertyExpression>),

    /// InverseProperties(P1 P2)
    InverseProperties(PropertyExpression, PropertyExpression),

    /// Sub-property chain: P1 ∘ ... ∘ Pn ⊑ P
    SubPropertyChainOf(Vec<PropertyExpression>, PropertyExpression),

    /// ObjectPropertyDomain(P C)
    ObjectPropertyDomain(PropertyExpression, ClassExpression),

    /// ObjectPropertyRange(P C)
    ObjectPropertyRange(PropertyExpression, ClassExpression),

    /// Functional property
    FunctionalProperty(PropertyExpression),

    /// Inverse functional property
    InverseFunctionalProperty(PropertyExpression),

    /// Transitive property
    TransitiveProperty(PropertyExpression),

    /// Symmetric property
    SymmetricProperty(PropertyExpression),

    /// Reflexive property
    ReflexiveProperty(PropertyExpression),

    /// Irreflexive property
    IrreflexiveProperty(PropertyExpression),

    /// SameIndividual(i1 ... in)
    SameIndividual(Vec<Individual>),

    /// DifferentIndividuals(i1 ... in)
    DifferentIndividuals(Vec<Individual>),

    /// ClassAssertion(C i)
    ClassAssertion(ClassExpression, Individual),

    /// ObjectPropertyAssertion(P i1 i2)
    ObjectPropertyAssertion(PropertyExpression, Individual, Individual),

    /// NegativeObjectPropertyAssertion(P i1 i2)
    NegativeObjectPropertyAssertion(PropertyExpression, Individual, Individual),

    /// DataPropertyAssertion(P i v)
    DataPropertyAssertion(PropertyExpression, Individual, Literal),
}

/// OWL DL Ontology
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ontology {
    /// Ontology IRI
    pub iri: Option<Iri>,

    /// All axioms in the ontology
    pub axioms: Vec<Axiom>,

    /// All named classes mentioned in the ontology
    pub classes: HashSet<Iri>,

    /// All properties mentioned in the ontology
    pub properties: HashSet<Iri>,

    /// All individuals mentioned in the ontology
    pub individuals: HashSet<Individual>,
}

impl Ontology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iri(iri: Iri) -> Self {
        Self { iri: Some(iri), ..Self::default() }
    }

    pub fn add_axiom(&mut self, axiom: Axiom) {
        match &axiom {
            Axiom::SubClassOf(c1, c2) => {
                self.collect_class(c1);
                self.collect_class(c2);
            }
            Axiom::EquivalentClasses(cs) | Axiom::DisjointClasses(cs) => {
                for c in cs {
                    self.collect_class(c);
                }
            }
            Axiom::SubPropertyOf(p1, p2) | Axiom::InverseProperties(p1, p2) => {
                self.collect_property(p1);
                self.collect_property(p2);
            }
            Axiom::EquivalentProperties(ps) => {
                for p in ps {
                    self.collect_property(p);
                }
            }
            Axiom::SubPropertyChainOf(chain, sup) => {
                for p in chain {
                    self.collect_property(p);
                }
                self.collect_property(sup);
            }
            Axiom::ObjectPropertyDomain(p, c) | Axiom::ObjectPropertyRange(p, c) => {
                self.collect_property(p);
                self.collect_class(c);
            }
            Axiom::FunctionalProperty(p)
            | Axiom::InverseFunctionalProperty(p)
            | Axiom::TransitiveProperty(p)
            | Axiom::SymmetricProperty(p)
            | Axiom::ReflexiveProperty(p)
            | Axiom::IrreflexiveProperty(p) => {
                self.collect_property(p);
            }
            Axiom::SameIndividual(is) | Axiom::DifferentIndividuals(is) => {
                self.individuals.extend(is.iter().cloned());
            }
            Axiom::ClassAssertion(c, i) => {
                self.collect_class(c);
                self.individuals.insert(i.clone());
            }
            Axiom::ObjectPropertyAssertion(p, i1, i2)
            | Axiom::NegativeObjectPropertyAssertion(p, i1, i2) => {
                self.collect_property(p);
                self.individuals.insert(i1.clone());
                self.individuals.insert(i2.clone());
            }
            Axiom::DataPropertyAssertion(p, i, _) => {
                self.collect_property(p);
                self.individuals.insert(i.clone());
            }
        }

        self.axioms.push(axiom);
    }

    fn collect_class(&mut self, expr: &ClassExpression) {
        match expr {
            ClassExpression::Named(iri) => {
                self.classes.insert(iri.clone());
            }
            ClassExpression::Thing | ClassExpression::Nothing => {}
            ClassExpression::IntersectionOf(parts) | ClassExpression::UnionOf(parts) => {
                for part in parts {
                    self.collect_class(part);
                }
            }
            ClassExpression::ComplementOf(inner) => self.collect_class(inner),
            ClassExpression::OneOf(is) => {
                self.individuals.extend(is.iter().cloned());
            }
            ClassExpression::SomeValuesFrom { property, class }
            | ClassExpression::AllValuesFrom { property, class } => {
                self.collect_property(property);
                self.collect_class(class);
            }
            ClassExpression::HasValue { property, individual } => {
                self.collect_property(property);
                self.individuals.insert(individual.clone());
            }
            ClassExpression::HasSelf(property) => self.collect_property(property),
            ClassExpression::MinCardinality { property, class, .. }
            | ClassExpression::MaxCardinality { property, class, .. }
            | ClassExpression::ExactCardinality { property, class, .. } => {
                self.collect_property(property);
                if let Some(class) = class {
                    self.collect_class(class);
                }
            }
        }
    }

    fn collect_property(&mut self, expr: &PropertyExpression) {
        match expr {
            PropertyExpression::ObjectProperty(iri) | PropertyExpression::DataProperty(iri) => {
                self.properties.insert(iri.clone());
            }
            PropertyExpression::InverseOf(inner) => self.collect_property(inner),
        }
    }
}
