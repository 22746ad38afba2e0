//! ロール階層 (RBox)

use crate::model::{Iri, PropertyExpression};
use crate::CoreError;
use std::collections::{HashMap, HashSet, VecDeque};

/// Role identifier. Named roles and their inverses are interned as adjacent
/// ids, so `inverse()` is a bit flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(pub u32);

impl RoleId {
    pub fn inverse(self) -> RoleId {
        RoleId(self.0 ^ 1)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct RoleData {
    name: Iri,
    /// True for the anonymous inverse of a named role.
    inverted: bool,
    datatype: bool,
    transitive: bool,
    functional: bool,
    reflexive: bool,
    irreflexive: bool,
    declared_supers: Vec<RoleId>,
    /// Reflexive-transitive closure of the declared hierarchy. Populated by
    /// `close()`; queries before closure see only the declared edges.
    supers: HashSet<RoleId>,
}

/// Role box: interned roles, their flags and hierarchy.
#[derive(Debug, Default)]
pub struct RoleBox {
    roles: Vec<RoleData>,
    index: HashMap<(Iri, bool), RoleId>,
    chains: Vec<(Vec<RoleId>, RoleId)>,
    closed: bool,
}

impl RoleBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a property expression, creating the role and its inverse on
    /// first sight. Inverses of data properties are malformed.
    pub fn intern(&mut self, expr: &PropertyExpression) -> Result<RoleId, CoreError> {
        match expr {
            PropertyExpression::ObjectProperty(iri) => Ok(self.intern_named(iri.clone(), false)),
            PropertyExpression::DataProperty(iri) => Ok(self.intern_named(iri.clone(), true)),
            PropertyExpression::InverseOf(inner) => {
                let inner = self.intern(inner)?;
                if self.is_datatype(inner) {
                    return Err(CoreError::MalformedTerm(format!(
                        "inverse of data property {}",
                        self.name(inner)
                    )));
                }
                Ok(inner.inverse())
            }
        }
    }

    fn intern_named(&mut self, iri: Iri, datatype: bool) -> RoleId {
        if let Some(&id) = self.index.get(&(iri.clone(), datatype)) {
            return id;
        }
        let id = RoleId(self.roles.len() as u32);
        let base = RoleData {
            name: iri.clone(),
            inverted: false,
            datatype,
            transitive: false,
            functional: false,
            reflexive: false,
            irreflexive: false,
            declared_supers: Vec::new(),
            supers: HashSet::new(),
        };
        let mut inv = base.clone();
        inv.inverted = true;
        self.roles.push(base);
        self.roles.push(inv);
        self.index.insert((iri, datatype), id);
        self.closed = false;
        id
    }

    pub fn name(&self, role: RoleId) -> String {
        let data = &self.roles[role.index()];
        if data.inverted {
            format!("{}⁻", data.name)
        } else {
            data.name.to_string()
        }
    }

    pub fn is_datatype(&self, role: RoleId) -> bool {
        self.roles[role.index()].datatype
    }

    pub fn is_transitive(&self, role: RoleId) -> bool {
        self.roles[role.index()].transitive
    }

    pub fn is_functional(&self, role: RoleId) -> bool {
        self.roles[role.index()].functional
    }

    pub fn is_reflexive(&self, role: RoleId) -> bool {
        self.roles[role.index()].reflexive
    }

    pub fn is_irreflexive(&self, role: RoleId) -> bool {
        self.roles[role.index()].irreflexive
    }

    /// Transitivity holds for a role iff it holds for its inverse.
    pub fn set_transitive(&mut self, role: RoleId) {
        self.roles[role.index()].transitive = true;
        self.roles[role.inverse().index()].transitive = true;
    }

    pub fn set_functional(&mut self, role: RoleId) {
        self.roles[role.index()].functional = true;
    }

    /// InverseFunctional(R) is Functional(R⁻).
    pub fn set_inverse_functional(&mut self, role: RoleId) {
        self.set_functional(role.inverse());
    }

    /// Symmetric(R) is modelled as R ≡ R⁻ in the hierarchy.
    pub fn set_symmetric(&mut self, role: RoleId) {
        self.add_sub_role(role, role.inverse());
    }

    pub fn set_reflexive(&mut self, role: RoleId) {
        self.roles[role.index()].reflexive = true;
        self.roles[role.inverse().index()].reflexive = true;
    }

    pub fn set_irreflexive(&mut self, role: RoleId) {
        self.roles[role.index()].irreflexive = true;
        self.roles[role.inverse().index()].irreflexive = true;
    }

    /// Declare sub ⊑ sup; the inverse pair is implied.
    pub fn add_sub_role(&mut self, sub: RoleId, sup: RoleId) {
        self.roles[sub.index()].declared_supers.push(sup);
        self.roles[sub.inverse().index()].declared_supers.push(sup.inverse());
        self.closed = false;
    }

    /// Declare R1 ∘ ... ∘ Rn ⊑ R. A chain R ∘ R ⊑ R is plain transitivity;
    /// anything longer is recorded for the expressivity profile and refused
    /// by the tableau front-end.
    pub fn add_chain(&mut self, chain: Vec<RoleId>, sup: RoleId) {
        if chain.len() == 2 && chain[0] == sup && chain[1] == sup {
            self.set_transitive(sup);
        } else {
            self.chains.push((chain, sup));
        }
    }

    pub fn has_complex_chains(&self) -> bool {
        !self.chains.is_empty()
    }

    pub fn complex_chains(&self) -> &[(Vec<RoleId>, RoleId)] {
        &self.chains
    }

    pub fn has_hierarchy(&self) -> bool {
        self.roles.iter().any(|r| !r.declared_supers.is_empty())
    }

    /// Compute the reflexive-transitive closure of the role hierarchy.
    /// Must be called after the last declaration and before search.
    pub fn close(&mut self) {
        for i in 0..self.roles.len() {
            let start = RoleId(i as u32);
            let mut seen: HashSet<RoleId> = HashSet::new();
            let mut work = VecDeque::new();
            work.push_back(start);
            while let Some(r) = work.pop_front() {
                if !seen.insert(r) {
                    continue;
                }
                for &s in &self.roles[r.index()].declared_supers {
                    work.push_back(s);
                }
            }
            self.roles[i].supers = seen;
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_sub_role_of(&self, sub: RoleId, sup: RoleId) -> bool {
        debug_assert!(self.closed, "role hierarchy queried before close()");
        sub == sup || self.roles[sub.index()].supers.contains(&sup)
    }

    /// Transitive roles below `role` (inclusive), used by the ∀-rule to
    /// propagate restrictions through transitive sub-roles.
    pub fn transitive_sub_roles(&self, role: RoleId) -> Vec<RoleId> {
        (0..self.roles.len() as u32)
            .map(RoleId)
            .filter(|&s| self.roles[s.index()].transitive && self.is_sub_role_of(s, role))
            .collect()
    }

    pub fn reflexive_roles(&self) -> Vec<RoleId> {
        (0..self.roles.len() as u32)
            .map(RoleId)
            .filter(|&r| self.roles[r.index()].reflexive)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str) -> PropertyExpression {
        PropertyExpression::object(format!("http://example.org/{name}"))
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut rbox = RoleBox::new();
        let r1 = rbox.intern(&object("hasChild")).unwrap();
        let r2 = rbox.intern(&object("hasChild")).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_inverse_is_involution() {
        let mut rbox = RoleBox::new();
        let r = rbox.intern(&object("hasChild")).unwrap();
        let inv = rbox.intern(&object("hasChild").inverse()).unwrap();
        assert_eq!(r.inverse(), inv);
        assert_eq!(inv.inverse(), r);
    }

    #[test]
    fn test_inverse_of_data_property_is_malformed() {
        let mut rbox = RoleBox::new();
        let expr = PropertyExpression::data("http://example.org/hasAge").inverse();
        assert!(matches!(rbox.intern(&expr), Err(CoreError::MalformedTerm(_))));
    }

    #[test]
    fn test_hierarchy_closure() {
        let mut rbox = RoleBox::new();
        let child = rbox.intern(&object("hasChild")).unwrap();
        let descendant = rbox.intern(&object("hasDescendant")).unwrap();
        let relative = rbox.intern(&object("hasRelative")).unwrap();
        rbox.add_sub_role(child, descendant);
        rbox.add_sub_role(descendant, relative);
        rbox.close();

        assert!(rbox.is_sub_role_of(child, relative));
        assert!(rbox.is_sub_role_of(child.inverse(), relative.inverse()));
        assert!(!rbox.is_sub_role_of(relative, child));
    }

    #[test]
    fn test_inverse_functional_marks_inverse() {
        let mut rbox = RoleBox::new();
        let r = rbox.intern(&object("hasParent")).unwrap();
        rbox.set_inverse_functional(r);
        assert!(!rbox.is_functional(r));
        assert!(rbox.is_functional(r.inverse()));
    }

    #[test]
    fn test_transitive_sub_roles() {
        let mut rbox = RoleBox::new();
        let part = rbox.intern(&object("partOf")).unwrap();
        let contained = rbox.intern(&object("containedIn")).unwrap();
        rbox.add_sub_role(part, contained);
        rbox.set_transitive(part);
        rbox.close();

        let trans = rbox.transitive_sub_roles(contained);
        assert!(trans.contains(&part));
        assert!(!trans.contains(&contained));
    }

    #[test]
    fn test_double_transitive_chain_is_transitivity() {
        let mut rbox = RoleBox::new();
        let r = rbox.intern(&object("ancestorOf")).unwrap();
        rbox.add_chain(vec![r, r], r);
        assert!(rbox.is_transitive(r));
        assert!(!rbox.has_complex_chains());
    }
}
