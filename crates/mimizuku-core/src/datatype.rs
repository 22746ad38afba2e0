//! データ型推論インタフェース
//!
//! The tableau only needs a small capability contract from datatype
//! reasoning: whether a set of literal constraints on one node is
//! satisfiable, and whether two constants denote distinct values. Full XSD
//! facet arithmetic is a collaborator concern.

use crate::model::Literal;

/// Capability contract consumed by the completion engine.
pub trait DatatypeReasoner {
    /// Can a single literal node carry all of these values at once?
    /// (A merged literal node collects the values of everything merged
    /// into it.)
    fn is_satisfiable(&self, values: &[Literal]) -> bool;

    /// Do these two constants denote provably distinct values?
    fn are_disjoint(&self, a: &Literal, b: &Literal) -> bool;
}

/// Constant-level implementation: two literals are the same value iff they
/// are the same lexical form in the same datatype.
#[derive(Debug, Clone, Default)]
pub struct SimpleDatatypeReasoner;

impl DatatypeReasoner for SimpleDatatypeReasoner {
    fn is_satisfiable(&self, values: &[Literal]) -> bool {
        values
            .windows(2)
            .all(|w| !self.are_disjoint(&w[0], &w[1]))
    }

    fn are_disjoint(&self, a: &Literal, b: &Literal) -> bool {
        a != b
    }
}
