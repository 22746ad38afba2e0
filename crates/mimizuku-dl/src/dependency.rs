//! 依存集合 (dependency set)

use std::fmt;
use std::sync::Arc;

/// Immutable set of branch indices justifying a derived fact. Branch
/// indices start at 1; the empty set is the distinguished INDEPENDENT
/// value (the fact holds regardless of any nondeterministic choice).
///
/// Sharing is by `Arc`, so cloning a dependency set is a pointer copy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DependencySet {
    branches: Arc<[u32]>, // sorted, deduplicated
}

impl Default for DependencySet {
    fn default() -> Self {
        Self { branches: Vec::new().into() }
    }
}

impl DependencySet {
    /// The fact depends on no branch; never undone by backtracking.
    pub fn independent() -> Self {
        Self::default()
    }

    pub fn from_branch(branch: u32) -> Self {
        debug_assert!(branch > 0);
        Self { branches: Arc::from([branch]) }
    }

    pub fn is_independent(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn contains(&self, branch: u32) -> bool {
        self.branches.binary_search(&branch).is_ok()
    }

    /// Deepest branch this fact depends on; 0 when independent. The
    /// backtrack engine uses this as the backjump target on clash.
    pub fn max(&self) -> u32 {
        self.branches.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn add(&self, branch: u32) -> Self {
        debug_assert!(branch > 0);
        if self.contains(branch) {
            return self.clone();
        }
        let mut merged: Vec<u32> = self.branches.to_vec();
        let pos = merged.partition_point(|&b| b < branch);
        merged.insert(pos, branch);
        Self { branches: merged.into() }
    }

    /// Set union. Independent ∪ x = x: independence survives only when
    /// both sides are independent.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_independent() {
            return other.clone();
        }
        if other.is_independent() {
            return self.clone();
        }
        let mut merged: Vec<u32> =
            Vec::with_capacity(self.branches.len() + other.branches.len());
        let (mut i, mut j) = (0, 0);
        while i < self.branches.len() && j < other.branches.len() {
            match self.branches[i].cmp(&other.branches[j]) {
                std::cmp::Ordering::Less => {
                    merged.push(self.branches[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(other.branches[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(self.branches[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&self.branches[i..]);
        merged.extend_from_slice(&other.branches[j..]);
        Self { branches: merged.into() }
    }

    /// Drop one branch index (used when a clash is propagated past an
    /// exhausted branch).
    pub fn remove(&self, branch: u32) -> Self {
        if !self.contains(branch) {
            return self.clone();
        }
        let merged: Vec<u32> = self
            .branches
            .iter()
            .copied()
            .filter(|&b| b != branch)
            .collect();
        Self { branches: merged.into() }
    }
}

impl fmt::Debug for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_independent() {
            write!(f, "DS[independent]")
        } else {
            write!(f, "DS{:?}", &self.branches[..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_max_is_zero() {
        assert_eq!(DependencySet::independent().max(), 0);
        assert!(DependencySet::independent().is_independent());
    }

    #[test]
    fn test_union_keeps_order_and_dedupes() {
        let a = DependencySet::from_branch(3).add(1);
        let b = DependencySet::from_branch(2).add(3);
        let u = a.union(&b);
        assert!(u.contains(1));
        assert!(u.contains(2));
        assert!(u.contains(3));
        assert_eq!(u.len(), 3);
        assert_eq!(u.max(), 3);
    }

    #[test]
    fn test_union_with_independent() {
        let a = DependencySet::from_branch(5);
        let u = a.union(&DependencySet::independent());
        assert_eq!(u, a);
        assert!(!u.is_independent());
    }

    #[test]
    fn test_independence_requires_both_sides() {
        let u = DependencySet::independent().union(&DependencySet::independent());
        assert!(u.is_independent());
    }

    #[test]
    fn test_remove() {
        let a = DependencySet::from_branch(2).add(4);
        let r = a.remove(4);
        assert!(!r.contains(4));
        assert_eq!(r.max(), 2);
        assert_eq!(a.max(), 4); // original untouched
    }

    #[test]
    fn test_add_is_idempotent() {
        let a = DependencySet::from_branch(2);
        let b = a.add(2);
        assert_eq!(a, b);
    }
}
