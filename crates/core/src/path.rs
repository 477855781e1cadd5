//! Per-branch traversal path.
//!
//! The path holds the identities on the current DFS branch, root to current
//! node. Each branch owns an independent copy: `child()` returns an extended
//! clone, so sibling branches never observe each other's path. This is what
//! lets a diamond-shaped graph expand fully under each parent while true
//! cycles are still caught.

use crate::identity::CellIdentity;

/// Ordered set of identities on one DFS branch.
#[derive(Debug, Clone, Default)]
pub struct TraversalPath {
    entries: Vec<CellIdentity>,
}

impl TraversalPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` is already on this branch (a circular reference).
    pub fn contains(&self, id: &CellIdentity) -> bool {
        self.entries.iter().any(|e| e == id)
    }

    /// Extended copy of this path with `id` appended.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already on the path; callers must check `contains`
    /// first and stop that branch instead of recursing.
    pub fn child(&self, id: &CellIdentity) -> Self {
        assert!(
            !self.contains(id),
            "identity {} already on traversal path",
            id
        );
        let mut entries = self.entries.clone();
        entries.push(id.clone());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(cell: &str) -> CellIdentity {
        CellIdentity::new("/w/book.xlsx", "Sheet1", cell)
    }

    #[test]
    fn test_child_extends_copy() {
        let root = TraversalPath::new();
        let a = root.child(&id("A1"));
        let b = a.child(&id("B1"));

        assert!(root.is_empty());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert!(b.contains(&id("A1")));
        assert!(!a.contains(&id("B1")));
    }

    #[test]
    fn test_sibling_branches_are_independent() {
        let root = TraversalPath::new().child(&id("C1"));
        let left = root.child(&id("A1"));
        let right = root.child(&id("B1"));

        assert!(!left.contains(&id("B1")));
        assert!(!right.contains(&id("A1")));
    }

    #[test]
    fn test_contains_matches_identity_not_spelling() {
        let path = TraversalPath::new().child(&id("A1"));
        assert!(path.contains(&CellIdentity::new("/w/book.xlsx", "SHEET1", "a1")));
    }

    #[test]
    #[should_panic]
    fn test_duplicate_on_branch_rejected() {
        let path = TraversalPath::new().child(&id("A1"));
        let _ = path.child(&id("A1"));
    }
}
