//! Derived graph queries over a metadata snapshot.
//!
//! Branch records store only the parent edge; children and stack orderings
//! are derived here. All queries are pure functions over a `Document` and
//! deterministic: sibling order is always lexicographic.

use std::collections::VecDeque;

use super::schema::{BranchState, Document, StoreError};

impl Document {
    /// Direct children of a branch, sorted by name
    pub fn children(&self, parent: &str) -> Vec<String> {
        self.branches
            .values()
            .filter(|r| !r.parent.trunk && r.parent.name == parent)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Stack roots: branches whose parent is a trunk, sorted by name
    pub fn stack_roots(&self) -> Vec<String> {
        self.branches
            .values()
            .filter(|r| r.parent.trunk)
            .map(|r| r.name.clone())
            .collect()
    }

    /// All branches below `branch` in the stack (children, grandchildren, ...),
    /// in BFS order, not including `branch` itself.
    pub fn subsequent_branches(&self, branch: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue: VecDeque<String> = self.children(branch).into();

        while let Some(name) = queue.pop_front() {
            // The committed document is acyclic, but stay defensive on depth
            if result.len() > self.branches.len() {
                break;
            }
            queue.extend(self.children(&name));
            result.push(name);
        }

        result
    }

    /// Branches from the stack root down to `branch`, root first, excluding
    /// `branch` itself. Empty when `branch` is untracked or is a stack root.
    pub fn previous_branches(&self, branch: &str) -> Result<Vec<String>, StoreError> {
        let mut chain = Vec::new();
        let mut current = match self.branches.get(branch) {
            Some(record) => record,
            None => return Ok(Vec::new()),
        };

        while !current.parent.trunk {
            if chain.len() >= self.branches.len() {
                return Err(StoreError::Cycle {
                    branch: branch.to_string(),
                });
            }

            let parent_name = current.parent.name.clone();
            current = self.branches.get(&parent_name).ok_or(StoreError::MissingParent {
                branch: current.name.clone(),
                parent: parent_name.clone(),
            })?;
            chain.push(parent_name);
        }

        chain.reverse();
        Ok(chain)
    }

    /// The whole stack around `branch`: ancestors, the branch, descendants
    pub fn stack_branches(&self, branch: &str) -> Result<Vec<String>, StoreError> {
        let mut stack = self.previous_branches(branch)?;
        stack.push(branch.to_string());
        stack.extend(self.subsequent_branches(branch));
        Ok(stack)
    }

    /// The trunk branch at the root of `branch`'s stack
    pub fn trunk(&self, branch: &str) -> Result<String, StoreError> {
        let root = self.root(branch)?;
        Ok(self
            .branches
            .get(&root)
            .map(|r| r.parent.name.clone())
            .unwrap_or_default())
    }

    /// The stack root of `branch` (the branch whose parent is a trunk)
    pub fn root(&self, branch: &str) -> Result<String, StoreError> {
        let previous = self.previous_branches(branch)?;
        Ok(previous.first().cloned().unwrap_or_else(|| branch.to_string()))
    }

    /// Would re-pointing `name` at `new_parent` keep the graph acyclic?
    ///
    /// Follows the proposed parent chain for at most |branches| steps; the
    /// change is rejected iff the walk reaches `name` again.
    pub fn validate_no_cycle(&self, name: &str, new_parent: &BranchState) -> bool {
        if new_parent.trunk {
            return true;
        }

        let mut current = new_parent.name.as_str();
        for _ in 0..=self.branches.len() {
            if current == name {
                return false;
            }
            match self.branches.get(current) {
                Some(record) if !record.parent.trunk => current = record.parent.name.as_str(),
                // Reached a stack root or an untracked parent: no cycle
                _ => return true,
            }
        }

        // Walk did not terminate: the existing chain is already cyclic
        false
    }

    /// Whether `name` or any of its ancestors is excluded from `sync --all`
    pub fn has_excluded_ancestor(&self, name: &str) -> bool {
        let mut current = name;
        let mut steps = 0;

        while let Some(record) = self.branches.get(current) {
            if record.exclude_from_sync_all {
                return true;
            }
            if record.parent.trunk {
                return false;
            }
            steps += 1;
            if steps > self.branches.len() {
                return false;
            }
            current = record.parent.name.as_str();
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::BranchRecord;

    /// trunk -> a -> b -> c, trunk -> a -> d, trunk -> x
    fn sample_doc() -> Document {
        let mut doc = Document::default();
        for (name, parent) in [
            ("a", BranchState::trunk_parent("main")),
            ("b", BranchState::branch_parent("a", "a0")),
            ("c", BranchState::branch_parent("b", "b0")),
            ("d", BranchState::branch_parent("a", "a0")),
            ("x", BranchState::trunk_parent("main")),
        ] {
            doc.branches.insert(name.into(), BranchRecord::new(name, parent));
        }
        doc
    }

    #[test]
    fn test_children_sorted() {
        let doc = sample_doc();
        assert_eq!(doc.children("a"), vec!["b", "d"]);
        assert_eq!(doc.children("c"), Vec::<String>::new());
    }

    #[test]
    fn test_stack_roots() {
        let doc = sample_doc();
        assert_eq!(doc.stack_roots(), vec!["a", "x"]);
    }

    #[test]
    fn test_subsequent_branches_bfs() {
        let doc = sample_doc();
        assert_eq!(doc.subsequent_branches("a"), vec!["b", "d", "c"]);
        assert!(doc.subsequent_branches("x").is_empty());
    }

    #[test]
    fn test_previous_branches_root_first() {
        let doc = sample_doc();
        assert_eq!(doc.previous_branches("c").unwrap(), vec!["a", "b"]);
        assert!(doc.previous_branches("a").unwrap().is_empty());
        assert!(doc.previous_branches("untracked").unwrap().is_empty());
    }

    #[test]
    fn test_stack_branches() {
        let doc = sample_doc();
        assert_eq!(doc.stack_branches("b").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_trunk_and_root() {
        let doc = sample_doc();
        assert_eq!(doc.root("c").unwrap(), "a");
        assert_eq!(doc.trunk("c").unwrap(), "main");
        assert_eq!(doc.root("x").unwrap(), "x");
        assert_eq!(doc.trunk("x").unwrap(), "main");
    }

    #[test]
    fn test_validate_no_cycle_rejects_descendant_parent() {
        let doc = sample_doc();
        // c is a descendant of a: re-pointing a at c would loop
        assert!(!doc.validate_no_cycle("a", &BranchState::branch_parent("c", "")));
        // Sibling is fine
        assert!(doc.validate_no_cycle("d", &BranchState::branch_parent("b", "")));
        // Trunk parent is always fine
        assert!(doc.validate_no_cycle("a", &BranchState::trunk_parent("main")));
        // Direct self-parent loops
        assert!(!doc.validate_no_cycle("a", &BranchState::branch_parent("a", "")));
    }

    #[test]
    fn test_has_excluded_ancestor() {
        let mut doc = sample_doc();
        assert!(!doc.has_excluded_ancestor("c"));

        doc.branches.get_mut("a").unwrap().exclude_from_sync_all = true;
        assert!(doc.has_excluded_ancestor("a"));
        assert!(doc.has_excluded_ancestor("c"));
        assert!(!doc.has_excluded_ancestor("x"));
    }
}
