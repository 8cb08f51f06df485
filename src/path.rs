//! Materialized path codec.
//!
//! A task's path is the list of its ancestor IDs, root-first, each followed by
//! a `/` separator: `""` for a root, `"A/"` for a child of `A`, `"A/B/"` for a
//! grandchild. Because every segment is terminated, `path + id + "/"` is a
//! full-segment prefix shared by exactly the task's descendants.
//!
//! Everything here is pure; the store and engine build on it.

use crate::error::{TreeError, TreeResult};
use crate::types::TaskNode;

/// Segment separator.
pub const SEPARATOR: char = '/';

/// Longest accepted task ID (the width of a hyphenated UUID).
pub const MAX_ID_LEN: usize = 36;

/// Path and depth for a task placed under `parent` (or at the root).
pub fn compute_path(parent: Option<&TaskNode>) -> (String, u32) {
    match parent {
        None => (String::new(), 0),
        Some(parent) => (subtree_prefix(parent), parent.depth + 1),
    }
}

/// The prefix shared by every path inside `node`'s subtree.
pub fn subtree_prefix(node: &TaskNode) -> String {
    let mut prefix = String::with_capacity(node.path.len() + node.id.len() + 1);
    prefix.push_str(&node.path);
    prefix.push_str(&node.id);
    prefix.push(SEPARATOR);
    prefix
}

/// Ancestor IDs encoded in `path`, root-first.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|segment| !segment.is_empty())
}

/// True if `node` is `candidate_ancestor_id` or lies below it.
///
/// Compares whole segments, so `"AB"` never matches an ancestor `"A"`.
pub fn is_descendant_or_self(candidate_ancestor_id: &str, node: &TaskNode) -> bool {
    node.id == candidate_ancestor_id || segments(&node.path).any(|s| s == candidate_ancestor_id)
}

/// Replace `old_prefix` at the start of `path` with `new_prefix`.
///
/// Returns `None` if `path` is not under `old_prefix`.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let suffix = path.strip_prefix(old_prefix)?;
    let mut rebased = String::with_capacity(new_prefix.len() + suffix.len());
    rebased.push_str(new_prefix);
    rebased.push_str(suffix);
    Some(rebased)
}

/// Exclusive upper bound of the byte-ordered range holding every string that
/// starts with `prefix`.
///
/// `prefix` must end with the separator. `'0'` is the byte after `'/'`, so
/// `[prefix, bound)` contains exactly the strings starting with `prefix`.
pub fn prefix_upper_bound(prefix: &str) -> String {
    debug_assert!(prefix.ends_with(SEPARATOR));
    let mut bound = prefix[..prefix.len() - SEPARATOR.len_utf8()].to_string();
    bound.push('0');
    bound
}

/// Depth implied by a path (its number of segments).
pub fn depth_of(path: &str) -> u32 {
    segments(path).count() as u32
}

/// Validate a caller-supplied task ID.
pub fn validate_id(id: &str) -> TreeResult<()> {
    if id.is_empty() {
        return Err(TreeError::invalid_value("id", "task ID must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(TreeError::invalid_value(
            "id",
            format!("task ID must be at most {} characters", MAX_ID_LEN),
        ));
    }
    if id.contains(SEPARATOR) {
        return Err(TreeError::invalid_value(
            "id",
            format!("task ID must not contain '{}'", SEPARATOR),
        ));
    }
    Ok(())
}
