//! Structural validation of the node tree.
//!
//! Runs before anything is compiled or collected so that a malformed document
//! fails without producing a single file.

use std::collections::HashSet;

use crate::error::Violation;
use crate::tree::{NodeTree, ROOT_ID};

/// Check every tree invariant. The first violation found is returned; nodes are
/// inspected in id order so the reported violation is stable across runs.
pub fn validate_tree(tree: &NodeTree) -> Result<(), Violation> {
    let root = tree.root().ok_or(Violation::MissingRoot)?;
    if let Some(parent) = &root.parent {
        return Err(Violation::RootHasParent {
            parent: parent.clone(),
        });
    }

    let mut listed: HashSet<&str> = HashSet::new();

    for (id, node) in tree.iter() {
        if !node.is_canvas && !node.children.is_empty() {
            return Err(Violation::ChildrenOnLeaf {
                node: id.clone(),
                count: node.children.len(),
            });
        }

        for child_id in &node.children {
            let child = tree.get(child_id).ok_or_else(|| Violation::DanglingChild {
                parent: id.clone(),
                child: child_id.clone(),
            })?;

            if !listed.insert(child_id.as_str()) {
                return Err(Violation::DuplicateChild {
                    child: child_id.clone(),
                });
            }

            if child.parent.as_deref() != Some(id.as_str()) {
                return Err(Violation::ParentMismatch {
                    node: child_id.clone(),
                    listed_under: id.clone(),
                    declared: child
                        .parent
                        .as_ref()
                        .map(|p| format!("\"{}\"", p))
                        .unwrap_or_else(|| "unset".to_string()),
                });
            }
        }

        if id != ROOT_ID {
            if let Some(parent) = &node.parent {
                if tree.get(parent).is_none() {
                    return Err(Violation::DanglingParent {
                        node: id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
    }

    let reachable = reachable_from_root(tree);
    for (id, _) in tree.iter() {
        if reachable.contains(id.as_str()) {
            continue;
        }
        if on_parent_cycle(tree, id) {
            return Err(Violation::Cycle { node: id.clone() });
        }
        return Err(Violation::Unreachable { node: id.clone() });
    }

    Ok(())
}

fn reachable_from_root(tree: &NodeTree) -> HashSet<&str> {
    let mut seen = HashSet::new();
    let mut stack = vec![ROOT_ID];
    while let Some(id) = stack.pop() {
        let Some((key, node)) = tree.entry(id) else {
            continue;
        };
        if !seen.insert(key.as_str()) {
            continue;
        }
        stack.extend(node.children.iter().map(|c| c.as_str()));
    }
    seen
}

/// Follow parent pointers from `start`; a revisit means a cycle.
fn on_parent_cycle(tree: &NodeTree, start: &str) -> bool {
    let mut seen = HashSet::new();
    let mut current = Some(start.to_string());
    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            return true;
        }
        current = tree.get(&id).and_then(|n| n.parent.clone());
    }
    false
}
