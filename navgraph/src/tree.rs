//! Element trees as reported by the accessibility engine, and their
//! flattening into reading-ordered element lists.
//!
//! Nothing in this module recurses over a tree: flattening, counting,
//! cloning and dropping all walk an explicit worklist, so hierarchies of any
//! depth are safe.

use crate::element::{UIElement, UIElementAttributes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ancestor roles kept per flattened element.
pub const MAX_ANCESTRY: usize = 8;

/// Represents a node in the UI tree, containing its attributes and children.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct UINode {
    /// Engine handle used to act on this node
    pub id: String,
    pub attributes: UIElementAttributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UINode>,
}

impl UINode {
    pub fn new(id: impl Into<String>, attributes: UIElementAttributes) -> Self {
        Self {
            id: id.into(),
            attributes,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<UINode>) -> Self {
        self.children = children;
        self
    }

    /// Number of nodes in this subtree, counted without recursion.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    fn shallow_clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            children: Vec::with_capacity(self.children.len()),
        }
    }
}

impl Clone for UINode {
    fn clone(&self) -> Self {
        // Each entry is a source node and its copy with the children built so far
        let mut stack: Vec<(&UINode, UINode)> = vec![(self, self.shallow_clone())];
        loop {
            let (source, built) = match stack.last() {
                Some((source, copy)) => (*source, copy.children.len()),
                None => return self.shallow_clone(),
            };
            if let Some(child) = source.children.get(built) {
                stack.push((child, child.shallow_clone()));
                continue;
            }
            let Some((_, done)) = stack.pop() else {
                return self.shallow_clone();
            };
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(done),
                None => return done,
            }
        }
    }
}

impl Drop for UINode {
    fn drop(&mut self) {
        // Detach descendants level by level so each node drops childless
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// The element tree of one window together with the window's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiTree {
    pub window_id: u32,
    pub app_id: String,
    /// Surface label, e.g. the activity or view-controller name
    pub surface_label: String,
    pub root: UINode,
}

impl UiTree {
    /// Flatten the visible part of the tree in document (pre-order) order.
    ///
    /// Each element keeps at most [`MAX_ANCESTRY`] ancestor roles.
    ///
    /// Uses an explicit worklist so arbitrarily deep hierarchies cannot
    /// exhaust the stack. Invisible nodes are dropped together with their
    /// subtrees.
    pub fn flatten(&self) -> Vec<UIElement> {
        let mut out = Vec::new();
        // (node, depth, twin index, ancestors nearest-first)
        let mut stack: Vec<(&UINode, usize, usize, Vec<String>)> =
            vec![(&self.root, 0, 0, Vec::new())];

        while let Some((node, depth, index, ancestors)) = stack.pop() {
            if !node.attributes.visible {
                continue;
            }

            let mut child_ancestors = Vec::with_capacity(MAX_ANCESTRY);
            child_ancestors.push(node.attributes.role.clone());
            child_ancestors.extend(ancestors.iter().take(MAX_ANCESTRY - 1).cloned());

            let twins = twin_indices(&node.children);
            // Push in reverse so the first child is processed first
            for (child, twin) in node.children.iter().zip(twins).rev() {
                stack.push((child, depth + 1, twin, child_ancestors.clone()));
            }

            out.push(UIElement {
                handle: node.id.clone(),
                window_id: self.window_id,
                app_id: self.app_id.clone(),
                attributes: node.attributes.clone(),
                depth,
                ancestor_roles: ancestors,
                twin_index: index,
            });
        }

        out
    }
}

/// For each child, how many earlier siblings carry the same identity.
fn twin_indices(children: &[UINode]) -> Vec<usize> {
    let mut seen: HashMap<(&str, Option<&str>, Option<&str>, Option<&str>), usize> =
        HashMap::new();
    children
        .iter()
        .map(|child| {
            let attrs = &child.attributes;
            let key = (
                attrs.role.as_str(),
                attrs.resource_id.as_deref(),
                attrs.text.as_deref(),
                attrs.description.as_deref(),
            );
            let count = seen.entry(key).or_insert(0);
            let twin = *count;
            *count += 1;
            twin
        })
        .collect()
}

/// Sort elements into reading order: top edge, then left edge, then the
/// original document position. Stable for identical input.
pub fn reading_order(elements: &mut [UIElement]) {
    // sort_by_key is stable, so equal geometry keeps document order
    elements.sort_by_key(|e| (e.attributes.bounds.top, e.attributes.bounds.left));
}
