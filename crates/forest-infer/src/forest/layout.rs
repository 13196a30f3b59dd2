//! Node ordering within a stored tree.

use serde::{Deserialize, Serialize};

use crate::description::{NodeDescription, TreeDescription};

/// Order in which the nodes of each tree are laid out in storage.
///
/// Every split node stores a single child offset; where its children live
/// relative to its own position depends on the layout:
///
/// | Layout         | left child        | right child           |
/// |----------------|-------------------|-----------------------|
/// | `DepthFirst`   | `pos + 1`         | `pos + offset`        |
/// | `BreadthFirst` | `pos + offset`    | `pos + offset + 1`    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum TreeLayout {
    /// Preorder, left subtree first.
    #[default]
    DepthFirst,
    /// Level order, siblings adjacent.
    BreadthFirst,
}

impl TreeLayout {
    /// Storage position of the child taken from the split at `pos`.
    #[inline(always)]
    pub fn child(self, pos: usize, offset: usize, go_left: bool) -> usize {
        match self {
            TreeLayout::DepthFirst => {
                if go_left {
                    pos + 1
                } else {
                    pos + offset
                }
            }
            TreeLayout::BreadthFirst => pos + offset + usize::from(!go_left),
        }
    }

    /// Offset stored for a split at `pos` whose children sit at `left` and
    /// `right`.
    #[inline]
    pub(crate) fn offset(self, pos: usize, left: usize, right: usize) -> usize {
        match self {
            TreeLayout::DepthFirst => {
                debug_assert_eq!(left, pos + 1);
                right - pos
            }
            TreeLayout::BreadthFirst => {
                debug_assert_eq!(right, left + 1);
                left - pos
            }
        }
    }
}

/// Mapping between description node ids and storage positions of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOrder {
    /// Description node id stored at each position.
    pub order: Vec<u32>,
    /// Storage position of each description node id.
    pub position: Vec<u32>,
}

/// Compute the storage order of a validated tree.
pub fn storage_order(tree: &TreeDescription, layout: TreeLayout) -> TreeOrder {
    let n_nodes = tree.n_nodes();
    let mut order = Vec::with_capacity(n_nodes);

    match layout {
        TreeLayout::DepthFirst => {
            let mut stack = vec![0u32];
            while let Some(node) = stack.pop() {
                order.push(node);
                if let NodeDescription::Split { left, right, .. } = &tree.nodes[node as usize] {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
        TreeLayout::BreadthFirst => {
            let mut head = 0;
            if n_nodes > 0 {
                order.push(0u32);
            }
            while head < order.len() {
                let node = order[head];
                head += 1;
                if let NodeDescription::Split { left, right, .. } = &tree.nodes[node as usize] {
                    order.push(*left);
                    order.push(*right);
                }
            }
        }
    }

    let mut position = vec![0u32; n_nodes];
    for (pos, &node) in order.iter().enumerate() {
        position[node as usize] = pos as u32;
    }
    TreeOrder { order, position }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{LeafOutput, TreeBuilder};

    /// ```text
    ///        0
    ///      /   \
    ///     1     2
    ///    / \   / \
    ///   3   4 5   6
    /// ```
    fn complete_depth2() -> TreeDescription {
        let mut builder = TreeBuilder::with_capacity(7);
        builder.init_root_with_n_nodes(7);
        builder.set_numeric_split(0, 0, 0.0, true, 1, 2);
        builder.set_numeric_split(1, 0, -1.0, true, 3, 4);
        builder.set_numeric_split(2, 0, 1.0, true, 5, 6);
        for leaf in 3..7 {
            builder.make_leaf(leaf, LeafOutput::Scalar(leaf as f64));
        }
        builder.freeze()
    }

    #[test]
    fn depth_first_is_preorder() {
        let order = storage_order(&complete_depth2(), TreeLayout::DepthFirst);
        assert_eq!(order.order, vec![0, 1, 3, 4, 2, 5, 6]);
        assert_eq!(order.position, vec![0, 1, 4, 2, 3, 5, 6]);
    }

    #[test]
    fn breadth_first_is_level_order() {
        let order = storage_order(&complete_depth2(), TreeLayout::BreadthFirst);
        assert_eq!(order.order, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(order.position, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn child_positions_follow_offsets() {
        // depth-first: root at 0, left at 1, right at 4
        let offset = TreeLayout::DepthFirst.offset(0, 1, 4);
        assert_eq!(offset, 4);
        assert_eq!(TreeLayout::DepthFirst.child(0, offset, true), 1);
        assert_eq!(TreeLayout::DepthFirst.child(0, offset, false), 4);

        // breadth-first: node 2 has children at 5 and 6
        let offset = TreeLayout::BreadthFirst.offset(2, 5, 6);
        assert_eq!(offset, 3);
        assert_eq!(TreeLayout::BreadthFirst.child(2, offset, true), 5);
        assert_eq!(TreeLayout::BreadthFirst.child(2, offset, false), 6);
    }
}
