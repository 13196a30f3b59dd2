//! Root-to-leaf traversal of a stored tree.

use ndarray::ArrayView1;

use crate::catalog::{ForestSpec, Precision, Width};
use crate::forest::ForestRepr;

/// Walk `tree` for one row and return the storage position of the reached
/// leaf.
///
/// `row` is the feature row narrowed to the threshold type and `raw` the same
/// row as given. Numeric splits compare the narrowed value; categorical
/// splits read the raw value so category ids never round.
///
/// - numeric splits go left when `value < threshold`
/// - categorical splits go right when the value's category is in the set
/// - missing values (NaN, or features past the end of `row`) follow the
///   node's default direction
#[inline]
pub fn traverse_tree<S: ForestSpec>(
    forest: &ForestRepr<S>,
    tree: usize,
    row: &[S::Threshold],
    raw: ArrayView1<'_, f64>,
) -> usize {
    let values = forest.values();
    let metadata = forest.metadata();
    let offsets = forest.offsets();
    let layout = forest.layout();

    let root = forest.tree_root(tree);
    let mut pos = root;

    loop {
        let meta = metadata[pos];
        if meta.is_leaf() {
            return pos;
        }

        let feat_idx = meta.payload() as usize;
        let fvalue = row.get(feat_idx).copied().unwrap_or(S::Threshold::NAN);

        let go_left = if fvalue.is_nan() {
            meta.default_left()
        } else if meta.is_categorical() {
            let segment = forest.refs()[pos].to_usize();
            !forest.categories().value_goes_right(segment, raw[feat_idx])
        } else {
            fvalue < values[pos]
        };

        pos = root + layout.child(pos - root, offsets[pos].to_usize(), go_left);
    }
}
