//! Batch inference over typed forest representations.
//!
//! Rows are processed in blocks (default 64). Each block's features are
//! converted once to the representation's threshold type, then every tree is
//! traversed for every row of the block. Blocks run on the rayon pool when
//! [`Parallelism::Parallel`] is requested.
//!
//! # Output shapes
//!
//! Outputs are row-major `[n_rows, n_columns]`:
//!
//! | [`InferKind`] | columns                                              |
//! |---------------|------------------------------------------------------|
//! | `Default`     | `n_outputs` (1 with [`Postprocessing::MaxIndex`])     |
//! | `PerTree`     | `n_trees` (`n_trees * n_outputs` for vector leaves)   |
//! | `LeafId`      | `n_trees`                                            |

mod output;
mod predictor;
mod traversal;

use serde::{Deserialize, Serialize};

use crate::description::{LeafKind, Postprocessing};
use crate::utils::Parallelism;

pub use output::apply_postprocessing;
pub use predictor::predict_into;
pub use traversal::traverse_tree;

/// Default block size for batch processing.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// What inference writes for each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InferKind {
    /// Aggregated, postprocessed forest output.
    #[default]
    Default,
    /// Raw leaf output of every tree.
    PerTree,
    /// Position of the reached leaf within each tree's storage.
    LeafId,
}

impl InferKind {
    pub const ALL: [InferKind; 3] = [InferKind::Default, InferKind::PerTree, InferKind::LeafId];

    /// Short kernel-style name.
    pub fn name(self) -> &'static str {
        match self {
            InferKind::Default => "infer",
            InferKind::PerTree => "infer_per_tree",
            InferKind::LeafId => "infer_leaf_id",
        }
    }
}

/// Per-call inference options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferOptions {
    pub kind: InferKind,
    pub parallelism: Parallelism,
    /// Rows per block. Zero is treated as one.
    pub block_size: usize,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            kind: InferKind::Default,
            parallelism: Parallelism::Sequential,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl InferOptions {
    pub fn with_kind(mut self, kind: InferKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

/// Shape information needed to size inference outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestShape {
    pub n_features: u32,
    pub n_outputs: u32,
    pub n_trees: usize,
    pub leaf_kind: LeafKind,
    pub postprocessing: Postprocessing,
}

impl ForestShape {
    /// Number of output columns written per row for `kind`.
    pub fn output_columns(&self, kind: InferKind) -> usize {
        match kind {
            InferKind::Default if self.postprocessing == Postprocessing::MaxIndex => 1,
            InferKind::Default => self.n_outputs as usize,
            InferKind::PerTree if self.leaf_kind == LeafKind::Vector => {
                self.n_trees * self.n_outputs as usize
            }
            InferKind::PerTree | InferKind::LeafId => self.n_trees,
        }
    }
}
