//! Error types shared across the crate.

use std::fmt;

use crate::catalog::Axis;
use crate::description::DescriptionError;
use crate::device::DeviceInitError;
use crate::engine::ConfigError;

/// Node field that failed to narrow into the selected storage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Threshold,
    LeafValue,
    FeatureIndex,
    ClassId,
    ChildOffset,
    NodePosition,
    LeafVectorRow,
    CategorySegment,
}

impl fmt::Display for NodeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeField::Threshold => "threshold",
            NodeField::LeafValue => "leaf value",
            NodeField::FeatureIndex => "feature index",
            NodeField::ClassId => "class id",
            NodeField::ChildOffset => "child offset",
            NodeField::NodePosition => "node position",
            NodeField::LeafVectorRow => "leaf vector row",
            NodeField::CategorySegment => "category segment",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by selection, construction, dispatch and inference.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// No catalog entry is wide enough for the forest.
    #[error("unsupported model shape: {axis} must hold {required}, widest entry holds {capacity}")]
    UnsupportedModelShape { axis: Axis, required: u64, capacity: u64 },

    /// A catalog index outside the catalog, or one that does not match the
    /// representation it is paired with.
    #[error("invalid catalog index {index} (catalog has {size} entries)")]
    InvalidCatalogIndex { index: usize, size: usize },

    #[error(transparent)]
    DeviceInit(#[from] DeviceInitError),

    /// A value did not fit the storage types of the selected entry.
    #[error("tree {tree}, node {node}: {field} {value} does not fit {target}")]
    ConstructionOverflow {
        tree: usize,
        node: usize,
        field: NodeField,
        value: f64,
        target: &'static str,
    },

    #[error("invalid forest description: {0}")]
    InvalidDescription(#[from] DescriptionError),

    /// Input or output buffers do not match the forest.
    #[error("{what} mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
