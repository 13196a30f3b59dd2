//! Catalog entry selection from forest statistics.
//!
//! Each axis is resolved independently to its narrowest sufficient width:
//!
//! - threshold: `f64` if double precision is requested or some value
//!   overflows `f32` or falls below its normal range
//! - node index: every node position, plus the reserved sentinel, fits
//! - metadata: every feature index and class id fits the payload bits
//! - offset: the largest parent-to-child distance inside a tree fits
//!
//! Because the catalog is the full product of the axis choices, the result is
//! the unique entry that is narrowest on every axis. Resolution order
//! (threshold, node index, metadata, offset) matches catalog numbering.

use serde::{Deserialize, Serialize};

use crate::catalog::{
    index_capacity, Axis, CatalogEntry, CatalogIndex, NarrowWidth, WideWidth, Width,
};
use crate::description::ForestStats;
use crate::error::ForestError;
use crate::forest::payload_capacity;

/// Caller overrides applied on top of [`ForestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOptions {
    /// Keep thresholds and leaf values at `f64` regardless of magnitude.
    pub force_double_precision: bool,
}

/// Select the catalog entry for a forest.
pub fn select(stats: &ForestStats) -> Result<CatalogIndex, ForestError> {
    select_with(stats, &SelectionOptions::default())
}

/// Select the catalog entry for a forest, honoring `options`.
pub fn select_with(
    stats: &ForestStats,
    options: &SelectionOptions,
) -> Result<CatalogIndex, ForestError> {
    let double_precision = options.force_double_precision
        || stats.double_precision
        || !stats.fits_single_precision();

    let wide_index = resolve(
        Axis::NodeIndex,
        stats.node_count,
        index_capacity::<NarrowWidth>(),
        index_capacity::<WideWidth>(),
    )?;

    let wide_metadata = resolve(
        Axis::Metadata,
        stats.feature_count.max(stats.class_count) as u64,
        payload_capacity::<NarrowWidth>(),
        payload_capacity::<WideWidth>(),
    )?;

    let wide_offset = resolve(
        Axis::Offset,
        stats.max_intra_tree_offset(),
        NarrowWidth::MAX_VALUE,
        WideWidth::MAX_VALUE,
    )?;

    let entry = CatalogEntry {
        double_precision,
        wide_index,
        wide_metadata,
        wide_offset,
    };
    let index = entry.index();

    tracing::debug!(
        %index,
        %entry,
        node_count = stats.node_count,
        max_depth = stats.max_depth,
        feature_count = stats.feature_count,
        class_count = stats.class_count,
        "selected catalog entry"
    );

    Ok(index)
}

/// `Ok(false)` for narrow, `Ok(true)` for wide.
fn resolve(axis: Axis, required: u64, narrow: u64, wide: u64) -> Result<bool, ForestError> {
    if required <= narrow {
        Ok(false)
    } else if required <= wide {
        Ok(true)
    } else {
        Err(ForestError::UnsupportedModelShape {
            axis,
            required,
            capacity: wide,
        })
    }
}
