//! Typed forest representations.
//!
//! [`ForestRepr`] stores a forest with the axis types of one catalog entry.
//! Nodes are packed per tree in the order given by a [`TreeLayout`], with
//! flags and split features folded into a [`NodeMetadata`] word.

pub mod categories;
mod layout;
mod metadata;
mod repr;

pub use categories::CategoriesStorage;
pub use layout::{storage_order, TreeLayout, TreeOrder};
pub use metadata::{payload_capacity, NodeFlags, NodeMetadata, FLAG_BITS};
pub use repr::{ForestRepr, NodeView};
