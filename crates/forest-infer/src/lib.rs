//! forest-infer: tree-ensemble inference over width-specialized forests.
//!
//! A parsed forest is handed over as a [`ForestDescription`]. The engine
//! derives [`ForestStats`] from it, picks the narrowest of 16 storage
//! specializations that can hold it losslessly, and builds a typed
//! representation that inference is monomorphized over.
//!
//! # Key Types
//!
//! - [`Engine`] / [`EngineConfig`] - Load, predict and unload forests
//! - [`ForestDescription`] - Representation-agnostic input format
//! - [`CatalogIndex`] / [`CatalogEntry`] - Storage specializations
//! - [`ForestRepr`] - Typed structure-of-arrays representation
//!
//! # Layers
//!
//! - [`catalog`]: the closed set of axis-width combinations
//! - [`select`]: statistics to catalog index
//! - [`forest`]: typed representations and tree layouts
//! - [`inference`]: block-based batch prediction
//! - [`dispatch`]: runtime index to monomorphized code
//! - [`device`]: device identities and one-time device initialization
//!
//! # Features
//!
//! - `gpu`: accelerator device types and kernel configuration.

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod catalog;
pub mod description;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod forest;
pub mod inference;
pub mod select;
pub mod testing;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Engine and configuration (most users want these)
pub use engine::{ConfigError, Engine, EngineConfig, LoadedForest};

// Input format
pub use description::{
    Aggregation, ForestDescription, ForestStats, LeafOutput, Postprocessing, TreeBuilder,
    TreeDescription,
};

// Catalog and selection
pub use catalog::{CatalogEntry, CatalogIndex, ForestSpec, Specialization};
pub use select::{select, select_with, SelectionOptions};

// Representations and inference
pub use forest::{ForestRepr, TreeLayout};
pub use inference::{InferKind, InferOptions};

// Errors
pub use error::ForestError;

// Shared utilities
pub use utils::{run_with_threads, Parallelism};
