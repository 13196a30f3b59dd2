//! Forest lifecycle: load, predict, unload.
//!
//! [`Engine::load`] validates a description, derives its [`ForestStats`],
//! selects the narrowest catalog entry and constructs the representation
//! through the dispatch table. Prediction and unloading dispatch on the
//! loaded forest's own catalog index.
//!
//! # Example
//!
//! ```
//! use forest_infer::description::{ForestDescription, LeafOutput, TreeBuilder};
//! use forest_infer::engine::{Engine, EngineConfig};
//! use forest_infer::inference::InferKind;
//! use ndarray::array;
//!
//! let mut builder = TreeBuilder::with_capacity(3);
//! builder.init_root_with_n_nodes(3);
//! builder.set_numeric_split(0, 0, 0.5, true, 1, 2);
//! builder.make_leaf(1, LeafOutput::Scalar(-1.0));
//! builder.make_leaf(2, LeafOutput::Scalar(1.0));
//!
//! let mut forest = ForestDescription::new(1, 1);
//! forest.push_tree(builder.freeze(), 0);
//!
//! let engine = Engine::new(EngineConfig::builder().build().unwrap());
//! let loaded = engine.load(&forest).unwrap();
//! assert_eq!(loaded.index().get(), 0);
//!
//! let features = array![[0.0], [1.0]];
//! let predictions = engine.predict(&loaded, features.view(), InferKind::Default).unwrap();
//! assert_eq!(predictions.column(0).to_vec(), vec![-1.0, 1.0]);
//! engine.unload(loaded).unwrap();
//! ```

mod config;

#[cfg(feature = "gpu")]
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, ArrayViewMut2};

pub use config::{ConfigError, EngineConfig};

use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::description::{ForestDescription, ForestStats};
use crate::dispatch::{self, ForestHandle};
use crate::error::ForestError;
use crate::inference::{ForestShape, InferKind, InferOptions};
use crate::select::select_with;
use crate::utils::run_with_threads;

#[cfg(feature = "gpu")]
use crate::device::{DeviceInitError, GpuDevice, GpuRuntime};

/// A forest loaded into its selected representation.
#[derive(Debug)]
pub struct LoadedForest {
    handle: ForestHandle,
    stats: ForestStats,
}

impl LoadedForest {
    #[inline]
    pub fn index(&self) -> CatalogIndex {
        self.handle.index()
    }

    #[inline]
    pub fn entry(&self) -> CatalogEntry {
        self.handle.entry()
    }

    #[inline]
    pub fn stats(&self) -> &ForestStats {
        &self.stats
    }

    #[inline]
    pub fn shape(&self) -> ForestShape {
        self.handle.shape()
    }

    #[inline]
    pub fn handle(&self) -> &ForestHandle {
        &self.handle
    }

    /// Number of output columns per row for `kind`.
    #[inline]
    pub fn output_columns(&self, kind: InferKind) -> usize {
        self.handle.output_columns(kind)
    }
}

/// Loads forests and runs inference on them.
pub struct Engine {
    config: EngineConfig,
    #[cfg(feature = "gpu")]
    gpu_runtime: Option<Arc<dyn GpuRuntime>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "gpu")]
            gpu_runtime: None,
        }
    }

    /// Attach the accelerator runtime used by [`Engine::prepare_device`].
    #[cfg(feature = "gpu")]
    pub fn with_gpu_runtime(mut self, runtime: Arc<dyn GpuRuntime>) -> Self {
        self.gpu_runtime = Some(runtime);
        self
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate, select and construct.
    pub fn load(&self, description: &ForestDescription) -> Result<LoadedForest, ForestError> {
        self.config.validate()?;
        description.validate()?;
        let stats = ForestStats::from_description(description);
        let index = select_with(&stats, &self.config.selection())?;

        let handle = dispatch::construct(index, description, self.config.layout)?;
        tracing::info!(
            %index,
            entry = %handle.entry(),
            n_trees = description.n_trees(),
            node_count = stats.node_count,
            layout = ?self.config.layout,
            "loaded forest"
        );
        Ok(LoadedForest { handle, stats })
    }

    /// Release a loaded forest.
    pub fn unload(&self, forest: LoadedForest) -> Result<(), ForestError> {
        dispatch::destroy(forest.handle)
    }

    /// Predict into a newly allocated `[n_rows, n_columns]` array.
    pub fn predict(
        &self,
        forest: &LoadedForest,
        features: ArrayView2<'_, f64>,
        kind: InferKind,
    ) -> Result<Array2<f64>, ForestError> {
        let mut output = Array2::zeros((features.nrows(), forest.output_columns(kind)));
        self.predict_into(forest, features, kind, output.view_mut())?;
        Ok(output)
    }

    /// Predict into a caller-provided buffer.
    pub fn predict_into(
        &self,
        forest: &LoadedForest,
        features: ArrayView2<'_, f64>,
        kind: InferKind,
        output: ArrayViewMut2<'_, f64>,
    ) -> Result<(), ForestError> {
        let block_size = self.config.block_size;
        run_with_threads(self.config.thread_count(), |parallelism| {
            let options = InferOptions {
                kind,
                parallelism,
                block_size,
            };
            dispatch::run_inference(&forest.handle, features, &options, output)
        })
    }

    /// Configure `device` for the catalog entry of `forest`.
    #[cfg(feature = "gpu")]
    pub fn prepare_device(
        &self,
        forest: &LoadedForest,
        device: GpuDevice,
    ) -> Result<(), ForestError> {
        let Some(runtime) = &self.gpu_runtime else {
            return Err(DeviceInitError::Unavailable {
                device: device.to_string(),
                reason: "no accelerator runtime attached".to_string(),
            }
            .into());
        };
        dispatch::initialize_device(forest.index(), runtime.as_ref(), device)
    }
}
