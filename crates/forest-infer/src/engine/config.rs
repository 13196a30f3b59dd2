//! Engine configuration with builder pattern.
//!
//! # Example
//!
//! ```
//! use forest_infer::engine::EngineConfig;
//! use forest_infer::forest::TreeLayout;
//!
//! // All defaults
//! let config = EngineConfig::builder().build().unwrap();
//!
//! let config = EngineConfig::builder()
//!     .layout(TreeLayout::BreadthFirst)
//!     .force_double_precision(true)
//!     .block_size(128)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.block_size, 128);
//! ```

use std::num::NonZeroUsize;

use bon::Builder;

use crate::forest::TreeLayout;
use crate::inference::DEFAULT_BLOCK_SIZE;
use crate::select::SelectionOptions;

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Block size must be at least 1.
    InvalidBlockSize,
    /// Thread count exceeds what a pool can be built with.
    TooManyThreads(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlockSize => write!(f, "block_size must be at least 1"),
            Self::TooManyThreads(n) => {
                write!(f, "n_threads must be at most {}, got {}", MAX_THREADS, n)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Upper bound on explicitly requested worker threads.
const MAX_THREADS: usize = 4096;

// =============================================================================
// EngineConfig
// =============================================================================

/// Configuration of an [`Engine`](super::Engine).
///
/// Built with [`EngineConfig::builder`]; `build()` validates.
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct EngineConfig {
    /// Node order of stored trees. Default: depth-first.
    #[builder(default)]
    pub layout: TreeLayout,

    /// Store thresholds and leaf values as `f64` even when `f32` suffices.
    #[builder(default)]
    pub force_double_precision: bool,

    /// Rows per inference block. Default: 64.
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Number of threads. `None` uses the global rayon pool.
    pub n_threads: Option<NonZeroUsize>,
}

/// Custom finishing function that validates the config.
impl<S: engine_config_builder::IsComplete> EngineConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `block_size == 0` or `n_threads` is
    /// unreasonably large.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: TreeLayout::default(),
            force_double_precision: false,
            block_size: DEFAULT_BLOCK_SIZE,
            n_threads: None,
        }
    }
}

impl EngineConfig {
    /// Check a configuration assembled without the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize);
        }
        if let Some(n) = self.n_threads {
            if n.get() > MAX_THREADS {
                return Err(ConfigError::TooManyThreads(n.get()));
            }
        }
        Ok(())
    }

    /// Selection overrides derived from this configuration.
    pub fn selection(&self) -> SelectionOptions {
        SelectionOptions {
            force_double_precision: self.force_double_precision,
        }
    }

    /// Thread count in `run_with_threads` semantics (0 = current pool).
    pub(crate) fn thread_count(&self) -> usize {
        self.n_threads.map_or(0, NonZeroUsize::get)
    }
}
