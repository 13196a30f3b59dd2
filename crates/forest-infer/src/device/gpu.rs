//! Accelerator kernel configuration.
//!
//! Before a forest representation runs on a GPU, every inference kernel
//! instantiated for its catalog entry must be configured on that device:
//! its cache carveout and the dynamic shared memory it may request. This
//! happens once per (catalog entry, device) for the lifetime of the process,
//! tracked by a global [`InitRegistry`].

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::{DeviceInitError, GpuDevice, InitRegistry};
use crate::catalog::{CatalogIndex, ForestSpec};
use crate::inference::InferKind;

/// Node footprint at or below which kernels prefer shared memory over L1.
const SHARED_PREFERENCE_NODE_BYTES: usize = 12;

/// Accelerator runtime used to configure kernels.
///
/// Implemented by the embedding application on top of its driver bindings.
pub trait GpuRuntime: Send + Sync {
    /// Largest opt-in shared memory a block may use on `device`, in bytes.
    fn max_shared_memory_per_block(&self, device: GpuDevice) -> Result<usize, DeviceInitError>;

    /// Apply `config` to the kernel it names on `device`.
    fn configure_kernel(
        &self,
        device: GpuDevice,
        config: &KernelConfig,
    ) -> Result<(), DeviceInitError>;
}

/// Preferred split between L1 cache and shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachePreference {
    PreferShared,
    Equal,
}

/// Launch configuration of one inference kernel for one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub kernel: InferKind,
    pub catalog_index: CatalogIndex,
    /// Bytes of per-node storage for the entry.
    pub node_bytes: usize,
    pub cache_preference: CachePreference,
    /// Dynamic shared memory the kernel is allowed to request.
    pub max_dynamic_shared_memory: usize,
}

impl KernelConfig {
    /// Configuration of `kernel` for specialization `S`.
    pub fn for_spec<S: ForestSpec>(kernel: InferKind, max_shared_memory: usize) -> Self {
        let node_bytes = S::ENTRY.node_bytes();
        let cache_preference = if node_bytes <= SHARED_PREFERENCE_NODE_BYTES {
            CachePreference::PreferShared
        } else {
            CachePreference::Equal
        };
        Self {
            kernel,
            catalog_index: S::INDEX,
            node_bytes,
            cache_preference,
            max_dynamic_shared_memory: max_shared_memory,
        }
    }
}

static REGISTRY: LazyLock<InitRegistry<(CatalogIndex, GpuDevice), DeviceInitError>> =
    LazyLock::new(InitRegistry::new);

/// Make sure the kernels of specialization `S` are configured on `device`.
///
/// The first caller for a (catalog entry, device) pair runs the
/// configuration; concurrent callers wait and share its outcome. A failure
/// is returned to everyone waiting on that attempt and the next caller
/// retries.
///
/// Only GPU devices can be initialized:
///
/// ```compile_fail
/// use forest_infer::catalog::NarrowestSpec;
/// use forest_infer::device::{ensure_initialized, CpuDevice, GpuRuntime};
///
/// fn init(runtime: &dyn GpuRuntime) {
///     let _ = ensure_initialized::<NarrowestSpec>(runtime, CpuDevice::new(0));
/// }
/// ```
pub fn ensure_initialized<S: ForestSpec>(
    runtime: &dyn GpuRuntime,
    device: GpuDevice,
) -> Result<(), DeviceInitError> {
    let key = (S::INDEX, device);
    if REGISTRY.is_initialized(&key) {
        tracing::debug!(index = %S::INDEX, %device, "device already initialized");
        return Ok(());
    }
    REGISTRY.ensure(&key, || configure::<S>(runtime, device))
}

/// Whether catalog entry `index` has been initialized on `device`.
pub fn is_initialized(index: CatalogIndex, device: GpuDevice) -> bool {
    REGISTRY.is_initialized(&(index, device))
}

fn configure<S: ForestSpec>(
    runtime: &dyn GpuRuntime,
    device: GpuDevice,
) -> Result<(), DeviceInitError> {
    tracing::info!(index = %S::INDEX, entry = %S::ENTRY, %device, "configuring device");

    let max_shared_memory = runtime.max_shared_memory_per_block(device).inspect_err(|err| {
        tracing::error!(%device, %err, "failed to query shared memory limit");
    })?;

    for kernel in InferKind::ALL {
        let config = KernelConfig::for_spec::<S>(kernel, max_shared_memory);
        runtime.configure_kernel(device, &config).inspect_err(|err| {
            tracing::error!(
                index = %S::INDEX,
                %device,
                kernel = kernel.name(),
                %err,
                "kernel configuration failed"
            );
        })?;
    }

    tracing::info!(
        index = %S::INDEX,
        %device,
        max_shared_memory,
        "device ready"
    );
    Ok(())
}
