//! Device identities and per-device initialization.
//!
//! Devices are identified by a [`DeviceId`] tagged with a [`DeviceType`]
//! marker. CPU devices need no setup. GPU devices, available with the `gpu`
//! feature, must have every kernel of a forest representation configured
//! once per (catalog entry, device) before use; see [`ensure_initialized`].
//!
//! Because [`ensure_initialized`] only accepts [`GpuDevice`], asking to
//! initialize a CPU device is a compile error rather than a runtime branch.

#[cfg(feature = "gpu")]
mod gpu;
mod registry;

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

#[cfg(feature = "gpu")]
pub use gpu::{
    ensure_initialized, is_initialized, CachePreference, GpuRuntime, KernelConfig,
};
pub use registry::InitRegistry;

use crate::catalog::CatalogIndex;

// =============================================================================
// Device types
// =============================================================================

mod sealed {
    pub trait Sealed {}
}

/// Compile-time device kind.
pub trait DeviceType:
    sealed::Sealed + Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
    const NAME: &'static str;

    /// Whether forests of catalog entry `index` can run on device `ordinal`
    /// without further setup.
    fn is_ready(index: CatalogIndex, ordinal: u32) -> bool;
}

/// Host CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cpu;

impl sealed::Sealed for Cpu {}

impl DeviceType for Cpu {
    const NAME: &'static str = "cpu";

    #[inline]
    fn is_ready(_index: CatalogIndex, _ordinal: u32) -> bool {
        true
    }
}

/// Accelerator device.
#[cfg(feature = "gpu")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gpu;

#[cfg(feature = "gpu")]
impl sealed::Sealed for Gpu {}

#[cfg(feature = "gpu")]
impl DeviceType for Gpu {
    const NAME: &'static str = "gpu";

    fn is_ready(index: CatalogIndex, ordinal: u32) -> bool {
        gpu::is_initialized(index, DeviceId::new(ordinal))
    }
}

/// A device of kind `D`, identified by its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId<D: DeviceType> {
    ordinal: u32,
    _kind: PhantomData<D>,
}

impl<D: DeviceType> DeviceId<D> {
    #[inline]
    pub const fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub const fn ordinal(self) -> u32 {
        self.ordinal
    }

    /// Whether forests of catalog entry `index` are ready to run here.
    pub fn is_ready(self, index: CatalogIndex) -> bool {
        D::is_ready(index, self.ordinal)
    }
}

impl<D: DeviceType> fmt::Display for DeviceId<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", D::NAME, self.ordinal)
    }
}

pub type CpuDevice = DeviceId<Cpu>;

#[cfg(feature = "gpu")]
pub type GpuDevice = DeviceId<Gpu>;

// =============================================================================
// Errors
// =============================================================================

/// Device initialization failures.
///
/// Cloneable so that every caller waiting on a shared initialization attempt
/// receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceInitError {
    #[error("device {device} unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("failed to configure {kernel} on {device}: {reason}")]
    ConfigurationFailed {
        device: String,
        kernel: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_ready() {
        let device = CpuDevice::new(3);
        assert_eq!(device.ordinal(), 3);
        assert_eq!(device.to_string(), "cpu:3");
        assert!(device.is_ready(CatalogIndex::from_raw(0)));
    }

    #[test]
    fn errors_name_the_device() {
        let err = DeviceInitError::ConfigurationFailed {
            device: "gpu:1".into(),
            kernel: "infer_leaf_id".into(),
            reason: "out of resources".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to configure infer_leaf_id on gpu:1: out of resources"
        );
    }
}
