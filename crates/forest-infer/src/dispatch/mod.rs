//! Runtime-to-compile-time dispatch over the catalog.
//!
//! The selector produces a runtime [`CatalogIndex`]; every operation on a
//! forest must run the code monomorphized for the matching
//! [`Specialization`]. [`DISPATCH_TABLE`] holds one row of function pointers
//! per catalog entry, generated from a single list of axis-type tuples, so
//! dispatch is a bounds check plus an indirect call.
//!
//! A [`ForestHandle`] pairs a type-erased [`ForestRepr`] with the index it
//! was constructed for. Handles are only produced by the construct
//! operation, and every operation re-checks both the index and the concrete
//! type before touching the representation.

use std::any::Any;
use std::fmt;

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::catalog::{CatalogEntry, CatalogIndex, ForestSpec, Specialization, CATALOG_SIZE};
use crate::description::ForestDescription;
use crate::error::ForestError;
use crate::forest::{ForestRepr, TreeLayout};
use crate::inference::{predict_into, ForestShape, InferKind, InferOptions};

#[cfg(feature = "gpu")]
use crate::device::{ensure_initialized, DeviceInitError, GpuDevice, GpuRuntime};

// =============================================================================
// Handle
// =============================================================================

/// A constructed forest of some catalog entry.
///
/// The representation is type-erased; [`ForestHandle::index`] names the
/// entry it belongs to.
pub struct ForestHandle {
    index: CatalogIndex,
    shape: ForestShape,
    forest: Box<dyn Any + Send + Sync>,
}

impl ForestHandle {
    fn new<S: ForestSpec>(forest: ForestRepr<S>) -> Self {
        Self {
            index: S::INDEX,
            shape: ForestShape {
                n_features: forest.n_features(),
                n_outputs: forest.n_outputs(),
                n_trees: forest.n_trees(),
                leaf_kind: forest.leaf_kind(),
                postprocessing: forest.postprocessing(),
            },
            forest: Box::new(forest),
        }
    }

    #[inline]
    pub fn index(&self) -> CatalogIndex {
        self.index
    }

    /// Runtime descriptor of the entry this forest was built for.
    #[inline]
    pub fn entry(&self) -> CatalogEntry {
        // Handles are only built from a ForestSpec, whose index is in range.
        self.index.entry().unwrap_or(CatalogEntry::WIDEST)
    }

    #[inline]
    pub fn shape(&self) -> ForestShape {
        self.shape
    }

    /// Number of output columns per row for `kind`.
    #[inline]
    pub fn output_columns(&self, kind: InferKind) -> usize {
        self.shape.output_columns(kind)
    }

    /// The typed representation, if this handle holds specialization `S`.
    pub fn downcast_ref<S: ForestSpec>(&self) -> Option<&ForestRepr<S>> {
        if self.index != S::INDEX {
            return None;
        }
        self.forest.downcast_ref::<ForestRepr<S>>()
    }

    fn typed<S: ForestSpec>(&self) -> Result<&ForestRepr<S>, ForestError> {
        self.downcast_ref::<S>().ok_or_else(|| {
            tracing::error!(
                handle = %self.index,
                expected = %S::INDEX,
                "forest handle does not match dispatch entry"
            );
            invalid_index(self.index)
        })
    }
}

impl fmt::Debug for ForestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForestHandle")
            .field("index", &self.index)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Operation kinds served by the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTag {
    Construct,
    #[cfg(feature = "gpu")]
    InitializeDevice,
    RunInference,
    Destroy,
}

/// An operation together with its arguments.
pub enum Operation<'a> {
    /// Narrow a description into the entry's representation.
    Construct {
        description: &'a ForestDescription,
        layout: TreeLayout,
    },
    /// Configure the entry's kernels on a device.
    #[cfg(feature = "gpu")]
    InitializeDevice {
        runtime: &'a dyn GpuRuntime,
        device: GpuDevice,
    },
    /// Run inference with a forest built for the entry.
    RunInference {
        handle: &'a ForestHandle,
        features: ArrayView2<'a, f64>,
        options: &'a InferOptions,
        output: ArrayViewMut2<'a, f64>,
    },
    /// Release a forest built for the entry.
    Destroy { handle: ForestHandle },
}

impl Operation<'_> {
    pub fn tag(&self) -> OperationTag {
        match self {
            Operation::Construct { .. } => OperationTag::Construct,
            #[cfg(feature = "gpu")]
            Operation::InitializeDevice { .. } => OperationTag::InitializeDevice,
            Operation::RunInference { .. } => OperationTag::RunInference,
            Operation::Destroy { .. } => OperationTag::Destroy,
        }
    }
}

/// Result of a dispatched operation.
#[derive(Debug)]
pub enum Outcome {
    Constructed(ForestHandle),
    #[cfg(feature = "gpu")]
    DeviceReady,
    Inferred,
    Destroyed,
}

// =============================================================================
// Table
// =============================================================================

type ConstructFn = fn(&ForestDescription, TreeLayout) -> Result<ForestHandle, ForestError>;
#[cfg(feature = "gpu")]
type InitializeDeviceFn = fn(&dyn GpuRuntime, GpuDevice) -> Result<(), DeviceInitError>;
type RunInferenceFn = fn(
    &ForestHandle,
    ArrayView2<'_, f64>,
    &InferOptions,
    ArrayViewMut2<'_, f64>,
) -> Result<(), ForestError>;
type DestroyFn = fn(ForestHandle) -> Result<(), ForestError>;

/// One row of the dispatch table: every operation monomorphized for one
/// catalog entry.
#[derive(Clone, Copy)]
pub struct DispatchEntry {
    pub entry: CatalogEntry,
    construct: ConstructFn,
    #[cfg(feature = "gpu")]
    initialize_device: InitializeDeviceFn,
    run_inference: RunInferenceFn,
    destroy: DestroyFn,
}

impl DispatchEntry {
    /// Row for specialization `S`.
    pub const fn of<S: ForestSpec>() -> Self {
        Self {
            entry: S::ENTRY,
            construct: construct_impl::<S>,
            #[cfg(feature = "gpu")]
            initialize_device: ensure_initialized::<S>,
            run_inference: run_inference_impl::<S>,
            destroy: destroy_impl::<S>,
        }
    }
}

impl fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

fn construct_impl<S: ForestSpec>(
    description: &ForestDescription,
    layout: TreeLayout,
) -> Result<ForestHandle, ForestError> {
    ForestRepr::<S>::from_description(description, layout).map(ForestHandle::new)
}

fn run_inference_impl<S: ForestSpec>(
    handle: &ForestHandle,
    features: ArrayView2<'_, f64>,
    options: &InferOptions,
    output: ArrayViewMut2<'_, f64>,
) -> Result<(), ForestError> {
    predict_into(handle.typed::<S>()?, features, options, output)
}

fn destroy_impl<S: ForestSpec>(handle: ForestHandle) -> Result<(), ForestError> {
    let index = handle.index;
    match handle.forest.downcast::<ForestRepr<S>>() {
        Ok(forest) if index == S::INDEX => {
            tracing::debug!(%index, n_nodes = forest.n_nodes(), "destroying forest");
            Ok(())
        }
        _ => {
            tracing::error!(
                handle = %index,
                expected = %S::INDEX,
                "destroying forest of unexpected type"
            );
            Err(invalid_index(index))
        }
    }
}

/// Build the dispatch table from the list of catalog axis types.
///
/// The array length pins the list to exactly [`CATALOG_SIZE`] rows; the
/// assertion below pins row `i` to catalog entry `i`.
macro_rules! dispatch_table {
    ($(($t:ty, $i:ty, $m:ty, $o:ty)),+ $(,)?) => {
        const TABLE: [DispatchEntry; CATALOG_SIZE] = [
            $(DispatchEntry::of::<Specialization<$t, $i, $m, $o>>()),+
        ];
    };
}

dispatch_table![
    (f32, u16, u16, u16),
    (f32, u16, u16, u32),
    (f32, u16, u32, u16),
    (f32, u16, u32, u32),
    (f32, u32, u16, u16),
    (f32, u32, u16, u32),
    (f32, u32, u32, u16),
    (f32, u32, u32, u32),
    (f64, u16, u16, u16),
    (f64, u16, u16, u32),
    (f64, u16, u32, u16),
    (f64, u16, u32, u32),
    (f64, u32, u16, u16),
    (f64, u32, u16, u32),
    (f64, u32, u32, u16),
    (f64, u32, u32, u32),
];

const _: () = {
    let mut i = 0;
    while i < CATALOG_SIZE {
        assert!(TABLE[i].entry.index().get() == i, "dispatch table out of catalog order");
        i += 1;
    }
};

/// One row per catalog entry, in catalog order.
pub static DISPATCH_TABLE: [DispatchEntry; CATALOG_SIZE] = TABLE;

// =============================================================================
// Entry points
// =============================================================================

fn invalid_index(index: CatalogIndex) -> ForestError {
    ForestError::InvalidCatalogIndex {
        index: index.get(),
        size: CATALOG_SIZE,
    }
}

/// Bounds-checked table lookup.
#[inline]
pub fn lookup(index: CatalogIndex) -> Result<&'static DispatchEntry, ForestError> {
    DISPATCH_TABLE.get(index.get()).ok_or_else(|| {
        tracing::error!(%index, size = CATALOG_SIZE, "catalog index out of range");
        invalid_index(index)
    })
}

fn check_handle(index: CatalogIndex, handle: &ForestHandle) -> Result<(), ForestError> {
    if handle.index == index {
        Ok(())
    } else {
        tracing::error!(%index, handle = %handle.index, "forest handle built for another entry");
        Err(invalid_index(index))
    }
}

/// Run `op` with the code specialized for catalog entry `index`.
pub fn invoke(index: CatalogIndex, op: Operation<'_>) -> Result<Outcome, ForestError> {
    let row = lookup(index)?;
    tracing::debug!(%index, op = ?op.tag(), "dispatch");

    match op {
        Operation::Construct {
            description,
            layout,
        } => (row.construct)(description, layout).map(Outcome::Constructed),
        #[cfg(feature = "gpu")]
        Operation::InitializeDevice { runtime, device } => {
            (row.initialize_device)(runtime, device)?;
            Ok(Outcome::DeviceReady)
        }
        Operation::RunInference {
            handle,
            features,
            options,
            output,
        } => {
            check_handle(index, handle)?;
            (row.run_inference)(handle, features, options, output)?;
            Ok(Outcome::Inferred)
        }
        Operation::Destroy { handle } => {
            check_handle(index, &handle)?;
            (row.destroy)(handle)?;
            Ok(Outcome::Destroyed)
        }
    }
}

/// Construct a forest of catalog entry `index`.
pub fn construct(
    index: CatalogIndex,
    description: &ForestDescription,
    layout: TreeLayout,
) -> Result<ForestHandle, ForestError> {
    (lookup(index)?.construct)(description, layout)
}

/// Run inference with `handle`, dispatching on its own catalog entry.
pub fn run_inference(
    handle: &ForestHandle,
    features: ArrayView2<'_, f64>,
    options: &InferOptions,
    output: ArrayViewMut2<'_, f64>,
) -> Result<(), ForestError> {
    (lookup(handle.index)?.run_inference)(handle, features, options, output)
}

/// Release `handle`.
pub fn destroy(handle: ForestHandle) -> Result<(), ForestError> {
    (lookup(handle.index)?.destroy)(handle)
}

/// Configure the kernels of catalog entry `index` on `device`.
#[cfg(feature = "gpu")]
pub fn initialize_device(
    index: CatalogIndex,
    runtime: &dyn GpuRuntime,
    device: GpuDevice,
) -> Result<(), ForestError> {
    (lookup(index)?.initialize_device)(runtime, device).map_err(ForestError::from)
}
