//! Closed catalog of forest storage specializations.
//!
//! A catalog entry fixes one storage type per axis:
//!
//! | Axis       | Narrow | Wide  | Holds                                        |
//! |------------|--------|-------|----------------------------------------------|
//! | threshold  | `f32`  | `f64` | split thresholds, leaf values                |
//! | node index | `u16`  | `u32` | node positions, vector-leaf rows, categories |
//! | metadata   | `u16`  | `u32` | flag bits plus feature index or class id     |
//! | offset     | `u16`  | `u32` | distance from a node to its distant child    |
//!
//! The catalog is the full Cartesian product (16 entries). Entries are
//! numbered with the threshold axis as the most significant bit and the
//! offset axis as the least significant bit, so index 0 is the narrowest
//! entry and index 15 the widest.
//!
//! At the type level an entry is a [`Specialization`]; [`ForestSpec`]
//! exposes its axis types and its [`CatalogIndex`]. At runtime an entry is
//! a plain [`CatalogEntry`] descriptor.

mod axes;

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

pub use axes::{
    index_capacity, index_sentinel, narrow_index, NarrowWidth, Precision, WideWidth, Width,
};

/// Number of entries in the catalog.
pub const CATALOG_SIZE: usize = 16;

// =============================================================================
// Axis
// =============================================================================

/// One dimension of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Threshold,
    NodeIndex,
    Metadata,
    Offset,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Threshold => "threshold precision",
            Axis::NodeIndex => "node index width",
            Axis::Metadata => "metadata width",
            Axis::Offset => "child offset width",
        };
        f.write_str(name)
    }
}

// =============================================================================
// CatalogIndex
// =============================================================================

/// Runtime identifier of one catalog entry.
///
/// Values produced by the selector or by [`ForestSpec::INDEX`] are always in
/// `[0, CATALOG_SIZE)`. [`CatalogIndex::from_raw`] accepts any value so that
/// indices arriving from outside the process can be represented; the dispatch
/// table checks the bound before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogIndex(u16);

impl CatalogIndex {
    /// Wrap a raw, unchecked index.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Whether the index names an entry of the catalog.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.get() < CATALOG_SIZE
    }

    /// The descriptor for this index, if it is in range.
    #[inline]
    pub const fn entry(self) -> Option<CatalogEntry> {
        if self.is_valid() {
            Some(CatalogEntry::from_bits(self.0))
        } else {
            None
        }
    }
}

impl fmt::Display for CatalogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// CatalogEntry
// =============================================================================

/// Runtime descriptor of one catalog entry: which axes use the wide type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub double_precision: bool,
    pub wide_index: bool,
    pub wide_metadata: bool,
    pub wide_offset: bool,
}

impl CatalogEntry {
    /// The narrowest entry (index 0).
    pub const NARROWEST: CatalogEntry = CatalogEntry::from_bits(0);

    /// The widest entry (index `CATALOG_SIZE - 1`).
    pub const WIDEST: CatalogEntry = CatalogEntry::from_bits((CATALOG_SIZE - 1) as u16);

    const fn from_bits(bits: u16) -> Self {
        Self {
            double_precision: bits & 0b1000 != 0,
            wide_index: bits & 0b0100 != 0,
            wide_metadata: bits & 0b0010 != 0,
            wide_offset: bits & 0b0001 != 0,
        }
    }

    /// Position of this entry in the catalog.
    #[inline]
    pub const fn index(self) -> CatalogIndex {
        CatalogIndex(
            (self.double_precision as u16) << 3
                | (self.wide_index as u16) << 2
                | (self.wide_metadata as u16) << 1
                | self.wide_offset as u16,
        )
    }

    /// All entries in index order.
    pub fn all() -> impl Iterator<Item = CatalogEntry> {
        (0..CATALOG_SIZE as u16).map(CatalogEntry::from_bits)
    }

    /// Bytes of per-node storage (value, metadata, offset, output reference).
    #[inline]
    pub const fn node_bytes(self) -> usize {
        const fn width(wide: bool) -> usize {
            if wide { 4 } else { 2 }
        }
        let threshold = if self.double_precision { 8 } else { 4 };
        threshold + width(self.wide_index) + width(self.wide_metadata) + width(self.wide_offset)
    }

    /// Whether every axis of `self` is at least as wide as in `other`.
    pub fn dominates(self, other: CatalogEntry) -> bool {
        (self.double_precision || !other.double_precision)
            && (self.wide_index || !other.wide_index)
            && (self.wide_metadata || !other.wide_metadata)
            && (self.wide_offset || !other.wide_offset)
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = |wide: bool| if wide { "u32" } else { "u16" };
        write!(
            f,
            "<{}, {}, {}, {}>",
            if self.double_precision { "f64" } else { "f32" },
            width(self.wide_index),
            width(self.wide_metadata),
            width(self.wide_offset),
        )
    }
}

// =============================================================================
// Specialization
// =============================================================================

/// Type-level catalog entry.
///
/// Never instantiated; it only carries the four axis types.
pub struct Specialization<T, I, M, O>(PhantomData<fn() -> (T, I, M, O)>);

/// Compile-time view of a catalog entry.
pub trait ForestSpec: Send + Sync + 'static {
    type Threshold: Precision;
    type Index: Width;
    type Metadata: Width;
    type Offset: Width;

    /// Runtime descriptor of this entry.
    const ENTRY: CatalogEntry;

    /// Position of this entry in the catalog.
    const INDEX: CatalogIndex;
}

impl<T, I, M, O> ForestSpec for Specialization<T, I, M, O>
where
    T: Precision,
    I: Width,
    M: Width,
    O: Width,
{
    type Threshold = T;
    type Index = I;
    type Metadata = M;
    type Offset = O;

    const ENTRY: CatalogEntry = CatalogEntry {
        double_precision: T::WIDE,
        wide_index: I::WIDE,
        wide_metadata: M::WIDE,
        wide_offset: O::WIDE,
    };

    const INDEX: CatalogIndex = Self::ENTRY.index();
}

/// The narrowest specialization.
pub type NarrowestSpec = Specialization<f32, NarrowWidth, NarrowWidth, NarrowWidth>;

/// The widest specialization.
pub type WidestSpec = Specialization<f64, WideWidth, WideWidth, WideWidth>;
