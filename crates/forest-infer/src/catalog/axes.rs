//! Storage types for the four catalog axes.
//!
//! Each axis has exactly two choices: a narrow type and a wide type. The
//! threshold axis chooses between `f32` and `f64`; the integer axes (node
//! index, metadata, child offset) choose between `u16` and `u32`.

use std::fmt::Debug;

/// Narrow choice for the integer axes.
pub type NarrowWidth = u16;

/// Wide choice for the integer axes.
pub type WideWidth = u32;

// =============================================================================
// Precision (threshold axis)
// =============================================================================

/// Floating point type used for split thresholds and leaf values.
pub trait Precision: Copy + PartialOrd + Default + Debug + Send + Sync + 'static {
    /// `true` for the wide (double precision) choice.
    const WIDE: bool;
    /// Type name used in logs and descriptors.
    const NAME: &'static str;
    /// Missing value marker.
    const NAN: Self;

    /// Narrow a value, failing if a finite value would become infinite or a
    /// nonzero value would flush to zero.
    fn from_f64(value: f64) -> Option<Self>;

    /// Narrow a feature value. Out-of-range values saturate to infinity.
    fn from_f64_lossy(value: f64) -> Self;

    fn to_f64(self) -> f64;

    fn is_nan(self) -> bool;
}

impl Precision for f32 {
    const WIDE: bool = false;
    const NAME: &'static str = "f32";
    const NAN: Self = f32::NAN;

    #[inline]
    fn from_f64(value: f64) -> Option<Self> {
        let narrowed = value as f32;
        let overflowed = value.is_finite() && !narrowed.is_finite();
        let flushed = value != 0.0 && narrowed == 0.0;
        if overflowed || flushed {
            None
        } else {
            Some(narrowed)
        }
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl Precision for f64 {
    const WIDE: bool = true;
    const NAME: &'static str = "f64";
    const NAN: Self = f64::NAN;

    #[inline]
    fn from_f64(value: f64) -> Option<Self> {
        Some(value)
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

// =============================================================================
// Width (integer axes)
// =============================================================================

/// Unsigned integer type used for node indices, metadata words and offsets.
pub trait Width: Copy + Eq + Default + Debug + Send + Sync + 'static {
    /// `true` for the wide choice.
    const WIDE: bool;
    const NAME: &'static str;
    const BITS: u32;
    /// Largest representable value, widened.
    const MAX_VALUE: u64;

    fn from_u64(value: u64) -> Option<Self>;

    fn to_u64(self) -> u64;

    #[inline]
    fn to_usize(self) -> usize {
        self.to_u64() as usize
    }
}

impl Width for u16 {
    const WIDE: bool = false;
    const NAME: &'static str = "u16";
    const BITS: u32 = u16::BITS;
    const MAX_VALUE: u64 = u16::MAX as u64;

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u16::try_from(value).ok()
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl Width for u32 {
    const WIDE: bool = true;
    const NAME: &'static str = "u32";
    const BITS: u32 = u32::BITS;
    const MAX_VALUE: u64 = u32::MAX as u64;

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u32::try_from(value).ok()
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }
}

/// Number of usable node positions for an index type.
///
/// The maximum value is reserved as the "no reference" sentinel, so a forest
/// of `n` nodes fits when `n <= MAX_VALUE` (positions `0..n` stay below it).
#[inline]
pub const fn index_capacity<I: Width>() -> u64 {
    I::MAX_VALUE
}

/// Sentinel marking a node without an output or category reference.
#[inline]
pub fn index_sentinel<I: Width>() -> I {
    // MAX_VALUE always round-trips through its own type.
    I::from_u64(I::MAX_VALUE).unwrap_or_default()
}

/// Narrow a node position or reference, refusing the sentinel value.
#[inline]
pub fn narrow_index<I: Width>(value: u64) -> Option<I> {
    if value < I::MAX_VALUE {
        I::from_u64(value)
    } else {
        None
    }
}
