//! Packed per-node metadata word.
//!
//! The three most significant bits hold node flags; the remaining bits hold
//! the payload: the split feature for split nodes, the class id for vote
//! leaves, zero otherwise.
//!
//! ```text
//! u16: [leaf][default_left][categorical][ payload: 13 bits ]
//! u32: [leaf][default_left][categorical][ payload: 29 bits ]
//! ```

use crate::catalog::Width;

/// Number of flag bits at the top of every metadata word.
pub const FLAG_BITS: u32 = 3;

/// Largest payload count a metadata type can hold (payloads `0..capacity`).
#[inline]
pub const fn payload_capacity<M: Width>() -> u64 {
    1u64 << (M::BITS - FLAG_BITS)
}

/// Node flags stored in the metadata word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags {
    pub leaf: bool,
    pub default_left: bool,
    pub categorical: bool,
}

/// Metadata word of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct NodeMetadata<M: Width>(M);

impl<M: Width> NodeMetadata<M> {
    const LEAF_BIT: u64 = 1 << (M::BITS - 1);
    const DEFAULT_LEFT_BIT: u64 = 1 << (M::BITS - 2);
    const CATEGORICAL_BIT: u64 = 1 << (M::BITS - 3);
    const PAYLOAD_MASK: u64 = Self::CATEGORICAL_BIT - 1;

    /// Pack flags and payload. Returns `None` if the payload does not fit.
    #[inline]
    pub fn pack(flags: NodeFlags, payload: u64) -> Option<Self> {
        if payload > Self::PAYLOAD_MASK {
            return None;
        }
        let mut word = payload;
        if flags.leaf {
            word |= Self::LEAF_BIT;
        }
        if flags.default_left {
            word |= Self::DEFAULT_LEFT_BIT;
        }
        if flags.categorical {
            word |= Self::CATEGORICAL_BIT;
        }
        M::from_u64(word).map(Self)
    }

    #[inline]
    pub fn is_leaf(self) -> bool {
        self.0.to_u64() & Self::LEAF_BIT != 0
    }

    #[inline]
    pub fn default_left(self) -> bool {
        self.0.to_u64() & Self::DEFAULT_LEFT_BIT != 0
    }

    #[inline]
    pub fn is_categorical(self) -> bool {
        self.0.to_u64() & Self::CATEGORICAL_BIT != 0
    }

    #[inline]
    pub fn payload(self) -> u64 {
        self.0.to_u64() & Self::PAYLOAD_MASK
    }

    pub fn flags(self) -> NodeFlags {
        NodeFlags {
            leaf: self.is_leaf(),
            default_left: self.default_left(),
            categorical: self.is_categorical(),
        }
    }

    /// Raw storage word.
    #[inline]
    pub fn raw(self) -> M {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_per_width() {
        assert_eq!(payload_capacity::<u16>(), 8_192);
        assert_eq!(payload_capacity::<u32>(), 1 << 29);
    }

    #[test]
    fn pack_and_unpack() {
        let flags = NodeFlags {
            leaf: false,
            default_left: true,
            categorical: true,
        };
        let meta = NodeMetadata::<u16>::pack(flags, 8_191).unwrap();
        assert_eq!(meta.flags(), flags);
        assert_eq!(meta.payload(), 8_191);
        assert_eq!(meta.raw(), 0b0111_1111_1111_1111);

        let flags = NodeFlags {
            leaf: true,
            ..Default::default()
        };
        let leaf = NodeMetadata::<u32>::pack(flags, 7).unwrap();
        assert!(leaf.is_leaf());
        assert!(!leaf.default_left());
        assert_eq!(leaf.payload(), 7);
    }

    #[test]
    fn oversized_payload_rejected() {
        assert!(NodeMetadata::<u16>::pack(NodeFlags::default(), 8_192).is_none());
        assert!(NodeMetadata::<u32>::pack(NodeFlags::default(), 8_192).is_some());
    }
}
