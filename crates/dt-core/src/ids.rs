//! Strongly typed, zero-cost identifier wrappers.
//!
//! All IDs are `Copy + Ord + Hash` so they can be used as map keys and sorted
//! collection elements without ceremony.  The inner integer is `pub` so the
//! road-graph arrays can be indexed directly via `id.0 as usize`, but callers
//! should prefer the `.index()` helpers for clarity.
//!
//! Edge and node ids are *global*: every worker loads the same road graph, so
//! an `EdgeId` sent over the wire resolves to the same edge on the receiver.

use std::fmt;

/// Generate a typed ID wrapper around a primitive integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// Sentinel meaning "no valid ID".
            pub const INVALID: $name = $name(<$inner>::MAX);

            /// Cast to `usize` for direct use as a `Vec` index.
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            /// Returns the `INVALID` sentinel so uninitialized IDs are visibly invalid.
            #[inline(always)]
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<$name> for usize {
            #[inline(always)]
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }

        impl TryFrom<usize> for $name {
            type Error = std::num::TryFromIntError;
            fn try_from(n: usize) -> Result<$name, Self::Error> {
                <$inner>::try_from(n).map($name)
            }
        }
    };
}

typed_id! {
    /// Index of a road-network node.
    pub struct NodeId(u32);
}

typed_id! {
    /// Index of a directed road-network edge.
    pub struct EdgeId(u32);
}

typed_id! {
    /// Position of a worker in the partition order (0-based).  The server
    /// assigns indices in admission order; the last index receives the
    /// partition remainder.
    pub struct WorkerIndex(u16);
}

typed_id! {
    /// Globally unique vehicle identifier.
    ///
    /// The upper 16 bits hold the [`WorkerIndex`] of the worker that created
    /// the vehicle, the lower 48 bits a per-worker sequence number, so two
    /// workers never mint the same id and a transferred vehicle keeps its id.
    pub struct VehicleId(u64);
}

impl VehicleId {
    const SEQ_BITS: u32 = 48;

    /// Compose an id from the creating worker and its local sequence number.
    #[inline]
    pub fn compose(origin: WorkerIndex, seq: u64) -> Self {
        VehicleId(((origin.0 as u64) << Self::SEQ_BITS) | (seq & ((1 << Self::SEQ_BITS) - 1)))
    }

    /// Worker that created this vehicle.
    #[inline]
    pub fn origin(self) -> WorkerIndex {
        WorkerIndex((self.0 >> Self::SEQ_BITS) as u16)
    }

    /// Per-worker sequence number.
    #[inline]
    pub fn seq(self) -> u64 {
        self.0 & ((1 << Self::SEQ_BITS) - 1)
    }
}
