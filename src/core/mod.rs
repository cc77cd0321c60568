//! Limb primitives, bit-span views, and multi-limb numerics.

pub mod limb;
pub mod num;
pub mod span;

pub use limb::{limbs_for, Bit, Limb, LIMB_BITS, LIMB_BYTES, MAX_LIMBS};
pub use span::{BitSlice, BitSliceMut, LimbRead, Masked, NullSpan, Select, Signedness};
