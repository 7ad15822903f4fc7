//! Sparse compressed bit-set with adaptive block serialization.
//!
//! A [`BitSet`] logically represents a set of integer identifiers over a
//! 2^32-bit address space (2^64 in wide mode), stored as sparse 65536-bit
//! blocks in bit, run-length (GAP) or all-ones form.
//!
//! The serialization core converts a set into a compact self-describing
//! byte stream and back:
//!
//! - [`Serializer`] picks the cheapest of a dozen per-block encodings at
//!   the configured compression level, rolling back any candidate that
//!   fails to beat the plain form
//! - [`Deserializer`] / [`deserialize`] reconstruct a set, OR-combining
//!   into a non-empty target
//! - [`operation_deserialize`] streams a serialized argument through a set
//!   operation (AND/OR/XOR/SUB or counting variants) against an in-memory
//!   set, block by block, without materializing the argument
//!
//! ```
//! use bitset::{BitSet, Serializer, deserialize};
//!
//! let mut bv = BitSet::new();
//! bv.set(1);
//! bv.set(100_000);
//!
//! let mut serial = Serializer::new();
//! let bytes = serial.serialize_to_bytes(&bv, None);
//!
//! let mut restored = BitSet::new();
//! deserialize(&mut restored, &bytes).unwrap();
//! assert_eq!(restored, bv);
//! ```

pub mod bitset;
pub mod block;
pub mod error;
pub mod gap;
pub mod serde;

pub use bitset::{BitSet, Block, NARROW_SPACE_BITS, Statistics, WIDE_SPACE_BITS};
pub use error::{Error, Result};
pub use serde::{
    Deserializer, SetOperation, Serializer, StreamIterator, deserialize, deserialize_range,
    operation_deserialize, serialize, serialize_with_flags,
};
pub use serde::serializer::{
    COMPRESSION_LEVEL_DEFAULT, COMPRESSION_LEVEL_MAX, NO_BYTE_ORDER, NO_GAP_LENGTH,
};
