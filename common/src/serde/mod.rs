//! Binary serialization primitives.
//!
//! The writer and reader operate on caller-supplied byte slices and keep an
//! explicit cursor, so encoders can record a position and roll back to it
//! when a trial encoding turns out larger than a simpler alternative.
//!
//! All multi-byte integers are written little-endian regardless of host.
//! The reader is generic over an [`reader::Endian`] instance so a stream
//! written on a foreign-endian producer can be consumed by the same decoder
//! logic through the byte-swapping instance.

pub mod bitstream;
pub mod interpolative;
pub mod reader;
pub mod writer;
