//! Shared binary encoding primitives.
//!
//! This crate provides the low-level building blocks used by the storage
//! crates for compact binary formats:
//!
//! - [`serde::writer::ByteWriter`]: length-checked little-endian byte writer
//!   with cursor rollback
//! - [`serde::reader::ByteReader`]: matching reader, generic over byte order
//! - [`serde::bitstream`]: unaligned bit I/O and Elias-Gamma coding
//! - [`serde::interpolative`]: binary interpolative coding of sorted arrays

pub mod serde;

pub use serde::bitstream::{BitReader, BitWriter};
pub use serde::reader::{BigEndian, ByteReader, Endian, LittleEndian};
pub use serde::writer::ByteWriter;
