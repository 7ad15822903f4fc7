//! Serialization of the bit-set into a self-describing byte stream.
//!
//! # Stream format
//!
//! ```text
//! Stream ::= Header Block* EndMarker?
//! Header ::= flags:u8 [byte_order:u8] [gap_levels:u16[4]] [size:u32|u64]
//! ```
//!
//! Every block starts with a type byte from the closed set below. Values
//! with the top bit set (`0x80 | k`, `2 <= k < 128`) are a shorthand token
//! for "advance `k` all-zero blocks". The `end` and `azero` codes
//! terminate the body; `aone` terminates it by declaring every remaining
//! block all-ones.
//!
//! Producers always emit little-endian; the optional byte-order marker
//! lets a consumer pick the byte-swapping reader for foreign streams.

pub mod deserializer;
pub mod operation;
pub mod serializer;
pub mod stream;

pub use deserializer::{Deserializer, deserialize};
pub use operation::{SetOperation, deserialize_range, operation_deserialize};
pub use serializer::{
    NO_BYTE_ORDER, NO_GAP_LENGTH, Serializer, serialize, serialize_with_flags,
};
pub use stream::StreamIterator;

// Header flag bits.
pub const HM_DEFAULT: u8 = 1; // vector occupies the full address space
pub const HM_RESIZE: u8 = 1 << 1; // down-sized vector, size field follows
pub const HM_ID_LIST: u8 = 1 << 2; // legacy: body is a plain integer list
pub const HM_NO_BO: u8 = 1 << 3; // no byte-order field
pub const HM_NO_GAPL: u8 = 1 << 4; // no GAP level table
pub const HM_64_BIT: u8 = 1 << 5; // wide-address stream

// Byte-order marker values.
pub const BYTE_ORDER_BIG: u8 = 0;
pub const BYTE_ORDER_LITTLE: u8 = 1;

// Block type bytes.
pub const BLOCK_END: u8 = 0; // stream terminator
pub const BLOCK_1ZERO: u8 = 1; // one all-zero block
pub const BLOCK_1ONE: u8 = 2; // one all-set block
pub const BLOCK_8ZERO: u8 = 3; // up to 255 zero blocks (u8 count)
pub const BLOCK_8ONE: u8 = 4;
pub const BLOCK_16ZERO: u8 = 5; // up to 65535 zero blocks (u16 count)
pub const BLOCK_16ONE: u8 = 6;
pub const BLOCK_32ZERO: u8 = 7; // u32 count
pub const BLOCK_32ONE: u8 = 8;
pub const BLOCK_AZERO: u8 = 9; // all remaining blocks zero (terminates)
pub const BLOCK_AONE: u8 = 10; // all remaining blocks one
pub const BLOCK_BIT: u8 = 11; // plain bit block, 2048 u32
pub const BLOCK_GAP: u8 = 14; // plain GAP block
pub const BLOCK_GAPBIT: u8 = 15; // legacy, decoded as a GAP block
pub const BLOCK_ARRBIT: u8 = 16; // u16 count + set-bit positions
pub const BLOCK_BIT_INTERVAL: u8 = 17; // legacy, decode only
pub const BLOCK_ARRGAP: u8 = 18; // position array of a GAP block
pub const BLOCK_BIT_1BIT: u8 = 19; // single set bit, u16 position
pub const BLOCK_GAP_EGAMMA: u8 = 20; // gamma-coded GAP block
pub const BLOCK_ARRGAP_EGAMMA: u8 = 21; // gamma-coded position array
pub const BLOCK_BIT_0RUNS: u8 = 22; // bit block as zero/non-zero word runs
pub const BLOCK_ARRGAP_EGAMMA_INV: u8 = 23; // inverted gamma array
pub const BLOCK_ARRGAP_INV: u8 = 24; // inverted plain array
pub const BLOCK_64ZERO: u8 = 25; // u64 count (wide streams)
pub const BLOCK_64ONE: u8 = 26;
pub const BLOCK_GAP_BIENC: u8 = 27; // interpolative GAP block
pub const BLOCK_ARRGAP_BIENC: u8 = 28; // interpolative position array
pub const BLOCK_ARRGAP_BIENC_INV: u8 = 29;
pub const BLOCK_ARRBIT_INV: u8 = 30; // clear-bit position array
pub const BLOCK_ARR_BIENC: u8 = 31; // interpolative full-range array
pub const BLOCK_ARR_BIENC_INV: u8 = 32;
pub const BLOCK_BITGAP_BIENC: u8 = 33; // interpolative bit block as GAPs
pub const BLOCK_BIT_DIGEST0: u8 = 34; // digest mask + non-zero waves

/// Values the interpolative coders cut over to plain forms.
pub const BIE_CUT_OFF: usize = 16384;

/// Position-array conversion limit for full-range array encodings.
pub const GAP_MAX_BITS_CMRZ: usize = 32768;
