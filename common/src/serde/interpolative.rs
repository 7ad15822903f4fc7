//! Binary interpolative coding of sorted integer arrays (center-minimal).
//!
//! Given a strictly ascending array whose elements all lie in a known
//! inclusive range `[lo, hi]`, the coder recursively emits the middle
//! element relative to the narrowest interval it can occupy, then descends
//! into both halves. With `r = hi - lo - len + 1` the middle element costs
//! `floor(log2(r+1))` or one more bit, decided by the center-minimal rule:
//! with `n = r + 1`, `c = 2^(floor(log2 n)+1) - n`, the short code is used
//! iff the residual lies strictly inside `(r/2 - c/2 - (n & 1), r/2 + c/2]`.
//! When the interval pins the element completely (`r == 0`) nothing is
//! emitted at all.
//!
//! Encoder and decoder must stay byte-exactly symmetric; the `(lo1, hi1)`
//! bounds here are the normative tie-break. Three decode targets exist:
//! a plain array, direct OR into a bitmap of 32-bit words, and a dry read
//! that only advances the bit cursor.
//!
//! A 32-bit variant with the same structure is provided for wider value
//! ranges; it requires `hi - lo < u32::MAX`.

use super::bitstream::{BitReader, BitWriter};
use super::reader::Endian;

/// Encodes a strictly ascending `arr` with elements in `[lo, hi]`.
pub fn encode_u16(bout: &mut BitWriter<'_, '_>, arr: &[u16], lo: u16, hi: u16) {
    encode_u16_inner(bout, arr, lo as u32, hi as u32);
}

fn encode_u16_inner(bout: &mut BitWriter<'_, '_>, arr: &[u16], lo: u32, hi: u32) {
    let mut arr = arr;
    let mut lo = lo;
    while !arr.is_empty() {
        debug_assert!(lo <= hi);
        let mid = arr.len() >> 1;
        let val = arr[mid] as u32;
        let r = hi - lo - arr.len() as u32 + 1;
        if r != 0 {
            put_center_minimal(bout, val - lo - mid as u32, r);
        }
        if mid > 0 {
            encode_u16_inner(bout, &arr[..mid], lo, val - 1);
        }
        arr = &arr[mid + 1..];
        lo = val + 1;
    }
}

/// Decodes `arr.len()` values into `arr`. Inverse of [`encode_u16`].
pub fn decode_u16<E: Endian>(bin: &mut BitReader<'_, '_, E>, arr: &mut [u16], lo: u16, hi: u16) {
    decode_u16_inner(bin, arr, lo as u32, hi as u32);
}

fn decode_u16_inner<E: Endian>(
    bin: &mut BitReader<'_, '_, E>,
    arr: &mut [u16],
    lo: u32,
    hi: u32,
) {
    let mut arr = arr;
    let mut lo = lo;
    while !arr.is_empty() {
        debug_assert!(lo <= hi);
        let r = hi - lo - arr.len() as u32 + 1;
        let mid = arr.len() >> 1;
        let val = get_center_minimal(bin, r) + lo + mid as u32;
        arr[mid] = val as u16;
        if arr.len() == 1 {
            return;
        }
        let (head, rest) = std::mem::take(&mut arr).split_at_mut(mid + 1);
        if mid > 0 {
            decode_u16_inner(bin, &mut head[..mid], lo, val - 1);
        }
        arr = rest;
        lo = val + 1;
    }
}

/// Decodes `sz` values, setting each recovered value's bit in `bitmap`
/// (an array of 32-bit words, bit `v` = word `v / 32`, bit `v % 32`).
pub fn decode_u16_into_bitmap<E: Endian>(
    bin: &mut BitReader<'_, '_, E>,
    bitmap: &mut [u32],
    sz: u32,
    lo: u16,
    hi: u16,
) {
    decode_u16_bitmap_inner(bin, bitmap, sz, lo as u32, hi as u32);
}

fn decode_u16_bitmap_inner<E: Endian>(
    bin: &mut BitReader<'_, '_, E>,
    bitmap: &mut [u32],
    sz: u32,
    lo: u32,
    hi: u32,
) {
    let mut sz = sz;
    let mut lo = lo;
    while sz != 0 {
        debug_assert!(lo <= hi);
        let r = hi - lo - sz + 1;
        let mid = sz >> 1;
        let val = get_center_minimal(bin, r) + lo + mid;
        bitmap[(val >> 5) as usize] |= 1u32 << (val & 31);
        if sz == 1 {
            return;
        }
        if mid > 0 {
            decode_u16_bitmap_inner(bin, bitmap, mid, lo, val - 1);
        }
        sz -= mid + 1;
        lo = val + 1;
    }
}

/// Dry read: advances the bit cursor past `sz` encoded values.
pub fn decode_u16_dry<E: Endian>(bin: &mut BitReader<'_, '_, E>, sz: u32, lo: u16, hi: u16) {
    decode_u16_dry_inner(bin, sz, lo as u32, hi as u32);
}

fn decode_u16_dry_inner<E: Endian>(bin: &mut BitReader<'_, '_, E>, sz: u32, lo: u32, hi: u32) {
    let mut sz = sz;
    let mut lo = lo;
    while sz != 0 {
        debug_assert!(lo <= hi);
        let r = hi - lo - sz + 1;
        let mid = sz >> 1;
        let val = get_center_minimal(bin, r) + lo + mid;
        if sz == 1 {
            return;
        }
        if mid > 0 {
            decode_u16_dry_inner(bin, mid, lo, val - 1);
        }
        sz -= mid + 1;
        lo = val + 1;
    }
}

/// 32-bit variant of [`encode_u16`]. Requires `hi - lo < u32::MAX`.
pub fn encode_u32(bout: &mut BitWriter<'_, '_>, arr: &[u32], lo: u32, hi: u32) {
    let mut arr = arr;
    let mut lo = lo;
    while !arr.is_empty() {
        debug_assert!(lo <= hi);
        let mid = arr.len() >> 1;
        let val = arr[mid];
        let r = (hi as u64 - lo as u64 + 1 - arr.len() as u64) as u32;
        if r != 0 {
            put_center_minimal(bout, val - lo - mid as u32, r);
        }
        if mid > 0 {
            encode_u32(bout, &arr[..mid], lo, val - 1);
        }
        arr = &arr[mid + 1..];
        lo = val + 1;
    }
}

/// 32-bit variant of [`decode_u16`].
pub fn decode_u32<E: Endian>(bin: &mut BitReader<'_, '_, E>, arr: &mut [u32], lo: u32, hi: u32) {
    let mut arr = arr;
    let mut lo = lo;
    while !arr.is_empty() {
        debug_assert!(lo <= hi);
        let r = (hi as u64 - lo as u64 + 1 - arr.len() as u64) as u32;
        let mid = arr.len() >> 1;
        let val = get_center_minimal(bin, r) + lo + mid as u32;
        arr[mid] = val;
        if arr.len() == 1 {
            return;
        }
        let (head, rest) = std::mem::take(&mut arr).split_at_mut(mid + 1);
        if mid > 0 {
            decode_u32(bin, &mut head[..mid], lo, val - 1);
        }
        arr = rest;
        lo = val + 1;
    }
}

/// Writes `value` in `floor(log2(r+1))` or one more bit (center-minimal).
fn put_center_minimal(bout: &mut BitWriter<'_, '_>, value: u32, r: u32) {
    debug_assert!(r >= 1 && value <= r);
    let n = r as u64 + 1;
    let logv = 63 - n.leading_zeros();
    let c = (1u64 << (logv + 1)) - n;
    let half_c = (c >> 1) as i64;
    let half_r = (r >> 1) as i64;
    let lo1 = half_r - half_c - (n & 1) as i64;
    let hi1 = half_r + half_c;
    let bits = logv + u32::from((value as i64) <= lo1 || (value as i64) > hi1);
    bout.put_bits(value, bits);
}

/// Reads a value written by [`put_center_minimal`] for the same `r`.
/// `r == 0` means the value was pinned and nothing was written.
fn get_center_minimal<E: Endian>(bin: &mut BitReader<'_, '_, E>, r: u32) -> u32 {
    if r == 0 {
        return 0;
    }
    let n = r as u64 + 1;
    let logv = 63 - n.leading_zeros();
    let c = (1u64 << (logv + 1)) - n;
    let half_c = (c >> 1) as i64;
    let half_r = (r >> 1) as i64;
    let lo1 = half_r - half_c - (n & 1) as i64;
    let hi1 = half_r + half_c + 1;
    let mut val = bin.get_bits(logv);
    if (val as i64) <= lo1 || (val as i64) >= hi1 {
        val += bin.get_bits(1) << logv;
    }
    debug_assert!(val <= r);
    val
}
