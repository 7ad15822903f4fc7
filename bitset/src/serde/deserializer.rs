//! Block-by-block stream decoding.
//!
//! One dispatch on the block-type byte restores each block into its
//! canonical container form. When a target block already exists the
//! decoded content is OR-combined into it, so deserializing into a
//! non-empty set unions the two sets. A decoded GAP block that outgrows
//! every GAP level is materialized as a bit block instead.
//!
//! The low-level `read_*` helpers are shared with the serial stream
//! iterator; each advances the reader exactly past one block payload (no
//! padding, no alignment) and tolerates a missing destination by dry
//! reading.

use common::serde::bitstream::BitReader;
use common::serde::interpolative;
use common::serde::reader::{BigEndian, ByteReader, Endian, LittleEndian};

use super::*;
use crate::bitset::BitSet;
use crate::block::{self, BLOCK_WORDS, BitBlock, WAVE_WORDS};
use crate::error::{Error, Result};
use crate::gap;

/// Reusable bit-set deserializer session.
pub struct Deserializer {
    temp_block: Box<BitBlock>,
    id_array: Vec<u16>,
    gap_temp: Vec<u16>,
}

impl Default for Deserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer {
    pub fn new() -> Self {
        Self {
            temp_block: block::new_block(),
            id_array: vec![0u16; block::BLOCK_BITS as usize + 2],
            gap_temp: vec![0u16; block::BLOCK_BITS as usize + 2],
        }
    }

    /// Deserializes `buf`, OR-combining the decoded set into `bv`.
    ///
    /// Returns the number of bytes consumed. A stream declaring a foreign
    /// byte order is read through the byte-swapping reader.
    pub fn deserialize(&mut self, bv: &mut BitSet, buf: &[u8]) -> Result<usize> {
        let flags = *buf
            .first()
            .ok_or_else(|| Error::Format("empty stream".to_string()))?;
        if flags & HM_NO_BO == 0 {
            let bo = *buf
                .get(1)
                .ok_or_else(|| Error::Format("truncated header: missing byte order".to_string()))?;
            if bo == BYTE_ORDER_BIG {
                return self.deserialize_with::<BigEndian>(bv, buf);
            }
        }
        self.deserialize_with::<LittleEndian>(bv, buf)
    }

    fn deserialize_with<E: Endian>(&mut self, bv: &mut BitSet, buf: &[u8]) -> Result<usize> {
        let mut r = ByteReader::<E>::new(buf);
        let flags = r.get_8();
        if flags & HM_NO_BO == 0 {
            let _ = r.get_8();
        }
        let wide = flags & HM_64_BIT != 0;

        if flags & HM_ID_LIST != 0 {
            // legacy format: plain list of integers
            if flags & HM_RESIZE != 0 {
                let size = if wide { r.get_64() } else { r.get_32() as u64 };
                if size > bv.size() {
                    bv.resize(size);
                }
            }
            let cnt = r.get_32();
            for _ in 0..cnt {
                let idx = r.get_32();
                bv.set(idx as u64);
            }
            return Ok(r.size());
        }

        if flags & HM_NO_GAPL == 0 {
            for _ in 0..gap::GAP_LEVELS {
                let _ = r.get_16();
            }
        }
        let stream_size = if flags & HM_RESIZE != 0 {
            if wide { r.get_64() } else { r.get_32() as u64 }
        } else if wide {
            crate::bitset::WIDE_SPACE_BITS
        } else {
            crate::bitset::NARROW_SPACE_BITS
        };
        if stream_size > bv.size() {
            bv.resize(stream_size);
        }

        let total: u64 = if wide { 1 << 48 } else { 1 << 16 };
        let mut i: u64 = 0;
        while i < total {
            let btype = r.get_8();

            // dense 7-bit zero-run shorthand
            if btype & 0x80 != 0 {
                i += (btype & 0x7F) as u64;
                continue;
            }

            match btype {
                BLOCK_END | BLOCK_AZERO => break,
                BLOCK_1ZERO => i += 1,
                BLOCK_8ZERO => i += r.get_8() as u64,
                BLOCK_16ZERO => i += r.get_16() as u64,
                BLOCK_32ZERO => i += r.get_32() as u64,
                BLOCK_64ZERO => i += r.get_64(),
                BLOCK_AONE => {
                    bv.set_full_block_range(i, bv.nblocks() - 1);
                    break;
                }
                BLOCK_1ONE => {
                    bv.set_block_full(i);
                    i += 1;
                }
                BLOCK_8ONE => i += self.set_full_run(bv, i, r.get_8() as u64),
                BLOCK_16ONE => i += self.set_full_run(bv, i, r.get_16() as u64),
                BLOCK_32ONE => i += self.set_full_run(bv, i, r.get_32() as u64),
                BLOCK_64ONE => i += self.set_full_run(bv, i, r.get_64()),
                BLOCK_BIT => {
                    if bv.get_block(i).is_none() {
                        let mut b = block::new_block();
                        r.get_32_array(&mut b[..]);
                        bv.set_block_bits(i, b);
                    } else {
                        r.get_32_array(&mut self.temp_block[..]);
                        let dst = bv.deoptimize_block(i);
                        block::bit_or(dst, &self.temp_block);
                    }
                    i += 1;
                }
                BLOCK_BIT_1BIT => {
                    let bit_idx = r.get_16();
                    bv.set(i * block::BLOCK_BITS as u64 + bit_idx as u64);
                    i += 1;
                }
                BLOCK_BIT_0RUNS => {
                    read_0runs_block(&mut r, &mut self.temp_block);
                    let dst = bv.deoptimize_block(i);
                    block::bit_or(dst, &self.temp_block);
                    i += 1;
                }
                BLOCK_BIT_INTERVAL => {
                    let head_idx = r.get_16() as usize;
                    let tail_idx = r.get_16() as usize;
                    if bv.get_block(i).is_none() {
                        let mut b = block::new_block();
                        r.get_32_array(&mut b[head_idx..=tail_idx]);
                        bv.set_block_bits(i, b);
                    } else {
                        self.temp_block.fill(0);
                        r.get_32_array(&mut self.temp_block[head_idx..=tail_idx]);
                        let dst = bv.deoptimize_block(i);
                        block::bit_or(dst, &self.temp_block);
                    }
                    i += 1;
                }
                BLOCK_GAP
                | BLOCK_GAPBIT
                | BLOCK_ARRGAP
                | BLOCK_GAP_EGAMMA
                | BLOCK_ARRGAP_EGAMMA
                | BLOCK_ARRGAP_EGAMMA_INV
                | BLOCK_ARRGAP_INV
                | BLOCK_GAP_BIENC
                | BLOCK_ARRGAP_BIENC
                | BLOCK_ARRGAP_BIENC_INV => {
                    self.deserialize_gap(btype, &mut r, bv, i)?;
                    i += 1;
                }
                BLOCK_ARRBIT => {
                    let len = r.get_16() as usize;
                    if matches!(bv.get_block(i), Some(crate::bitset::Block::Full)) {
                        r.skip_16(len); // nothing to OR in
                    } else {
                        let dst = bv.deoptimize_block(i);
                        for _ in 0..len {
                            let bit_idx = r.get_16();
                            block::set_bit(dst, bit_idx as u32);
                        }
                    }
                    i += 1;
                }
                BLOCK_ARRBIT_INV
                | BLOCK_ARR_BIENC
                | BLOCK_ARR_BIENC_INV
                | BLOCK_BITGAP_BIENC
                | BLOCK_BIT_DIGEST0 => {
                    self.decode_bit_block(btype, &mut r, bv, i)?;
                    i += 1;
                }
                _ => {
                    return Err(Error::Format(format!(
                        "unknown block type: 0x{btype:02x}"
                    )));
                }
            }
        }
        Ok(r.size())
    }

    fn set_full_run(&self, bv: &mut BitSet, from: u64, nb: u64) -> u64 {
        for k in from..from + nb {
            bv.set_block_full(k);
        }
        nb
    }

    /// Decodes one GAP-family block and OR-combines it into the target.
    fn deserialize_gap<E: Endian>(
        &mut self,
        btype: u8,
        r: &mut ByteReader<'_, E>,
        bv: &mut BitSet,
        nb: u64,
    ) -> Result<()> {
        let Self {
            temp_block,
            id_array,
            gap_temp,
        } = self;

        let len = match btype {
            BLOCK_GAP | BLOCK_GAPBIT => {
                let head = r.get_16();
                let len = (head >> 3) as usize + 1;
                gap_temp[0] = head;
                r.get_16_array(&mut gap_temp[1..len - 1]);
                gap_temp[len - 1] = 65535;
                len
            }
            BLOCK_ARRGAP | BLOCK_ARRGAP_EGAMMA | BLOCK_ARRGAP_BIENC => {
                let arr_len = read_id_list(r, btype, id_array)?;
                gap::set_array(gap_temp, &id_array[..arr_len])
            }
            BLOCK_GAP_EGAMMA | BLOCK_GAP_BIENC => {
                let head = r.get_16();
                read_gap_block(r, btype, gap_temp, id_array, head)?
            }
            BLOCK_ARRGAP_EGAMMA_INV | BLOCK_ARRGAP_INV | BLOCK_ARRGAP_BIENC_INV => {
                read_gap_block(r, btype, gap_temp, id_array, 0)?
            }
            _ => {
                return Err(Error::Format(format!(
                    "unexpected GAP block type: 0x{btype:02x}"
                )));
            }
        };

        // OR-combine into the target, preferring GAP form for fresh blocks
        if bv.get_block(nb).is_none() {
            match gap::calc_level(len, bv.glen()) {
                Some(level) => {
                    let mut words = gap_temp[..len].to_vec();
                    gap::set_level(&mut words[0], level);
                    bv.set_block_gap(nb, words);
                }
                None => {
                    // too long for every GAP level: materialize as bits
                    let mut b = block::new_block();
                    gap::convert_to_bitset(&mut b, &gap_temp[..len]);
                    bv.set_block_bits(nb, b);
                }
            }
        } else {
            gap::convert_to_bitset(temp_block, &gap_temp[..len]);
            let dst = bv.deoptimize_block(nb);
            block::bit_or(dst, temp_block);
        }
        Ok(())
    }

    /// Decodes one bit-encoded block form and OR-combines it into the
    /// target bit block.
    fn decode_bit_block<E: Endian>(
        &mut self,
        btype: u8,
        r: &mut ByteReader<'_, E>,
        bv: &mut BitSet,
        nb: u64,
    ) -> Result<()> {
        let Self {
            temp_block,
            id_array,
            ..
        } = self;
        let dst = bv.deoptimize_block(nb);
        match btype {
            BLOCK_ARRBIT_INV => {
                temp_block.fill(!0);
                let len = r.get_16();
                for _ in 0..len {
                    let bit_idx = r.get_16();
                    block::clear_bit(temp_block.as_mut(), bit_idx as u32);
                }
                block::bit_or(dst, temp_block);
            }
            BLOCK_ARR_BIENC => read_bic_arr(r, Some(dst)),
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(r, temp_block);
                block::bit_or(dst, temp_block);
            }
            BLOCK_BITGAP_BIENC => read_bic_gap(r, Some(dst), id_array),
            BLOCK_BIT_DIGEST0 => read_digest0_block(r, Some(dst)),
            _ => {
                return Err(Error::Format(format!(
                    "unexpected bit block type: 0x{btype:02x}"
                )));
            }
        }
        Ok(())
    }
}

/// Deserializes `buf` into `bv` with a fresh session (OR semantics).
pub fn deserialize(bv: &mut BitSet, buf: &[u8]) -> Result<usize> {
    Deserializer::new().deserialize(bv, buf)
}

// ----------------------------------------------------------------------
// Shared low-level block readers (also used by the stream iterator)

/// Reads an encoded id list into `dst`, returning its length.
pub(crate) fn read_id_list<E: Endian>(
    r: &mut ByteReader<'_, E>,
    block_type: u8,
    dst: &mut [u16],
) -> Result<usize> {
    match block_type {
        BLOCK_BIT_1BIT => {
            dst[0] = r.get_16();
            Ok(1)
        }
        BLOCK_ARRGAP | BLOCK_ARRGAP_INV => {
            let len = r.get_16() as usize;
            r.get_16_array(&mut dst[..len]);
            Ok(len)
        }
        BLOCK_ARRGAP_EGAMMA | BLOCK_ARRGAP_EGAMMA_INV => {
            let mut bin = BitReader::new(r);
            let len = bin.get_gamma() as usize;
            let mut prev: u16 = 0;
            for (k, slot) in dst[..len].iter_mut().enumerate() {
                let mut bit_idx = bin.get_gamma() as u16;
                if k == 0 {
                    bit_idx = bit_idx.wrapping_sub(1);
                }
                bit_idx = bit_idx.wrapping_add(prev);
                prev = bit_idx;
                *slot = bit_idx;
            }
            Ok(len)
        }
        BLOCK_ARRGAP_BIENC | BLOCK_ARRGAP_BIENC_INV => {
            let min_v = r.get_16();
            let max_v = r.get_16();
            let mut bin = BitReader::new(r);
            let len = bin.get_gamma() as usize + 4;
            dst[0] = min_v;
            dst[len - 1] = max_v;
            interpolative::decode_u16(&mut bin, &mut dst[1..len - 1], min_v, max_v);
            Ok(len)
        }
        _ => Err(Error::Format(format!(
            "unexpected id-list block type: 0x{block_type:02x}"
        ))),
    }
}

/// Reads a GAP-family block into `dst` as canonical GAP words, returning
/// the GAP length. `gap_head` must hold the pre-read head word for the
/// types that carry one.
pub(crate) fn read_gap_block<E: Endian>(
    r: &mut ByteReader<'_, E>,
    block_type: u8,
    dst: &mut [u16],
    id_scratch: &mut [u16],
    gap_head: u16,
) -> Result<usize> {
    let len = match block_type {
        BLOCK_GAP => {
            let len = (gap_head >> 3) as usize + 1;
            dst[0] = gap_head;
            r.get_16_array(&mut dst[1..len - 1]);
            dst[len - 1] = 65535;
            len
        }
        BLOCK_BIT_1BIT => {
            let bit_idx = r.get_16();
            gap::set_array(dst, &[bit_idx])
        }
        BLOCK_ARRGAP
        | BLOCK_ARRGAP_INV
        | BLOCK_ARRGAP_EGAMMA
        | BLOCK_ARRGAP_EGAMMA_INV
        | BLOCK_ARRGAP_BIENC
        | BLOCK_ARRGAP_BIENC_INV => {
            let arr_len = read_id_list(r, block_type, id_scratch)?;
            gap::set_array(dst, &id_scratch[..arr_len])
        }
        BLOCK_GAP_EGAMMA => {
            let len = (gap_head >> 3) as usize + 1;
            dst[0] = gap_head;
            {
                let mut bin = BitReader::new(r);
                let mut sum = bin.get_gamma() - 1;
                dst[1] = sum as u16;
                for slot in dst[2..len - 1].iter_mut() {
                    sum += bin.get_gamma();
                    *slot = sum as u16;
                }
            }
            dst[len - 1] = 65535;
            len
        }
        BLOCK_GAP_BIENC => {
            let len = (gap_head >> 3) as usize + 1;
            dst[0] = gap_head;
            let min_v = r.get_16();
            dst[1] = min_v;
            {
                let mut bin = BitReader::new(r);
                interpolative::decode_u16(&mut bin, &mut dst[2..len - 1], min_v, 65535);
            }
            dst[len - 1] = 65535;
            len
        }
        _ => {
            return Err(Error::Format(format!(
                "unexpected GAP block type: 0x{block_type:02x}"
            )));
        }
    };

    if matches!(
        block_type,
        BLOCK_ARRGAP_EGAMMA_INV | BLOCK_ARRGAP_INV | BLOCK_ARRGAP_BIENC_INV
    ) {
        gap::invert(dst);
    }
    Ok(len)
}

/// Reads an interpolative full-range array, setting recovered bits in
/// `blk` (OR semantics), or dry-reads with no destination.
pub(crate) fn read_bic_arr<E: Endian>(r: &mut ByteReader<'_, E>, blk: Option<&mut BitBlock>) {
    let min_v = r.get_16();
    let max_v = r.get_16();
    let arr_len = r.get_16() as u32;
    let mut bin = BitReader::new(r);
    match blk {
        None => interpolative::decode_u16_dry(&mut bin, arr_len - 2, min_v, max_v),
        Some(b) => {
            block::set_bit(b, min_v as u32);
            block::set_bit(b, max_v as u32);
            interpolative::decode_u16_into_bitmap(&mut bin, b, arr_len - 2, min_v, max_v);
        }
    }
}

/// Reads an inverted interpolative array: `blk` ends up holding the
/// decoded complement.
pub(crate) fn read_bic_arr_inv<E: Endian>(r: &mut ByteReader<'_, E>, blk: &mut BitBlock) {
    blk.fill(0);
    read_bic_arr(r, Some(&mut *blk));
    block::bit_invert(blk);
}

/// Reads an interpolative GAP-coded bit block, OR-combining the decoded
/// runs into `blk` (dry with no destination). `id_scratch` holds the
/// reconstructed GAP words.
pub(crate) fn read_bic_gap<E: Endian>(
    r: &mut ByteReader<'_, E>,
    blk: Option<&mut BitBlock>,
    id_scratch: &mut [u16],
) {
    let head = r.get_8() as u16;
    let arr_len = r.get_16() as usize;
    let min_v = r.get_16();
    debug_assert!(arr_len <= BIE_CUT_OFF);

    id_scratch[0] = head;
    id_scratch[1] = min_v;
    id_scratch[arr_len] = 65535;
    {
        let mut bin = BitReader::new(r);
        interpolative::decode_u16(&mut bin, &mut id_scratch[2..arr_len], min_v, 65535);
    }
    if let Some(b) = blk {
        gap::add_to_bitset(b, id_scratch, arr_len);
    }
}

/// Reads a digest-coded block: a 64-bit wave mask, then 32 words per set
/// wave, OR-combined into `blk` (dry with no destination).
pub(crate) fn read_digest0_block<E: Endian>(r: &mut ByteReader<'_, E>, blk: Option<&mut BitBlock>) {
    let mut d0 = r.get_64();
    match blk {
        None => {
            while d0 != 0 {
                r.skip_32(WAVE_WORDS);
                d0 &= d0 - 1;
            }
        }
        Some(b) => {
            while d0 != 0 {
                let wave = d0.trailing_zeros() as usize;
                let off = wave * WAVE_WORDS;
                for w in &mut b[off..off + WAVE_WORDS] {
                    *w |= r.get_32();
                }
                d0 &= d0 - 1;
            }
        }
    }
}

/// Reads a zero-runs coded block, overwriting `blk`.
pub(crate) fn read_0runs_block<E: Endian>(r: &mut ByteReader<'_, E>, blk: &mut BitBlock) {
    blk.fill(0);
    let mut run_type = r.get_8() != 0;
    let mut j = 0usize;
    while j < BLOCK_WORDS {
        let run_length = r.get_16() as usize;
        if run_type {
            for w in &mut blk[j..j + run_length] {
                *w = r.get_32();
            }
        }
        j += run_length;
        run_type = !run_type;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::serializer::{NO_BYTE_ORDER, NO_GAP_LENGTH, serialize_with_flags};

    #[test]
    fn should_reject_unknown_block_type() {
        // given - valid header followed by an invalid type byte
        let buf = [HM_DEFAULT | HM_NO_BO | HM_NO_GAPL, 0x4F];

        // when
        let mut bv = BitSet::new();
        let result = deserialize(&mut bv, &buf);

        // then
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn should_reject_empty_stream() {
        // given
        let mut bv = BitSet::new();

        // when / then
        assert!(deserialize(&mut bv, &[]).is_err());
    }

    #[test]
    fn should_report_bytes_consumed() {
        // given
        let mut bv = BitSet::new();
        bv.set(42);
        let mut buf = [0u8; 64];
        let len = serialize_with_flags(&bv, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);

        // when
        let mut restored = BitSet::new();
        let consumed = deserialize(&mut restored, &buf[..len]).unwrap();

        // then
        assert_eq!(consumed, len);
        assert_eq!(restored, bv);
    }

    #[test]
    fn should_read_legacy_id_list_stream() {
        // given - hand-built ID_LIST stream: flags, count, ids
        let mut buf = Vec::new();
        buf.push(HM_DEFAULT | HM_ID_LIST | HM_NO_BO | HM_NO_GAPL);
        buf.extend_from_slice(&3u32.to_le_bytes());
        for id in [7u32, 100, 65536] {
            buf.extend_from_slice(&id.to_le_bytes());
        }

        // when
        let mut bv = BitSet::new();
        deserialize(&mut bv, &buf).unwrap();

        // then
        assert_eq!(bv.count(), 3);
        assert!(bv.contains(7));
        assert!(bv.contains(100));
        assert!(bv.contains(65536));
    }

    #[test]
    fn should_or_combine_into_existing_set() {
        // given
        let mut a = BitSet::new();
        a.set(1);
        a.set(2);
        let mut b = BitSet::new();
        b.set(2);
        b.set(3);
        let mut buf = vec![0u8; b.calc_stat().max_serialize_mem];
        let len = serialize_with_flags(&b, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);

        // when - deserialize b's stream into a
        deserialize(&mut a, &buf[..len]).unwrap();

        // then - union
        assert_eq!(a.count(), 3);
        assert!(a.contains(1) && a.contains(2) && a.contains(3));
    }

    #[test]
    fn should_decode_big_endian_stream() {
        // given - hand-built big-endian stream: single bit at 0x0102
        let buf = [
            HM_DEFAULT | HM_NO_GAPL,
            BYTE_ORDER_BIG,
            BLOCK_BIT_1BIT,
            0x01,
            0x02, // u16 big-endian 0x0102
            BLOCK_AZERO,
        ];

        // when
        let mut bv = BitSet::new();
        deserialize(&mut bv, &buf).unwrap();

        // then
        assert_eq!(bv.count(), 1);
        assert!(bv.contains(0x0102));
    }
}
