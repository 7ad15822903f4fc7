//! Serial stream iterator.
//!
//! Presents a serialized blob as a sequence of per-block events driven by
//! a small state machine:
//!
//! ```text
//! Unknown -> ListIds | Blocks
//! Blocks  -> ZeroBlocks | OneBlocks | BitBlock | GapBlock | Unknown(eof)
//! ```
//!
//! `ZeroBlocks`/`OneBlocks` carry a count of mono-blocks that can be
//! skipped wholesale. `next` advances exactly one logical block;
//! `get_bit_block` consumes the current bit-encoded block while applying
//! a set operation against a caller block, selecting the combiner by a
//! `(operation, block type)` match.

use common::serde::reader::{ByteReader, Endian};

use super::deserializer::{
    read_bic_arr, read_bic_arr_inv, read_bic_gap, read_digest0_block, read_gap_block,
};
use super::operation::SetOperation;
use super::*;
use crate::block::{self, BLOCK_WORDS, BitBlock};
use crate::error::{Error, Result};
use crate::gap::GAP_LEVELS;

/// Iterator state over the serialized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Unknown,
    /// Legacy plain integer list body.
    ListIds,
    /// Between blocks, ready to read the next type byte.
    Blocks,
    /// Inside a run of all-zero blocks.
    ZeroBlocks,
    /// Inside a run of all-one blocks.
    OneBlocks,
    /// Positioned on a bit-encoded block.
    BitBlock,
    /// Positioned on a GAP-encoded block.
    GapBlock,
}

/// Walks a serialized stream block by block.
pub struct StreamIterator<'a, E: Endian> {
    reader: ByteReader<'a, E>,
    end_of_stream: bool,
    bv_size: u64,
    wide: bool,
    state: IteratorState,
    id_count: u32,
    last_id: u32,
    glevels: [u16; GAP_LEVELS],
    block_type: u8,
    block_idx: u64,
    mono_block_cnt: u64,
    gap_head: u16,
    id_array: Vec<u16>,
}

impl<'a, E: Endian> StreamIterator<'a, E> {
    /// Parses the stream header and positions the iterator on the first
    /// event.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut reader = ByteReader::<E>::new(buf);
        let flags = reader.get_8();
        if flags & HM_NO_BO == 0 {
            let _ = reader.get_8();
        }
        let wide = flags & HM_64_BIT != 0;

        let mut it = Self {
            reader,
            end_of_stream: false,
            bv_size: 0,
            wide,
            state: IteratorState::Unknown,
            id_count: 0,
            last_id: 0,
            glevels: [0u16; GAP_LEVELS],
            block_type: 0,
            block_idx: 0,
            mono_block_cnt: 0,
            gap_head: 0,
            id_array: vec![0u16; block::BLOCK_BITS as usize + 2],
        };

        if flags & HM_ID_LIST != 0 {
            if flags & HM_RESIZE != 0 {
                it.bv_size = if wide {
                    it.reader.get_64()
                } else {
                    it.reader.get_32() as u64
                };
            }
            it.state = IteratorState::ListIds;
            it.id_count = it.reader.get_32();
            it.next()?; // position on the first id
        } else {
            if flags & HM_NO_GAPL == 0 {
                for k in 0..GAP_LEVELS {
                    it.glevels[k] = it.reader.get_16();
                }
            }
            it.bv_size = if flags & HM_RESIZE != 0 {
                if wide {
                    it.reader.get_64()
                } else {
                    it.reader.get_32() as u64
                }
            } else if wide {
                crate::bitset::WIDE_SPACE_BITS
            } else {
                crate::bitset::NARROW_SPACE_BITS
            };
            it.state = IteratorState::Blocks;
        }
        Ok(it)
    }

    /// Addressable size declared by the stream (the full narrow or wide
    /// space when the header carries no explicit size).
    pub fn bv_size(&self) -> u64 {
        self.bv_size
    }

    pub fn is_eof(&self) -> bool {
        self.end_of_stream
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn block_type(&self) -> u8 {
        self.block_type
    }

    pub fn block_idx(&self) -> u64 {
        self.block_idx
    }

    /// Id count declared by a `ListIds` stream.
    pub fn id_count(&self) -> u32 {
        self.id_count
    }

    /// Current id of a `ListIds` stream.
    pub fn id(&self) -> u32 {
        self.last_id
    }

    /// Stream bytes consumed so far.
    pub fn dec_size(&self) -> usize {
        self.reader.size()
    }

    /// GAP level table carried by the stream header (zeros when omitted).
    pub fn gap_levels(&self) -> &[u16; GAP_LEVELS] {
        &self.glevels
    }

    /// Blocks in the stream's address space.
    fn total_blocks(&self) -> u64 {
        if self.wide { 1 << 48 } else { 1 << 16 }
    }

    /// Advances exactly one logical event.
    pub fn next(&mut self) -> Result<()> {
        if self.end_of_stream {
            self.block_idx += 1;
            return Ok(());
        }
        match self.state {
            IteratorState::ListIds => {
                if self.id_count == 0 {
                    self.end_of_stream = true;
                    self.state = IteratorState::Unknown;
                } else {
                    self.last_id = self.reader.get_32();
                    self.id_count -= 1;
                }
            }
            IteratorState::Blocks => {
                if self.block_idx == self.total_blocks() {
                    self.end_of_stream = true;
                    self.state = IteratorState::Unknown;
                    return Ok(());
                }
                self.block_type = self.reader.get_8();

                // dense 7-bit zero-run shorthand
                if self.block_type & 0x80 != 0 {
                    self.mono_block_cnt = (self.block_type & 0x7F) as u64 - 1;
                    self.state = IteratorState::ZeroBlocks;
                    return Ok(());
                }

                match self.block_type {
                    BLOCK_AZERO | BLOCK_END => {
                        self.end_of_stream = true;
                        self.state = IteratorState::Unknown;
                    }
                    BLOCK_1ZERO => {
                        self.state = IteratorState::ZeroBlocks;
                        self.mono_block_cnt = 0;
                    }
                    BLOCK_8ZERO => {
                        self.state = IteratorState::ZeroBlocks;
                        self.mono_block_cnt = self.reader.get_8() as u64 - 1;
                    }
                    BLOCK_16ZERO => {
                        self.state = IteratorState::ZeroBlocks;
                        self.mono_block_cnt = self.reader.get_16() as u64 - 1;
                    }
                    BLOCK_32ZERO => {
                        self.state = IteratorState::ZeroBlocks;
                        self.mono_block_cnt = self.reader.get_32() as u64 - 1;
                    }
                    BLOCK_64ZERO => {
                        self.state = IteratorState::ZeroBlocks;
                        self.mono_block_cnt = self.reader.get_64() - 1;
                    }
                    BLOCK_AONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = self.total_blocks() - self.block_idx - 1;
                    }
                    BLOCK_1ONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = 0;
                    }
                    BLOCK_8ONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = self.reader.get_8() as u64 - 1;
                    }
                    BLOCK_16ONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = self.reader.get_16() as u64 - 1;
                    }
                    BLOCK_32ONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = self.reader.get_32() as u64 - 1;
                    }
                    BLOCK_64ONE => {
                        self.state = IteratorState::OneBlocks;
                        self.mono_block_cnt = self.reader.get_64() - 1;
                    }
                    BLOCK_BIT | BLOCK_BIT_INTERVAL | BLOCK_BIT_0RUNS | BLOCK_ARRBIT
                    | BLOCK_ARRBIT_INV | BLOCK_ARR_BIENC | BLOCK_ARR_BIENC_INV
                    | BLOCK_BITGAP_BIENC | BLOCK_BIT_DIGEST0 => {
                        self.state = IteratorState::BitBlock;
                    }
                    BLOCK_GAP | BLOCK_GAP_EGAMMA | BLOCK_GAP_BIENC => {
                        self.gap_head = self.reader.get_16();
                        self.state = IteratorState::GapBlock;
                    }
                    BLOCK_ARRGAP | BLOCK_ARRGAP_EGAMMA | BLOCK_ARRGAP_EGAMMA_INV
                    | BLOCK_ARRGAP_INV | BLOCK_BIT_1BIT | BLOCK_ARRGAP_BIENC
                    | BLOCK_ARRGAP_BIENC_INV | BLOCK_GAPBIT => {
                        self.state = IteratorState::GapBlock;
                    }
                    other => {
                        return Err(Error::Format(format!(
                            "unknown block type: 0x{other:02x}"
                        )));
                    }
                }
            }
            IteratorState::ZeroBlocks | IteratorState::OneBlocks => {
                self.block_idx += 1;
                if self.mono_block_cnt == 0 {
                    self.state = IteratorState::Blocks;
                } else {
                    self.mono_block_cnt -= 1;
                }
            }
            IteratorState::Unknown | IteratorState::BitBlock | IteratorState::GapBlock => {
                return Err(Error::Format(
                    "stream iterator advanced from an invalid state".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Skips the whole current mono-block run, returning the new block
    /// index.
    pub fn skip_mono_blocks(&mut self) -> u64 {
        debug_assert!(matches!(
            self.state,
            IteratorState::ZeroBlocks | IteratorState::OneBlocks
        ));
        if self.mono_block_cnt == 0 {
            self.block_idx += 1;
        } else {
            self.block_idx += self.mono_block_cnt + 1;
            self.mono_block_cnt = 0;
        }
        self.state = IteratorState::Blocks;
        self.block_idx
    }

    /// Reads the current GAP block into `dst` as canonical GAP words and
    /// advances. Returns the GAP length.
    pub fn get_gap_block(&mut self, dst: &mut [u16]) -> Result<usize> {
        debug_assert!(
            self.state == IteratorState::GapBlock || self.block_type == BLOCK_BIT_1BIT
        );
        let len = read_gap_block(
            &mut self.reader,
            self.block_type,
            dst,
            &mut self.id_array,
            self.gap_head,
        )?;
        self.block_idx += 1;
        self.state = IteratorState::Blocks;
        Ok(len)
    }

    /// Consumes the current bit-encoded block, combining it with
    /// `dst_block` under `op`. Counting operations return the resulting
    /// bit count; others return 0.
    pub fn get_bit_block(
        &mut self,
        dst_block: Option<&mut BitBlock>,
        tmp_block: &mut BitBlock,
        op: SetOperation,
    ) -> Result<u32> {
        debug_assert_eq!(self.state, IteratorState::BitBlock);
        let count = match op {
            SetOperation::Assign => self.bit_assign(dst_block, tmp_block)?,
            SetOperation::Or => self.bit_or(required(dst_block)?, tmp_block)?,
            SetOperation::And => self.bit_and(dst_block, tmp_block)?,
            SetOperation::Sub => self.bit_sub(required(dst_block)?, tmp_block)?,
            SetOperation::Xor => self.bit_xor(required(dst_block)?, tmp_block)?,
            SetOperation::Count | SetOperation::CountB => self.bit_count(tmp_block)?,
            SetOperation::CountA => self.bit_count_a(dst_block, tmp_block)?,
            SetOperation::CountAnd => self.bit_count_and(required(dst_block)?, tmp_block)?,
            SetOperation::CountOr => self.bit_count_or(required(dst_block)?, tmp_block)?,
            SetOperation::CountXor => self.bit_count_xor(required(dst_block)?, tmp_block)?,
            SetOperation::CountSubAb => {
                self.bit_count_sub_ab(required(dst_block)?, tmp_block)?
            }
            SetOperation::CountSubBa => {
                self.bit_count_sub_ba(required(dst_block)?, tmp_block)?
            }
        };
        self.state = IteratorState::Blocks;
        self.block_idx += 1;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Per-operation combiners. Each consumes exactly one block payload.

    fn bit_assign(
        &mut self,
        dst_block: Option<&mut BitBlock>,
        tmp_block: &mut BitBlock,
    ) -> Result<u32> {
        match self.block_type {
            BLOCK_BIT => match dst_block {
                Some(d) => self.reader.get_32_array(&mut d[..]),
                None => self.reader.skip_32(BLOCK_WORDS),
            },
            BLOCK_BIT_0RUNS => {
                let mut dst = dst_block;
                if let Some(d) = dst.as_deref_mut() {
                    d.fill(0);
                }
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        match dst.as_deref_mut() {
                            Some(d) => self.reader.get_32_array(&mut d[j..j + run_length]),
                            None => self.reader.skip_32(run_length),
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                match dst_block {
                    Some(d) => {
                        d[..head_idx].fill(0);
                        self.reader.get_32_array(&mut d[head_idx..=tail_idx]);
                        d[tail_idx + 1..].fill(0);
                    }
                    None => self.reader.skip_32(tail_idx - head_idx + 1),
                }
            }
            BLOCK_ARRBIT | BLOCK_BIT_1BIT => {
                self.get_arr_bit(dst_block, true);
            }
            BLOCK_ARRBIT_INV => self.get_inv_arr(dst_block),
            BLOCK_ARR_BIENC => match dst_block {
                Some(d) => {
                    d.fill(0);
                    read_bic_arr(&mut self.reader, Some(d));
                }
                None => read_bic_arr(&mut self.reader, None),
            },
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                if let Some(d) = dst_block {
                    d.copy_from_slice(&tmp_block[..]);
                }
            }
            BLOCK_BITGAP_BIENC => match dst_block {
                Some(d) => {
                    d.fill(0);
                    read_bic_gap(&mut self.reader, Some(d), &mut self.id_array);
                }
                None => read_bic_gap(&mut self.reader, None, &mut self.id_array),
            },
            BLOCK_BIT_DIGEST0 => match dst_block {
                Some(d) => {
                    d.fill(0);
                    read_digest0_block(&mut self.reader, Some(d));
                }
                None => read_digest0_block(&mut self.reader, None),
            },
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(0)
    }

    fn bit_or(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        match self.block_type {
            BLOCK_BIT => {
                self.reader.get_32_array_or(&mut dst[..]);
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &mut dst[head_idx..=tail_idx] {
                    *w |= self.reader.get_32();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &mut dst[j..j + run_length] {
                            *w |= self.reader.get_32();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_1BIT | BLOCK_ARRBIT => {
                self.get_arr_bit(Some(dst), false);
            }
            BLOCK_ARRBIT_INV => {
                self.get_inv_arr(Some(&mut *tmp_block));
                block::bit_or(dst, tmp_block);
            }
            BLOCK_ARR_BIENC => read_bic_arr(&mut self.reader, Some(dst)),
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                block::bit_or(dst, tmp_block);
            }
            BLOCK_BITGAP_BIENC => read_bic_gap(&mut self.reader, Some(dst), &mut self.id_array),
            BLOCK_BIT_DIGEST0 => read_digest0_block(&mut self.reader, Some(dst)),
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(0)
    }

    fn bit_and(
        &mut self,
        dst_block: Option<&mut BitBlock>,
        tmp_block: &mut BitBlock,
    ) -> Result<u32> {
        let mut dst = dst_block;
        match self.block_type {
            BLOCK_BIT => match dst {
                Some(d) => {
                    self.reader.get_32_array_and(&mut d[..]);
                }
                None => self.reader.skip_32(BLOCK_WORDS),
            },
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    match dst.as_deref_mut() {
                        Some(d) => {
                            if run_type {
                                for w in &mut d[j..j + run_length] {
                                    *w &= self.reader.get_32();
                                }
                            } else {
                                d[j..j + run_length].fill(0);
                            }
                        }
                        None => {
                            if run_type {
                                self.reader.skip_32(run_length);
                            }
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                match dst {
                    Some(d) => {
                        d[..head_idx].fill(0);
                        for w in &mut d[head_idx..=tail_idx] {
                            *w &= self.reader.get_32();
                        }
                        d[tail_idx + 1..].fill(0);
                    }
                    None => self.reader.skip_32(tail_idx - head_idx + 1),
                }
            }
            BLOCK_BIT_1BIT | BLOCK_ARRBIT => {
                self.get_arr_bit(Some(&mut *tmp_block), true);
                if let Some(d) = dst {
                    block::bit_and(d, tmp_block);
                }
            }
            BLOCK_ARRBIT_INV => {
                self.get_inv_arr(Some(&mut *tmp_block));
                if let Some(d) = dst {
                    block::bit_and(d, tmp_block);
                }
            }
            BLOCK_ARR_BIENC => match dst {
                Some(d) => {
                    tmp_block.fill(0);
                    read_bic_arr(&mut self.reader, Some(&mut *tmp_block));
                    block::bit_and(d, tmp_block);
                }
                None => read_bic_arr(&mut self.reader, None),
            },
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                if let Some(d) = dst {
                    block::bit_and(d, tmp_block);
                }
            }
            BLOCK_BITGAP_BIENC => match dst {
                Some(d) => {
                    tmp_block.fill(0);
                    read_bic_gap(&mut self.reader, Some(&mut *tmp_block), &mut self.id_array);
                    block::bit_and(d, tmp_block);
                }
                None => read_bic_gap(&mut self.reader, None, &mut self.id_array),
            },
            BLOCK_BIT_DIGEST0 => match dst {
                Some(d) => {
                    tmp_block.fill(0);
                    read_digest0_block(&mut self.reader, Some(&mut *tmp_block));
                    block::bit_and(d, tmp_block);
                }
                None => read_digest0_block(&mut self.reader, None),
            },
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(0)
    }

    fn bit_sub(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter_mut() {
                    *w &= !self.reader.get_32();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &mut dst[j..j + run_length] {
                            *w &= !self.reader.get_32();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &mut dst[head_idx..=tail_idx] {
                    *w &= !self.reader.get_32();
                }
            }
            BLOCK_BIT_1BIT | BLOCK_ARRBIT => {
                self.get_arr_bit(Some(&mut *tmp_block), true);
                block::bit_sub(dst, tmp_block);
            }
            BLOCK_ARRBIT_INV => {
                self.get_inv_arr(Some(&mut *tmp_block));
                block::bit_sub(dst, tmp_block);
            }
            BLOCK_ARR_BIENC => {
                tmp_block.fill(0);
                read_bic_arr(&mut self.reader, Some(&mut *tmp_block));
                block::bit_sub(dst, tmp_block);
            }
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                block::bit_sub(dst, tmp_block);
            }
            BLOCK_BITGAP_BIENC => {
                tmp_block.fill(0);
                read_bic_gap(&mut self.reader, Some(&mut *tmp_block), &mut self.id_array);
                block::bit_sub(dst, tmp_block);
            }
            BLOCK_BIT_DIGEST0 => {
                tmp_block.fill(0);
                read_digest0_block(&mut self.reader, Some(&mut *tmp_block));
                block::bit_sub(dst, tmp_block);
            }
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(0)
    }

    fn bit_xor(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter_mut() {
                    *w ^= self.reader.get_32();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &mut dst[j..j + run_length] {
                            *w ^= self.reader.get_32();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &mut dst[head_idx..=tail_idx] {
                    *w ^= self.reader.get_32();
                }
            }
            BLOCK_BIT_1BIT | BLOCK_ARRBIT => {
                self.get_arr_bit(Some(&mut *tmp_block), true);
                block::bit_xor(dst, tmp_block);
            }
            BLOCK_ARRBIT_INV => {
                self.get_inv_arr(Some(&mut *tmp_block));
                block::bit_xor(dst, tmp_block);
            }
            BLOCK_ARR_BIENC => {
                tmp_block.fill(0);
                read_bic_arr(&mut self.reader, Some(&mut *tmp_block));
                block::bit_xor(dst, tmp_block);
            }
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                block::bit_xor(dst, tmp_block);
            }
            BLOCK_BITGAP_BIENC => {
                tmp_block.fill(0);
                read_bic_gap(&mut self.reader, Some(&mut *tmp_block), &mut self.id_array);
                block::bit_xor(dst, tmp_block);
            }
            BLOCK_BIT_DIGEST0 => {
                tmp_block.fill(0);
                read_digest0_block(&mut self.reader, Some(&mut *tmp_block));
                block::bit_xor(dst, tmp_block);
            }
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(0)
    }

    /// Bit count of the stream block alone.
    fn bit_count(&mut self, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for _ in 0..BLOCK_WORDS {
                    count += self.reader.get_32().count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for _ in 0..run_length {
                            count += self.reader.get_32().count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for _ in head_idx..=tail_idx {
                    count += self.reader.get_32().count_ones();
                }
            }
            BLOCK_ARRBIT => count += self.get_arr_bit(None, false),
            BLOCK_BIT_1BIT => {
                let _ = self.reader.get_16();
                count += 1;
            }
            BLOCK_ARRBIT_INV => {
                self.get_inv_arr(Some(&mut *tmp_block));
                count += block::bit_count(tmp_block);
            }
            BLOCK_ARR_BIENC => {
                tmp_block.fill(0);
                read_bic_arr(&mut self.reader, Some(&mut *tmp_block));
                count += block::bit_count(tmp_block);
            }
            BLOCK_ARR_BIENC_INV => {
                read_bic_arr_inv(&mut self.reader, tmp_block);
                count += block::bit_count(tmp_block);
            }
            BLOCK_BIT_DIGEST0 => {
                tmp_block.fill(0);
                read_digest0_block(&mut self.reader, Some(&mut *tmp_block));
                count += block::bit_count(tmp_block);
            }
            BLOCK_BITGAP_BIENC => {
                tmp_block.fill(0);
                read_bic_gap(&mut self.reader, Some(&mut *tmp_block), &mut self.id_array);
                count += block::bit_count(tmp_block);
            }
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(count)
    }

    /// Bit count of the caller block; the stream block is dry-read.
    fn bit_count_a(
        &mut self,
        dst_block: Option<&mut BitBlock>,
        tmp_block: &mut BitBlock,
    ) -> Result<u32> {
        let count = match &dst_block {
            Some(d) => block::bit_count(d),
            None => 0,
        };
        self.bit_assign(None, tmp_block)?; // advance past the payload
        Ok(count)
    }

    fn bit_count_and(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter() {
                    count += (w & self.reader.get_32()).count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &dst[j..j + run_length] {
                            count += (w & self.reader.get_32()).count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &dst[head_idx..=tail_idx] {
                    count += (w & self.reader.get_32()).count_ones();
                }
            }
            _ => {
                self.materialize_into_tmp(tmp_block)?;
                count += block::and_count(dst, tmp_block);
            }
        }
        Ok(count)
    }

    fn bit_count_or(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter() {
                    count += (w | self.reader.get_32()).count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &dst[j..j + run_length] {
                            count += (w | self.reader.get_32()).count_ones();
                        }
                    } else {
                        for w in &dst[j..j + run_length] {
                            count += w.count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &dst[..head_idx] {
                    count += w.count_ones();
                }
                for w in &dst[head_idx..=tail_idx] {
                    count += (w | self.reader.get_32()).count_ones();
                }
                for w in &dst[tail_idx + 1..] {
                    count += w.count_ones();
                }
            }
            _ => {
                self.materialize_into_tmp(tmp_block)?;
                count += block::or_count(dst, tmp_block);
            }
        }
        Ok(count)
    }

    fn bit_count_xor(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter() {
                    count += (w ^ self.reader.get_32()).count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &dst[j..j + run_length] {
                            count += (w ^ self.reader.get_32()).count_ones();
                        }
                    } else {
                        for w in &dst[j..j + run_length] {
                            count += w.count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &dst[..head_idx] {
                    count += w.count_ones();
                }
                for w in &dst[head_idx..=tail_idx] {
                    count += (w ^ self.reader.get_32()).count_ones();
                }
                for w in &dst[tail_idx + 1..] {
                    count += w.count_ones();
                }
            }
            _ => {
                self.materialize_into_tmp(tmp_block)?;
                count += block::xor_count(dst, tmp_block);
            }
        }
        Ok(count)
    }

    fn bit_count_sub_ab(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter() {
                    count += (w & !self.reader.get_32()).count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &dst[j..j + run_length] {
                            count += (w & !self.reader.get_32()).count_ones();
                        }
                    } else {
                        for w in &dst[j..j + run_length] {
                            count += w.count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &dst[..head_idx] {
                    count += w.count_ones();
                }
                for w in &dst[head_idx..=tail_idx] {
                    count += (w & !self.reader.get_32()).count_ones();
                }
                for w in &dst[tail_idx + 1..] {
                    count += w.count_ones();
                }
            }
            _ => {
                self.materialize_into_tmp(tmp_block)?;
                count += block::sub_count(dst, tmp_block);
            }
        }
        Ok(count)
    }

    fn bit_count_sub_ba(&mut self, dst: &mut BitBlock, tmp_block: &mut BitBlock) -> Result<u32> {
        let mut count = 0u32;
        match self.block_type {
            BLOCK_BIT => {
                for w in dst.iter() {
                    count += (self.reader.get_32() & !w).count_ones();
                }
            }
            BLOCK_BIT_0RUNS => {
                let mut run_type = self.reader.get_8() != 0;
                let mut j = 0usize;
                while j < BLOCK_WORDS {
                    let run_length = self.reader.get_16() as usize;
                    if run_type {
                        for w in &dst[j..j + run_length] {
                            count += (self.reader.get_32() & !w).count_ones();
                        }
                    }
                    j += run_length;
                    run_type = !run_type;
                }
            }
            BLOCK_BIT_INTERVAL => {
                let head_idx = self.reader.get_16() as usize;
                let tail_idx = self.reader.get_16() as usize;
                for w in &dst[head_idx..=tail_idx] {
                    count += (self.reader.get_32() & !w).count_ones();
                }
            }
            _ => {
                self.materialize_into_tmp(tmp_block)?;
                count += block::sub_count(tmp_block, dst);
            }
        }
        Ok(count)
    }

    /// Decodes the current array-form block into `tmp_block` (overwrite).
    fn materialize_into_tmp(&mut self, tmp_block: &mut BitBlock) -> Result<()> {
        match self.block_type {
            BLOCK_BIT_1BIT | BLOCK_ARRBIT => {
                self.get_arr_bit(Some(&mut *tmp_block), true);
            }
            BLOCK_ARRBIT_INV => self.get_inv_arr(Some(&mut *tmp_block)),
            BLOCK_ARR_BIENC => {
                tmp_block.fill(0);
                read_bic_arr(&mut self.reader, Some(&mut *tmp_block));
            }
            BLOCK_ARR_BIENC_INV => read_bic_arr_inv(&mut self.reader, tmp_block),
            BLOCK_BITGAP_BIENC => {
                tmp_block.fill(0);
                read_bic_gap(&mut self.reader, Some(&mut *tmp_block), &mut self.id_array);
            }
            BLOCK_BIT_DIGEST0 => {
                tmp_block.fill(0);
                read_digest0_block(&mut self.reader, Some(&mut *tmp_block));
            }
            other => return Err(unexpected_bit_block(other)),
        }
        Ok(())
    }

    /// Reads a position-array block into `dst_block` (or dry-reads),
    /// returning the number of bits set.
    fn get_arr_bit(&mut self, dst_block: Option<&mut BitBlock>, clear_target: bool) -> u32 {
        debug_assert!(
            self.block_type == BLOCK_ARRBIT || self.block_type == BLOCK_BIT_1BIT
        );
        let len = self.reader.get_16(); // array length or the 1-bit index
        match dst_block {
            Some(d) => {
                if clear_target {
                    d.fill(0);
                }
                if self.block_type == BLOCK_BIT_1BIT {
                    block::set_bit(d, len as u32);
                    return 1;
                }
                for _ in 0..len {
                    let bit_idx = self.reader.get_16();
                    block::set_bit(d, bit_idx as u32);
                }
                len as u32
            }
            None => {
                if self.block_type == BLOCK_BIT_1BIT {
                    return 1; // the index was already consumed
                }
                self.reader.skip_16(len as usize);
                len as u32
            }
        }
    }

    /// Reads an inverted position-array block into `dst_block` (all ones
    /// minus the listed positions), or dry-reads.
    fn get_inv_arr(&mut self, dst_block: Option<&mut BitBlock>) {
        let len = self.reader.get_16();
        match dst_block {
            Some(d) => {
                d.fill(!0);
                for _ in 0..len {
                    let bit_idx = self.reader.get_16();
                    block::clear_bit(d, bit_idx as u32);
                }
            }
            None => self.reader.skip_16(len as usize),
        }
    }
}

fn required(dst: Option<&mut BitBlock>) -> Result<&mut BitBlock> {
    dst.ok_or_else(|| {
        Error::InvalidInput("operation requires a materialized target block".to_string())
    })
}

fn unexpected_bit_block(block_type: u8) -> Error {
    Error::Format(format!(
        "unexpected bit block type: 0x{block_type:02x}"
    ))
}
