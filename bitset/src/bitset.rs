//! Sparse compressed bit-set container.
//!
//! The 2^32-bit (or 2^64-bit in wide mode) address space is partitioned
//! into 65536-bit blocks. Only blocks holding data are materialized, in one
//! of three forms:
//!
//! - `Bits`: 2048 32-bit words
//! - `Gap`: run-length form (see [`crate::gap`])
//! - `Full`: logical all-ones sentinel, no payload
//!
//! Absent blocks are logically all-zero. The serialization core consumes
//! this container through block-level accessors; the whole-set operations
//! (`union_with`, `intersect_with`, ...) mirror the usual posting-list
//! surface and back the operation-equivalence tests.

use std::collections::BTreeMap;

use crate::block::{self, BLOCK_BITS, BitBlock};
use crate::gap;

/// Size in bits of the narrow (default) address space.
pub const NARROW_SPACE_BITS: u64 = 1 << 32;

/// Size sentinel for the full wide address space.
pub const WIDE_SPACE_BITS: u64 = u64::MAX;

/// One materialized block of the set.
#[derive(Clone)]
pub enum Block {
    /// Plain bit block.
    Bits(Box<BitBlock>),
    /// Run-length (GAP) block.
    Gap(Vec<u16>),
    /// All-ones sentinel.
    Full,
}

/// Statistics gathered by [`BitSet::calc_stat`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub bit_blocks: usize,
    pub gap_blocks: usize,
    pub full_blocks: usize,
    /// Safe upper bound for a serialization of this set, in bytes.
    pub max_serialize_mem: usize,
    /// Heap bytes held by materialized blocks.
    pub memory_used: usize,
}

/// Sparse bit-set over a 64-bit address space.
#[derive(Clone)]
pub struct BitSet {
    blocks: BTreeMap<u64, Block>,
    size: u64,
    glen: [u16; gap::GAP_LEVELS],
}

impl Default for BitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BitSet {
    /// Creates an empty set over the narrow (2^32-bit) address space.
    pub fn new() -> Self {
        Self::with_size(NARROW_SPACE_BITS)
    }

    /// Creates an empty set holding `size` addressable bits.
    pub fn with_size(size: u64) -> Self {
        Self {
            blocks: BTreeMap::new(),
            size,
            glen: gap::GAP_LEN_TABLE,
        }
    }

    /// Addressable size in bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether addresses beyond 2^32 are representable.
    pub fn is_wide(&self) -> bool {
        self.size > NARROW_SPACE_BITS
    }

    /// Number of blocks in the addressable space.
    pub fn nblocks(&self) -> u64 {
        self.size.div_ceil(BLOCK_BITS as u64)
    }

    /// GAP level capacity table.
    pub fn glen(&self) -> &[u16; gap::GAP_LEVELS] {
        &self.glen
    }

    /// Grows (or shrinks) the addressable size.
    pub fn resize(&mut self, size: u64) {
        if size < self.size {
            let last = size.div_ceil(BLOCK_BITS as u64);
            self.blocks.split_off(&last);
        }
        self.size = size;
    }

    /// Sets bit `idx`.
    pub fn set(&mut self, idx: u64) {
        debug_assert!(idx < self.size);
        let nb = idx / BLOCK_BITS as u64;
        let bit = (idx % BLOCK_BITS as u64) as u32;
        if matches!(self.blocks.get(&nb), Some(Block::Full)) {
            return;
        }
        let blk = self.deoptimize_block(nb);
        block::set_bit(blk, bit);
    }

    /// Clears bit `idx`.
    pub fn remove(&mut self, idx: u64) {
        debug_assert!(idx < self.size);
        let nb = idx / BLOCK_BITS as u64;
        let bit = (idx % BLOCK_BITS as u64) as u32;
        if !self.blocks.contains_key(&nb) {
            return;
        }
        let blk = self.deoptimize_block(nb);
        block::clear_bit(blk, bit);
    }

    /// Tests bit `idx`.
    pub fn contains(&self, idx: u64) -> bool {
        let nb = idx / BLOCK_BITS as u64;
        let bit = (idx % BLOCK_BITS as u64) as u32;
        match self.blocks.get(&nb) {
            None => false,
            Some(Block::Full) => true,
            Some(Block::Bits(b)) => block::test_bit(b.as_ref(), bit),
            Some(Block::Gap(g)) => gap::test_bit(g, bit as u16),
        }
    }

    /// Total number of set bits.
    pub fn count(&self) -> u64 {
        self.blocks
            .values()
            .map(|b| match b {
                Block::Full => BLOCK_BITS as u64,
                Block::Bits(blk) => block::bit_count(blk) as u64,
                Block::Gap(g) => gap::bit_count(g) as u64,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Clears all bits, keeping the addressable size.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    // ------------------------------------------------------------------
    // Block-level access (serialization collaborators)

    pub fn get_block(&self, nb: u64) -> Option<&Block> {
        self.blocks.get(&nb)
    }

    /// Index of the first materialized block at or after `from`.
    pub fn find_next_present_block(&self, from: u64) -> Option<u64> {
        self.blocks.range(from..).next().map(|(&nb, _)| nb)
    }

    /// Materializes block `nb` into `dst`. Returns false (and zeroes `dst`)
    /// when the block is absent.
    pub fn materialize_block(&self, nb: u64, dst: &mut BitBlock) -> bool {
        match self.blocks.get(&nb) {
            None => {
                dst.fill(0);
                false
            }
            Some(Block::Full) => {
                dst.fill(!0);
                true
            }
            Some(Block::Bits(b)) => {
                dst.copy_from_slice(b.as_ref());
                true
            }
            Some(Block::Gap(g)) => {
                gap::convert_to_bitset(dst, g);
                true
            }
        }
    }

    /// Total set bits in blocks at or after `from`.
    pub fn count_from_block(&self, from: u64) -> u64 {
        self.blocks
            .range(from..)
            .map(|(&nb, _)| self.block_bit_count(nb) as u64)
            .sum()
    }

    /// Bit count of one block.
    pub fn block_bit_count(&self, nb: u64) -> u32 {
        match self.blocks.get(&nb) {
            None => 0,
            Some(Block::Full) => BLOCK_BITS,
            Some(Block::Bits(b)) => block::bit_count(b),
            Some(Block::Gap(g)) => gap::bit_count(g),
        }
    }

    /// Converts block `nb` to plain bit form in place (materializing an
    /// absent block as zeros) and returns it mutably.
    pub fn deoptimize_block(&mut self, nb: u64) -> &mut BitBlock {
        let entry = self
            .blocks
            .entry(nb)
            .or_insert_with(|| Block::Bits(block::new_block()));
        match entry {
            Block::Bits(_) => {}
            Block::Full => *entry = Block::Bits(block::new_full_block()),
            Block::Gap(g) => {
                let mut b = block::new_block();
                gap::convert_to_bitset(&mut b, g);
                *entry = Block::Bits(b);
            }
        }
        match entry {
            Block::Bits(b) => b,
            _ => unreachable!(),
        }
    }

    pub fn set_block_bits(&mut self, nb: u64, bits: Box<BitBlock>) {
        self.blocks.insert(nb, Block::Bits(bits));
    }

    pub fn set_block_gap(&mut self, nb: u64, gap_words: Vec<u16>) {
        self.blocks.insert(nb, Block::Gap(gap_words));
    }

    pub fn set_block_full(&mut self, nb: u64) {
        self.blocks.insert(nb, Block::Full);
    }

    /// Marks blocks `[from, to]` all-one, clipping the boundary block to
    /// the addressable size.
    pub fn set_full_block_range(&mut self, from: u64, to: u64) {
        for nb in from..=to {
            self.blocks.insert(nb, Block::Full);
        }
        let tail_bits = (self.size % BLOCK_BITS as u64) as u32;
        let last = self.nblocks() - 1;
        if tail_bits != 0 && to >= last {
            let blk = self.deoptimize_block(last);
            for bit in tail_bits..BLOCK_BITS {
                block::clear_bit(blk, bit);
            }
        }
    }

    pub fn zero_block(&mut self, nb: u64) {
        self.blocks.remove(&nb);
    }

    /// Drops all blocks in `[from, to]`.
    pub fn zero_block_range(&mut self, from: u64, to: u64) {
        let keys: Vec<u64> = self.blocks.range(from..=to).map(|(&k, _)| k).collect();
        for k in keys {
            self.blocks.remove(&k);
        }
    }

    /// Post-combination cleanup of one bit block: drops it when empty,
    /// collapses it to the all-ones sentinel when saturated.
    pub fn optimize_block_shallow(&mut self, nb: u64) {
        if let Some(Block::Bits(b)) = self.blocks.get(&nb) {
            if block::is_all_zero(b) {
                self.blocks.remove(&nb);
            } else if block::is_all_one(b) {
                self.blocks.insert(nb, Block::Full);
            }
        }
    }

    /// Converts blocks to their most compact representation: empty blocks
    /// are dropped, saturated blocks become `Full`, bit blocks whose GAP
    /// form fits a level become `Gap`.
    pub fn optimize(&mut self) {
        let keys: Vec<u64> = self.blocks.keys().copied().collect();
        let mut gap_buf = vec![0u16; gap::GAP_MAX_BUFF_LEN + 1];
        for nb in keys {
            let replacement = match self.blocks.get(&nb) {
                Some(Block::Bits(b)) => {
                    if block::is_all_zero(b) {
                        Some(None)
                    } else if block::is_all_one(b) {
                        Some(Some(Block::Full))
                    } else {
                        let last = block::bit_to_gap(&mut gap_buf, b, gap::GAP_MAX_BUFF_LEN - 1);
                        match (last, gap::calc_level(last + 1, &self.glen)) {
                            (0, _) | (_, None) => None,
                            (_, Some(level)) => {
                                let mut words = gap_buf[..=last].to_vec();
                                gap::set_level(&mut words[0], level);
                                Some(Some(Block::Gap(words)))
                            }
                        }
                    }
                }
                Some(Block::Gap(g)) => {
                    if gap::is_all_zero(g) {
                        Some(None)
                    } else if gap::is_all_one(g) {
                        Some(Some(Block::Full))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match replacement {
                Some(None) => {
                    self.blocks.remove(&nb);
                }
                Some(Some(b)) => {
                    self.blocks.insert(nb, b);
                }
                None => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Whole-set operations

    /// Union (OR) with another set.
    pub fn union_with(&mut self, other: &BitSet) {
        self.size = self.size.max(other.size);
        for (&nb, b) in &other.blocks {
            if matches!(self.blocks.get(&nb), Some(Block::Full)) {
                continue;
            }
            match b {
                Block::Full => {
                    self.blocks.insert(nb, Block::Full);
                }
                Block::Gap(g) => {
                    let dst = self.deoptimize_block(nb);
                    gap::add_to_bitset(dst, g, gap::gap_len(g) - 1);
                }
                Block::Bits(src) => {
                    let dst = self.deoptimize_block(nb);
                    block::bit_or(dst, src);
                }
            }
            self.optimize_block_shallow(nb);
        }
    }

    /// Intersection (AND) with another set.
    pub fn intersect_with(&mut self, other: &BitSet) {
        let keys: Vec<u64> = self.blocks.keys().copied().collect();
        let mut temp = block::new_block();
        for nb in keys {
            match other.blocks.get(&nb) {
                None => {
                    self.blocks.remove(&nb);
                }
                Some(Block::Full) => {}
                Some(_) => {
                    other.materialize_block(nb, &mut temp);
                    let dst = self.deoptimize_block(nb);
                    block::bit_and(dst, &temp);
                    self.optimize_block_shallow(nb);
                }
            }
        }
    }

    /// Difference (AND-NOT) with another set.
    pub fn difference_with(&mut self, other: &BitSet) {
        let keys: Vec<u64> = self.blocks.keys().copied().collect();
        let mut temp = block::new_block();
        for nb in keys {
            match other.blocks.get(&nb) {
                None => {}
                Some(Block::Full) => {
                    self.blocks.remove(&nb);
                }
                Some(_) => {
                    other.materialize_block(nb, &mut temp);
                    let dst = self.deoptimize_block(nb);
                    block::bit_sub(dst, &temp);
                    self.optimize_block_shallow(nb);
                }
            }
        }
    }

    /// Symmetric difference (XOR) with another set.
    pub fn symmetric_difference_with(&mut self, other: &BitSet) {
        self.size = self.size.max(other.size);
        let mut temp = block::new_block();
        let keys: Vec<u64> = other.blocks.keys().copied().collect();
        for nb in keys {
            other.materialize_block(nb, &mut temp);
            let dst = self.deoptimize_block(nb);
            block::bit_xor(dst, &temp);
            self.optimize_block_shallow(nb);
        }
    }

    /// Gathers serialization statistics, including a safe output-buffer
    /// size bound for [`crate::serde::Serializer::serialize`].
    pub fn calc_stat(&self) -> Statistics {
        let mut st = Statistics::default();
        for b in self.blocks.values() {
            match b {
                Block::Bits(_) => {
                    st.bit_blocks += 1;
                    st.memory_used += block::BLOCK_WORDS * 4;
                }
                Block::Gap(g) => {
                    st.gap_blocks += 1;
                    st.memory_used += g.len() * 2;
                }
                Block::Full => st.full_blocks += 1,
            }
        }
        let present = self.blocks.len();
        // header + per block: worst plain form plus trial-encoding slack
        // (an interpolated trial may briefly exceed the plain form before
        // the encoder rolls it back) + run tokens between blocks.
        st.max_serialize_mem = 64 + present * (block::BLOCK_WORDS * 4 + 8192 + 16) + 16;
        st
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        if self.size != other.size {
            return false;
        }
        let mut a = block::new_block();
        let mut b = block::new_block();
        let keys: std::collections::BTreeSet<u64> = self
            .blocks
            .keys()
            .chain(other.blocks.keys())
            .copied()
            .collect();
        for nb in keys {
            self.materialize_block(nb, &mut a);
            other.materialize_block(nb, &mut b);
            if a != b {
                return false;
            }
        }
        true
    }
}

impl Eq for BitSet {}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitSet")
            .field("size", &self.size)
            .field("blocks", &self.blocks.len())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_set_and_test_bits() {
        // given
        let mut bv = BitSet::new();

        // when
        bv.set(0);
        bv.set(65535);
        bv.set(65536);
        bv.set(1 << 31);

        // then
        assert!(bv.contains(0));
        assert!(bv.contains(65535));
        assert!(bv.contains(65536));
        assert!(bv.contains(1 << 31));
        assert!(!bv.contains(1));
        assert_eq!(bv.count(), 4);
    }

    #[test]
    fn should_remove_bits() {
        // given
        let mut bv = BitSet::new();
        bv.set(100);
        bv.set(200);

        // when
        bv.remove(100);

        // then
        assert!(!bv.contains(100));
        assert!(bv.contains(200));
        assert_eq!(bv.count(), 1);
    }

    #[test]
    fn should_compare_by_content_not_representation() {
        // given - same content, one optimized to GAP form
        let mut a = BitSet::new();
        let mut b = BitSet::new();
        for i in 0..100u64 {
            a.set(i * 2);
            b.set(i * 2);
        }

        // when
        b.optimize();

        // then
        assert_eq!(a, b);
    }

    #[test]
    fn should_optimize_saturated_block_to_full() {
        // given
        let mut bv = BitSet::new();
        for i in 0..65536u64 {
            bv.set(65536 * 5 + i);
        }

        // when
        bv.optimize();

        // then
        assert!(matches!(bv.get_block(5), Some(Block::Full)));
        assert_eq!(bv.count(), 65536);
    }

    #[test]
    fn should_optimize_sparse_block_to_gap() {
        // given
        let mut bv = BitSet::new();
        bv.set(10);
        bv.set(11);
        bv.set(12);

        // when
        bv.optimize();

        // then
        assert!(matches!(bv.get_block(0), Some(Block::Gap(_))));
        assert_eq!(bv.count(), 3);
        assert!(bv.contains(11));
    }

    #[test]
    fn should_perform_union() {
        // given
        let mut a = BitSet::new();
        let mut b = BitSet::new();
        a.set(1);
        a.set(2);
        b.set(2);
        b.set(100_000);

        // when
        a.union_with(&b);

        // then
        assert_eq!(a.count(), 3);
        assert!(a.contains(1));
        assert!(a.contains(2));
        assert!(a.contains(100_000));
    }

    #[test]
    fn should_perform_intersection() {
        // given
        let mut a = BitSet::new();
        let mut b = BitSet::new();
        for i in 0..10 {
            a.set(i);
        }
        for i in 5..15 {
            b.set(i);
        }

        // when
        a.intersect_with(&b);

        // then
        assert_eq!(a.count(), 5);
        assert!(a.contains(5));
        assert!(a.contains(9));
        assert!(!a.contains(4));
    }

    #[test]
    fn should_perform_difference_and_symmetric_difference() {
        // given
        let mut a = BitSet::new();
        let mut b = BitSet::new();
        a.set(1);
        a.set(2);
        a.set(3);
        b.set(2);
        b.set(4);

        // when
        let mut d = a.clone();
        d.difference_with(&b);
        let mut x = a.clone();
        x.symmetric_difference_with(&b);

        // then
        assert_eq!(d.count(), 2);
        assert!(d.contains(1) && d.contains(3));
        assert_eq!(x.count(), 3);
        assert!(x.contains(1) && x.contains(3) && x.contains(4));
    }

    #[test]
    fn should_find_next_present_block() {
        // given
        let mut bv = BitSet::new();
        bv.set(65536 * 3);
        bv.set(65536 * 7);

        // then
        assert_eq!(bv.find_next_present_block(0), Some(3));
        assert_eq!(bv.find_next_present_block(4), Some(7));
        assert_eq!(bv.find_next_present_block(8), None);
    }

    #[test]
    fn should_report_statistics() {
        // given
        let mut bv = BitSet::new();
        bv.set(1);
        for i in 0..65536u64 {
            bv.set(65536 + i);
        }
        bv.optimize();

        // when
        let st = bv.calc_stat();

        // then
        assert_eq!(st.full_blocks, 1);
        assert_eq!(st.gap_blocks, 1);
        assert!(st.max_serialize_mem > 0);
    }

    #[test]
    fn should_support_wide_address_space() {
        // given
        let mut bv = BitSet::with_size(WIDE_SPACE_BITS);

        // when
        bv.set(1 << 40);

        // then
        assert!(bv.is_wide());
        assert!(bv.contains(1 << 40));
        assert_eq!(bv.nblocks(), 1 << 48);
    }
}
