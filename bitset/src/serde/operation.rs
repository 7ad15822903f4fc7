//! Set operations against a serialized stream.
//!
//! The engine walks a serialized blob with the [`StreamIterator`] and
//! combines every block event with the corresponding in-memory block,
//! without materializing the serialized argument as a whole set. Counting
//! variants return the bit count of the combined result; `exit_on_one`
//! returns as soon as the operation has produced any set bit.
//!
//! When a `(from, to)` block range is set the engine stops after the
//! block containing `to`; this backs `deserialize_range` (an AND-mode
//! gather against a range-masked target).

use common::serde::reader::{BigEndian, Endian, LittleEndian};

use super::stream::{IteratorState, StreamIterator};
use super::*;
use crate::bitset::BitSet;
use crate::block::{self, BLOCK_BITS, BitBlock};
use crate::error::{Error, Result};
use crate::gap;

/// Set-algebra operation applied between a bit-set and a serialized
/// stream. `Count*` variants only report the resulting bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    And,
    Or,
    Sub,
    Xor,
    /// Overwrite the target with the stream content.
    Assign,
    /// Bit count of the stream argument.
    Count,
    CountAnd,
    CountXor,
    CountOr,
    CountSubAb,
    CountSubBa,
    /// Bit count of the target.
    CountA,
    /// Same as [`SetOperation::Count`].
    CountB,
}

impl SetOperation {
    /// True for operations that never mutate the target set.
    pub fn is_const(self) -> bool {
        matches!(
            self,
            SetOperation::Count
                | SetOperation::CountAnd
                | SetOperation::CountXor
                | SetOperation::CountOr
                | SetOperation::CountSubAb
                | SetOperation::CountSubBa
                | SetOperation::CountA
                | SetOperation::CountB
        )
    }
}

/// Applies `op` between `bv` and the serialized stream in `buf`.
///
/// Returns the operation's bit count (counting variants), or 1/0 under
/// `exit_on_one` as soon as any result bit exists.
pub fn operation_deserialize(
    bv: &mut BitSet,
    buf: &[u8],
    op: SetOperation,
    exit_on_one: bool,
) -> Result<u64> {
    let flags = *buf
        .first()
        .ok_or_else(|| Error::Format("empty stream".to_string()))?;
    let count = if foreign_byte_order(flags, buf)? {
        run::<BigEndian>(bv, buf, op, exit_on_one, None)?
    } else {
        run::<LittleEndian>(bv, buf, op, exit_on_one, None)?
    };
    tracing::debug!(?op, count, "operation deserialize complete");
    Ok(count)
}

/// AND-restricted deserialization over the bit range `[from, to]`.
///
/// The target should carry set bits over the range of interest; blocks
/// past the one containing `to` are not touched.
pub fn deserialize_range(bv: &mut BitSet, buf: &[u8], from: u64, to: u64) -> Result<()> {
    let flags = *buf
        .first()
        .ok_or_else(|| Error::Format("empty stream".to_string()))?;
    let range = Some((
        from / BLOCK_BITS as u64,
        to / BLOCK_BITS as u64,
    ));
    if foreign_byte_order(flags, buf)? {
        run::<BigEndian>(bv, buf, SetOperation::And, false, range)?;
    } else {
        run::<LittleEndian>(bv, buf, SetOperation::And, false, range)?;
    }
    Ok(())
}

fn foreign_byte_order(flags: u8, buf: &[u8]) -> Result<bool> {
    if flags & HM_NO_BO != 0 {
        return Ok(false);
    }
    let bo = *buf
        .get(1)
        .ok_or_else(|| Error::Format("truncated header: missing byte order".to_string()))?;
    Ok(bo == BYTE_ORDER_BIG)
}

fn run<E: Endian>(
    bv: &mut BitSet,
    buf: &[u8],
    op: SetOperation,
    exit_on_one: bool,
    range: Option<(u64, u64)>,
) -> Result<u64> {
    let mut sit = StreamIterator::<E>::new(buf)?;

    let mut op = op;
    if op == SetOperation::Assign {
        bv.clear();
        op = SetOperation::Or;
    }

    if sit.bv_size() > 0 && sit.bv_size() > bv.size() {
        bv.resize(sit.bv_size());
    }
    if sit.state() == IteratorState::ListIds {
        return process_id_list(bv, &mut sit, op);
    }

    let mut count: u64 = 0;
    let mut tmp = block::new_block();
    let mut tmp2 = block::new_block();
    let mut gap_temp = vec![0u16; block::BLOCK_BITS as usize + 2];
    let mut idx: u64 = 0;

    loop {
        if sit.is_eof() {
            count += finalize_target(bv, op, idx);
            return Ok(count);
        }

        match sit.state() {
            IteratorState::Blocks => {
                sit.next()?;
                continue;
            }

            IteratorState::BitBlock => {
                debug_assert_eq!(sit.block_idx(), idx);
                let present = bv.get_block(idx).is_some();
                let mut sop = op;
                if !present {
                    match op {
                        SetOperation::And
                        | SetOperation::Sub
                        | SetOperation::CountAnd
                        | SetOperation::CountSubAb
                        | SetOperation::CountA => {
                            // target side is zero: only seek the stream
                            sop = SetOperation::Assign;
                        }
                        SetOperation::Or | SetOperation::Xor | SetOperation::Assign => {
                            bv.deoptimize_block(idx);
                        }
                        SetOperation::Count
                        | SetOperation::CountXor
                        | SetOperation::CountOr
                        | SetOperation::CountSubBa
                        | SetOperation::CountB => {
                            sop = SetOperation::Count;
                        }
                    }
                }
                let dry = !present
                    && matches!(sop, SetOperation::Assign | SetOperation::Count);
                let c = if dry {
                    sit.get_bit_block(None, &mut tmp, sop)?
                } else {
                    let dst = bv.deoptimize_block(idx);
                    sit.get_bit_block(Some(dst), &mut tmp, sop)?
                };
                count += c as u64;
                if exit_on_one && count > 0 {
                    return Ok(count);
                }
                match op {
                    SetOperation::And
                    | SetOperation::Sub
                    | SetOperation::Xor
                    | SetOperation::Or => bv.optimize_block_shallow(idx),
                    _ => {}
                }
            }

            IteratorState::ZeroBlocks => {
                debug_assert_eq!(sit.block_idx(), idx);
                match op {
                    SetOperation::Assign
                    | SetOperation::Sub
                    | SetOperation::CountAnd
                    | SetOperation::Or
                    | SetOperation::Xor
                    | SetOperation::CountSubBa
                    | SetOperation::CountB => {
                        idx = sit.skip_mono_blocks();
                        continue;
                    }
                    SetOperation::And => {
                        let start = idx;
                        idx = sit.skip_mono_blocks();
                        bv.zero_block_range(start, idx - 1);
                        continue;
                    }
                    _ => {}
                }
                // counting ops recombine the target with a zero block
                let present = bv.get_block(idx).is_some();
                sit.next()?;
                if present {
                    match op {
                        SetOperation::CountSubAb
                        | SetOperation::CountA
                        | SetOperation::CountOr
                        | SetOperation::Count
                        | SetOperation::CountXor => {
                            count += bv.block_bit_count(idx) as u64;
                            if exit_on_one && count > 0 {
                                return Ok(count);
                            }
                        }
                        _ => {}
                    }
                }
            }

            IteratorState::OneBlocks => {
                debug_assert_eq!(sit.block_idx(), idx);
                let present = bv.get_block(idx).is_some();
                sit.next()?;
                match op {
                    SetOperation::Or | SetOperation::Assign => bv.set_block_full(idx),
                    SetOperation::CountOr | SetOperation::CountB | SetOperation::Count => {
                        count += BLOCK_BITS as u64;
                    }
                    SetOperation::Sub => bv.zero_block(idx),
                    SetOperation::CountSubAb | SetOperation::And => {}
                    SetOperation::CountAnd | SetOperation::CountA => {
                        count += bv.block_bit_count(idx) as u64;
                    }
                    SetOperation::Xor => {
                        if present {
                            let dst = bv.deoptimize_block(idx);
                            block::bit_invert(dst);
                            bv.optimize_block_shallow(idx);
                        } else {
                            bv.set_block_full(idx);
                        }
                    }
                    SetOperation::CountXor | SetOperation::CountSubBa => {
                        // |blk ^ full| and |full \ blk| both count the
                        // cleared bits
                        count += (BLOCK_BITS - bv.block_bit_count(idx)) as u64;
                    }
                }
                if exit_on_one && count > 0 {
                    return Ok(count);
                }
            }

            IteratorState::GapBlock => {
                debug_assert_eq!(sit.block_idx(), idx);
                let len = sit.get_gap_block(&mut gap_temp)?;
                if op.is_const() {
                    count += count_gap_vs_target(
                        bv,
                        idx,
                        &gap_temp[..len],
                        op,
                        &mut tmp,
                        &mut tmp2,
                    ) as u64;
                    if exit_on_one && count > 0 {
                        return Ok(count);
                    }
                } else {
                    let present = bv.get_block(idx).is_some();
                    if !present {
                        match op {
                            SetOperation::And | SetOperation::Sub => {}
                            SetOperation::Or | SetOperation::Xor => {
                                install_gap_block(bv, idx, &gap_temp[..len]);
                            }
                            _ => {
                                return Err(Error::InvalidInput(format!(
                                    "operation {op:?} cannot combine a GAP block"
                                )));
                            }
                        }
                    } else {
                        gap::convert_to_bitset(&mut tmp, &gap_temp[..len]);
                        let dst = bv.deoptimize_block(idx);
                        match op {
                            SetOperation::Or => block::bit_or(dst, &tmp),
                            SetOperation::And => block::bit_and(dst, &tmp),
                            SetOperation::Sub => block::bit_sub(dst, &tmp),
                            SetOperation::Xor => block::bit_xor(dst, &tmp),
                            _ => unreachable!("const ops handled above"),
                        }
                        bv.optimize_block_shallow(idx);
                    }
                    if exit_on_one && bv.block_bit_count(idx) > 0 {
                        return Ok(1);
                    }
                }
            }

            IteratorState::ListIds | IteratorState::Unknown => {
                return Err(Error::Format(
                    "unexpected stream iterator state".to_string(),
                ));
            }
        }

        idx += 1;
        if let Some((_, to)) = range
            && idx > to
        {
            break;
        }
    }
    Ok(count)
}

/// Stores a decoded GAP block into an absent slot, materializing to bits
/// when it outgrows every GAP level.
fn install_gap_block(bv: &mut BitSet, nb: u64, gap_words: &[u16]) {
    match gap::calc_level(gap_words.len(), bv.glen()) {
        Some(level) => {
            let mut words = gap_words.to_vec();
            gap::set_level(&mut words[0], level);
            bv.set_block_gap(nb, words);
        }
        None => {
            let mut b = block::new_block();
            gap::convert_to_bitset(&mut b, gap_words);
            bv.set_block_bits(nb, b);
        }
    }
}

/// Counting recombination of a decoded GAP block against the target block.
fn count_gap_vs_target(
    bv: &BitSet,
    nb: u64,
    gap_words: &[u16],
    op: SetOperation,
    tmp: &mut BitBlock,
    tmp2: &mut BitBlock,
) -> u32 {
    match op {
        SetOperation::Count | SetOperation::CountB => gap::bit_count(gap_words),
        SetOperation::CountA => bv.block_bit_count(nb),
        _ => {
            gap::convert_to_bitset(tmp, gap_words);
            bv.materialize_block(nb, tmp2);
            match op {
                SetOperation::CountAnd => block::and_count(tmp2, tmp),
                SetOperation::CountOr => block::or_count(tmp2, tmp),
                SetOperation::CountXor => block::xor_count(tmp2, tmp),
                SetOperation::CountSubAb => block::sub_count(tmp2, tmp),
                SetOperation::CountSubBa => block::sub_count(tmp, tmp2),
                _ => unreachable!("non-counting op in count_gap_vs_target"),
            }
        }
    }
}

/// Clears or counts the target tail once the stream has ended.
fn finalize_target(bv: &mut BitSet, op: SetOperation, idx: u64) -> u64 {
    match op {
        SetOperation::Or
        | SetOperation::Sub
        | SetOperation::Xor
        | SetOperation::Count
        | SetOperation::CountB
        | SetOperation::CountAnd
        | SetOperation::CountSubBa => 0,
        SetOperation::Assign | SetOperation::And => {
            let last = bv.nblocks() - 1;
            if idx <= last {
                bv.zero_block_range(idx, last);
            }
            0
        }
        SetOperation::CountA
        | SetOperation::CountOr
        | SetOperation::CountXor
        | SetOperation::CountSubAb => bv.count_from_block(idx),
    }
}

/// Handles the legacy plain-integer-list stream body.
fn process_id_list<E: Endian>(
    bv: &mut BitSet,
    sit: &mut StreamIterator<'_, E>,
    op: SetOperation,
) -> Result<u64> {
    let id_count = sit.id_count() as u64 + 1; // the first id is pre-read
    let mut count: u64 = 0;
    match op {
        SetOperation::And => {
            let mut tmp = BitSet::with_size(bv.size());
            load_id_list(&mut tmp, sit, id_count, true)?;
            bv.intersect_with(&tmp);
        }
        SetOperation::Or => load_id_list(bv, sit, id_count, true)?,
        SetOperation::Sub => load_id_list(bv, sit, id_count, false)?,
        SetOperation::Xor => {
            for _ in 0..id_count {
                let id = sit.id() as u64;
                if bv.contains(id) {
                    bv.remove(id);
                } else {
                    bv.set(id);
                }
                sit.next()?;
            }
        }
        SetOperation::Count | SetOperation::CountB => {
            for _ in 0..id_count {
                count += 1;
                sit.next()?;
            }
        }
        SetOperation::CountA => return Ok(bv.count()),
        SetOperation::CountAnd => {
            for _ in 0..id_count {
                count += bv.contains(sit.id() as u64) as u64;
                sit.next()?;
            }
        }
        SetOperation::CountOr => {
            let mut tmp = BitSet::with_size(bv.size());
            load_id_list(&mut tmp, sit, id_count, true)?;
            tmp.union_with(bv);
            count = tmp.count();
        }
        SetOperation::CountXor => {
            let mut tmp = BitSet::with_size(bv.size());
            load_id_list(&mut tmp, sit, id_count, true)?;
            tmp.symmetric_difference_with(bv);
            count = tmp.count();
        }
        SetOperation::CountSubAb => {
            let mut tmp = bv.clone();
            load_id_list(&mut tmp, sit, id_count, false)?;
            count = tmp.count();
        }
        SetOperation::CountSubBa => {
            let mut tmp = BitSet::with_size(bv.size());
            load_id_list(&mut tmp, sit, id_count, true)?;
            tmp.difference_with(bv);
            count = tmp.count();
        }
        SetOperation::Assign => {
            return Err(Error::InvalidInput(
                "assign over an id-list stream is resolved before dispatch".to_string(),
            ));
        }
    }
    Ok(count)
}

/// Reads `id_count` ids from the iterator, setting or clearing them.
fn load_id_list<E: Endian>(
    bv: &mut BitSet,
    sit: &mut StreamIterator<'_, E>,
    id_count: u64,
    set_bits: bool,
) -> Result<()> {
    for _ in 0..id_count {
        let id = sit.id() as u64;
        if set_bits {
            bv.set(id);
        } else {
            bv.remove(id);
        }
        sit.next()?;
    }
    Ok(())
}
