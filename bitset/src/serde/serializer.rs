//! Adaptive per-block serialization.
//!
//! Every materialized block is scored against the candidate encodings the
//! current compression level allows, the cheapest model is encoded, and
//! the result is re-measured: a variable-cost encoding that fails to beat
//! the plain representation is rolled back by rewinding the output cursor
//! and the plain form is written instead. Runs of all-zero and all-one
//! blocks collapse into count-prefixed tokens.
//!
//! Compression levels:
//!
//! - 0-1: blocks are stored as-is
//! - 2: zero/one shortcuts, word-run and digest forms
//! - 3: adds position-array forms
//! - 4: adds Elias-Gamma coded GAP and array forms
//! - 5 (default): binary interpolative coding for GAPs and arrays
//!
//! A serializer session owns reusable scratch buffers and a per-block-type
//! statistics counter array, and is not meant to be shared across threads.

use bytes::{Bytes, BytesMut};
use common::serde::bitstream::BitWriter;
use common::serde::interpolative;
use common::serde::writer::ByteWriter;

use super::*;
use crate::bitset::{BitSet, Block, NARROW_SPACE_BITS, Statistics, WIDE_SPACE_BITS};
use crate::block::{self, BLOCK_BITS, BLOCK_WORDS, BitBlock, WAVE_WORDS};
use crate::gap::{self, GAP_EQUIV_LEN, GAP_MAX_BUFF_LEN};

/// Maximum supported compression level.
pub const COMPRESSION_LEVEL_MAX: u8 = 5;
/// Default compression level.
pub const COMPRESSION_LEVEL_DEFAULT: u8 = 5;

/// Serialization flag: omit the byte-order marker.
pub const NO_BYTE_ORDER: u8 = 1;
/// Serialization flag: omit the GAP level table.
pub const NO_GAP_LENGTH: u8 = 1 << 1;

/// Session-owned scratch buffers, reused across blocks.
struct Scratch {
    bit_idx: Vec<u16>,
    gap_temp: Vec<u16>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            bit_idx: Vec::new(),
            gap_temp: Vec::new(),
        }
    }
}

impl Scratch {
    fn sized() -> Self {
        Self {
            bit_idx: vec![0u16; BLOCK_BITS as usize + 2],
            gap_temp: vec![0u16; BLOCK_BITS as usize + 2],
        }
    }
}

/// Reusable bit-set serializer session.
pub struct Serializer {
    compression_level: u8,
    byte_order_serial: bool,
    gap_serial: bool,
    scratch: Scratch,
    compression_stat: [u64; 256],
    models: Vec<(u8, u32)>,
    // selector output for the block being encoded
    digest0: u64,
    bit_model_d0_size: u32,
    bit_model_0run_size: u32,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            compression_level: COMPRESSION_LEVEL_DEFAULT,
            byte_order_serial: true,
            gap_serial: false,
            scratch: Scratch::sized(),
            compression_stat: [0u64; 256],
            models: Vec::with_capacity(16),
            digest0: 0,
            bit_model_d0_size: 0,
            bit_model_0run_size: 0,
        }
    }

    /// Sets the compression level (0..=5); out-of-range values are ignored.
    pub fn set_compression_level(&mut self, level: u8) {
        if level <= COMPRESSION_LEVEL_MAX {
            self.compression_level = level;
        }
    }

    pub fn compression_level(&self) -> u8 {
        self.compression_level
    }

    /// When true (default) the stream carries a byte-order marker.
    pub fn byte_order_serialization(&mut self, value: bool) {
        self.byte_order_serial = value;
    }

    /// When true the stream carries the GAP level capacity table.
    pub fn gap_length_serialization(&mut self, value: bool) {
        self.gap_serial = value;
    }

    /// Per-block-type counters from the last `serialize` call.
    pub fn compression_stat(&self) -> &[u64; 256] {
        &self.compression_stat
    }

    /// Serializes `bv` into `buf` and returns the number of bytes written.
    ///
    /// # Panics
    /// The buffer must be sized from [`BitSet::calc_stat`]; overrunning it
    /// is a precondition violation and panics.
    pub fn serialize(&mut self, bv: &BitSet, buf: &mut [u8]) -> usize {
        self.compression_stat.fill(0);
        let mut scr = std::mem::take(&mut self.scratch);
        let mut enc = ByteWriter::new(buf);
        self.encode_header(bv, &mut enc);
        let written = self.serialize_body(bv, &mut enc, &mut scr);
        self.scratch = scr;
        tracing::debug!(
            bytes = written,
            level = self.compression_level,
            "serialized bit-set"
        );
        written
    }

    /// Serializes into a freshly sized buffer and returns the bytes.
    ///
    /// The buffer is sized from `bv_stat` when given, otherwise from a
    /// fresh [`BitSet::calc_stat`] pass.
    pub fn serialize_to_bytes(&mut self, bv: &BitSet, bv_stat: Option<&Statistics>) -> Bytes {
        let computed;
        let stat = match bv_stat {
            Some(s) => s,
            None => {
                computed = bv.calc_stat();
                &computed
            }
        };
        let mut buf = BytesMut::zeroed(stat.max_serialize_mem);
        let len = self.serialize(bv, &mut buf);
        buf.truncate(len);
        buf.freeze()
    }

    /// Optimizes `bv`, serializes it, then destroys its content.
    ///
    /// The input set is consumed by the operation; its content is not
    /// guaranteed afterwards (it is left cleared).
    pub fn optimize_serialize_destroy(&mut self, bv: &mut BitSet) -> Bytes {
        bv.optimize();
        let stat = bv.calc_stat();
        let out = self.serialize_to_bytes(bv, Some(&stat));
        bv.clear();
        out
    }

    // ------------------------------------------------------------------
    // Header

    fn encode_header(&self, bv: &BitSet, enc: &mut ByteWriter<'_>) {
        let wide = bv.size() > NARROW_SPACE_BITS;
        let full_space = bv.size() == NARROW_SPACE_BITS || bv.size() == WIDE_SPACE_BITS;

        let mut flags = if full_space { HM_DEFAULT } else { HM_RESIZE };
        if !self.byte_order_serial {
            flags |= HM_NO_BO;
        }
        if !self.gap_serial {
            flags |= HM_NO_GAPL;
        }
        if wide {
            flags |= HM_64_BIT;
        }

        enc.put_8(flags);
        if self.byte_order_serial {
            enc.put_8(BYTE_ORDER_LITTLE);
        }
        if self.gap_serial {
            for &g in bv.glen() {
                enc.put_16(g);
            }
        }
        if flags & HM_RESIZE != 0 {
            if wide {
                enc.put_64(bv.size());
            } else {
                enc.put_32(bv.size() as u32);
            }
        }
    }

    // ------------------------------------------------------------------
    // Body

    fn serialize_body(
        &mut self,
        bv: &BitSet,
        enc: &mut ByteWriter<'_>,
        scr: &mut Scratch,
    ) -> usize {
        let total = bv.nblocks();
        let mut i: u64 = 0;
        while i < total {
            let blk = bv.get_block(i);

            let mut is_zero = match blk {
                None => true,
                Some(Block::Gap(g)) => gap::is_all_zero(g),
                _ => false,
            };
            let mut is_one = false;
            let mut bit_model = 0u8;
            if !is_zero {
                is_one = match blk {
                    Some(Block::Full) => true,
                    Some(Block::Gap(g)) => gap::is_all_one(g),
                    _ => false,
                };
                if !is_one
                    && let Some(Block::Bits(b)) = blk
                {
                    match self.find_bit_best_encoding(b) {
                        BLOCK_AZERO => is_zero = true,
                        BLOCK_AONE => is_one = true,
                        model => bit_model = model,
                    }
                }
            }

            if is_zero {
                match bv.find_next_present_block(i + 1) {
                    None => {
                        enc.put_8(BLOCK_AZERO);
                        return enc.size();
                    }
                    Some(next) => {
                        emit_zero_run(enc, next - i);
                        i = next;
                        continue;
                    }
                }
            }
            if is_one {
                let mut j = i + 1;
                while j < total && is_one_deep(bv.get_block(j)) {
                    j += 1;
                }
                if j == total {
                    enc.put_8(BLOCK_AONE);
                    break;
                }
                emit_one_run(enc, j - i);
                i = j;
                continue;
            }

            match blk {
                Some(Block::Gap(g)) => self.encode_gap_block(scr, enc, g),
                Some(Block::Bits(b)) => self.encode_bit_block(scr, enc, b, bit_model),
                _ => unreachable!("classified block disappeared"),
            }
            i += 1;
        }
        enc.put_8(BLOCK_END);
        enc.size()
    }

    fn encode_bit_block(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
        model: u8,
    ) {
        match model {
            BLOCK_BIT => {
                enc.put_prefixed_array_32(BLOCK_BIT, b);
                self.compression_stat[BLOCK_BIT as usize] += 1;
            }
            BLOCK_BIT_1BIT => {
                let bit_idx =
                    block::find_first_bit(b).expect("single-bit model requires a set bit");
                enc.put_8(BLOCK_BIT_1BIT);
                enc.put_16(bit_idx as u16);
                self.compression_stat[BLOCK_BIT_1BIT as usize] += 1;
            }
            BLOCK_BIT_0RUNS => self.encode_bit_0runs(enc, b),
            BLOCK_ARRBIT => self.encode_bit_array(scr, enc, b, false),
            BLOCK_ARRBIT_INV => self.encode_bit_array(scr, enc, b, true),
            BLOCK_GAP_EGAMMA => self.gamma_gap_bit_block(scr, enc, b),
            BLOCK_ARRGAP_EGAMMA => self.gamma_arr_bit_block(scr, enc, b, false),
            BLOCK_ARRGAP_EGAMMA_INV => self.gamma_arr_bit_block(scr, enc, b, true),
            BLOCK_ARRGAP_BIENC => self.bienc_arr_bit_block(scr, enc, b, false),
            BLOCK_ARRGAP_BIENC_INV => self.bienc_arr_bit_block(scr, enc, b, true),
            BLOCK_ARR_BIENC => self.interpolated_arr_bit_block(scr, enc, b, false),
            BLOCK_ARR_BIENC_INV => self.interpolated_arr_bit_block(scr, enc, b, true),
            BLOCK_GAP_BIENC => self.interpolated_gap_bit_block(scr, enc, b),
            BLOCK_BITGAP_BIENC => self.bienc_gap_bit_block(scr, enc, b),
            BLOCK_BIT_DIGEST0 => self.encode_bit_digest(enc, b, self.digest0),
            _ => {
                debug_assert!(false, "selector returned an unknown model: {model}");
                enc.put_prefixed_array_32(BLOCK_BIT, b);
                self.compression_stat[BLOCK_BIT as usize] += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Model selection

    fn add_model(&mut self, model: u8, score: u32) {
        self.models.push((model, score));
    }

    fn best_model(&self) -> u8 {
        let mut min_score = BLOCK_BITS;
        let mut model = BLOCK_BIT;
        for &(m, score) in &self.models {
            if score < min_score {
                min_score = score;
                model = m;
            }
        }
        model
    }

    fn find_bit_best_encoding(&mut self, b: &BitBlock) -> u8 {
        self.models.clear();

        if self.compression_level >= 5 {
            return self.find_bit_best_encoding_l5(b);
        }

        self.add_model(BLOCK_BIT, BLOCK_BITS);
        if self.compression_level <= 1 {
            return BLOCK_BIT;
        }

        self.bit_model_0run_size = bit_0runs_size(b);
        self.add_model(BLOCK_BIT_0RUNS, self.bit_model_0run_size * 8);

        let d0 = block::calc_digest0(b);
        self.digest0 = d0;
        if d0 == 0 {
            self.add_model(BLOCK_AZERO, 0);
            return BLOCK_AZERO;
        }
        self.bit_model_d0_size = 8 + WAVE_WORDS as u32 * d0.count_ones() * 4;
        if d0 != !0u64 {
            self.add_model(BLOCK_BIT_DIGEST0, self.bit_model_d0_size * 8);
        }

        let (bc, bit_gaps) = if self.compression_level >= 4 {
            block::count_and_runs(b)
        } else {
            (block::bit_count(b), 65535)
        };

        if bc == 1 {
            self.add_model(BLOCK_BIT_1BIT, 16);
            return BLOCK_BIT_1BIT;
        }
        let inverted_bc = BLOCK_BITS - bc;
        if inverted_bc == 0 {
            self.add_model(BLOCK_AONE, 0);
            return BLOCK_AONE;
        }

        if self.compression_level >= 3 {
            self.add_model(BLOCK_ARRBIT, (2 + bc * 2) * 8);
            self.add_model(BLOCK_ARRBIT_INV, (2 + inverted_bc * 2) * 8);

            if self.compression_level == 4 {
                const GAMMA_BITS_PER_INT: u32 = 6;
                if bit_gaps > 3 && (bit_gaps as usize) < GAP_MAX_BUFF_LEN {
                    self.add_model(BLOCK_GAP_EGAMMA, 16 + (bit_gaps - 1) * GAMMA_BITS_PER_INT);
                }
                if bc < bit_gaps && (bc as usize) < GAP_EQUIV_LEN {
                    self.add_model(BLOCK_ARRGAP_EGAMMA, 16 + bc * GAMMA_BITS_PER_INT);
                }
                if inverted_bc > 3
                    && inverted_bc < bit_gaps
                    && (inverted_bc as usize) < GAP_EQUIV_LEN
                {
                    self.add_model(
                        BLOCK_ARRGAP_EGAMMA_INV,
                        16 + inverted_bc * GAMMA_BITS_PER_INT,
                    );
                }
            }
        }
        self.best_model()
    }

    fn find_bit_best_encoding_l5(&mut self, b: &BitBlock) -> u8 {
        const BIE_BITS_PER_INT: u32 = 4;

        self.add_model(BLOCK_BIT, BLOCK_BITS);

        self.bit_model_0run_size = bit_0runs_size(b);
        self.add_model(BLOCK_BIT_0RUNS, self.bit_model_0run_size * 8);

        let d0 = block::calc_digest0(b);
        self.digest0 = d0;
        if d0 == 0 {
            self.add_model(BLOCK_AZERO, 0);
            return BLOCK_AZERO;
        }
        self.bit_model_d0_size = 8 + WAVE_WORDS as u32 * d0.count_ones() * 4;
        if d0 != !0u64 {
            self.add_model(BLOCK_BIT_DIGEST0, self.bit_model_d0_size * 8);
        }

        let (bc, bit_gaps) = block::count_and_runs(b);
        if bc == 1 {
            self.add_model(BLOCK_BIT_1BIT, 16);
            return BLOCK_BIT_1BIT;
        }
        let inverted_bc = BLOCK_BITS - bc;
        if inverted_bc == 0 {
            self.add_model(BLOCK_AONE, 0);
            return BLOCK_AONE;
        }

        self.add_model(BLOCK_ARRBIT, (2 + bc * 2) * 8);
        self.add_model(BLOCK_ARRBIT_INV, (2 + inverted_bc * 2) * 8);

        if bit_gaps > 3 && (bit_gaps as usize) < GAP_MAX_BUFF_LEN {
            self.add_model(BLOCK_GAP_BIENC, 32 + (bit_gaps - 1) * BIE_BITS_PER_INT);
        }
        if bc < bit_gaps && (bc as usize) < GAP_EQUIV_LEN {
            self.add_model(BLOCK_ARRGAP_BIENC, 16 * 3 + bc * BIE_BITS_PER_INT);
        } else if inverted_bc < bit_gaps && (inverted_bc as usize) < GAP_EQUIV_LEN {
            self.add_model(BLOCK_ARRGAP_BIENC_INV, 16 * 3 + inverted_bc * BIE_BITS_PER_INT);
        } else if (bc as usize) >= GAP_EQUIV_LEN && (bc as usize) < BIE_CUT_OFF {
            self.add_model(BLOCK_ARR_BIENC, 16 * 3 + bc * BIE_BITS_PER_INT);
        } else if inverted_bc > 3
            && (inverted_bc as usize) >= GAP_EQUIV_LEN
            && (inverted_bc as usize) < BIE_CUT_OFF
        {
            self.add_model(BLOCK_ARR_BIENC_INV, 16 * 3 + inverted_bc * BIE_BITS_PER_INT);
        }

        if (bit_gaps as usize) >= GAP_MAX_BUFF_LEN && (bit_gaps as usize) < BIE_CUT_OFF {
            self.add_model(BLOCK_BITGAP_BIENC, 16 * 4 + (bit_gaps - 2) * BIE_BITS_PER_INT);
        }

        self.best_model()
    }

    fn find_gap_best_encoding(&self, g: &[u16]) -> u8 {
        if self.compression_level <= 2 {
            return BLOCK_GAP;
        }
        let len = gap::gap_len(g);
        let bc = gap::bit_count(g);
        if bc == 1 {
            return BLOCK_BIT_1BIT;
        }
        if (bc as usize) < len {
            return match self.compression_level {
                0..=3 => BLOCK_ARRGAP,
                4 => BLOCK_ARRGAP_EGAMMA,
                _ => BLOCK_ARRGAP_BIENC,
            };
        }
        let inverted_bc = BLOCK_BITS - bc;
        if (inverted_bc as usize) < len {
            return match self.compression_level {
                0..=3 => BLOCK_ARRGAP_INV,
                4 => BLOCK_ARRGAP_EGAMMA_INV,
                _ => BLOCK_ARRGAP_BIENC_INV,
            };
        }
        if len < 6 {
            return BLOCK_GAP;
        }
        if self.compression_level == 4 {
            return BLOCK_GAP_EGAMMA;
        }
        BLOCK_GAP_BIENC
    }

    // ------------------------------------------------------------------
    // GAP block encoders

    fn encode_gap_block(&mut self, scr: &mut Scratch, enc: &mut ByteWriter<'_>, g: &[u16]) {
        match self.find_gap_best_encoding(g) {
            BLOCK_BIT_1BIT => {
                let n = gap::convert_to_arr(&mut scr.gap_temp, g, GAP_EQUIV_LEN - 10, false);
                debug_assert_eq!(n, 1);
                enc.put_8(BLOCK_BIT_1BIT);
                enc.put_16(scr.gap_temp[0]);
                self.compression_stat[BLOCK_BIT_1BIT as usize] += 1;
            }
            BLOCK_ARRGAP | BLOCK_ARRGAP_EGAMMA => {
                let n = gap::convert_to_arr(&mut scr.gap_temp, g, GAP_EQUIV_LEN - 10, false);
                debug_assert!(n > 0);
                self.gamma_gap_array(enc, &scr.gap_temp[..n], false);
            }
            BLOCK_ARRGAP_INV | BLOCK_ARRGAP_EGAMMA_INV => {
                let n = gap::convert_to_arr(&mut scr.gap_temp, g, GAP_EQUIV_LEN - 10, true);
                debug_assert!(n > 0);
                self.gamma_gap_array(enc, &scr.gap_temp[..n], true);
            }
            BLOCK_ARRGAP_BIENC => {
                let n = gap::convert_to_arr(&mut scr.gap_temp, g, GAP_EQUIV_LEN - 64, false);
                debug_assert!(n > 0);
                self.interpolated_gap_array(enc, &scr.gap_temp[..n], false);
            }
            BLOCK_ARRGAP_BIENC_INV => {
                let n = gap::convert_to_arr(&mut scr.gap_temp, g, GAP_EQUIV_LEN - 64, true);
                debug_assert!(n > 0);
                self.interpolated_gap_array(enc, &scr.gap_temp[..n], true);
            }
            BLOCK_GAP_BIENC => self.interpolated_encode_gap_block(enc, g),
            _ => self.gamma_gap_block(enc, g),
        }
    }

    /// Emits a GAP block, trying Elias-Gamma first at level > 3.
    fn gamma_gap_block(&mut self, enc: &mut ByteWriter<'_>, g: &[u16]) {
        let len = gap::gap_len(g);
        if len > 3 && self.compression_level > 3 {
            let pos0 = enc.pos();
            enc.put_8(BLOCK_GAP_EGAMMA);
            enc.put_16(g[0]);
            {
                let mut bout = BitWriter::new(enc);
                bout.put_gamma(g[1] as u32 + 1);
                for i in 2..len - 1 {
                    bout.put_gamma((g[i] - g[i - 1]) as u32);
                }
                bout.flush();
            }
            let gamma_size = enc.pos() - pos0;
            if gamma_size > (len - 1) * 2 {
                enc.set_pos(pos0);
            } else {
                self.compression_stat[BLOCK_GAP_EGAMMA as usize] += 1;
                return;
            }
        }
        enc.put_8(BLOCK_GAP);
        enc.put_16_array(&g[..len - 1]);
        self.compression_stat[BLOCK_GAP as usize] += 1;
    }

    /// Emits a GAP block with interpolative coding, falling back to plain.
    fn interpolated_encode_gap_block(&mut self, enc: &mut ByteWriter<'_>, g: &[u16]) {
        let len = gap::gap_len(g);
        if len > 3 {
            let pos0 = enc.pos();
            let min_v = g[1];
            enc.put_8(BLOCK_GAP_BIENC);
            enc.put_16(g[0]);
            enc.put_16(min_v);
            {
                debug_assert_eq!(g[len - 1], 65535);
                let mut bout = BitWriter::new(enc);
                interpolative::encode_u16(&mut bout, &g[2..len - 1], min_v, 65535);
                bout.flush();
            }
            let enc_size = enc.pos() - pos0;
            if enc_size > (len - 1) * 2 {
                enc.set_pos(pos0);
            } else {
                self.compression_stat[BLOCK_GAP_BIENC as usize] += 1;
                return;
            }
        }
        enc.put_8(BLOCK_GAP);
        enc.put_16_array(&g[..len - 1]);
        self.compression_stat[BLOCK_GAP as usize] += 1;
    }

    /// Emits a position array with gamma-coded deltas, falling back to a
    /// plain array.
    fn gamma_gap_array(&mut self, enc: &mut ByteWriter<'_>, arr: &[u16], inverted: bool) {
        let len = arr.len();
        if self.compression_level > 3 && len > 1 {
            let scode = if inverted {
                BLOCK_ARRGAP_EGAMMA_INV
            } else {
                BLOCK_ARRGAP_EGAMMA
            };
            let pos0 = enc.pos();
            enc.put_8(scode);
            {
                let mut bout = BitWriter::new(enc);
                bout.put_gamma(len as u32);
                bout.put_gamma(arr[0] as u32 + 1);
                for i in 1..len {
                    bout.put_gamma((arr[i] - arr[i - 1]) as u32);
                }
                bout.flush();
            }
            let gamma_size = enc.pos() - pos0;
            if gamma_size >= 2 + len * 2 {
                enc.set_pos(pos0);
            } else {
                self.compression_stat[scode as usize] += 1;
                return;
            }
        }
        let scode = if inverted { BLOCK_ARRGAP_INV } else { BLOCK_ARRGAP };
        enc.put_prefixed_array_16(scode, arr, true);
        self.compression_stat[scode as usize] += 1;
    }

    /// Emits a position array with interpolative coding, falling back to a
    /// plain array.
    fn interpolated_gap_array(&mut self, enc: &mut ByteWriter<'_>, arr: &[u16], inverted: bool) {
        let len = arr.len();
        if len > 4 {
            let scode = if inverted {
                BLOCK_ARRGAP_BIENC_INV
            } else {
                BLOCK_ARRGAP_BIENC
            };
            let min_v = arr[0];
            let max_v = arr[len - 1];
            debug_assert!(max_v > min_v);

            let pos0 = enc.pos();
            enc.put_8(scode);
            enc.put_16(min_v);
            enc.put_16(max_v);
            {
                let mut bout = BitWriter::new(enc);
                bout.put_gamma(len as u32 - 4);
                interpolative::encode_u16(&mut bout, &arr[1..len - 1], min_v, max_v);
                bout.flush();
            }
            let enc_size = enc.pos() - pos0;
            if enc_size >= 2 + len * 2 {
                enc.set_pos(pos0);
            } else {
                self.compression_stat[scode as usize] += 1;
                return;
            }
        }
        let scode = if inverted { BLOCK_ARRGAP_INV } else { BLOCK_ARRGAP };
        enc.put_prefixed_array_16(scode, arr, true);
        self.compression_stat[scode as usize] += 1;
    }

    // ------------------------------------------------------------------
    // Bit block encoders

    /// Emits the block as zero/non-zero word runs.
    fn encode_bit_0runs(&mut self, enc: &mut ByteWriter<'_>, b: &BitBlock) {
        enc.put_8(BLOCK_BIT_0RUNS);
        enc.put_8((b[0] != 0) as u8);
        let mut i = 0usize;
        while i < BLOCK_WORDS {
            if b[i] == 0 {
                let j = zero_island_end(b, i);
                enc.put_16((j - i) as u16);
                i = j;
            } else {
                let j = nonzero_island_end(b, i);
                enc.put_16((j - i) as u16);
                enc.put_32_array(&b[i..j]);
                i = j;
            }
        }
        self.compression_stat[BLOCK_BIT_0RUNS as usize] += 1;
    }

    /// Emits the digest form, arbitrating against the word-run form and,
    /// when the digest is unusable, against the plain block.
    fn encode_bit_digest(&mut self, enc: &mut ByteWriter<'_>, b: &BitBlock, d0: u64) {
        if d0 != !0u64 {
            if self.bit_model_0run_size < self.bit_model_d0_size {
                self.encode_bit_0runs(enc, b);
                return;
            }
            enc.put_8(BLOCK_BIT_DIGEST0);
            enc.put_64(d0);
            let mut d = d0;
            while d != 0 {
                let wave = d.trailing_zeros() as usize;
                let off = wave * WAVE_WORDS;
                enc.put_32_array(&b[off..off + WAVE_WORDS]);
                d &= d - 1;
            }
            self.compression_stat[BLOCK_BIT_DIGEST0 as usize] += 1;
        } else {
            if self.bit_model_0run_size < (BLOCK_WORDS as u32) * 4 {
                self.encode_bit_0runs(enc, b);
                return;
            }
            enc.put_prefixed_array_32(BLOCK_BIT, b);
            self.compression_stat[BLOCK_BIT as usize] += 1;
        }
    }

    /// Emits the block as a plain position array (set or clear bits).
    fn encode_bit_array(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
        inverted: bool,
    ) {
        let len = block::convert_to_arr(&mut scr.bit_idx, b, GAP_MAX_BITS_CMRZ, inverted);
        if len > 0 {
            let scode = if inverted { BLOCK_ARRBIT_INV } else { BLOCK_ARRBIT };
            enc.put_prefixed_array_16(scode, &scr.bit_idx[..len], true);
            self.compression_stat[scode as usize] += 1;
            return;
        }
        self.encode_bit_digest(enc, b, self.digest0);
    }

    fn gamma_gap_bit_block(&mut self, scr: &mut Scratch, enc: &mut ByteWriter<'_>, b: &BitBlock) {
        let last = block::bit_to_gap(&mut scr.bit_idx, b, GAP_EQUIV_LEN);
        debug_assert!(last > 0);
        self.gamma_gap_block(enc, &scr.bit_idx[..=last]);
    }

    fn gamma_arr_bit_block(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
        inverted: bool,
    ) {
        let len = block::convert_to_arr(&mut scr.bit_idx, b, GAP_EQUIV_LEN, inverted);
        if len > 0 {
            self.gamma_gap_array(enc, &scr.bit_idx[..len], inverted);
            return;
        }
        enc.put_prefixed_array_32(BLOCK_BIT, b);
        self.compression_stat[BLOCK_BIT as usize] += 1;
    }

    fn bienc_arr_bit_block(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
        inverted: bool,
    ) {
        let len = block::convert_to_arr(&mut scr.bit_idx, b, GAP_EQUIV_LEN, inverted);
        if len > 0 {
            self.interpolated_gap_array(enc, &scr.bit_idx[..len], inverted);
            return;
        }
        self.encode_bit_digest(enc, b, self.digest0);
    }

    fn interpolated_gap_bit_block(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
    ) {
        let last = block::bit_to_gap(&mut scr.bit_idx, b, BLOCK_BITS as usize);
        debug_assert!(last > 0);
        self.interpolated_encode_gap_block(enc, &scr.bit_idx[..=last]);
    }

    /// Emits the block as an interpolative-coded GAP sequence.
    fn bienc_gap_bit_block(&mut self, scr: &mut Scratch, enc: &mut ByteWriter<'_>, b: &BitBlock) {
        let last = block::bit_to_gap(&mut scr.bit_idx, b, BLOCK_BITS as usize);
        debug_assert!(last > 1 && last <= BIE_CUT_OFF);

        let pos0 = enc.pos();
        let head = scr.bit_idx[0] & 1;
        let min_v = scr.bit_idx[1];
        debug_assert_eq!(scr.bit_idx[last], 65535);
        debug_assert!(min_v < 65535);

        enc.put_8(BLOCK_BITGAP_BIENC);
        enc.put_8(head as u8);
        enc.put_16(last as u16);
        enc.put_16(min_v);
        {
            let mut bout = BitWriter::new(enc);
            interpolative::encode_u16(&mut bout, &scr.bit_idx[2..last], min_v, 65535);
            bout.flush();
        }
        let enc_size = enc.pos() - pos0;
        if enc_size >= BLOCK_WORDS * 4 {
            enc.set_pos(pos0);
        } else {
            self.compression_stat[BLOCK_BITGAP_BIENC as usize] += 1;
            return;
        }
        self.encode_bit_digest(enc, b, self.digest0);
    }

    /// Emits the block as an interpolative-coded full-range position array.
    fn interpolated_arr_bit_block(
        &mut self,
        scr: &mut Scratch,
        enc: &mut ByteWriter<'_>,
        b: &BitBlock,
        inverted: bool,
    ) {
        let len = block::convert_to_arr(&mut scr.bit_idx, b, GAP_MAX_BITS_CMRZ, inverted);
        if len > 0 {
            let scode = if inverted { BLOCK_ARR_BIENC_INV } else { BLOCK_ARR_BIENC };
            let min_v = scr.bit_idx[0];
            let max_v = scr.bit_idx[len - 1];
            debug_assert!(max_v > min_v);

            let pos0 = enc.pos();
            enc.put_8(scode);
            enc.put_16(min_v);
            enc.put_16(max_v);
            enc.put_16(len as u16);
            {
                let mut bout = BitWriter::new(enc);
                interpolative::encode_u16(&mut bout, &scr.bit_idx[1..len - 1], min_v, max_v);
                bout.flush();
            }
            let enc_size = enc.pos() - pos0;
            if enc_size >= BLOCK_WORDS * 4 {
                enc.set_pos(pos0);
            } else if self.digest0 != !0u64 && enc_size > self.bit_model_d0_size as usize {
                enc.set_pos(pos0);
            } else {
                self.compression_stat[scode as usize] += 1;
                return;
            }
        }
        self.encode_bit_digest(enc, b, self.digest0);
    }
}

fn is_one_deep(blk: Option<&Block>) -> bool {
    match blk {
        Some(Block::Full) => true,
        Some(Block::Bits(b)) => block::is_all_one(b),
        Some(Block::Gap(g)) => gap::is_all_one(g),
        None => false,
    }
}

/// Emits a zero-run token covering `nb` blocks.
fn emit_zero_run(enc: &mut ByteWriter<'_>, nb: u64) {
    if nb > 1 && nb < 128 {
        // dense shorthand: count fits 7 bits
        enc.put_8(0x80 | nb as u8);
    } else if nb == 1 {
        enc.put_8(BLOCK_1ZERO);
    } else if nb < 256 {
        enc.put_8(BLOCK_8ZERO);
        enc.put_8(nb as u8);
    } else if nb < 65536 {
        enc.put_8(BLOCK_16ZERO);
        enc.put_16(nb as u16);
    } else if nb < u32::MAX as u64 {
        enc.put_8(BLOCK_32ZERO);
        enc.put_32(nb as u32);
    } else {
        enc.put_8(BLOCK_64ZERO);
        enc.put_64(nb);
    }
}

/// Emits a one-run token covering `nb` blocks.
fn emit_one_run(enc: &mut ByteWriter<'_>, nb: u64) {
    if nb == 1 {
        enc.put_8(BLOCK_1ONE);
    } else if nb < 256 {
        enc.put_8(BLOCK_8ONE);
        enc.put_8(nb as u8);
    } else if nb < 65536 {
        enc.put_8(BLOCK_16ONE);
        enc.put_16(nb as u16);
    } else if nb < u32::MAX as u64 {
        enc.put_8(BLOCK_32ONE);
        enc.put_32(nb as u32);
    } else {
        enc.put_8(BLOCK_64ONE);
        enc.put_64(nb);
    }
}

/// First word index past the zero run starting at `i`.
fn zero_island_end(b: &BitBlock, i: usize) -> usize {
    let mut j = i + 1;
    while j < BLOCK_WORDS && b[j] == 0 {
        j += 1;
    }
    j
}

/// First word index past the non-zero island starting at `i`. Zero words
/// followed by data within two words stay inside the island, so isolated
/// zero words do not split it.
fn nonzero_island_end(b: &BitBlock, i: usize) -> usize {
    let mut j = i + 1;
    while j < BLOCK_WORDS {
        if b[j] == 0 {
            let merge = (j + 1 < BLOCK_WORDS && b[j + 1] != 0)
                || (j + 2 < BLOCK_WORDS && b[j + 2] != 0);
            if merge {
                j += 2;
                continue;
            }
            break;
        }
        j += 1;
    }
    j.min(BLOCK_WORDS)
}

/// Byte size of the zero-runs form (start byte, run tokens, data words),
/// excluding the type byte. Computed with the same run segmentation the
/// emitter uses, so model scores always match emitted sizes.
fn bit_0runs_size(b: &BitBlock) -> u32 {
    let mut size = 1u32;
    let mut i = 0usize;
    while i < BLOCK_WORDS {
        if b[i] == 0 {
            let j = zero_island_end(b, i);
            size += 2;
            i = j;
        } else {
            let j = nonzero_island_end(b, i);
            size += 2 + (j - i) as u32 * 4;
            i = j;
        }
    }
    size
}

/// Serializes `bv` into `buf` with a default serializer and returns the
/// byte count. `flags` is a bit mask of [`NO_BYTE_ORDER`] and
/// [`NO_GAP_LENGTH`]; when the GAP length flag is absent the stream
/// carries the level table.
pub fn serialize_with_flags(bv: &BitSet, buf: &mut [u8], flags: u8) -> usize {
    let mut serial = Serializer::new();
    if flags & NO_BYTE_ORDER != 0 {
        serial.byte_order_serialization(false);
    }
    serial.gap_length_serialization(flags & NO_GAP_LENGTH == 0);
    serial.serialize(bv, buf)
}

/// Serializes `bv` into `buf` with default settings.
pub fn serialize(bv: &BitSet, buf: &mut [u8]) -> usize {
    serialize_with_flags(bv, buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_empty_sized_vector_to_six_bytes() {
        // given - a down-sized empty vector, no byte order, no GAP table
        let bv = BitSet::with_size(1 << 31);
        let mut buf = [0u8; 64];

        // when
        let len = serialize_with_flags(&bv, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);

        // then - flags, u32 size, azero
        assert_eq!(len, 6);
        assert_eq!(buf[0], HM_RESIZE | HM_NO_BO | HM_NO_GAPL);
        assert_eq!(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]), 1 << 31);
        assert_eq!(buf[5], BLOCK_AZERO);
    }

    #[test]
    fn should_serialize_single_bit_as_1bit_block() {
        // given
        let mut bv = BitSet::new();
        bv.set(42);
        let mut buf = [0u8; 64];

        // when
        let mut serial = Serializer::new();
        serial.gap_length_serialization(false);
        let len = serial.serialize(&bv, &mut buf);

        // then - flags, byte order, {1bit, 42 LE}, azero
        assert_eq!(buf[0], HM_DEFAULT | HM_NO_GAPL);
        assert_eq!(buf[1], BYTE_ORDER_LITTLE);
        assert_eq!(buf[2], BLOCK_BIT_1BIT);
        assert_eq!(u16::from_le_bytes([buf[3], buf[4]]), 42);
        assert_eq!(buf[5], BLOCK_AZERO);
        assert_eq!(len, 6);
        assert_eq!(serial.compression_stat()[BLOCK_BIT_1BIT as usize], 1);
    }

    #[test]
    fn should_collapse_full_block_run_with_zero_prefix() {
        // given - block 5 entirely set, nothing else
        let mut bv = BitSet::new();
        for i in 0..65536u64 {
            bv.set(5 * 65536 + i);
        }
        bv.optimize();
        let mut buf = [0u8; 64];

        // when
        let len = serialize_with_flags(&bv, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);

        // then - {0x80|5}, {1one}, {azero}
        assert_eq!(&buf[1..len], &[0x80 | 5, BLOCK_1ONE, BLOCK_AZERO]);
    }

    #[test]
    fn should_use_wide_run_tokens_for_wide_vectors() {
        // given - a single bit far beyond the narrow space
        let mut bv = BitSet::with_size(crate::bitset::WIDE_SPACE_BITS);
        bv.set(1u64 << 40);
        let mut buf = [0u8; 64];

        // when
        let len = serialize_with_flags(&bv, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);

        // then - wide flag set and a 32-bit zero-run token before the block
        assert_ne!(buf[0] & HM_64_BIT, 0);
        assert_eq!(buf[1], BLOCK_32ZERO);
        let run = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        assert_eq!(run as u64, (1u64 << 40) / 65536);
        assert_eq!(buf[6], BLOCK_BIT_1BIT);
        assert!(len <= buf.len());
    }

    #[test]
    fn should_respect_rollback_bound_for_dense_arrays() {
        // given - a pathological block: every other bit set, defeating
        // every compact model
        let mut bv = BitSet::new();
        for i in (0..65536u64).step_by(2) {
            bv.set(i);
        }
        let st = bv.calc_stat();
        let mut buf = vec![0u8; st.max_serialize_mem];

        // when
        let len = serialize(&bv, &mut buf);

        // then - never worse than plain block + full header + terminator
        assert!(len <= 10 + 1 + BLOCK_WORDS * 4 + 1);
    }

    #[test]
    fn should_ignore_out_of_range_compression_level() {
        // given
        let mut serial = Serializer::new();

        // when
        serial.set_compression_level(9);

        // then
        assert_eq!(serial.compression_level(), COMPRESSION_LEVEL_DEFAULT);
    }
}
