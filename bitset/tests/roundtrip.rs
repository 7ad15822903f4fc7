//! Serialization round-trip coverage across block shapes and compression
//! levels.

use bitset::{
    BitSet, Deserializer, NO_BYTE_ORDER, NO_GAP_LENGTH, Serializer, deserialize, serialize,
    serialize_with_flags,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

fn from_positions(positions: &[u64]) -> BitSet {
    let mut bv = BitSet::new();
    for &p in positions {
        bv.set(p);
    }
    bv
}

fn round_trip_at_level(bv: &BitSet, level: u8) -> (BitSet, usize) {
    let mut serial = Serializer::new();
    serial.set_compression_level(level);
    let stat = bv.calc_stat();
    let mut buf = vec![0u8; stat.max_serialize_mem];
    let len = serial.serialize(bv, &mut buf);
    assert!(len <= stat.max_serialize_mem, "statistics bound violated");

    let mut restored = BitSet::with_size(1);
    let consumed = Deserializer::new()
        .deserialize(&mut restored, &buf[..len])
        .expect("valid stream must decode");
    assert_eq!(consumed, len, "decoder must consume the whole stream");
    (restored, len)
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(4)]
#[case(5)]
fn should_round_trip_mixed_shapes_at_every_level(#[case] level: u8) {
    // given - a vector mixing sparse bits, a dense run, a full-block run
    // and clustered runs, with zero gaps wide enough for every run token
    let mut bv = BitSet::new();
    bv.set(0);
    bv.set(42);
    for i in 1000..1128 {
        bv.set(i);
    }
    for i in 0..2 * 65536u64 {
        bv.set(3 * 65536 + i); // blocks 3 and 4 all-one
    }
    for c in 0..50u64 {
        let base = 6 * 65536 + c * 1000;
        for k in 0..3 {
            bv.set(base + k);
        }
    }
    bv.set(90 * 65536 + 7); // 0x80|k shorthand gap
    bv.set(300 * 65536); // u8-count zero run
    bv.set(40_000 * 65536 + 5); // u16-count zero run

    // when
    let (restored, _) = round_trip_at_level(&bv, level);

    // then
    assert_eq!(restored, bv, "level {level} round trip");
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(4)]
#[case(5)]
fn should_round_trip_optimized_gap_blocks(#[case] level: u8) {
    // given - GAP-form blocks of different densities
    let mut bv = BitSet::new();
    bv.set(5); // single-bit GAP
    for c in 0..20u64 {
        for k in 0..3 {
            bv.set(65536 + c * 700 + k); // clustered runs
        }
    }
    for i in 0..200u64 {
        bv.set(2 * 65536 + i * 2); // alternating pattern
    }
    bv.optimize();

    // when
    let (restored, _) = round_trip_at_level(&bv, level);

    // then
    assert_eq!(restored, bv, "level {level} GAP round trip");
}

#[test]
fn should_round_trip_digest_shaped_block() {
    // given - two well-separated fully random waves; the digest form wins
    // the size race for this shape
    let mut rng = StdRng::seed_from_u64(7);
    let mut bv = BitSet::new();
    for wave in [10u64, 50] {
        for bit in 0..1024u64 {
            if rng.random::<bool>() {
                bv.set(wave * 1024 + bit);
            }
        }
    }

    // when
    let (restored, len) = round_trip_at_level(&bv, 5);

    // then
    assert_eq!(restored, bv);
    assert!(len < 600, "digest-shaped block should compress, got {len}");
}

#[test]
fn should_round_trip_interpolated_array_block() {
    // given - isolated bits, too many for GAP levels: full-range array
    let positions: Vec<u64> = (0..3276).map(|i| i * 20).collect();
    let bv = from_positions(&positions);

    // when
    let (restored, len) = round_trip_at_level(&bv, 5);

    // then
    assert_eq!(restored, bv);
    assert!(len < 2 + 3276 * 2, "interpolative coding should beat the plain array");
}

#[test]
fn should_round_trip_interpolated_bitgap_block() {
    // given - many short runs: the GAP sequence is long but still cheaper
    // than the position array
    let mut bv = BitSet::new();
    for c in 0..1300u64 {
        let base = c * 50;
        for k in 0..3 {
            bv.set(base + k);
        }
    }

    // when
    let (restored, _) = round_trip_at_level(&bv, 5);

    // then
    assert_eq!(restored, bv);
}

#[test]
fn should_round_trip_inverted_array_block() {
    // given - a nearly full block with scattered holes
    let mut bv = BitSet::new();
    for i in 0..65536u64 {
        bv.set(i);
    }
    for hole in (0..100u64).map(|i| i * 601) {
        bv.remove(hole);
    }

    // when
    for level in [3u8, 4, 5] {
        let (restored, len) = round_trip_at_level(&bv, level);
        // then
        assert_eq!(restored, bv, "level {level}");
        assert!(len < 1024, "inverted forms should stay small, got {len}");
    }
}

#[test]
fn should_round_trip_gamma_array_block_at_level_4() {
    // given - isolated bits with short deltas: cheaper as a gamma-coded
    // position array than as a GAP sequence or word runs
    let positions: Vec<u64> = (0..250).map(|i| i * 48).collect();
    let bv = from_positions(&positions);

    // when
    let (restored, len) = round_trip_at_level(&bv, 4);

    // then
    assert_eq!(restored, bv);
    assert!(len < 2 + 250 * 2, "gamma coding should beat the plain array");
}

#[test]
fn should_round_trip_gamma_inverted_holes_at_level_4() {
    // given - a full block with a tight cluster of holes: small inverted
    // deltas keep the gamma form ahead of the plain inverted array
    let mut bv = BitSet::new();
    for i in 0..65536u64 {
        bv.set(i);
    }
    for hole in 0..15u64 {
        bv.remove(100 + hole * 2);
    }

    // when
    let (restored, len) = round_trip_at_level(&bv, 4);

    // then
    assert_eq!(restored, bv);
    assert!(len < 40, "inverted gamma form should stay tiny, got {len}");
}

#[test]
fn should_round_trip_inverted_interpolated_array_block() {
    // given - too many holes for the GAP-array forms, still far from a
    // plain block: full-range inverted interpolative array
    let mut bv = BitSet::new();
    for i in 0..65536u64 {
        bv.set(i);
    }
    for hole in 0..2500u64 {
        bv.remove(hole * 26);
    }

    // when
    let (restored, len) = round_trip_at_level(&bv, 5);

    // then
    assert_eq!(restored, bv);
    assert!(len < 2500 * 2, "interpolative holes should compress, got {len}");
}

#[test]
fn should_decode_legacy_bit_interval_block() {
    // given - hand-built stream with the decode-only interval form:
    // words 2..=3 carry data
    let mut stream = vec![
        0x19, // DEFAULT | NO_BO | NO_GAPL
        0x11, // bit_interval
        0x02, 0x00, // head word index
        0x03, 0x00, // tail word index
    ];
    stream.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    stream.extend_from_slice(&0x0000_0001u32.to_le_bytes());
    stream.push(0x09); // azero

    // when
    let mut bv = BitSet::new();
    deserialize(&mut bv, &stream).unwrap();

    // then - 32 ones at word 2, one bit at word 3
    assert_eq!(bv.count(), 33);
    assert!(bv.contains(64));
    assert!(bv.contains(95));
    assert!(bv.contains(96));
    assert!(!bv.contains(97));
}

#[test]
fn should_round_trip_pathological_alternating_block() {
    // given - worst case for every compact model
    let positions: Vec<u64> = (0..65536).filter(|i| i % 2 == 0).collect();
    let bv = from_positions(&positions);

    // when
    let (restored, len) = round_trip_at_level(&bv, 5);

    // then - stored plain, within the rollback bound
    assert_eq!(restored, bv);
    assert!(len <= 2 + 1 + 2048 * 4 + 1);
}

#[test]
fn should_or_combine_when_deserializing_into_existing_set() {
    // given
    let a = from_positions(&[1, 2, 100_000]);
    let b = from_positions(&[2, 3, 400_000]);
    let mut serial = Serializer::new();
    let bytes = serial.serialize_to_bytes(&b, None);

    // when
    let mut target = a.clone();
    deserialize(&mut target, &bytes).unwrap();

    // then - equals a | b
    let mut expected = a.clone();
    expected.union_with(&b);
    assert_eq!(target, expected);
}

#[test]
fn should_deserialize_own_stream_idempotently() {
    // given
    let bv = from_positions(&[7, 8, 9, 70_000, 150_000]);
    let mut serial = Serializer::new();
    let bytes = serial.serialize_to_bytes(&bv, None);

    // when - OR with self
    let mut target = bv.clone();
    deserialize(&mut target, &bytes).unwrap();

    // then
    assert_eq!(target, bv);
}

#[test]
fn should_round_trip_sized_vector() {
    // given
    let mut bv = BitSet::with_size(1 << 31);
    bv.set(12345);
    bv.set((1 << 31) - 1);

    // when
    let (restored, _) = round_trip_at_level(&bv, 5);

    // then - size travels with the stream
    assert_eq!(restored.size(), 1 << 31);
    assert_eq!(restored, bv);
}

#[test]
fn should_round_trip_wide_vector() {
    // given
    let mut bv = BitSet::with_size(bitset::WIDE_SPACE_BITS);
    bv.set(3);
    bv.set(1u64 << 40);
    bv.set((1u64 << 45) + 12345);

    // when
    let (restored, _) = round_trip_at_level(&bv, 5);

    // then
    assert!(restored.is_wide());
    assert_eq!(restored, bv);
}

#[test]
fn should_round_trip_with_gap_level_table() {
    // given
    let mut bv = from_positions(&[10, 20, 30]);
    bv.optimize();
    let mut serial = Serializer::new();
    serial.gap_length_serialization(true);
    let bytes = serial.serialize_to_bytes(&bv, None);

    // when
    let mut restored = BitSet::new();
    deserialize(&mut restored, &bytes).unwrap();

    // then
    assert_eq!(restored, bv);
}

#[test]
fn should_compact_single_block_vector() {
    // given - all set bits confined to one block
    let positions: Vec<u64> = (0..128).collect();
    let bv = from_positions(&positions);

    // when - worst and best compression levels
    let (restored0, len0) = round_trip_at_level(&bv, 0);
    let (restored5, len5) = round_trip_at_level(&bv, 5);

    // then - level 0 stays within the plain-block bound, level 5 beats it
    assert_eq!(restored0, bv);
    assert_eq!(restored5, bv);
    assert!(len0 <= 2 + 65536 / 8 + 16);
    assert!(len5 < len0);
    assert!(len5 < 64, "contiguous run should collapse, got {len5}");
}

#[test]
fn should_track_compression_statistics() {
    // given
    let mut bv = BitSet::new();
    bv.set(42); // single bit block
    for i in 0..65536u64 {
        bv.set(2 * 65536 + i); // a full block (one-run)
    }
    let mut serial = Serializer::new();

    // when
    let bytes = serial.serialize_to_bytes(&bv, None);
    let stat = serial.compression_stat();

    // then - exactly one single-bit block counted, runs are not blocks
    assert_eq!(stat[19], 1); // bit_1bit
    assert_eq!(stat.iter().sum::<u64>(), 1);
    assert!(!bytes.is_empty());

    // and - counters reset on the next serialize call
    let empty = BitSet::new();
    serial.serialize_to_bytes(&empty, None);
    assert_eq!(serial.compression_stat().iter().sum::<u64>(), 0);
}

#[test]
fn should_destroy_source_in_destructive_mode() {
    // given
    let mut bv = from_positions(&[5, 500, 50_000, 5_000_000]);
    let reference = bv.clone();
    let mut serial = Serializer::new();

    // when
    let bytes = serial.optimize_serialize_destroy(&mut bv);

    // then - source is consumed, stream restores the original content
    assert!(bv.is_empty());
    let mut restored = BitSet::new();
    deserialize(&mut restored, &bytes).unwrap();
    assert_eq!(restored, reference);
}

#[test]
fn should_collapse_fully_set_sized_vector_to_all_one_tail() {
    // given
    let mut bv = BitSet::with_size(3 * 65536);
    for i in 0..3 * 65536u64 {
        bv.set(i);
    }
    bv.optimize();

    // when
    let mut serial = Serializer::new();
    let bytes = serial.serialize_to_bytes(&bv, None);
    let mut restored = BitSet::with_size(1);
    deserialize(&mut restored, &bytes).unwrap();

    // then - the whole body is the all-remaining-one terminator
    assert_eq!(restored, bv);
    assert!(bytes.len() <= 16, "all-one tail should collapse, got {}", bytes.len());
}

#[test]
fn should_produce_minimal_stream_for_empty_sized_vector() {
    // given
    let bv = BitSet::with_size(1 << 31);
    let mut buf = [0u8; 16];

    // when - without and with the byte-order marker
    let len_bare = serialize_with_flags(&bv, &mut buf, NO_BYTE_ORDER | NO_GAP_LENGTH);
    let len_bo = serialize_with_flags(&bv, &mut buf, NO_GAP_LENGTH);

    // then
    assert_eq!(len_bare, 6);
    assert_eq!(len_bo, 7);
}

#[test]
fn should_decode_byte_swapped_stream() {
    // given - the same logical stream in little- and big-endian form:
    // header, 16-bit zero run of 300, one full block, single bit, azero
    let le: Vec<u8> = vec![
        0x12, // RESIZE | NO_GAPL
        0x01, // little-endian marker
        0x00, 0x00, 0x00, 0x80, // size 2^31
        0x05, 0x2C, 0x01, // 16zero, 300 LE
        0x02, // 1one
        0x13, 0x07, 0x00, // bit_1bit at 7
        0x09, // azero
    ];
    let be: Vec<u8> = vec![
        0x12,
        0x00, // big-endian marker
        0x80, 0x00, 0x00, 0x00, // size 2^31
        0x05, 0x01, 0x2C, // 16zero, 300 BE
        0x02,
        0x13, 0x00, 0x07,
        0x09,
    ];

    // when
    let mut from_le = BitSet::with_size(1);
    let mut from_be = BitSet::with_size(1);
    deserialize(&mut from_le, &le).unwrap();
    deserialize(&mut from_be, &be).unwrap();

    // then - byte order is transparent
    assert_eq!(from_le, from_be);
    assert_eq!(from_le.count(), 65536 + 1);
    assert!(from_le.contains(300 * 65536 + 5));
    assert!(from_le.contains(301 * 65536 + 7));
}

#[test]
fn should_reuse_serializer_session_across_vectors() {
    // given
    let mut serial = Serializer::new();
    let a = from_positions(&[1, 2, 3]);
    let b = from_positions(&[100_000, 200_000]);

    // when - same session serializes different vectors back to back
    let bytes_a = serial.serialize_to_bytes(&a, None);
    let bytes_b = serial.serialize_to_bytes(&b, None);

    // then
    let mut ra = BitSet::new();
    let mut rb = BitSet::new();
    deserialize(&mut ra, &bytes_a).unwrap();
    deserialize(&mut rb, &bytes_b).unwrap();
    assert_eq!(ra, a);
    assert_eq!(rb, b);
}

#[test]
fn should_round_trip_random_multiblock_vectors() {
    // given
    let mut rng = StdRng::seed_from_u64(42);
    for case in 0..20 {
        let mut bv = BitSet::new();
        let blocks: u64 = rng.random_range(1..8);
        for _ in 0..rng.random_range(1..2000) {
            let pos = rng.random_range(0..blocks * 65536);
            bv.set(pos);
        }
        if case % 2 == 0 {
            bv.optimize();
        }
        let level = rng.random_range(0..=5);

        // when
        let (restored, _) = round_trip_at_level(&bv, level);

        // then
        assert_eq!(restored, bv, "case {case} at level {level}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn should_round_trip_any_sparse_vector(
        positions in prop::collection::btree_set(0u64..(1 << 20), 0..300),
        level in 0u8..=5,
    ) {
        let positions: Vec<u64> = positions.into_iter().collect();
        let bv = from_positions(&positions);

        let (restored, _) = round_trip_at_level(&bv, level);

        prop_assert_eq!(restored, bv);
    }

    #[test]
    fn should_match_count_after_round_trip(
        positions in prop::collection::btree_set(0u64..(1 << 18), 0..200),
    ) {
        let positions: Vec<u64> = positions.into_iter().collect();
        let bv = from_positions(&positions);

        let mut buf = vec![0u8; bv.calc_stat().max_serialize_mem];
        let len = serialize(&bv, &mut buf);
        let mut restored = BitSet::new();
        deserialize(&mut restored, &buf[..len]).unwrap();

        prop_assert_eq!(restored.count(), positions.len() as u64);
    }
}
