use crate::decode::{decode, Commands, RegisterWrite};
use crate::opcode::{self, Header};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

/// One stream element as generated by the strategies, expanded independently of the decoder.
#[derive(Debug, Clone)]
enum Op {
    SetClass { offset: u32, classid: u32, mask: u32, values: Vec<u32> },
    Incr { offset: u32, values: Vec<u32> },
    NonIncr { offset: u32, values: Vec<u32> },
    Mask { offset: u32, mask: u32, values: Vec<u32> },
    Imm { offset: u32, data: u32 },
    Marker(u32),
}

const MAX_OPS: usize = 32;
const MAX_PAYLOAD: usize = 16;

fn offset_strategy() -> impl Strategy<Value = u32> {
    0u32..=0xfff
}

fn mask_payload_strategy(bits: u32) -> BoxedStrategy<(u32, Vec<u32>)> {
    (0u32..(1 << bits))
        .prop_flat_map(|mask| {
            let n = mask.count_ones() as usize;
            (Just(mask), prop::collection::vec(any::<u32>(), n))
        })
        .boxed()
}

fn op_strategy() -> BoxedStrategy<Op> {
    prop_oneof![
        2 => (offset_strategy(), 0u32..=0x3ff, mask_payload_strategy(6))
            .prop_map(|(offset, classid, (mask, values))| Op::SetClass { offset, classid, mask, values }),
        3 => (offset_strategy(), prop::collection::vec(any::<u32>(), 0..=MAX_PAYLOAD))
            .prop_map(|(offset, values)| Op::Incr { offset, values }),
        3 => (offset_strategy(), prop::collection::vec(any::<u32>(), 0..=MAX_PAYLOAD))
            .prop_map(|(offset, values)| Op::NonIncr { offset, values }),
        3 => (offset_strategy(), mask_payload_strategy(16))
            .prop_map(|(offset, (mask, values))| Op::Mask { offset, mask, values }),
        2 => (offset_strategy(), 0u32..=0xffff).prop_map(|(offset, data)| Op::Imm { offset, data }),
        1 => prop_oneof![
            Just(opcode::restart()),
            Just(opcode::chdone()),
            (0u32..16, 0u32..0x0100_0000).prop_map(|(s, v)| opcode::extend(s, v)),
        ]
        .prop_map(Op::Marker),
    ]
    .boxed()
}

fn ops_strategy() -> BoxedStrategy<Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..=MAX_OPS).boxed()
}

/// Encodes `ops` and computes the register writes a correct decoder must report.
fn encode_with_model(ops: &[Op]) -> (Vec<u32>, Vec<RegisterWrite>) {
    let mut words = Vec::new();
    let mut writes = Vec::new();
    let mut class = 0u32;

    let masked = |class: u32, offset: u32, mask: u32, values: &[u32], writes: &mut Vec<RegisterWrite>| {
        let mut values = values.iter();
        for bit in 0..16 {
            if mask & (1 << bit) != 0 {
                let value = *values.next().expect("payload matches popcount");
                writes.push(RegisterWrite { class, register: offset + bit, value });
            }
        }
    };

    for op in ops {
        match op {
            Op::SetClass { offset, classid, mask, values } => {
                words.push(opcode::setclass(*offset, *classid, *mask));
                words.extend_from_slice(values);
                class = *classid;
                masked(class, *offset, *mask, values, &mut writes);
            }
            Op::Incr { offset, values } => {
                words.push(opcode::incr(*offset, values.len() as u32));
                words.extend_from_slice(values);
                for (i, value) in values.iter().enumerate() {
                    writes.push(RegisterWrite { class, register: offset + i as u32, value: *value });
                }
            }
            Op::NonIncr { offset, values } => {
                words.push(opcode::nonincr(*offset, values.len() as u32));
                words.extend_from_slice(values);
                for value in values {
                    writes.push(RegisterWrite { class, register: *offset, value: *value });
                }
            }
            Op::Mask { offset, mask, values } => {
                words.push(opcode::mask(*offset, *mask));
                words.extend_from_slice(values);
                masked(class, *offset, *mask, values, &mut writes);
            }
            Op::Imm { offset, data } => {
                words.push(opcode::imm(*offset, *data));
                writes.push(RegisterWrite { class, register: *offset, value: *data });
            }
            Op::Marker(word) => words.push(*word),
        }
    }

    (words, writes)
}

fn check_stream(ops: &[Op]) -> TestCaseResult {
    let (words, expected) = encode_with_model(ops);

    let decoded: Result<Vec<_>, _> = decode(&words).collect();
    prop_assert_eq!(decoded, Ok(expected));

    let commands: Vec<_> = Commands::new(&words).collect::<Result<_, _>>().unwrap();
    prop_assert_eq!(commands.len(), ops.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_decoder_matches_reference_expansion(ops in ops_strategy()) {
        check_stream(&ops)?;
    }

    #[test]
    fn prop_counted_headers_round_trip(offset in 0u32..=0xfff, count in 0u32..=0xffff) {
        prop_assert_eq!(Header::decode(opcode::incr(offset, count)), Some(Header::Incr { offset, count }));
        prop_assert_eq!(Header::decode(opcode::nonincr(offset, count)), Some(Header::NonIncr { offset, count }));
        prop_assert_eq!(Header::decode(opcode::mask(offset, count)), Some(Header::Mask { offset, mask: count }));
        prop_assert_eq!(Header::decode(opcode::imm(offset, count)), Some(Header::Imm { offset, data: count }));
    }

    #[test]
    fn prop_setclass_round_trips(offset in 0u32..=0xfff, classid in 0u32..=0x3ff, mask in 0u32..=0x3f) {
        prop_assert_eq!(
            Header::decode(opcode::setclass(offset, classid, mask)),
            Some(Header::SetClass { offset, classid, mask })
        );
    }

    #[test]
    fn prop_extend_round_trips(subop in 0u32..16, value in 0u32..0x0100_0000) {
        prop_assert_eq!(Header::decode(opcode::extend(subop, value)), Some(Header::Extend { subop, value }));
    }

    #[test]
    fn prop_encoders_truncate_to_field_width(offset in any::<u32>(), count in any::<u32>(), classid in any::<u32>()) {
        prop_assert_eq!(opcode::incr(offset, count), opcode::incr(offset & 0xfff, count & 0xffff));
        prop_assert_eq!(opcode::nonincr(offset, count), opcode::nonincr(offset & 0xfff, count & 0xffff));
        prop_assert_eq!(
            opcode::setclass(offset, classid, count),
            opcode::setclass(offset & 0xfff, classid & 0x3ff, count & 0x3f)
        );
        // Truncation never bleeds into the opcode nibble.
        prop_assert_eq!(opcode::imm(offset, count) >> 28, 4);
    }

    #[test]
    fn prop_unknown_opcode_advances_one_word(raw in 7u32..=13, low in 0u32..0x1000_0000, tail in any::<u16>()) {
        let words = [(raw << 28) | low, opcode::imm(0x10, tail as u32)];
        let items: Vec<_> = decode(&words).collect();
        prop_assert_eq!(items.len(), 2);
        prop_assert!(items[0].is_err());
        prop_assert_eq!(
            items[1].clone(),
            Ok(RegisterWrite { class: 0, register: 0x10, value: tail as u32 })
        );
    }
}
