//! Opcode header encoders and decoder (bit-exact wire format).
//!
//! | Code | Name    | Fields                                               |
//! |------|---------|------------------------------------------------------|
//! | 0    | SETCL   | offset[12]@16, classid[10]@6, mask[6]@0              |
//! | 1    | INCR    | offset[12]@16, count[16]@0                           |
//! | 2    | NONINCR | offset[12]@16, count[16]@0                           |
//! | 3    | MASK    | offset[12]@16, mask[16]@0                            |
//! | 4    | IMM     | offset[12]@16, data[16]@0                            |
//! | 5    | RESTART | -                                                    |
//! | 6    | GATHER  | offset[12]@16, insert[1]@15, type[1]@14, count[14]@0 |
//! | 14   | EXTEND  | subop[4]@24, value[24]@0                             |
//! | 15   | CHDONE  | -                                                    |

pub const OPCODE_SHIFT: u32 = 28;

const OFFSET_SHIFT: u32 = 16;
const OFFSET_MASK: u32 = 0xfff;
const CLASS_SHIFT: u32 = 6;
const CLASS_MASK: u32 = 0x3ff;
const SETCL_MASK_MASK: u32 = 0x3f;
const COUNT_MASK: u32 = 0xffff;
const GATHER_COUNT_MASK: u32 = 0x3fff;
const GATHER_INSERT_BIT: u32 = 1 << 15;
const GATHER_TYPE_BIT: u32 = 1 << 14;
const EXTEND_SUBOP_SHIFT: u32 = 24;
const EXTEND_SUBOP_MASK: u32 = 0xf;
const EXTEND_VALUE_MASK: u32 = 0x00ff_ffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    SetClass = 0,
    Incr = 1,
    NonIncr = 2,
    Mask = 3,
    Imm = 4,
    Restart = 5,
    Gather = 6,
    Extend = 14,
    Chdone = 15,
}

impl Opcode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::SetClass,
            1 => Self::Incr,
            2 => Self::NonIncr,
            3 => Self::Mask,
            4 => Self::Imm,
            5 => Self::Restart,
            6 => Self::Gather,
            14 => Self::Extend,
            15 => Self::Chdone,
            _ => return None,
        })
    }

    /// Raw opcode nibble of a header word.
    pub const fn raw_of(word: u32) -> u32 {
        word >> OPCODE_SHIFT
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SetClass => "SETCL",
            Self::Incr => "INCR",
            Self::NonIncr => "NONINCR",
            Self::Mask => "MASK",
            Self::Imm => "IMM",
            Self::Restart => "RESTART",
            Self::Gather => "GATHER",
            Self::Extend => "EXTEND",
            Self::Chdone => "CHDONE",
        }
    }
}

const fn op(opcode: Opcode) -> u32 {
    (opcode as u32) << OPCODE_SHIFT
}

const fn offset_field(offset: u32) -> u32 {
    (offset & OFFSET_MASK) << OFFSET_SHIFT
}

/// `SETCL`: select `classid`; each set bit `i` of `mask` consumes one following word, written to
/// `offset + i` of the new class.
pub const fn setclass(offset: u32, classid: u32, mask: u32) -> u32 {
    op(Opcode::SetClass)
        | offset_field(offset)
        | ((classid & CLASS_MASK) << CLASS_SHIFT)
        | (mask & SETCL_MASK_MASK)
}

/// `INCR`: the next `count` words go to `offset, offset + 1, ...`.
pub const fn incr(offset: u32, count: u32) -> u32 {
    op(Opcode::Incr) | offset_field(offset) | (count & COUNT_MASK)
}

/// `NONINCR`: the next `count` words all go to `offset`.
pub const fn nonincr(offset: u32, count: u32) -> u32 {
    op(Opcode::NonIncr) | offset_field(offset) | (count & COUNT_MASK)
}

/// `MASK`: one following word per set bit `i` of `mask`, written to `offset + i`.
pub const fn mask(offset: u32, mask: u32) -> u32 {
    op(Opcode::Mask) | offset_field(offset) | (mask & COUNT_MASK)
}

/// `IMM`: write the 16-bit literal `data` to `offset`.
pub const fn imm(offset: u32, data: u32) -> u32 {
    op(Opcode::Imm) | offset_field(offset) | (data & COUNT_MASK)
}

pub const fn restart() -> u32 {
    op(Opcode::Restart)
}

pub const fn extend(subop: u32, value: u32) -> u32 {
    op(Opcode::Extend)
        | ((subop & EXTEND_SUBOP_MASK) << EXTEND_SUBOP_SHIFT)
        | (value & EXTEND_VALUE_MASK)
}

pub const fn chdone() -> u32 {
    op(Opcode::Chdone)
}

/// A decoded command header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Header {
    SetClass { offset: u32, classid: u32, mask: u32 },
    Incr { offset: u32, count: u32 },
    NonIncr { offset: u32, count: u32 },
    Mask { offset: u32, mask: u32 },
    Imm { offset: u32, data: u32 },
    Restart,
    Gather { offset: u32, insert: bool, incr: bool, count: u32 },
    Extend { subop: u32, value: u32 },
    Chdone,
}

impl Header {
    /// Decodes a header word. Returns `None` for opcodes this codec does not know.
    pub const fn decode(word: u32) -> Option<Self> {
        let offset = (word >> OFFSET_SHIFT) & OFFSET_MASK;
        let Some(opcode) = Opcode::from_u32(Opcode::raw_of(word)) else {
            return None;
        };
        Some(match opcode {
            Opcode::SetClass => Self::SetClass {
                offset,
                classid: (word >> CLASS_SHIFT) & CLASS_MASK,
                mask: word & SETCL_MASK_MASK,
            },
            Opcode::Incr => Self::Incr {
                offset,
                count: word & COUNT_MASK,
            },
            Opcode::NonIncr => Self::NonIncr {
                offset,
                count: word & COUNT_MASK,
            },
            Opcode::Mask => Self::Mask {
                offset,
                mask: word & COUNT_MASK,
            },
            Opcode::Imm => Self::Imm {
                offset,
                data: word & COUNT_MASK,
            },
            Opcode::Restart => Self::Restart,
            Opcode::Gather => Self::Gather {
                offset,
                insert: word & GATHER_INSERT_BIT != 0,
                incr: word & GATHER_TYPE_BIT != 0,
                count: word & GATHER_COUNT_MASK,
            },
            Opcode::Extend => Self::Extend {
                subop: (word >> EXTEND_SUBOP_SHIFT) & EXTEND_SUBOP_MASK,
                value: word & EXTEND_VALUE_MASK,
            },
            Opcode::Chdone => Self::Chdone,
        })
    }

    pub const fn encode(&self) -> u32 {
        match *self {
            Self::SetClass {
                offset,
                classid,
                mask: m,
            } => setclass(offset, classid, m),
            Self::Incr { offset, count } => incr(offset, count),
            Self::NonIncr { offset, count } => nonincr(offset, count),
            Self::Mask { offset, mask: m } => mask(offset, m),
            Self::Imm { offset, data } => imm(offset, data),
            Self::Restart => restart(),
            Self::Gather {
                offset,
                insert,
                incr,
                count,
            } => {
                let mut word = op(Opcode::Gather) | offset_field(offset) | (count & GATHER_COUNT_MASK);
                if insert {
                    word |= GATHER_INSERT_BIT;
                }
                if incr {
                    word |= GATHER_TYPE_BIT;
                }
                word
            }
            Self::Extend { subop, value } => extend(subop, value),
            Self::Chdone => chdone(),
        }
    }

    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::SetClass { .. } => Opcode::SetClass,
            Self::Incr { .. } => Opcode::Incr,
            Self::NonIncr { .. } => Opcode::NonIncr,
            Self::Mask { .. } => Opcode::Mask,
            Self::Imm { .. } => Opcode::Imm,
            Self::Restart => Opcode::Restart,
            Self::Gather { .. } => Opcode::Gather,
            Self::Extend { .. } => Opcode::Extend,
            Self::Chdone => Opcode::Chdone,
        }
    }

    /// Number of words that follow this header in the stream.
    ///
    /// `GATHER` is followed by the base address of the gathered buffer.
    pub const fn payload_words(&self) -> usize {
        match *self {
            Self::SetClass { mask, .. } | Self::Mask { mask, .. } => mask.count_ones() as usize,
            Self::Incr { count, .. } | Self::NonIncr { count, .. } => count as usize,
            Self::Gather { .. } => 1,
            Self::Imm { .. } | Self::Restart | Self::Extend { .. } | Self::Chdone => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setclass_layout_is_bit_exact() {
        assert_eq!(setclass(0, 0x60, 0), 0x0000_1800);
        assert_eq!(setclass(0x123, 0x3ff, 0x3f), 0x0123_ffff);
    }

    #[test]
    fn nonincr_layout_is_bit_exact() {
        assert_eq!(nonincr(0, 1), 0x2000_0001);
        assert_eq!(incr(0x2b, 3), 0x102b_0003);
        assert_eq!(mask(0x10, 0b1011), 0x3010_000b);
        assert_eq!(imm(0x4e, 0xbeef), 0x404e_beef);
        assert_eq!(extend(0x3, 0x12_3456), 0xe312_3456);
        assert_eq!(restart(), 0x5000_0000);
        assert_eq!(chdone(), 0xf000_0000);
    }

    #[test]
    fn fields_are_truncated_to_their_width() {
        assert_eq!(incr(0x1_001, 0x1_0002), incr(0x001, 0x0002));
        assert_eq!(setclass(0, 0x460, 0x41), setclass(0, 0x060, 0x01));
        assert_eq!(imm(0, 0xdead_beef), imm(0, 0xbeef));
        assert_eq!(extend(0x1f, 0xff_ff_ff_ff), extend(0xf, 0xff_ffff));
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        for raw in [7u32, 8, 9, 10, 11, 12, 13] {
            assert_eq!(Header::decode(raw << OPCODE_SHIFT), None, "opcode {raw}");
            assert_eq!(Opcode::from_u32(raw), None);
        }
    }

    #[test]
    fn gather_header_round_trips() {
        let header = Header::Gather {
            offset: 0x20,
            insert: true,
            incr: false,
            count: 0x3000,
        };
        assert_eq!(Header::decode(header.encode()), Some(header));
        assert_eq!(header.payload_words(), 1);
    }

    #[test]
    fn payload_length_follows_mask_popcount() {
        assert_eq!(Header::decode(mask(0, 0b1010_0101)).map(|h| h.payload_words()), Some(4));
        assert_eq!(Header::decode(setclass(0, 0x51, 0b11)).map(|h| h.payload_words()), Some(2));
        assert_eq!(Header::decode(imm(0, 7)).map(|h| h.payload_words()), Some(0));
    }
}
