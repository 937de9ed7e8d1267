//! Well-known host1x class ids and the syncpoint increment register.
//!
//! Every class exposes `INCR_SYNCPT` at register `0x000`. Writing it asks the channel to
//! increment syncpoint `[7:0]` once the condition in `[15:8]` is met.

pub const HOST1X: u32 = 0x01;
pub const GR2D: u32 = 0x51;
pub const GR2D_SB: u32 = 0x52;
pub const GR3D: u32 = 0x60;

pub const INCR_SYNCPT: u32 = 0x000;

pub const COND_IMMEDIATE: u32 = 0;
pub const COND_OP_DONE: u32 = 1;
pub const COND_RD_DONE: u32 = 2;
pub const COND_REG_WR_SAFE: u32 = 3;

const SYNCPT_COND_SHIFT: u32 = 8;
const SYNCPT_FIELD_MASK: u32 = 0xff;

/// Value for an `INCR_SYNCPT` write.
pub const fn incr_syncpt(cond: u32, syncpoint: u32) -> u32 {
    ((cond & SYNCPT_FIELD_MASK) << SYNCPT_COND_SHIFT) | (syncpoint & SYNCPT_FIELD_MASK)
}

/// Splits an `INCR_SYNCPT` value into `(cond, syncpoint)`.
pub const fn split_incr_syncpt(value: u32) -> (u32, u32) {
    (
        (value >> SYNCPT_COND_SHIFT) & SYNCPT_FIELD_MASK,
        value & SYNCPT_FIELD_MASK,
    )
}

pub fn class_name(classid: u32) -> Option<&'static str> {
    match classid {
        HOST1X => Some("host1x"),
        GR2D => Some("gr2d"),
        GR2D_SB => Some("gr2d_sb"),
        GR3D => Some("gr3d"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_syncpt_packs_condition_and_index() {
        assert_eq!(incr_syncpt(COND_OP_DONE, 18), (1 << 8) | 18);
        assert_eq!(split_incr_syncpt((1 << 8) | 18), (COND_OP_DONE, 18));
        assert_eq!(incr_syncpt(0x101, 0x1ff), incr_syncpt(0x01, 0xff));
    }
}
