//! Command stream builder for host1x streams.
//!
//! This is intended for tests/fixtures and host-side tooling that needs to emit canonical
//! streams in plain memory (header words followed by exactly the payload they announce).
//! Streams destined for the device are built in buffer objects by the engine's pushbuffers.

use crate::class;
use crate::opcode;

/// `Vec<u32>`-backed host1x stream builder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamWriter {
    words: Vec<u32>,
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    pub fn finish(self) -> Vec<u32> {
        self.words
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Appends a raw word.
    pub fn push(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    /// Appends the IEEE-754 bit pattern of `value`.
    pub fn push_float(&mut self, value: f32) -> &mut Self {
        self.push(value.to_bits())
    }

    pub fn setclass(&mut self, offset: u32, classid: u32, mask: u32, values: &[u32]) -> &mut Self {
        assert_eq!(
            values.len(),
            (mask & 0x3f).count_ones() as usize,
            "SETCL mask {mask:#x} needs one value per set bit"
        );
        self.push(opcode::setclass(offset, classid, mask));
        self.words.extend_from_slice(values);
        self
    }

    pub fn incr(&mut self, offset: u32, values: &[u32]) -> &mut Self {
        assert!(values.len() <= 0xffff, "INCR payload too large for count field");
        self.push(opcode::incr(offset, values.len() as u32));
        self.words.extend_from_slice(values);
        self
    }

    pub fn nonincr(&mut self, offset: u32, values: &[u32]) -> &mut Self {
        assert!(values.len() <= 0xffff, "NONINCR payload too large for count field");
        self.push(opcode::nonincr(offset, values.len() as u32));
        self.words.extend_from_slice(values);
        self
    }

    pub fn mask(&mut self, offset: u32, mask: u32, values: &[u32]) -> &mut Self {
        assert_eq!(
            values.len(),
            (mask & 0xffff).count_ones() as usize,
            "MASK {mask:#x} needs one value per set bit"
        );
        self.push(opcode::mask(offset, mask));
        self.words.extend_from_slice(values);
        self
    }

    pub fn imm(&mut self, offset: u32, data: u32) -> &mut Self {
        self.push(opcode::imm(offset, data))
    }

    pub fn extend(&mut self, subop: u32, value: u32) -> &mut Self {
        self.push(opcode::extend(subop, value))
    }

    pub fn restart(&mut self) -> &mut Self {
        self.push(opcode::restart())
    }

    pub fn chdone(&mut self) -> &mut Self {
        self.push(opcode::chdone())
    }

    /// `NONINCR(INCR_SYNCPT, 1)` followed by the increment request for `syncpoint`.
    pub fn incr_syncpt(&mut self, cond: u32, syncpoint: u32) -> &mut Self {
        self.nonincr(class::INCR_SYNCPT, &[class::incr_syncpt(cond, syncpoint)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, RegisterWrite};

    #[test]
    fn writer_emits_headers_followed_by_payload() {
        let mut w = StreamWriter::new();
        w.setclass(0, class::GR2D, 0, &[])
            .incr(0x2b, &[1, 2])
            .push_float(1.0)
            .chdone();

        assert_eq!(
            w.as_words(),
            &[
                opcode::setclass(0, class::GR2D, 0),
                opcode::incr(0x2b, 2),
                1,
                2,
                0x3f80_0000,
                opcode::chdone(),
            ]
        );
    }

    #[test]
    fn incr_syncpt_decodes_to_single_write() {
        let mut w = StreamWriter::new();
        w.setclass(0, class::GR3D, 0, &[])
            .incr_syncpt(class::COND_OP_DONE, 3);

        let writes: Vec<_> = decode(w.as_words()).collect::<Result<_, _>>().unwrap();
        assert_eq!(
            writes,
            vec![RegisterWrite {
                class: class::GR3D,
                register: class::INCR_SYNCPT,
                value: class::incr_syncpt(class::COND_OP_DONE, 3),
            }]
        );
    }

    #[test]
    fn le_bytes_follow_word_order() {
        let mut w = StreamWriter::new();
        w.push(0x1122_3344).push(0x5566_7788);
        assert_eq!(
            w.to_le_bytes(),
            vec![0x44, 0x33, 0x22, 0x11, 0x88, 0x77, 0x66, 0x55]
        );
    }

    #[test]
    #[should_panic(expected = "needs one value per set bit")]
    fn mask_rejects_mismatched_payload() {
        StreamWriter::new().mask(0, 0b11, &[1]);
    }
}
