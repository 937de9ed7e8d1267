//! Pushbuffers: command streams written word by word into a mapped buffer object.
//!
//! Words that hold device addresses cannot be known on the CPU side. [`PushBuffer::relocate`]
//! writes [`RELOC_PLACEHOLDER`] in their place and records a [`Relocation`] that the backend
//! patches before the stream executes.

use tracing::trace;

use crate::bo::{BufferObject, Mapping};
use crate::device::{BoHandle, CmdBufDesc, RelocDesc};
use crate::error::{Host1xError, Result};

/// Written where a relocated address will be patched in.
pub const RELOC_PLACEHOLDER: u32 = 0xdead_beef;

const WORD_BYTES: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Relocation {
    /// Byte offset of the patched word, relative to the pushbuffer's buffer object.
    pub source_offset: u64,
    pub target_handle: BoHandle,
    /// Byte offset within the target allocation.
    pub target_offset: u64,
    pub shift: u32,
}

#[derive(Debug)]
pub struct PushBuffer {
    bo: BufferObject,
    mapping: Mapping,
    start: u64,
    len: usize,
    capacity: usize,
    relocs: Vec<Relocation>,
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Host1xError::OffsetOverflow)
}

impl PushBuffer {
    /// Opens a pushbuffer writing into `bo` from byte `offset` to its end. `bo` must be mapped.
    pub fn open(bo: &BufferObject, offset: u64) -> Result<Self> {
        let mapping = bo.mapping().ok_or(Host1xError::NotMapped {
            handle: bo.handle(),
        })?;
        if offset % WORD_BYTES != 0 {
            return Err(Host1xError::MisalignedOffset {
                offset,
                alignment: WORD_BYTES,
            });
        }
        if offset > bo.size() {
            return Err(Host1xError::RangeOutOfBounds {
                offset,
                len: 0,
                size: bo.size(),
            });
        }
        let capacity = usize::try_from((bo.size() - offset) / WORD_BYTES)
            .map_err(|_| Host1xError::OffsetOverflow)?;

        Ok(Self {
            bo: bo.share(),
            mapping,
            start: offset,
            len: 0,
            capacity,
            relocs: Vec::new(),
        })
    }

    pub fn bo(&self) -> &BufferObject {
        &self.bo
    }

    /// Byte offset of the first word within the buffer object.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Words written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// Byte offset, within the buffer object, of the next word to be written.
    pub fn position(&self) -> u64 {
        self.start + self.len as u64 * WORD_BYTES
    }

    fn reserve(&self, words: usize) -> Result<()> {
        if words > self.remaining() {
            return Err(Host1xError::PushBufferOverflow {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn push(&mut self, word: u32) -> Result<()> {
        self.reserve(1)?;
        self.mapping.write_u32(self.position(), word)?;
        self.len += 1;
        Ok(())
    }

    /// Writes the IEEE-754 bit pattern of `value`.
    pub fn push_float(&mut self, value: f32) -> Result<()> {
        self.push(value.to_bits())
    }

    /// Writes all of `words` or, if they do not fit, none of them.
    pub fn push_words(&mut self, words: &[u32]) -> Result<()> {
        self.reserve(words.len())?;
        self.mapping.write_words(self.position(), words)?;
        self.len += words.len();
        Ok(())
    }

    /// Writes a placeholder and records that it must become the device address of
    /// `target + target_offset`, shifted right by `shift`.
    pub fn relocate(&mut self, target: &BufferObject, target_offset: u64, shift: u32) -> Result<()> {
        self.reserve(1)?;
        if target_offset > target.size() {
            return Err(Host1xError::RangeOutOfBounds {
                offset: target_offset,
                len: 0,
                size: target.size(),
            });
        }

        let reloc = Relocation {
            source_offset: self.position(),
            target_handle: target.handle(),
            target_offset: target.offset() + target_offset,
            shift,
        };
        self.push(RELOC_PLACEHOLDER)?;
        trace!(
            src = %self.bo.handle(),
            source_offset = reloc.source_offset,
            target = %reloc.target_handle,
            target_offset = reloc.target_offset,
            shift,
            "recorded relocation"
        );
        self.relocs.push(reloc);
        Ok(())
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocs
    }

    /// Reads back the words written so far.
    pub fn words(&self) -> Result<Vec<u32>> {
        self.mapping.read_words(self.start, self.len)
    }

    /// Flushes the written words to the device.
    pub(crate) fn flush_written(&self) -> Result<()> {
        self.bo
            .flush(self.start, self.len as u64 * WORD_BYTES)
    }

    pub(crate) fn cmdbuf_desc(&self) -> Result<CmdBufDesc> {
        Ok(CmdBufDesc {
            handle: self.bo.handle().0,
            offset: to_u32(self.bo.offset() + self.start)?,
            words: to_u32(self.len as u64)?,
            reserved0: 0,
        })
    }

    /// Relocations with source offsets relative to the allocation rather than the view.
    pub(crate) fn reloc_descs(&self) -> impl Iterator<Item = Result<RelocDesc>> + '_ {
        self.relocs.iter().map(move |reloc| {
            Ok(RelocDesc {
                src_handle: self.bo.handle().0,
                src_offset: to_u32(self.bo.offset() + reloc.source_offset)?,
                target_handle: reloc.target_handle.0,
                target_offset: to_u32(reloc.target_offset)?,
                shift: reloc.shift,
                reserved0: 0,
            })
        })
    }
}
