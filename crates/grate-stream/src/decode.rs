//! Lazy decoding of host1x command streams.
//!
//! [`Commands`] walks header words and hands out each command with its payload slice.
//! [`RegisterWrites`] flattens that into `(class, register, value)` triples, carrying the class
//! selected by the most recent `SETCL` across later `INCR`/`NONINCR`/`MASK`/`IMM` records.
//!
//! Decoding is a diagnostic path. An unknown opcode is reported and skipped one word at a time;
//! since its payload length is unknown the rest of the stream may decode misaligned.

use core::iter::FusedIterator;

use thiserror::Error;
use tracing::trace;

use crate::opcode::{Header, Opcode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeAnomaly {
    #[error("unknown opcode {opcode:#x} in word {word:#010x} at index {index}")]
    UnknownOpcode { index: usize, word: u32, opcode: u32 },

    #[error("{opcode:?} at index {index} needs {needed} payload words but only {available} remain")]
    Truncated {
        index: usize,
        opcode: Opcode,
        needed: usize,
        available: usize,
    },
}

/// One command: its header and the words that follow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command<'a> {
    /// Word index of the header within the decoded slice.
    pub index: usize,
    pub word: u32,
    pub header: Header,
    pub payload: &'a [u32],
}

impl<'a> Command<'a> {
    /// Register writes performed by this command when `class` is the active class.
    ///
    /// `SETCL` writes target the class it selects.
    pub fn writes(&self, class: u32) -> CommandWrites<'a> {
        let (class, kind, offset, mask) = match self.header {
            Header::SetClass {
                offset,
                classid,
                mask,
            } => (classid, WriteKind::Masked, offset, mask),
            Header::Incr { offset, .. } => (class, WriteKind::Incrementing, offset, 0),
            Header::NonIncr { offset, .. } => (class, WriteKind::NonIncrementing, offset, 0),
            Header::Mask { offset, mask } => (class, WriteKind::Masked, offset, mask),
            Header::Imm { offset, data } => (class, WriteKind::Immediate(data), offset, 0),
            Header::Restart | Header::Gather { .. } | Header::Extend { .. } | Header::Chdone => {
                (class, WriteKind::None, 0, 0)
            }
        };

        CommandWrites {
            class,
            kind,
            offset,
            mask,
            payload: self.payload,
            consumed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteKind {
    Incrementing,
    NonIncrementing,
    Masked,
    Immediate(u32),
    None,
}

/// Iterator over the register writes of a single [`Command`].
#[derive(Clone, Debug)]
pub struct CommandWrites<'a> {
    class: u32,
    kind: WriteKind,
    offset: u32,
    mask: u32,
    payload: &'a [u32],
    consumed: usize,
}

impl Iterator for CommandWrites<'_> {
    type Item = RegisterWrite;

    fn next(&mut self) -> Option<RegisterWrite> {
        let register = match self.kind {
            WriteKind::None => return None,
            WriteKind::Immediate(data) => {
                self.kind = WriteKind::None;
                return Some(RegisterWrite {
                    class: self.class,
                    register: self.offset,
                    value: data,
                });
            }
            WriteKind::Incrementing => self.offset + self.consumed as u32,
            WriteKind::NonIncrementing => self.offset,
            WriteKind::Masked => {
                if self.mask == 0 {
                    return None;
                }
                let bit = self.mask.trailing_zeros();
                self.mask &= self.mask - 1;
                self.offset + bit
            }
        };

        let value = *self.payload.get(self.consumed)?;
        self.consumed += 1;
        Some(RegisterWrite {
            class: self.class,
            register,
            value,
        })
    }
}

impl FusedIterator for CommandWrites<'_> {}

/// Walks a stream command by command.
#[derive(Clone, Debug)]
pub struct Commands<'a> {
    words: &'a [u32],
    pos: usize,
    done: bool,
}

impl<'a> Commands<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            pos: 0,
            done: false,
        }
    }

    /// Index of the next header word.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Commands<'a> {
    type Item = Result<Command<'a>, DecodeAnomaly>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.words.len() {
            return None;
        }

        let index = self.pos;
        let word = self.words[index];
        let Some(header) = Header::decode(word) else {
            let anomaly = DecodeAnomaly::UnknownOpcode {
                index,
                word,
                opcode: Opcode::raw_of(word),
            };
            trace!(%anomaly, "skipping unknown opcode");
            self.pos += 1;
            return Some(Err(anomaly));
        };

        let needed = header.payload_words();
        let available = self.words.len() - index - 1;
        if needed > available {
            self.done = true;
            return Some(Err(DecodeAnomaly::Truncated {
                index,
                opcode: header.opcode(),
                needed,
                available,
            }));
        }

        let payload = &self.words[index + 1..index + 1 + needed];
        self.pos = index + 1 + needed;
        Some(Ok(Command {
            index,
            word,
            header,
            payload,
        }))
    }
}

impl FusedIterator for Commands<'_> {}

/// A single register write performed by the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisterWrite {
    pub class: u32,
    pub register: u32,
    pub value: u32,
}

/// Flattened `(class, register, value)` view of a stream.
#[derive(Clone, Debug)]
pub struct RegisterWrites<'a> {
    commands: Commands<'a>,
    class: u32,
    current: Option<CommandWrites<'a>>,
}

impl<'a> RegisterWrites<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            commands: Commands::new(words),
            class: 0,
            current: None,
        }
    }

    /// Class selected by the most recent `SETCL` seen so far (0 before any).
    pub fn class(&self) -> u32 {
        self.class
    }
}

impl Iterator for RegisterWrites<'_> {
    type Item = Result<RegisterWrite, DecodeAnomaly>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(write) = self.current.as_mut().and_then(Iterator::next) {
                return Some(Ok(write));
            }
            self.current = None;

            match self.commands.next()? {
                Ok(command) => {
                    if let Header::SetClass { classid, .. } = command.header {
                        self.class = classid;
                    }
                    self.current = Some(command.writes(self.class));
                }
                Err(anomaly) => return Some(Err(anomaly)),
            }
        }
    }
}

impl FusedIterator for RegisterWrites<'_> {}

/// Decodes `words` into a lazy sequence of register writes.
pub fn decode(words: &[u32]) -> RegisterWrites<'_> {
    RegisterWrites::new(words)
}
