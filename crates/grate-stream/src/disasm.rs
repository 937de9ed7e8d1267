//! Text disassembler for host1x command streams.
//!
//! Output goes into a caller-owned `String`. One line per command header, followed by one
//! indented line per register write:
//!
//! ```text
//! 0000: 00001800  SETCL offset=0x000 class=0x60 (gr3d) mask=0x00
//! 0001: 20000001  NONINCR offset=0x000 count=1
//! 0002: 00000112      gr3d[0x000] <- 0x00000112
//! ```

use core::fmt::Write as _;

use crate::class::class_name;
use crate::decode::{Commands, DecodeAnomaly};
use crate::opcode::Header;

/// Disassembles `words` into a new string.
pub fn disassemble(words: &[u32]) -> String {
    let mut out = String::new();
    disassemble_into(words, &mut out);
    out
}

/// Appends the disassembly of `words` to `out`. Returns the number of decode anomalies.
pub fn disassemble_into(words: &[u32], out: &mut String) -> usize {
    let mut class = 0u32;
    let mut anomalies = 0usize;

    for item in Commands::new(words) {
        let command = match item {
            Ok(command) => command,
            Err(anomaly) => {
                anomalies += 1;
                write_anomaly(out, &anomaly);
                continue;
            }
        };

        let _ = write!(out, "{:04x}: {:08x}  ", command.index, command.word);
        write_header(out, &command.header);
        out.push('\n');

        if let Header::SetClass { classid, .. } = command.header {
            class = classid;
        }

        if let Header::Gather { .. } = command.header {
            // The address word is opaque to the decoder.
            let _ = writeln!(
                out,
                "{:04x}: {:08x}      base",
                command.index + 1,
                command.payload[0]
            );
            continue;
        }

        for (i, write) in command.writes(class).enumerate() {
            match command.payload.get(i) {
                Some(word) => {
                    let _ = write!(out, "{:04x}: {word:08x}      ", command.index + 1 + i);
                }
                // IMM carries its value in the header.
                None => out.push_str(&" ".repeat(20)),
            }
            write_class(out, write.class);
            let _ = writeln!(out, "[{:#05x}] <- {:#010x}", write.register, write.value);
        }
    }

    anomalies
}

fn write_class(out: &mut String, classid: u32) {
    match class_name(classid) {
        Some(name) => out.push_str(name),
        None => {
            let _ = write!(out, "class{classid:#x}");
        }
    }
}

fn write_header(out: &mut String, header: &Header) {
    let _ = match *header {
        Header::SetClass {
            offset,
            classid,
            mask,
        } => {
            let _ = write!(out, "SETCL offset={offset:#05x} class={classid:#04x}");
            if let Some(name) = class_name(classid) {
                let _ = write!(out, " ({name})");
            }
            write!(out, " mask={mask:#04x}")
        }
        Header::Incr { offset, count } => write!(out, "INCR offset={offset:#05x} count={count}"),
        Header::NonIncr { offset, count } => {
            write!(out, "NONINCR offset={offset:#05x} count={count}")
        }
        Header::Mask { offset, mask } => write!(out, "MASK offset={offset:#05x} mask={mask:#06x}"),
        Header::Imm { offset, data } => write!(out, "IMM offset={offset:#05x} data={data:#06x}"),
        Header::Restart => write!(out, "RESTART"),
        Header::Gather {
            offset,
            insert,
            incr,
            count,
        } => write!(
            out,
            "GATHER offset={offset:#05x} insert={} incr={} count={count}",
            insert as u8, incr as u8
        ),
        Header::Extend { subop, value } => {
            write!(out, "EXTEND subop={subop:#x} value={value:#08x}")
        }
        Header::Chdone => write!(out, "CHDONE"),
    };
}

fn write_anomaly(out: &mut String, anomaly: &DecodeAnomaly) {
    match *anomaly {
        DecodeAnomaly::UnknownOpcode { index, word, opcode } => {
            let _ = writeln!(out, "{index:04x}: {word:08x}  ??? opcode={opcode:#x}");
        }
        DecodeAnomaly::Truncated { .. } => {
            let _ = writeln!(out, "      ; {anomaly}");
        }
    }
}
