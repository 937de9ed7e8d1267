#![no_main]

use grate_stream::{decode, disassemble_into, Commands};
use libfuzzer_sys::fuzz_target;

/// Cap on decoded words so a single iteration stays cheap.
const MAX_WORDS: usize = 16 * 1024;

fuzz_target!(|data: &[u8]| {
    let words: Vec<u32> = data
        .chunks_exact(4)
        .take(MAX_WORDS)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut anomalies = 0usize;
    let mut consumed = 0usize;
    for command in Commands::new(&words) {
        match command {
            Ok(command) => {
                assert_eq!(command.index, consumed);
                assert_eq!(command.payload.len(), command.header.payload_words());
                consumed = command.index + 1 + command.payload.len();
            }
            Err(_) => {
                anomalies += 1;
                consumed += 1;
            }
        }
    }

    let write_errors = decode(&words).filter(Result::is_err).count();
    assert_eq!(write_errors, anomalies);

    let mut text = String::new();
    assert_eq!(disassemble_into(&words, &mut text), anomalies);
});
