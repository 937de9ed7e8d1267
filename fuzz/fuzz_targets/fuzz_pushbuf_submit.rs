#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use grate_host1x::{
    BoFlags, DummyDevice, Host1x, Host1xConfig, Timeout, WaitOutcome, RELOC_PLACEHOLDER,
};

const CMD_BYTES: u64 = 1024;
const TARGET_BYTES: u64 = 4096;
const MAX_OPS: usize = 512;

#[derive(Arbitrary, Debug)]
enum Op {
    Push(u32),
    PushFloat(f32),
    PushWords(Vec<u32>),
    Relocate { offset: u16, shift: u8 },
    NewPushBuffer { offset: u16 },
}

#[derive(Arbitrary, Debug)]
struct Input {
    increments: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let dummy = Arc::new(DummyDevice::default());
    let host1x = Host1x::with_device(dummy.clone(), Host1xConfig::default());
    let Ok(client) = host1x.open_client(0x60) else {
        return;
    };
    let Ok(cmd) = host1x.bo_alloc(CMD_BYTES, BoFlags::empty()) else {
        return;
    };
    let Ok(target) = host1x.bo_alloc(TARGET_BYTES, BoFlags::empty()) else {
        return;
    };
    if cmd.map().is_err() {
        return;
    }

    let Ok(mut job) = client.create_job(u32::from(input.increments)) else {
        return;
    };
    let mut current = None;
    for op in input.ops.into_iter().take(MAX_OPS) {
        if let Op::NewPushBuffer { offset } = op {
            // Misaligned or out of range offsets must fail without attaching anything.
            let before = job.pushbufs().len();
            match job.append(&cmd, u64::from(offset)) {
                Ok(_) => current = Some(before),
                Err(_) => assert_eq!(job.pushbufs().len(), before),
            }
            continue;
        }
        let Some(index) = current else {
            continue;
        };
        let Ok(pb) = job.pushbuf_mut(index) else {
            return;
        };
        let (len, relocs) = (pb.len(), pb.relocations().len());
        let relocating = matches!(op, Op::Relocate { .. });
        let result = match op {
            Op::Push(word) => pb.push(word),
            Op::PushFloat(value) => pb.push_float(value),
            Op::PushWords(words) => pb.push_words(&words),
            Op::Relocate { offset, shift } => {
                pb.relocate(&target, u64::from(offset), u32::from(shift % 32))
            }
            Op::NewPushBuffer { .. } => unreachable!(),
        };
        if result.is_err() {
            // Failed writes leave the pushbuffer untouched.
            assert_eq!((pb.len(), pb.relocations().len()), (len, relocs));
        } else if relocating {
            let words = pb.words().unwrap_or_default();
            assert_eq!(words.last(), Some(&RELOC_PLACEHOLDER));
        }
    }

    if client.submit(&mut job).is_err() {
        return;
    }
    let Ok(fence) = client.flush(&mut job) else {
        return;
    };
    assert_eq!(
        client.wait(fence, Timeout::ZERO).ok(),
        Some(WaitOutcome::Completed)
    );
});
