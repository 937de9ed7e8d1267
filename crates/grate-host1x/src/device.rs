//! Device backend seam.
//!
//! Everything above this module (buffer objects, pushbuffers, jobs, clients) talks to the
//! hardware through [`Device`]. A kernel backend translates these calls into driver requests;
//! [`crate::dummy::DummyDevice`] services them in host memory.

use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::fence::{Timeout, WaitOutcome};

/// Device-assigned buffer object handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoHandle(pub u32);

impl fmt::Display for BoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Allocation hints. Backends may ignore any of them.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BoFlags: u32 {
        const TILED = 1 << 0;
        const BOTTOM_UP = 1 << 1;
        const CACHED = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

/// A channel opened for one engine class, with the syncpoints it may increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub class: u32,
    pub syncpoints: Vec<u32>,
}

/// CPU view of a buffer object's backing store.
///
/// Offsets are bytes from the start of the allocation. Callers stay within [`CpuMemory::len`].
pub trait CpuMemory: Send + Sync + fmt::Debug {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, offset: u64, buf: &mut [u8]);

    fn write(&self, offset: u64, data: &[u8]);
}

/// One pushbuffer of a submission: `words` command words starting at byte `offset` of `handle`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBufDesc {
    pub handle: u32,
    pub offset: u32,
    pub words: u32,
    pub reserved0: u32,
}

/// Patch request: write `(address(target_handle) + target_offset) >> shift` at byte
/// `src_offset` of `src_handle`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RelocDesc {
    pub src_handle: u32,
    pub src_offset: u32,
    pub target_handle: u32,
    pub target_offset: u32,
    pub shift: u32,
    pub reserved0: u32,
}

/// Everything a backend needs to queue one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub channel: ChannelId,
    pub syncpoint: u32,
    /// Number of increments the job's command stream performs on `syncpoint`.
    pub increments: u32,
    pub cmdbufs: Vec<CmdBufDesc>,
    pub relocs: Vec<RelocDesc>,
}

impl Submission {
    pub fn total_words(&self) -> u64 {
        self.cmdbufs.iter().map(|c| u64::from(c.words)).sum()
    }

    /// Descriptor tables in their in-memory layout, as a kernel interface would consume them.
    pub fn cmdbuf_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cmdbufs)
    }

    pub fn reloc_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.relocs)
    }
}

pub trait Device: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn alloc(&self, size: u64, flags: BoFlags) -> Result<BoHandle>;

    /// Releases the device side of `handle`. Called exactly once per successful `alloc`.
    fn free(&self, handle: BoHandle) -> Result<()>;

    /// Maps `handle` for CPU access. Repeated calls return the same memory.
    fn map(&self, handle: BoHandle) -> Result<Arc<dyn CpuMemory>>;

    /// Makes CPU writes to `[offset, offset + len)` visible to the device.
    fn flush(&self, _handle: BoHandle, _offset: u64, _len: u64) -> Result<()> {
        Ok(())
    }

    /// Makes device writes to `[offset, offset + len)` visible to the CPU.
    fn invalidate(&self, _handle: BoHandle, _offset: u64, _len: u64) -> Result<()> {
        Ok(())
    }

    fn open_channel(&self, class: u32) -> Result<ChannelInfo>;

    fn close_channel(&self, channel: ChannelId) -> Result<()>;

    /// Queues a job. Returns the syncpoint value that marks its completion.
    fn submit(&self, submission: &Submission) -> Result<u32>;

    /// Pushes queued submissions on `channel` to the engine.
    fn flush_submissions(&self, _channel: ChannelId) -> Result<()> {
        Ok(())
    }

    fn read_syncpoint(&self, id: u32) -> Result<u32>;

    fn wait_syncpoint(&self, id: u32, threshold: u32, timeout: Timeout) -> Result<WaitOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_layouts_are_packed() {
        assert_eq!(core::mem::size_of::<CmdBufDesc>(), 16);
        assert_eq!(core::mem::size_of::<RelocDesc>(), 24);
    }

    #[test]
    fn submission_descriptor_bytes_follow_fields() {
        let submission = Submission {
            channel: ChannelId(1),
            syncpoint: 3,
            increments: 1,
            cmdbufs: vec![CmdBufDesc {
                handle: 7,
                offset: 0x40,
                words: 5,
                reserved0: 0,
            }],
            relocs: Vec::new(),
        };
        let bytes = submission.cmdbuf_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytemuck::pod_read_unaligned::<u32>(&bytes[4..8]), 0x40);
        assert_eq!(submission.total_words(), 5);
        assert!(submission.reloc_bytes().is_empty());
    }
}
