//! In-process backend for tests and for running without hardware.
//!
//! Buffer objects live in host memory and get a fake device address. Submissions are executed
//! by decoding their command streams: every `INCR_SYNCPT` write increments the named
//! syncpoint. If a stream performs fewer increments on the job's syncpoint than the job
//! declared, the remainder is applied after the stream so that waits cannot hang.

mod syncpoint;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use grate_stream::class::{split_incr_syncpt, INCR_SYNCPT};
use grate_stream::decode;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::bo::check_range;
use crate::config::{DummyCompletionMode, DummyConfig};
use crate::device::{
    BoFlags, BoHandle, ChannelId, ChannelInfo, CpuMemory, Device, RelocDesc, Submission,
};
use crate::error::{Host1xError, Result};
use crate::fence::{Timeout, WaitOutcome};

use self::syncpoint::SyncpointTable;

const EINVAL: i32 = 22;
const ENOSPC: i32 = 28;

/// Fake device address of the first allocation.
pub const DUMMY_IOVA_BASE: u64 = 0x4000_0000;
const IOVA_ALIGN: u64 = 0x1000;

/// Host-memory backing store.
#[derive(Debug)]
pub struct HostMemory {
    bytes: RwLock<Vec<u8>>,
}

impl HostMemory {
    fn new(size: usize) -> Self {
        Self {
            bytes: RwLock::new(vec![0; size]),
        }
    }
}

impl CpuMemory for HostMemory {
    fn len(&self) -> u64 {
        self.bytes.read().len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes.read()[start..start + buf.len()]);
    }

    fn write(&self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.bytes.write()[start..start + data.len()].copy_from_slice(data);
    }
}

#[derive(Debug)]
struct DummyBo {
    memory: Arc<HostMemory>,
    iova: u64,
    size: u64,
}

/// Counters for asserting on backend traffic in tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub allocations: u64,
    pub releases: u64,
    pub flushes: u64,
    pub invalidates: u64,
    pub submissions: u64,
    pub executed: u64,
    pub relocations: u64,
    /// Increments applied on behalf of streams that did not perform all they declared.
    pub topped_up_increments: u64,
}

#[derive(Debug, Default)]
struct DummyState {
    next_handle: u32,
    next_iova: u64,
    bos: HashMap<BoHandle, DummyBo>,
    next_channel: u64,
    next_syncpoint: u32,
    /// Syncpoints returned by closed channels, reused lowest first.
    released_syncpoints: BTreeSet<u32>,
    channels: HashMap<ChannelId, ChannelInfo>,
    pending: VecDeque<Submission>,
    stats: DummyStats,
}

#[derive(Debug)]
pub struct DummyDevice {
    config: DummyConfig,
    state: Mutex<DummyState>,
    syncpoints: SyncpointTable,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

fn invalid(op: &'static str, message: impl Into<String>) -> Host1xError {
    Host1xError::device(op, EINVAL, message)
}

impl DummyDevice {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            syncpoints: SyncpointTable::new(config.syncpoints),
            config,
            state: Mutex::new(DummyState {
                next_handle: 1,
                next_iova: DUMMY_IOVA_BASE,
                ..DummyState::default()
            }),
        }
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().bos.len()
    }

    /// Fake device address of `handle`.
    pub fn iova(&self, handle: BoHandle) -> Option<u64> {
        self.state.lock().bos.get(&handle).map(|bo| bo.iova)
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Executes every queued submission. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let pending: Vec<Submission> = self.state.lock().pending.drain(..).collect();
        let count = pending.len();
        for submission in &pending {
            self.execute(submission);
        }
        count
    }

    /// Increments a syncpoint directly, as an engine would.
    pub fn increment_syncpoint(&self, id: u32) -> Result<u32> {
        self.syncpoints.increment(id)
    }

    /// Highest value promised to submitted jobs on syncpoint `id`.
    pub fn syncpoint_max(&self, id: u32) -> Result<u32> {
        self.syncpoints.read_max(id)
    }

    fn memory_of(&self, handle: BoHandle) -> Option<(Arc<HostMemory>, u64)> {
        self.state
            .lock()
            .bos
            .get(&handle)
            .map(|bo| (Arc::clone(&bo.memory), bo.iova))
    }

    fn validate(&self, submission: &Submission) -> Result<()> {
        if submission.syncpoint >= self.syncpoints.len() {
            return Err(Host1xError::NoSyncpoint(submission.syncpoint));
        }

        let state = self.state.lock();
        if !state.channels.contains_key(&submission.channel) {
            return Err(invalid(
                "submit",
                format!("channel {:?} is not open", submission.channel),
            ));
        }

        let size_of = |handle: u32| -> Result<u64> {
            state
                .bos
                .get(&BoHandle(handle))
                .map(|bo| bo.size)
                .ok_or(Host1xError::UnknownHandle(BoHandle(handle)))
        };
        for cmdbuf in &submission.cmdbufs {
            let size = size_of(cmdbuf.handle)?;
            check_range(u64::from(cmdbuf.offset), u64::from(cmdbuf.words) * 4, size)?;
        }
        for reloc in &submission.relocs {
            check_range(u64::from(reloc.src_offset), 4, size_of(reloc.src_handle)?)?;
            check_range(u64::from(reloc.target_offset), 0, size_of(reloc.target_handle)?)?;
        }
        Ok(())
    }

    fn patch(&self, reloc: &RelocDesc) -> Result<()> {
        let (src, _) = self
            .memory_of(BoHandle(reloc.src_handle))
            .ok_or(Host1xError::UnknownHandle(BoHandle(reloc.src_handle)))?;
        let (_, target_iova) = self
            .memory_of(BoHandle(reloc.target_handle))
            .ok_or(Host1xError::UnknownHandle(BoHandle(reloc.target_handle)))?;

        let address = (target_iova + u64::from(reloc.target_offset)) >> reloc.shift;
        src.write(u64::from(reloc.src_offset), &(address as u32).to_ne_bytes());
        trace!(
            src = reloc.src_handle,
            src_offset = reloc.src_offset,
            address = address as u32,
            "patched relocation"
        );
        Ok(())
    }

    fn execute(&self, submission: &Submission) {
        let mut performed = 0u32;

        for cmdbuf in &submission.cmdbufs {
            let Some((memory, _)) = self.memory_of(BoHandle(cmdbuf.handle)) else {
                warn!(handle = cmdbuf.handle, "dummy: command buffer released before execution");
                continue;
            };
            let mut words = vec![0u32; cmdbuf.words as usize];
            memory.read(u64::from(cmdbuf.offset), bytemuck::cast_slice_mut(&mut words));

            for write in decode(&words) {
                match write {
                    Ok(write) if write.register == INCR_SYNCPT => {
                        let (_cond, id) = split_incr_syncpt(write.value);
                        match self.syncpoints.increment(id) {
                            Ok(_) if id == submission.syncpoint => performed += 1,
                            Ok(_) => {}
                            Err(err) => warn!(%err, "dummy: stream increments unknown syncpoint"),
                        }
                    }
                    Ok(_) => {}
                    Err(anomaly) => warn!(%anomaly, "dummy: malformed command stream"),
                }
            }
        }

        let missing = submission.increments.saturating_sub(performed);
        if missing > 0 {
            debug!(
                syncpoint = submission.syncpoint,
                declared = submission.increments,
                performed,
                "dummy: completing declared increments"
            );
            for _ in 0..missing {
                let _ = self.syncpoints.increment(submission.syncpoint);
            }
        }

        let mut state = self.state.lock();
        state.stats.executed += 1;
        state.stats.topped_up_increments += u64::from(missing);
    }
}

impl Device for DummyDevice {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn alloc(&self, size: u64, _flags: BoFlags) -> Result<BoHandle> {
        let len = usize::try_from(size).map_err(|_| Host1xError::AllocationFailed {
            size,
            reason: "size exceeds host address space".into(),
        })?;

        let mut state = self.state.lock();
        let handle = BoHandle(state.next_handle);
        let iova = state.next_iova;
        let next_iova = size
            .checked_next_multiple_of(IOVA_ALIGN)
            .and_then(|span| iova.checked_add(span))
            .ok_or_else(|| Host1xError::AllocationFailed {
                size,
                reason: "dummy address space exhausted".into(),
            })?;

        state.next_handle += 1;
        state.next_iova = next_iova;
        state.bos.insert(
            handle,
            DummyBo {
                memory: Arc::new(HostMemory::new(len)),
                iova,
                size,
            },
        );
        state.stats.allocations += 1;
        Ok(handle)
    }

    fn free(&self, handle: BoHandle) -> Result<()> {
        let mut state = self.state.lock();
        state
            .bos
            .remove(&handle)
            .ok_or(Host1xError::UnknownHandle(handle))?;
        state.stats.releases += 1;
        Ok(())
    }

    fn map(&self, handle: BoHandle) -> Result<Arc<dyn CpuMemory>> {
        let (memory, _) = self
            .memory_of(handle)
            .ok_or(Host1xError::UnknownHandle(handle))?;
        Ok(memory)
    }

    fn flush(&self, handle: BoHandle, offset: u64, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        let size = state
            .bos
            .get(&handle)
            .map(|bo| bo.size)
            .ok_or(Host1xError::UnknownHandle(handle))?;
        check_range(offset, len, size)?;
        state.stats.flushes += 1;
        Ok(())
    }

    fn invalidate(&self, handle: BoHandle, offset: u64, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        let size = state
            .bos
            .get(&handle)
            .map(|bo| bo.size)
            .ok_or(Host1xError::UnknownHandle(handle))?;
        check_range(offset, len, size)?;
        state.stats.invalidates += 1;
        Ok(())
    }

    fn open_channel(&self, class: u32) -> Result<ChannelInfo> {
        let mut state = self.state.lock();
        let wanted = self.config.syncpoints_per_channel as usize;
        let fresh = (self.syncpoints.len() - state.next_syncpoint) as usize;
        if state.released_syncpoints.len() + fresh < wanted {
            return Err(Host1xError::device(
                "open_channel",
                ENOSPC,
                "out of syncpoints",
            ));
        }

        let mut syncpoints = Vec::with_capacity(wanted);
        while syncpoints.len() < wanted {
            let id = match state.released_syncpoints.pop_first() {
                Some(id) => id,
                None => {
                    let id = state.next_syncpoint;
                    state.next_syncpoint += 1;
                    id
                }
            };
            syncpoints.push(id);
        }

        let info = ChannelInfo {
            id: ChannelId(state.next_channel),
            class,
            syncpoints,
        };
        state.next_channel += 1;
        state.channels.insert(info.id, info.clone());
        debug!(channel = info.id.0, class, syncpoints = ?info.syncpoints, "dummy: opened channel");
        Ok(info)
    }

    fn close_channel(&self, channel: ChannelId) -> Result<()> {
        let mut state = self.state.lock();
        let info = state
            .channels
            .remove(&channel)
            .ok_or_else(|| invalid("close_channel", format!("channel {channel:?} is not open")))?;
        state.released_syncpoints.extend(info.syncpoints);
        debug!(channel = channel.0, "dummy: closed channel");
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> Result<u32> {
        self.validate(submission)?;
        for reloc in &submission.relocs {
            self.patch(reloc)?;
        }
        let fence = self
            .syncpoints
            .reserve(submission.syncpoint, submission.increments)?;

        {
            let mut state = self.state.lock();
            state.stats.submissions += 1;
            state.stats.relocations += submission.relocs.len() as u64;
        }

        match self.config.completion {
            DummyCompletionMode::Immediate => self.execute(submission),
            DummyCompletionMode::Deferred => self.state.lock().pending.push_back(submission.clone()),
        }
        Ok(fence)
    }

    fn read_syncpoint(&self, id: u32) -> Result<u32> {
        self.syncpoints.read(id)
    }

    fn wait_syncpoint(&self, id: u32, threshold: u32, timeout: Timeout) -> Result<WaitOutcome> {
        self.syncpoints.wait(id, threshold, timeout)
    }
}
