//! Jobs: an ordered set of pushbuffers submitted together against one syncpoint.
//!
//! ```text
//! Created --append--> Building --submit--> Submitted --flush--> Flushed --wait--> Complete
//!                                                                  |  ^
//!                                                               wait  wait
//!                                                                  v  |
//!                                                                TimedOut
//! ```

use std::collections::HashSet;

use crate::bo::BufferObject;
use crate::device::{BoHandle, ChannelId, Submission};
use crate::error::{Host1xError, Result};
use crate::fence::{Fence, WaitOutcome};
use crate::pushbuf::PushBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Building,
    Submitted,
    Flushed,
    Complete,
    TimedOut,
}

#[derive(Debug)]
pub struct Job {
    syncpoint: u32,
    increments: u32,
    pushbufs: Vec<PushBuffer>,
    state: JobState,
    /// Assigned at submit; handed out from flush on.
    fence: Option<Fence>,
}

impl Job {
    pub fn new(syncpoint: u32, increments: u32) -> Self {
        Self {
            syncpoint,
            increments,
            pushbufs: Vec::new(),
            state: JobState::Created,
            fence: None,
        }
    }

    pub fn syncpoint(&self) -> u32 {
        self.syncpoint
    }

    pub fn increments(&self) -> u32 {
        self.increments
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The completion fence, once the job has been flushed.
    pub fn fence(&self) -> Option<Fence> {
        match self.state {
            JobState::Flushed | JobState::Complete | JobState::TimedOut => self.fence,
            _ => None,
        }
    }

    pub fn pushbufs(&self) -> &[PushBuffer] {
        &self.pushbufs
    }

    pub fn relocation_count(&self) -> usize {
        self.pushbufs.iter().map(|pb| pb.relocations().len()).sum()
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            JobState::Created | JobState::Building => Ok(()),
            state => Err(Host1xError::InvalidState {
                state,
                expected: "Created or Building",
            }),
        }
    }

    /// Opens a pushbuffer over the mapped `bo` at byte `offset` and attaches it to the job.
    pub fn append(&mut self, bo: &BufferObject, offset: u64) -> Result<&mut PushBuffer> {
        self.ensure_building()?;
        let pushbuf = PushBuffer::open(bo, offset)?;
        self.pushbufs.push(pushbuf);
        self.state = JobState::Building;
        let index = self.pushbufs.len() - 1;
        Ok(&mut self.pushbufs[index])
    }

    /// The pushbuffer attached at `index`, for further writes. Fails once the job is submitted.
    pub fn pushbuf_mut(&mut self, index: usize) -> Result<&mut PushBuffer> {
        self.ensure_building()?;
        self.pushbufs
            .get_mut(index)
            .ok_or(Host1xError::NoPushBuffer { index })
    }

    /// Translates the job into a device submission.
    ///
    /// Fails if the job has no pushbuffers or if two relocations would patch the same word.
    pub fn to_submission(&self, channel: ChannelId) -> Result<Submission> {
        if self.pushbufs.is_empty() {
            return Err(Host1xError::EmptyJob);
        }

        let cmdbufs = self
            .pushbufs
            .iter()
            .map(PushBuffer::cmdbuf_desc)
            .collect::<Result<Vec<_>>>()?;

        let mut relocs = Vec::with_capacity(self.relocation_count());
        let mut patched = HashSet::with_capacity(relocs.capacity());
        for pushbuf in &self.pushbufs {
            for reloc in pushbuf.reloc_descs() {
                let reloc = reloc?;
                if !patched.insert((reloc.src_handle, reloc.src_offset)) {
                    return Err(Host1xError::OverlappingRelocation {
                        handle: BoHandle(reloc.src_handle),
                        offset: u64::from(reloc.src_offset),
                    });
                }
                relocs.push(reloc);
            }
        }

        Ok(Submission {
            channel,
            syncpoint: self.syncpoint,
            increments: self.increments,
            cmdbufs,
            relocs,
        })
    }

    pub(crate) fn ensure_submittable(&self) -> Result<()> {
        match self.state {
            JobState::Created => Err(Host1xError::EmptyJob),
            JobState::Building => Ok(()),
            state => Err(Host1xError::InvalidState {
                state,
                expected: "Building",
            }),
        }
    }

    pub(crate) fn mark_submitted(&mut self, fence: Fence) {
        self.fence = Some(fence);
        self.state = JobState::Submitted;
    }

    /// Moves a submitted job to `Flushed`. Flushing again returns the same fence.
    pub(crate) fn mark_flushed(&mut self) -> Result<Fence> {
        match (self.state, self.fence) {
            (JobState::Submitted, Some(fence)) => {
                self.state = JobState::Flushed;
                Ok(fence)
            }
            (JobState::Flushed | JobState::Complete | JobState::TimedOut, Some(fence)) => Ok(fence),
            (state, _) => Err(Host1xError::InvalidState {
                state,
                expected: "Submitted",
            }),
        }
    }

    /// The fence a wait should block on.
    pub(crate) fn waitable_fence(&self) -> Result<Fence> {
        match (self.state, self.fence) {
            (JobState::Flushed | JobState::Complete | JobState::TimedOut, Some(fence)) => Ok(fence),
            (state, _) => Err(Host1xError::InvalidState {
                state,
                expected: "Flushed",
            }),
        }
    }

    pub(crate) fn record_wait(&mut self, outcome: WaitOutcome) {
        if self.state == JobState::Complete {
            return;
        }
        self.state = match outcome {
            WaitOutcome::Completed => JobState::Complete,
            WaitOutcome::TimedOut => JobState::TimedOut,
        };
    }
}
