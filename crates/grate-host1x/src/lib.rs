//! host1x command submission.
//!
//! The flow is: allocate and map [`BufferObject`]s, build a [`Job`] out of [`PushBuffer`]s
//! over them, then `submit`, `flush` and `wait` through a [`Client`]. Completion is tracked by
//! syncpoints, 32-bit hardware counters the command stream increments; a [`Fence`] names the
//! value that marks a job as done.
//!
//! Hardware access goes through the [`Device`] trait. [`dummy::DummyDevice`] implements it in
//! host memory and executes streams by decoding them.
#![forbid(unsafe_code)]

pub mod bo;
pub mod client;
pub mod config;
pub mod device;
pub mod dummy;
pub mod error;
pub mod fence;
pub mod job;
pub mod pushbuf;

pub use bo::{BoKind, BufferObject, Mapping};
pub use client::{default_probes, Client, DeviceProbe, DummyProbe, Host1x};
pub use config::{BackendPreference, DummyCompletionMode, DummyConfig, Host1xConfig};
pub use device::{
    BoFlags, BoHandle, ChannelId, ChannelInfo, CmdBufDesc, CpuMemory, Device, RelocDesc,
    Submission,
};
pub use dummy::{DummyDevice, DummyStats};
pub use error::{Host1xError, Result};
pub use fence::{syncpoint_reached, Fence, Timeout, WaitOutcome};
pub use job::{Job, JobState};
pub use pushbuf::{PushBuffer, Relocation, RELOC_PLACEHOLDER};
