//! Userspace host1x command submission.
//!
//! This crate re-exports the two layers of the stack:
//! - [`stream`]: the host1x opcode codec, decoder and disassembler,
//! - [`host1x`]: buffer objects, pushbuffers, jobs, clients and syncpoint waits.
//!
//! The most common types are also available at the crate root.
#![forbid(unsafe_code)]

pub use grate_host1x as host1x;
pub use grate_stream as stream;

pub use grate_host1x::{
    BoFlags, BufferObject, Client, Fence, Host1x, Host1xConfig, Host1xError, Job, JobState,
    PushBuffer, Result, Timeout, WaitOutcome,
};
pub use grate_stream::{Header, Opcode, StreamWriter};

use tracing::debug;

/// Disassembles every pushbuffer of `job`, one section per pushbuffer.
pub fn disassemble_job(job: &Job) -> Result<String> {
    let mut out = String::new();
    let mut anomalies = 0;
    for (i, pushbuf) in job.pushbufs().iter().enumerate() {
        out.push_str(&format!(
            "; pushbuffer {i}: bo {} +{:#x}, {} words, {} relocations\n",
            pushbuf.bo().handle(),
            pushbuf.bo().offset() + pushbuf.start(),
            pushbuf.len(),
            pushbuf.relocations().len()
        ));
        anomalies += stream::disassemble_into(&pushbuf.words()?, &mut out);
    }
    if anomalies > 0 {
        debug!(anomalies, "job stream contains undecodable words");
    }
    Ok(out)
}
